use std::ffi::CString;
use std::io;

use windows::Win32::System::Diagnostics::Debug::OutputDebugStringA;
use windows::core::PCSTR;

/// `io::Write` sink that forwards each formatted event to the debugger.
///
/// Bytes are buffered until the writer is flushed or dropped, so one
/// tracing event becomes one `OutputDebugStringA` call.
#[derive(Default)]
pub struct DebugOutputWriter {
    pending: Vec<u8>,
}

impl DebugOutputWriter {
    fn emit(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.pending.retain(|byte| *byte != 0);
        if let Ok(text) = CString::new(std::mem::take(&mut self.pending)) {
            unsafe { OutputDebugStringA(PCSTR(text.as_ptr() as *const u8)) };
        }
    }
}

impl io::Write for DebugOutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit();
        Ok(())
    }
}

impl Drop for DebugOutputWriter {
    fn drop(&mut self) {
        self.emit();
    }
}
