use std::ffi::c_void;

use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE, PAGE_EXECUTE_READ,
    PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS,
    PAGE_PROTECTION_FLAGS, PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOPY, VirtualQuery,
};
use windows::Win32::System::Threading::GetCurrentProcess;

use crate::error::Fault;
use crate::platform::FaultBoundary;

const READABLE: u32 = PAGE_READONLY.0
    | PAGE_READWRITE.0
    | PAGE_WRITECOPY.0
    | PAGE_EXECUTE_READ.0
    | PAGE_EXECUTE_READWRITE.0
    | PAGE_EXECUTE_WRITECOPY.0;

const EXECUTABLE: u32 =
    PAGE_EXECUTE.0 | PAGE_EXECUTE_READ.0 | PAGE_EXECUTE_READWRITE.0 | PAGE_EXECUTE_WRITECOPY.0;

/// Probes the current process's address space before touching it.
///
/// Table lookups are vetted with `VirtualQuery`; bulk reads go through
/// `ReadProcessMemory` on our own process handle, which reports
/// unreadable pages as an error instead of raising an access violation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessMemory {
    _private: (),
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn query(address: usize) -> Option<MEMORY_BASIC_INFORMATION> {
        let mut info = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQuery(
                Some(address as *const c_void),
                &mut info,
                size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        (written != 0).then_some(info)
    }

    fn protection_allows(protect: PAGE_PROTECTION_FLAGS, wanted: u32) -> bool {
        protect.0 & (PAGE_GUARD.0 | PAGE_NOACCESS.0) == 0 && protect.0 & wanted != 0
    }

    /// Every page in `[address, address + len)` is committed and readable.
    fn is_readable(address: usize, len: usize) -> bool {
        if address == 0 {
            return false;
        }
        let Some(end) = address.checked_add(len.max(1)) else {
            return false;
        };
        let mut cursor = address;
        while cursor < end {
            let Some(info) = Self::query(cursor) else {
                return false;
            };
            if info.State != MEM_COMMIT || !Self::protection_allows(info.Protect, READABLE) {
                return false;
            }
            let region_end = (info.BaseAddress as usize).saturating_add(info.RegionSize);
            if region_end <= cursor {
                return false;
            }
            cursor = region_end;
        }
        true
    }

    fn is_executable(address: usize) -> bool {
        if address == 0 {
            return false;
        }
        match Self::query(address) {
            Some(info) => {
                info.State == MEM_COMMIT && Self::protection_allows(info.Protect, EXECUTABLE)
            }
            None => false,
        }
    }
}

/// Accepts a read only when every byte arrived. A failed or short read
/// leaves `dst` zeroed.
fn settle_read(
    dst: &mut [u8],
    address: usize,
    result: windows::core::Result<()>,
    copied: usize,
) -> Result<(), Fault> {
    match result {
        Ok(()) if copied == dst.len() => Ok(()),
        _ => {
            dst.fill(0);
            Err(Fault::read_failed(address, dst.len()))
        }
    }
}

impl FaultBoundary for ProcessMemory {
    unsafe fn check_call(&self, object: *const c_void, slot: usize) -> Result<(), Fault> {
        let table = unsafe { self.read_pointer(object as *const u8)? };
        let entry_address = slot
            .checked_mul(size_of::<usize>())
            .and_then(|offset| table.checked_add(offset))
            .ok_or(Fault::unreadable(table, size_of::<usize>()))?;
        let entry = unsafe { self.read_pointer(entry_address as *const u8)? };
        if !Self::is_executable(entry) {
            return Err(Fault::not_executable(entry));
        }
        Ok(())
    }

    unsafe fn read(&self, src: *const u8, dst: &mut [u8]) -> Result<(), Fault> {
        let address = src as usize;
        if dst.is_empty() {
            return Ok(());
        }
        if !Self::is_readable(address, dst.len()) {
            return Err(Fault::unreadable(address, dst.len()));
        }
        let mut copied = 0usize;
        #[allow(unused_unsafe)]
        let process = unsafe { GetCurrentProcess() };
        let result = unsafe {
            ReadProcessMemory(
                process,
                src as *const c_void,
                dst.as_mut_ptr() as *mut c_void,
                dst.len(),
                Some(&mut copied as *mut usize),
            )
        };
        settle_read(dst, address, result, copied)
    }

    fn name(&self) -> &'static str {
        "process-memory"
    }
}
