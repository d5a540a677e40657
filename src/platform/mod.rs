use std::ffi::c_void;
use std::sync::Arc;

use crate::error::Fault;

#[cfg(target_os = "windows")]
pub mod windows;

/// Converts hardware-level access faults on foreign memory into values.
///
/// Every indexed call into a foreign table and every raw dereference of a
/// foreign pointer goes through one of these methods, scoped to that
/// single access.
pub trait FaultBoundary: Send + Sync {
    /// Checks that `object` has a readable table pointer, that table slot
    /// `slot` is readable and that its entry points at executable code.
    ///
    /// # Safety
    /// Implementations that cannot probe memory dereference `object`
    /// directly; the caller must then guarantee it is a live object.
    unsafe fn check_call(&self, object: *const c_void, slot: usize) -> Result<(), Fault>;

    /// Copies `dst.len()` bytes starting at `src` into `dst`.
    ///
    /// On error `dst` holds no source bytes.
    ///
    /// # Safety
    /// Implementations that cannot probe memory read `src` directly; the
    /// caller must then guarantee the whole range is readable.
    unsafe fn read(&self, src: *const u8, dst: &mut [u8]) -> Result<(), Fault>;

    /// Reads one native-width pointer stored at `src`.
    ///
    /// # Safety
    /// Same contract as [`read`](Self::read).
    unsafe fn read_pointer(&self, src: *const u8) -> Result<usize, Fault> {
        let mut raw = [0u8; size_of::<usize>()];
        unsafe { self.read(src, &mut raw)? };
        Ok(usize::from_ne_bytes(raw))
    }

    /// Short name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Trusts every address it is handed. Only rejects null pointers.
///
/// Used on targets without a probing facility and for in-process fakes.
#[derive(Clone, Copy, Debug, Default)]
pub struct UncheckedMemory;

impl FaultBoundary for UncheckedMemory {
    unsafe fn check_call(&self, object: *const c_void, slot: usize) -> Result<(), Fault> {
        if object.is_null() {
            return Err(Fault::unreadable(0, size_of::<usize>()));
        }
        let table = unsafe { *(object as *const *const *const c_void) };
        if table.is_null() {
            return Err(Fault::unreadable(0, size_of::<usize>()));
        }
        let entry = unsafe { *table.add(slot) };
        if entry.is_null() {
            return Err(Fault::not_executable(0));
        }
        Ok(())
    }

    unsafe fn read(&self, src: *const u8, dst: &mut [u8]) -> Result<(), Fault> {
        if src.is_null() {
            return Err(Fault::unreadable(0, dst.len()));
        }
        unsafe { std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    fn name(&self) -> &'static str {
        "unchecked"
    }
}

#[cfg(target_os = "windows")]
pub fn default_fault_boundary() -> Arc<dyn FaultBoundary> {
    Arc::new(windows::ProcessMemory::new())
}

#[cfg(not(target_os = "windows"))]
pub fn default_fault_boundary() -> Arc<dyn FaultBoundary> {
    Arc::new(UncheckedMemory)
}
