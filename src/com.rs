//! Minimal binary-level COM plumbing.
//!
//! Only the layout matters here: an object is a pointer to a pointer to a
//! table of `extern "system"` functions whose first three entries are the
//! `IUnknown` methods. Nothing in this module assumes a particular SDK
//! generation; callers name table slots explicitly and every call is
//! vetted through a [`FaultBoundary`] first.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use windows::Win32::Foundation::E_POINTER;
use windows::core::{GUID, HRESULT};

use crate::error::Fault;
use crate::platform::FaultBoundary;

pub const IID_IUNKNOWN: GUID = GUID::from_u128(0x00000000_0000_0000_C000_000000000046);

pub const SLOT_QUERY_INTERFACE: usize = 0;
pub const SLOT_ADD_REF: usize = 1;
pub const SLOT_RELEASE: usize = 2;

pub type QueryInterfaceFn =
    unsafe extern "system" fn(*mut c_void, *const GUID, *mut *mut c_void) -> HRESULT;
pub type AddRefFn = unsafe extern "system" fn(*mut c_void) -> u32;
pub type ReleaseFn = unsafe extern "system" fn(*mut c_void) -> u32;

/// `IUnknown` table prefix shared by every interface.
#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface: QueryInterfaceFn,
    pub add_ref: AddRefFn,
    pub release: ReleaseFn,
}

/// Borrowed interface pointer. Carries no reference of its own.
#[derive(Clone, Copy)]
pub struct RawInterface<'a> {
    ptr: NonNull<c_void>,
    boundary: &'a dyn FaultBoundary,
}

impl<'a> RawInterface<'a> {
    /// # Safety
    /// `ptr` must be null or point at a COM object that outlives `'a`.
    pub unsafe fn from_raw(ptr: *mut c_void, boundary: &'a dyn FaultBoundary) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, boundary })
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    pub fn boundary(&self) -> &'a dyn FaultBoundary {
        self.boundary
    }

    /// Looks up table slot `index` and reinterprets it as `F`.
    ///
    /// The lookup happens on every call; tables are never cached.
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the slot's real
    /// signature.
    pub unsafe fn slot<F: Copy>(&self, index: usize) -> Result<F, Fault> {
        debug_assert_eq!(size_of::<F>(), size_of::<*const c_void>());
        unsafe {
            self.boundary.check_call(self.ptr.as_ptr(), index)?;
            let table = *(self.ptr.as_ptr() as *const *const *const c_void);
            let entry = *table.add(index);
            Ok(std::mem::transmute_copy::<*const c_void, F>(&entry))
        }
    }

    /// Queries `iid`. A failing status means the capability is absent.
    pub fn query_interface(&self, iid: &GUID) -> Result<OwnedInterface<'a>, QueryError> {
        let query: QueryInterfaceFn =
            unsafe { self.slot(SLOT_QUERY_INTERFACE) }.map_err(QueryError::Fault)?;
        let mut out: *mut c_void = std::ptr::null_mut();
        let hr = unsafe { query(self.as_raw(), iid, &mut out) };
        if hr.is_err() {
            return Err(QueryError::Status(hr));
        }
        match unsafe { Self::from_raw(out, self.boundary) } {
            Some(raw) => Ok(OwnedInterface { raw }),
            None => Err(QueryError::Status(E_POINTER)),
        }
    }

    pub fn add_ref(&self) -> Result<u32, Fault> {
        let add_ref: AddRefFn = unsafe { self.slot(SLOT_ADD_REF) }?;
        Ok(unsafe { add_ref(self.as_raw()) })
    }

    /// Drops one reference. Pairs with a successful [`add_ref`](Self::add_ref)
    /// or an interface returned by a query.
    pub fn release(&self) -> Result<u32, Fault> {
        let release: ReleaseFn = unsafe { self.slot(SLOT_RELEASE) }?;
        Ok(unsafe { release(self.as_raw()) })
    }
}

impl fmt::Debug for RawInterface<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawInterface({:p})", self.ptr)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryError {
    Status(HRESULT),
    Fault(Fault),
}

/// Interface pointer holding one reference, released on drop.
pub struct OwnedInterface<'a> {
    raw: RawInterface<'a>,
}

impl<'a> OwnedInterface<'a> {
    pub fn raw(&self) -> &RawInterface<'a> {
        &self.raw
    }
}

impl Drop for OwnedInterface<'_> {
    fn drop(&mut self) {
        if let Err(fault) = self.raw.release() {
            tracing::warn!(interface = ?self.raw, %fault, "could not release interface reference");
        }
    }
}
