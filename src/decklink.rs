//! DeckLink input-frame objects seen through their binary layout.
//!
//! Only interface identifiers and table slot positions are relied on.
//! Table layout as of SDK 14.3+:
//!
//! | interface                              | slot | call          |
//! |----------------------------------------|------|---------------|
//! | IDeckLinkVideoFrame                    | 3..7 | width, height, row bytes, pixel format, flags |
//! | IDeckLinkVideoBuffer                   | 3    | GetBytes      |
//! |                                        | 4    | StartAccess   |
//! |                                        | 5    | EndAccess     |
//! | IDeckLinkVideoInputFrame_v14_2_1       | 8    | GetBytes      |

use std::ffi::c_void;
use std::ptr::NonNull;

use windows::Win32::Foundation::E_POINTER;
use windows::core::{GUID, HRESULT};

use crate::com::{IID_IUNKNOWN, OwnedInterface, QueryError, RawInterface};
use crate::error::{ExtractError, ExtractResult, Fault};
use crate::frame::{FrameInfo, FrameMetadata, PixelFormat};
use crate::platform::FaultBoundary;
use crate::provider::{BufferAccessMode, Capability, FrameProvider, LegacyFrame, VideoBuffer};

pub const IID_IDECKLINK_VIDEO_FRAME: GUID =
    GUID::from_u128(0x6502091C_615F_4F51_BAF6_45C4256DD5B0);
pub const IID_IDECKLINK_VIDEO_INPUT_FRAME: GUID =
    GUID::from_u128(0xC9ADD3D2_BE52_488D_AB2D_7FDEF7AF0C95);
pub const IID_IDECKLINK_VIDEO_BUFFER: GUID =
    GUID::from_u128(0xCCB4B64A_5C86_4E02_B778_885D352709FE);
/// Input frame from SDK 14.2.1 and older; still answered by newer drivers.
pub const IID_IDECKLINK_VIDEO_INPUT_FRAME_V14_2_1: GUID =
    GUID::from_u128(0x05CFE374_537C_4094_9A57_680525118F44);

pub const SLOT_WIDTH: usize = 3;
pub const SLOT_HEIGHT: usize = 4;
pub const SLOT_ROW_BYTES: usize = 5;
pub const SLOT_PIXEL_FORMAT: usize = 6;
pub const SLOT_FLAGS: usize = 7;

pub const SLOT_BUFFER_GET_BYTES: usize = 3;
pub const SLOT_BUFFER_START_ACCESS: usize = 4;
pub const SLOT_BUFFER_END_ACCESS: usize = 5;

pub const SLOT_LEGACY_GET_BYTES: usize = 8;

pub type GetLongFn = unsafe extern "system" fn(*mut c_void) -> i32;
pub type GetU32Fn = unsafe extern "system" fn(*mut c_void) -> u32;
pub type GetBytesFn = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HRESULT;
pub type AccessFn = unsafe extern "system" fn(*mut c_void, u32) -> HRESULT;

fn capability_iid(capability: Capability) -> &'static GUID {
    match capability {
        Capability::Identity => &IID_IUNKNOWN,
        Capability::VideoFrame => &IID_IDECKLINK_VIDEO_FRAME,
        Capability::VideoInputFrame => &IID_IDECKLINK_VIDEO_INPUT_FRAME,
        Capability::VideoBuffer => &IID_IDECKLINK_VIDEO_BUFFER,
        Capability::LegacyInputFrame => &IID_IDECKLINK_VIDEO_INPUT_FRAME_V14_2_1,
    }
}

/// Caller-owned frame handle. Holds no reference of its own.
#[derive(Clone, Copy, Debug)]
pub struct DeckLinkFrame<'a> {
    raw: RawInterface<'a>,
}

impl<'a> DeckLinkFrame<'a> {
    /// # Safety
    /// `ptr` must be null or a frame object the caller keeps alive for
    /// `'a`. Table contents are still checked through `boundary`.
    pub unsafe fn from_raw(ptr: *mut c_void, boundary: &'a dyn FaultBoundary) -> Option<Self> {
        unsafe { RawInterface::from_raw(ptr, boundary) }.map(|raw| Self { raw })
    }

    pub fn raw(&self) -> &RawInterface<'a> {
        &self.raw
    }

    fn query(
        &self,
        capability: Capability,
        site: &'static str,
    ) -> ExtractResult<OwnedInterface<'a>> {
        self.raw
            .query_interface(capability_iid(capability))
            .map_err(|err| match err {
                QueryError::Status(_) => ExtractError::CapabilityAbsent(capability),
                QueryError::Fault(fault) => ExtractError::fault(site, fault),
            })
    }

    /// Resolves all five accessors before calling any of them.
    fn read_metadata(&self) -> Result<FrameMetadata, Fault> {
        unsafe {
            let width: GetLongFn = self.raw.slot(SLOT_WIDTH)?;
            let height: GetLongFn = self.raw.slot(SLOT_HEIGHT)?;
            let row_bytes: GetLongFn = self.raw.slot(SLOT_ROW_BYTES)?;
            let pixel_format: GetU32Fn = self.raw.slot(SLOT_PIXEL_FORMAT)?;
            let flags: GetU32Fn = self.raw.slot(SLOT_FLAGS)?;
            let this = self.raw.as_raw();
            Ok(FrameMetadata {
                width: width(this),
                height: height(this),
                row_stride: row_bytes(this),
                pixel_format: PixelFormat(pixel_format(this)),
                flags: flags(this),
            })
        }
    }

    fn read_info(&self) -> Result<FrameInfo, Fault> {
        unsafe {
            let width: GetLongFn = self.raw.slot(SLOT_WIDTH)?;
            let height: GetLongFn = self.raw.slot(SLOT_HEIGHT)?;
            let row_bytes: GetLongFn = self.raw.slot(SLOT_ROW_BYTES)?;
            let flags: GetU32Fn = self.raw.slot(SLOT_FLAGS)?;
            let this = self.raw.as_raw();
            Ok(FrameInfo {
                width: width(this),
                height: height(this),
                row_stride: row_bytes(this),
                flags: flags(this),
            })
        }
    }
}

impl FrameProvider for DeckLinkFrame<'_> {
    fn validate(&self) -> ExtractResult<()> {
        match self.raw.query_interface(&IID_IUNKNOWN) {
            Ok(_identity) => Ok(()),
            Err(QueryError::Status(hr)) => Err(ExtractError::InvalidHandle(hr)),
            Err(QueryError::Fault(fault)) => {
                tracing::debug!(%fault, "identity query faulted");
                Err(ExtractError::InvalidHandle(E_POINTER))
            }
        }
    }

    fn supports(&self, capability: Capability) -> bool {
        self.raw.query_interface(capability_iid(capability)).is_ok()
    }

    fn metadata(&self) -> ExtractResult<FrameMetadata> {
        self.read_metadata().map_err(|fault| {
            tracing::debug!(%fault, "frame accessor table unusable");
            ExtractError::MetadataUnavailable
        })
    }

    fn frame_info(&self) -> ExtractResult<FrameInfo> {
        self.read_info().map_err(|fault| {
            tracing::debug!(%fault, "frame accessor table unusable");
            ExtractError::MetadataUnavailable
        })
    }

    fn video_buffer(&self) -> ExtractResult<Box<dyn VideoBuffer + '_>> {
        let iface = self.query(Capability::VideoBuffer, "QueryInterface(IDeckLinkVideoBuffer)")?;
        Ok(Box::new(DeckLinkVideoBuffer { iface }))
    }

    fn legacy_frame(&self) -> ExtractResult<Box<dyn LegacyFrame + '_>> {
        let iface = self.query(
            Capability::LegacyInputFrame,
            "QueryInterface(IDeckLinkVideoInputFrame_v14_2_1)",
        )?;
        Ok(Box::new(DeckLinkLegacyFrame { iface }))
    }

    fn add_ref(&self) -> ExtractResult<u32> {
        self.raw
            .add_ref()
            .map_err(|fault| ExtractError::fault("AddRef", fault))
    }

    fn release(&self) -> ExtractResult<u32> {
        self.raw
            .release()
            .map_err(|fault| ExtractError::fault("Release", fault))
    }

    fn object_address(&self) -> usize {
        self.raw.as_raw() as usize
    }
}

fn call_get_bytes(
    raw: &RawInterface<'_>,
    slot: usize,
    call: &'static str,
) -> ExtractResult<NonNull<u8>> {
    let get_bytes: GetBytesFn =
        unsafe { raw.slot(slot) }.map_err(|fault| ExtractError::fault(call, fault))?;
    let mut bytes: *mut c_void = std::ptr::null_mut();
    let hresult = unsafe { get_bytes(raw.as_raw(), &mut bytes) };
    if hresult.is_err() {
        return Err(ExtractError::Status { call, hresult });
    }
    NonNull::new(bytes.cast::<u8>()).ok_or(ExtractError::NullPointer(call))
}

fn call_access(
    raw: &RawInterface<'_>,
    slot: usize,
    mode: BufferAccessMode,
    call: &'static str,
) -> ExtractResult<()> {
    let access: AccessFn =
        unsafe { raw.slot(slot) }.map_err(|fault| ExtractError::fault(call, fault))?;
    let hresult = unsafe { access(raw.as_raw(), mode as u32) };
    if hresult.is_ok() {
        Ok(())
    } else {
        Err(ExtractError::Status { call, hresult })
    }
}

struct DeckLinkVideoBuffer<'a> {
    iface: OwnedInterface<'a>,
}

impl VideoBuffer for DeckLinkVideoBuffer<'_> {
    fn start_access(&mut self, mode: BufferAccessMode) -> ExtractResult<()> {
        call_access(self.iface.raw(), SLOT_BUFFER_START_ACCESS, mode, "StartAccess")
    }

    fn bytes(&mut self) -> ExtractResult<NonNull<u8>> {
        call_get_bytes(self.iface.raw(), SLOT_BUFFER_GET_BYTES, "GetBytes")
    }

    fn end_access(&mut self, mode: BufferAccessMode) -> ExtractResult<()> {
        call_access(self.iface.raw(), SLOT_BUFFER_END_ACCESS, mode, "EndAccess")
    }
}

struct DeckLinkLegacyFrame<'a> {
    iface: OwnedInterface<'a>,
}

impl LegacyFrame for DeckLinkLegacyFrame<'_> {
    fn bytes(&mut self) -> ExtractResult<NonNull<u8>> {
        call_get_bytes(self.iface.raw(), SLOT_LEGACY_GET_BYTES, "GetBytes(v14.2.1)")
    }
}
