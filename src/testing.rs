//! In-memory frame providers and synthetic frames for unit tests.

use std::cell::Cell;
use std::ptr::NonNull;

use windows::Win32::Foundation::{E_FAIL, E_NOINTERFACE};

use crate::error::{ExtractError, ExtractResult};
use crate::frame::{FrameMetadata, PixelFormat, UYVY_BLACK};
use crate::provider::{BufferAccessMode, Capability, FrameProvider, LegacyFrame, VideoBuffer};

/// 4:2:2 frame with a luma ramp and mild chroma variation.
pub(crate) fn uyvy_gradient(width: i32, height: i32, row_stride: i32) -> (FrameMetadata, Vec<u8>) {
    let meta = FrameMetadata {
        width,
        height,
        row_stride,
        pixel_format: PixelFormat::UYVY_8BIT,
        flags: 0,
    };
    let stride = row_stride as usize;
    let active = width as usize * 2;
    let mut pixels = vec![0u8; stride * height as usize];
    for (y, row) in pixels.chunks_exact_mut(stride).enumerate() {
        for (i, byte) in row.iter_mut().enumerate() {
            *byte = if i >= active {
                UYVY_BLACK[i % 4]
            } else {
                let x = i / 4;
                match i % 4 {
                    0 => 112 + ((x * 3 + y) % 32) as u8,
                    2 => 112 + ((x * 5 + y * 3) % 32) as u8,
                    _ => 16 + ((i * 7 + y * 13) % 220) as u8,
                }
            };
        }
    }
    (meta, pixels)
}

/// Opaque 4-bytes-per-pixel data behind a 4:2:2 geometry.
pub(crate) fn bgra_opaque(width: i32, height: i32, row_stride: i32) -> (FrameMetadata, Vec<u8>) {
    let (meta, mut pixels) = uyvy_gradient(width, height, row_stride);
    for (i, group) in pixels.chunks_exact_mut(4).enumerate() {
        group[0] = (i * 37 % 251) as u8;
        group[1] = (i * 11 % 241) as u8;
        group[2] = (i * 23 % 239) as u8;
        group[3] = 0xFF;
    }
    (meta, pixels)
}

/// Independent pseudo-random bytes in `0..=254` for every lane.
pub(crate) fn uniform_noise(width: i32, height: i32, row_stride: i32) -> (FrameMetadata, Vec<u8>) {
    let (meta, mut pixels) = uyvy_gradient(width, height, row_stride);
    let mut state: u32 = 0x1234_5678;
    for byte in pixels.iter_mut() {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *byte = ((state >> 24) % 255) as u8;
    }
    (meta, pixels)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct CallCounts {
    pub metadata_calls: u32,
    pub buffer_queries: u32,
    pub buffer_releases: u32,
    pub start_calls: u32,
    pub bytes_calls: u32,
    pub end_calls: u32,
    pub legacy_queries: u32,
    pub legacy_releases: u32,
    pub legacy_bytes_calls: u32,
    pub add_refs: u32,
    pub releases: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BufferBehavior {
    Works,
    StartFails,
    BytesFail,
    NullBytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LegacyBehavior {
    Works,
    Fails,
    NullBytes,
}

pub(crate) const RAW_IMAGE_LEN: usize = 512;

pub(crate) struct MockProvider {
    meta: FrameMetadata,
    pixels: Vec<u8>,
    valid: bool,
    metadata_ok: bool,
    buffer: Option<BufferBehavior>,
    legacy: Option<LegacyBehavior>,
    raw_image: Vec<u8>,
    calls: Cell<CallCounts>,
}

impl MockProvider {
    pub(crate) fn new((meta, pixels): (FrameMetadata, Vec<u8>)) -> Self {
        Self {
            meta,
            pixels,
            valid: true,
            metadata_ok: true,
            buffer: None,
            legacy: None,
            raw_image: vec![0u8; RAW_IMAGE_LEN],
            calls: Cell::new(CallCounts::default()),
        }
    }

    pub(crate) fn with_video_buffer(self) -> Self {
        self.with_buffer_behavior(BufferBehavior::Works)
    }

    pub(crate) fn with_buffer_behavior(mut self, behavior: BufferBehavior) -> Self {
        self.buffer = Some(behavior);
        self
    }

    pub(crate) fn with_legacy_frame(self) -> Self {
        self.with_legacy_behavior(LegacyBehavior::Works)
    }

    pub(crate) fn with_legacy_behavior(mut self, behavior: LegacyBehavior) -> Self {
        self.legacy = Some(behavior);
        self
    }

    pub(crate) fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub(crate) fn without_metadata(mut self) -> Self {
        self.metadata_ok = false;
        self
    }

    /// Stores `pointer` inside the object's image at byte `offset`.
    pub(crate) fn with_raw_pointer(mut self, offset: usize, pointer: usize) -> Self {
        let bytes = pointer.to_ne_bytes();
        self.raw_image[offset..offset + bytes.len()].copy_from_slice(&bytes);
        self
    }

    /// Stores the address of this provider's own pixels at `offset`.
    pub(crate) fn with_raw_pixels_at(self, offset: usize) -> Self {
        let pointer = self.pixels.as_ptr() as usize;
        self.with_raw_pointer(offset, pointer)
    }

    pub(crate) fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn pixels_address(&self) -> usize {
        self.pixels.as_ptr() as usize
    }

    pub(crate) fn calls(&self) -> CallCounts {
        self.calls.get()
    }

    fn bump(&self, update: impl FnOnce(&mut CallCounts)) {
        let mut calls = self.calls.get();
        update(&mut calls);
        self.calls.set(calls);
    }

    fn pixel_pointer(&self) -> ExtractResult<NonNull<u8>> {
        NonNull::new(self.pixels.as_ptr() as *mut u8).ok_or(ExtractError::NullPointer("GetBytes"))
    }
}

impl FrameProvider for MockProvider {
    fn validate(&self) -> ExtractResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(ExtractError::InvalidHandle(E_NOINTERFACE))
        }
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Identity => self.valid,
            Capability::VideoFrame | Capability::VideoInputFrame => self.valid,
            Capability::VideoBuffer => self.buffer.is_some(),
            Capability::LegacyInputFrame => self.legacy.is_some(),
        }
    }

    fn metadata(&self) -> ExtractResult<FrameMetadata> {
        self.bump(|c| c.metadata_calls += 1);
        if self.metadata_ok {
            Ok(self.meta)
        } else {
            Err(ExtractError::MetadataUnavailable)
        }
    }

    fn video_buffer(&self) -> ExtractResult<Box<dyn VideoBuffer + '_>> {
        self.bump(|c| c.buffer_queries += 1);
        match self.buffer {
            Some(behavior) => Ok(Box::new(MockVideoBuffer {
                provider: self,
                behavior,
            })),
            None => Err(ExtractError::CapabilityAbsent(Capability::VideoBuffer)),
        }
    }

    fn legacy_frame(&self) -> ExtractResult<Box<dyn LegacyFrame + '_>> {
        self.bump(|c| c.legacy_queries += 1);
        match self.legacy {
            Some(behavior) => Ok(Box::new(MockLegacyFrame {
                provider: self,
                behavior,
            })),
            None => Err(ExtractError::CapabilityAbsent(Capability::LegacyInputFrame)),
        }
    }

    fn add_ref(&self) -> ExtractResult<u32> {
        self.bump(|c| c.add_refs += 1);
        Ok(2)
    }

    fn release(&self) -> ExtractResult<u32> {
        self.bump(|c| c.releases += 1);
        Ok(1)
    }

    fn object_address(&self) -> usize {
        self.raw_image.as_ptr() as usize
    }
}

struct MockVideoBuffer<'a> {
    provider: &'a MockProvider,
    behavior: BufferBehavior,
}

impl VideoBuffer for MockVideoBuffer<'_> {
    fn start_access(&mut self, mode: BufferAccessMode) -> ExtractResult<()> {
        assert_eq!(mode, BufferAccessMode::Read);
        self.provider.bump(|c| c.start_calls += 1);
        if self.behavior == BufferBehavior::StartFails {
            return Err(ExtractError::Status {
                call: "StartAccess",
                hresult: E_FAIL,
            });
        }
        Ok(())
    }

    fn bytes(&mut self) -> ExtractResult<NonNull<u8>> {
        self.provider.bump(|c| c.bytes_calls += 1);
        match self.behavior {
            BufferBehavior::BytesFail => Err(ExtractError::Status {
                call: "GetBytes",
                hresult: E_FAIL,
            }),
            BufferBehavior::NullBytes => Err(ExtractError::NullPointer("GetBytes")),
            _ => self.provider.pixel_pointer(),
        }
    }

    fn end_access(&mut self, _mode: BufferAccessMode) -> ExtractResult<()> {
        self.provider.bump(|c| c.end_calls += 1);
        Ok(())
    }
}

impl Drop for MockVideoBuffer<'_> {
    fn drop(&mut self) {
        self.provider.bump(|c| c.buffer_releases += 1);
    }
}

struct MockLegacyFrame<'a> {
    provider: &'a MockProvider,
    behavior: LegacyBehavior,
}

impl LegacyFrame for MockLegacyFrame<'_> {
    fn bytes(&mut self) -> ExtractResult<NonNull<u8>> {
        self.provider.bump(|c| c.legacy_bytes_calls += 1);
        match self.behavior {
            LegacyBehavior::Works => self.provider.pixel_pointer(),
            LegacyBehavior::Fails => Err(ExtractError::Status {
                call: "GetBytes(v14.2.1)",
                hresult: E_FAIL,
            }),
            LegacyBehavior::NullBytes => Err(ExtractError::NullPointer("GetBytes(v14.2.1)")),
        }
    }
}

impl Drop for MockLegacyFrame<'_> {
    fn drop(&mut self) {
        self.provider.bump(|c| c.legacy_releases += 1);
    }
}
