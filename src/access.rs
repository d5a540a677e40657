//! Accessor-based copy paths.
//!
//! Both paths obtain a byte pointer from the provider and copy
//! `min(capacity, row_stride * height)` bytes through the fault boundary.
//! Any failing step abandons the path; the caller decides what to try next.

use std::ptr::NonNull;

use crate::error::{ExtractError, ExtractResult};
use crate::frame::FrameMetadata;
use crate::platform::FaultBoundary;
use crate::provider::{BufferAccessMode, LegacyFrame, VideoBuffer};

/// Read window on a [`VideoBuffer`]; `end_access` runs on drop.
struct AccessWindow<'b, 'a> {
    buffer: &'b mut (dyn VideoBuffer + 'a),
    mode: BufferAccessMode,
}

impl<'b, 'a> AccessWindow<'b, 'a> {
    fn open(buffer: &'b mut (dyn VideoBuffer + 'a), mode: BufferAccessMode) -> ExtractResult<Self> {
        buffer.start_access(mode)?;
        Ok(Self { buffer, mode })
    }

    fn bytes(&mut self) -> ExtractResult<NonNull<u8>> {
        self.buffer.bytes()
    }
}

impl Drop for AccessWindow<'_, '_> {
    fn drop(&mut self) {
        if let Err(err) = self.buffer.end_access(self.mode) {
            tracing::warn!(%err, "EndAccess failed");
        }
    }
}

/// StartAccess → GetBytes → copy → EndAccess.
///
/// Returns the number of bytes written to `dst`.
pub fn copy_buffered(
    buffer: &mut dyn VideoBuffer,
    mode: BufferAccessMode,
    meta: &FrameMetadata,
    dst: &mut [u8],
    boundary: &dyn FaultBoundary,
) -> ExtractResult<usize> {
    let len = meta.copy_len(dst.len())?;
    let mut window = AccessWindow::open(buffer, mode)?;
    let src = window.bytes()?;
    copy_foreign(boundary, src, &mut dst[..len], "video-buffer copy")?;
    drop(window);
    Ok(len)
}

/// Single GetBytes call on the older generation, then copy.
pub fn copy_legacy(
    frame: &mut dyn LegacyFrame,
    meta: &FrameMetadata,
    dst: &mut [u8],
    boundary: &dyn FaultBoundary,
) -> ExtractResult<usize> {
    let len = meta.copy_len(dst.len())?;
    let src = frame.bytes()?;
    copy_foreign(boundary, src, &mut dst[..len], "legacy copy")?;
    Ok(len)
}

fn copy_foreign(
    boundary: &dyn FaultBoundary,
    src: NonNull<u8>,
    dst: &mut [u8],
    site: &'static str,
) -> ExtractResult<()> {
    unsafe { boundary.read(src.as_ptr(), dst) }.map_err(|fault| ExtractError::fault(site, fault))
}
