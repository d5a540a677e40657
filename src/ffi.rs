//! C entry points for host-language callers.
//!
//! The C ABI has no context argument, so both functions share one lazily
//! built extractor and diagnostics context for the whole process. No
//! panic crosses this boundary.

#![allow(non_snake_case)]

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use crate::decklink::DeckLinkFrame;
use crate::diagnostics::{self, Diagnostics};
use crate::extractor::FrameExtractor;
use crate::frame::ExtractionOutcome;

struct SharedContext {
    extractor: FrameExtractor,
    diagnostics: Diagnostics,
}

fn shared() -> &'static SharedContext {
    static CONTEXT: OnceLock<SharedContext> = OnceLock::new();
    CONTEXT.get_or_init(|| {
        let diagnostics = Diagnostics::from_env();
        if diagnostics.is_enabled() {
            if let Err(err) = diagnostics::init_tracing() {
                tracing::debug!(%err, "keeping the host's subscriber");
            }
        }
        SharedContext {
            extractor: FrameExtractor::from_env(),
            diagnostics,
        }
    })
}

const FAILURE: i32 = ExtractionOutcome::Failure.as_status();

/// Copies the pixel bytes of `frame` into `buffer`.
///
/// Returns 1 on success, 0 on failure and -1 when bytes were copied but
/// look like a different pixel encoding.
///
/// # Safety
/// `frame` must be null or a live DeckLink frame object for the duration
/// of the call. `buffer` must be null or valid for reads and writes of
/// `buffer_size` initialized bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn CopyDeckLinkFrameBytes(
    frame: *mut c_void,
    buffer: *mut c_void,
    buffer_size: i32,
) -> i32 {
    if frame.is_null() || buffer.is_null() || buffer_size <= 0 {
        return FAILURE;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        let context = shared();
        let Some(frame) = (unsafe { DeckLinkFrame::from_raw(frame, context.extractor.boundary()) })
        else {
            return FAILURE;
        };
        let dst = unsafe { std::slice::from_raw_parts_mut(buffer.cast::<u8>(), buffer_size as usize) };
        context
            .extractor
            .copy_frame_bytes(&frame, dst, &context.diagnostics)
            .as_status()
    }))
    .unwrap_or(FAILURE)
}

/// Reads frame geometry. Null output pointers are skipped.
///
/// Returns 1 on success, 0 on failure.
///
/// # Safety
/// `frame` must be null or a live DeckLink frame object. Each output
/// pointer must be null or valid for one write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn GetDeckLinkFrameInfo(
    frame: *mut c_void,
    width: *mut i32,
    height: *mut i32,
    row_bytes: *mut i32,
    flags: *mut u32,
) -> i32 {
    if frame.is_null() {
        return 0;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        let context = shared();
        let Some(frame) = (unsafe { DeckLinkFrame::from_raw(frame, context.extractor.boundary()) })
        else {
            return 0;
        };
        let info = match context.extractor.frame_info(&frame) {
            Ok(info) => info,
            Err(err) => {
                tracing::debug!(%err, "frame info unavailable");
                return 0;
            }
        };
        unsafe {
            if let Some(out) = width.as_mut() {
                *out = info.width;
            }
            if let Some(out) = height.as_mut() {
                *out = info.height;
            }
            if let Some(out) = row_bytes.as_mut() {
                *out = info.row_stride;
            }
            if let Some(out) = flags.as_mut() {
                *out = info.flags;
            }
        }
        1
    }))
    .unwrap_or(0)
}
