//! Typed view of a foreign frame-provider object.
//!
//! The extraction pipeline only talks to these traits. [`crate::decklink`]
//! implements them over a raw COM object; tests implement them directly.

use std::ptr::NonNull;

use crate::error::ExtractResult;
use crate::frame::{FrameInfo, FrameMetadata};

/// Interfaces the pipeline may ask a frame provider for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Base identity; every live object answers it.
    Identity,
    /// Geometry accessors (width, height, row bytes, format, flags).
    VideoFrame,
    VideoInputFrame,
    /// Modern buffered access: StartAccess / GetBytes / EndAccess.
    VideoBuffer,
    /// Older input-frame generation with a direct byte accessor.
    LegacyInputFrame,
}

impl Capability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::VideoFrame => "video-frame",
            Self::VideoInputFrame => "video-input-frame",
            Self::VideoBuffer => "video-buffer",
            Self::LegacyInputFrame => "legacy-input-frame",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum BufferAccessMode {
    #[default]
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

/// Modern buffered-access capability.
///
/// Dropping the value releases the capability reference.
pub trait VideoBuffer {
    fn start_access(&mut self, mode: BufferAccessMode) -> ExtractResult<()>;

    /// Only valid between a successful `start_access` and `end_access`.
    fn bytes(&mut self) -> ExtractResult<NonNull<u8>>;

    fn end_access(&mut self, mode: BufferAccessMode) -> ExtractResult<()>;
}

/// Older-generation byte accessor; no bracketing required.
pub trait LegacyFrame {
    fn bytes(&mut self) -> ExtractResult<NonNull<u8>>;
}

pub trait FrameProvider {
    /// Identity query. Fails with [`ExtractError::InvalidHandle`] when the
    /// object does not behave like a live object.
    ///
    /// [`ExtractError::InvalidHandle`]: crate::error::ExtractError::InvalidHandle
    fn validate(&self) -> ExtractResult<()>;

    /// Queries `capability` and drops the returned reference immediately.
    fn supports(&self, capability: Capability) -> bool;

    /// Width, height, row bytes, pixel format and flags, read as one unit.
    fn metadata(&self) -> ExtractResult<FrameMetadata>;

    /// Width, height, row bytes and flags for the standalone info query.
    fn frame_info(&self) -> ExtractResult<FrameInfo> {
        self.metadata().map(|meta| meta.info())
    }

    fn video_buffer(&self) -> ExtractResult<Box<dyn VideoBuffer + '_>>;

    fn legacy_frame(&self) -> ExtractResult<Box<dyn LegacyFrame + '_>>;

    /// Takes one extra reference on the object itself.
    fn add_ref(&self) -> ExtractResult<u32>;

    /// Drops a reference taken with [`add_ref`](Self::add_ref).
    fn release(&self) -> ExtractResult<u32>;

    /// Address of the object's own memory image.
    fn object_address(&self) -> usize;
}

/// Extra reference on a provider, dropped exactly once.
pub struct Retained<'a> {
    provider: &'a dyn FrameProvider,
}

impl<'a> Retained<'a> {
    pub fn new(provider: &'a dyn FrameProvider) -> ExtractResult<Self> {
        provider.add_ref()?;
        Ok(Self { provider })
    }

    pub fn provider(&self) -> &'a dyn FrameProvider {
        self.provider
    }
}

impl Drop for Retained<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.provider.release() {
            tracing::warn!(%err, "failed to drop temporary frame reference");
        }
    }
}
