//! Last-resort raw-offset recovery.
//!
//! FRAGILE: this path ignores every documented accessor and reads the
//! buffer pointer straight out of the provider object's memory image at a
//! fixed, empirically found offset. The offset belongs to one driver/SDK
//! build and silently means something else on any other. Keep it behind
//! [`FallbackStrategy`] so it can be disabled or replaced per target.

use crate::env_config::{self, CHUNK_SIZE_VAR, RAW_OFFSET_VAR};
use crate::error::{ExtractError, ExtractResult};
use crate::frame::{FrameMetadata, UYVY_BLACK, fill_pattern};
use crate::platform::FaultBoundary;
use crate::provider::{FrameProvider, Retained};

/// Byte offset of the DMA buffer pointer inside the input frame object.
pub const DEFAULT_RAW_OFFSET: usize = 280;
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
/// Below this nothing but the null page and guard regions live.
pub const DEFAULT_MIN_ADDRESS: u64 = 0x1_0000;
/// Top of the user-mode address space on x64 Windows, minus a margin.
pub const DEFAULT_MAX_ADDRESS: u64 = 0x7FFF_0000_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawOffsetConfig {
    pub offset: usize,
    pub chunk_size: usize,
    /// Inclusive lower bound of a plausible buffer address.
    pub min_address: u64,
    /// Exclusive upper bound of a plausible buffer address.
    pub max_address: u64,
    /// Written over every chunk that could not be read.
    pub fill: [u8; 4],
}

impl Default for RawOffsetConfig {
    fn default() -> Self {
        Self {
            offset: DEFAULT_RAW_OFFSET,
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_address: DEFAULT_MIN_ADDRESS,
            max_address: DEFAULT_MAX_ADDRESS,
            fill: UYVY_BLACK,
        }
    }
}

impl RawOffsetConfig {
    /// Defaults with `DECKLINK_FRAME_RAW_OFFSET` / `DECKLINK_FRAME_CHUNK_SIZE`
    /// applied. `None` when `DECKLINK_FRAME_DISABLE_RAW_OFFSET` is set.
    pub fn from_env() -> Option<Self> {
        if !env_config::raw_offset_enabled() {
            return None;
        }
        let mut config = Self::default();
        if let Some(offset) = env_config::env_var_positive_usize(RAW_OFFSET_VAR) {
            config.offset = offset;
        }
        if let Some(chunk_size) = env_config::env_var_positive_usize(CHUNK_SIZE_VAR) {
            config.chunk_size = chunk_size;
        }
        Some(config)
    }

    pub fn is_plausible(&self, address: usize) -> bool {
        let address = address as u64;
        address >= self.min_address && address < self.max_address
    }
}

/// Accounting for a bulk-then-chunked copy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkedCopy {
    pub requested: usize,
    /// Bytes that hold real source data.
    pub copied: usize,
    /// Whether the single bulk read succeeded.
    pub bulk: bool,
    /// Indices of chunks that faulted and were filled.
    pub filled_chunks: Vec<usize>,
}

impl ChunkedCopy {
    /// At least half of the requested bytes are real.
    pub fn is_sufficient(&self) -> bool {
        self.copied.saturating_mul(2) >= self.requested
    }
}

/// Copies `dst.len()` bytes from `src`, degrading to `chunk_size` pieces
/// when the bulk read faults. Chunks that still fault get `fill`.
///
/// # Safety
/// `src` is an unvalidated foreign address; with a non-probing boundary
/// the caller must guarantee the range is readable.
pub unsafe fn chunked_copy(
    boundary: &dyn FaultBoundary,
    src: *const u8,
    dst: &mut [u8],
    chunk_size: usize,
    fill: [u8; 4],
) -> ChunkedCopy {
    let requested = dst.len();
    if unsafe { boundary.read(src, dst) }.is_ok() {
        return ChunkedCopy {
            requested,
            copied: requested,
            bulk: true,
            filled_chunks: Vec::new(),
        };
    }

    let chunk_size = chunk_size.max(4);
    let mut report = ChunkedCopy {
        requested,
        ..ChunkedCopy::default()
    };
    for (index, chunk) in dst.chunks_mut(chunk_size).enumerate() {
        let start = index * chunk_size;
        let chunk_src = src.wrapping_add(start);
        match unsafe { boundary.read(chunk_src, chunk) } {
            Ok(()) => report.copied += chunk.len(),
            Err(fault) => {
                tracing::trace!(index, %fault, "chunk unreadable, filling with black");
                fill_pattern(chunk, fill, start);
                report.filled_chunks.push(index);
            }
        }
    }
    report
}

/// What the last-resort strategy produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecovery {
    /// Buffer address recovered from the object image.
    pub source: usize,
    pub copy: ChunkedCopy,
}

/// Replaceable last-resort strategy, tried after every accessor failed.
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fills `dst` (up to the frame length) from wherever the strategy
    /// finds the pixels. On `Err` the destination is untouched.
    fn recover(
        &self,
        provider: &dyn FrameProvider,
        meta: &FrameMetadata,
        dst: &mut [u8],
        boundary: &dyn FaultBoundary,
    ) -> ExtractResult<RawRecovery>;
}

#[derive(Clone, Debug, Default)]
pub struct RawOffsetFallback {
    config: RawOffsetConfig,
}

impl RawOffsetFallback {
    pub fn new(config: RawOffsetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RawOffsetConfig {
        &self.config
    }

    fn read_buffer_pointer(
        &self,
        provider: &dyn FrameProvider,
        boundary: &dyn FaultBoundary,
    ) -> ExtractResult<usize> {
        let field = provider
            .object_address()
            .checked_add(self.config.offset)
            .ok_or(ExtractError::ImplausiblePointer(usize::MAX))?;
        let pointer = unsafe { boundary.read_pointer(field as *const u8) }
            .map_err(|fault| ExtractError::fault("raw-offset pointer read", fault))?;
        if pointer == 0 {
            return Err(ExtractError::NullPointer("raw-offset buffer field"));
        }
        if !self.config.is_plausible(pointer) {
            return Err(ExtractError::ImplausiblePointer(pointer));
        }
        Ok(pointer)
    }
}

impl FallbackStrategy for RawOffsetFallback {
    fn name(&self) -> &'static str {
        "raw-offset"
    }

    fn recover(
        &self,
        provider: &dyn FrameProvider,
        meta: &FrameMetadata,
        dst: &mut [u8],
        boundary: &dyn FaultBoundary,
    ) -> ExtractResult<RawRecovery> {
        // Keeps the object alive while its image is read directly.
        let _pin = Retained::new(provider)?;

        let source = self.read_buffer_pointer(provider, boundary)?;
        let len = meta.copy_len(dst.len())?;
        let copy = unsafe {
            chunked_copy(
                boundary,
                source as *const u8,
                &mut dst[..len],
                self.config.chunk_size,
                self.config.fill,
            )
        };
        Ok(RawRecovery { source, copy })
    }
}
