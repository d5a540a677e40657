use std::fmt;

use crate::error::{ExtractError, ExtractResult};

/// Four-character pixel format code, packed little-endian.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    /// 8-bit 4:2:2 interleaved chroma, byte order U Y0 V Y1.
    pub const UYVY_8BIT: Self = Self::from_fourcc(*b"2vuy");
    pub const BGRA_8BIT: Self = Self::from_fourcc(*b"BGRA");

    pub const fn from_fourcc(code: [u8; 4]) -> Self {
        // DeckLink packs the first character into the most significant byte.
        Self(u32::from_be_bytes(code))
    }

    /// Characters in memory order (least significant byte first).
    pub fn bytes_le(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn is_interleaved_chroma(self) -> bool {
        self == Self::UYVY_8BIT
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.bytes_le() {
            let ch = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelFormat({:#010x} '{self}')", self.0)
    }
}

/// Geometry reported by the base frame interface.
///
/// Values are kept exactly as the provider returned them; a row stride
/// wider than `width * 2` means horizontal padding and is legal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: i32,
    pub height: i32,
    /// Bytes per row including padding.
    pub row_stride: i32,
    pub pixel_format: PixelFormat,
    pub flags: u32,
}

impl FrameMetadata {
    /// Total bytes described by `row_stride * height`.
    pub fn frame_len(&self) -> ExtractResult<usize> {
        let empty = || ExtractError::EmptyGeometry {
            row_stride: self.row_stride,
            height: self.height,
        };
        let stride = usize::try_from(self.row_stride).map_err(|_| empty())?;
        let height = usize::try_from(self.height).map_err(|_| empty())?;
        match stride.checked_mul(height) {
            Some(len) if len > 0 => Ok(len),
            _ => Err(empty()),
        }
    }

    /// Bytes an accessor path may write into a destination of `capacity`.
    pub fn copy_len(&self, capacity: usize) -> ExtractResult<usize> {
        Ok(self.frame_len()?.min(capacity))
    }

    /// Stride bytes beyond the active 2-bytes-per-pixel picture.
    pub fn horizontal_padding(&self) -> i64 {
        i64::from(self.row_stride) - i64::from(self.width) * 2
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            width: self.width,
            height: self.height,
            row_stride: self.row_stride,
            flags: self.flags,
        }
    }
}

/// Geometry subset exposed by the standalone info query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: i32,
    pub height: i32,
    pub row_stride: i32,
    pub flags: u32,
}

/// Tri-state result of one extraction call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtractionOutcome {
    Success,
    Failure,
    /// Bytes were copied but look like a different pixel encoding; callers
    /// should prefer a previously cached good frame.
    SuccessButSuspectCorrupt,
}

impl ExtractionOutcome {
    /// Integer contract of the exported entry point.
    pub const fn as_status(self) -> i32 {
        match self {
            Self::Success => 1,
            Self::Failure => 0,
            Self::SuccessButSuspectCorrupt => -1,
        }
    }
}

/// UYVY black: neutral chroma (0x80) and video-black luma (0x10).
pub const UYVY_BLACK: [u8; 4] = [0x80, 0x10, 0x80, 0x10];

/// Fills `dst` with a repeating 4-byte pattern, phase-aligned to `phase`.
///
/// `phase` is the absolute byte offset of `dst[0]` within the frame so
/// that a fill starting mid-group still lines up with the pixel grid.
pub fn fill_pattern(dst: &mut [u8], pattern: [u8; 4], phase: usize) {
    for (i, byte) in dst.iter_mut().enumerate() {
        *byte = pattern[(phase + i) % 4];
    }
}
