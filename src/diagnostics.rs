//! Diagnostic side channel.
//!
//! Nothing here influences an extraction result. Counters always run;
//! events are emitted through `tracing` only while the context is enabled
//! and the rate limit lets them through.

use std::fmt::Write as _;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

use crate::detect::CorruptionReport;
use crate::env_config::{self, LOG_FILTER_VAR};
use crate::error::{ExtractError, ExtractResult};
use crate::extractor::AccessPath;
use crate::fallback::RawRecovery;
use crate::frame::{FrameMetadata, UYVY_BLACK};

/// Emits the first `burst` events, then every `every`th one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub burst: u64,
    pub every: u64,
}

impl RateLimit {
    pub const ACCESSOR: Self = Self {
        burst: 5,
        every: 100,
    };
    pub const RAW_OFFSET: Self = Self {
        burst: 10,
        every: 100,
    };

    /// `count` is the 1-based event number.
    pub fn allows(&self, count: u64) -> bool {
        count <= self.burst || (self.every != 0 && count % self.every == 0)
    }
}

/// Things logged at most once per context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum OnceEvent {
    BaseInterfaces = 1 << 0,
    VideoBufferAbsent = 1 << 1,
    LegacyAbsent = 1 << 2,
    RawOffsetDisabled = 1 << 3,
    RawOffsetUsed = 1 << 4,
}

pub struct Diagnostics {
    enabled: bool,
    accessor_limit: RateLimit,
    raw_limit: RateLimit,
    frames: AtomicU64,
    successes: [AtomicU64; 3],
    suspect: AtomicU64,
    failures: AtomicU64,
    latches: AtomicU32,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(RateLimit::ACCESSOR, RateLimit::RAW_OFFSET)
    }
}

impl Diagnostics {
    pub fn new(accessor_limit: RateLimit, raw_limit: RateLimit) -> Self {
        Self {
            enabled: true,
            accessor_limit,
            raw_limit,
            frames: AtomicU64::new(0),
            successes: Default::default(),
            suspect: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            latches: AtomicU32::new(0),
        }
    }

    /// Counts but never emits.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Disabled when `DECKLINK_FRAME_QUIET` is set.
    pub fn from_env() -> Self {
        if env_config::diagnostics_enabled() {
            Self::default()
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the 1-based number of the frame being processed.
    pub fn begin_frame(&self) -> u64 {
        self.frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counts a success on `path`; true when a dump should be emitted.
    pub fn record_success(&self, path: AccessPath) -> bool {
        let count = self.successes[path.index()].fetch_add(1, Ordering::Relaxed) + 1;
        let limit = match path {
            AccessPath::RawOffset => self.raw_limit,
            _ => self.accessor_limit,
        };
        self.enabled && limit.allows(count)
    }

    pub fn record_suspect(&self) {
        self.suspect.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) -> bool {
        let count = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.enabled && self.accessor_limit.allows(count)
    }

    /// True exactly once per event, and never while disabled.
    pub fn once(&self, event: OnceEvent) -> bool {
        let bit = event as u32;
        self.enabled && self.latches.fetch_or(bit, Ordering::Relaxed) & bit == 0
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let success = |path: AccessPath| self.successes[path.index()].load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            video_buffer: success(AccessPath::VideoBuffer),
            legacy: success(AccessPath::LegacyGetBytes),
            raw_offset: success(AccessPath::RawOffset),
            suspect: self.suspect.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames: u64,
    pub video_buffer: u64,
    pub legacy: u64,
    pub raw_offset: u64,
    pub suspect: u64,
    pub failures: u64,
}

/// Installs a fmt subscriber filtered by `DECKLINK_FRAME_LOG`.
///
/// On Windows events go to the debugger output, elsewhere to stderr.
/// Only the first call does anything; it fails when another global
/// subscriber is already installed.
pub fn init_tracing() -> ExtractResult<()> {
    static INSTALLED: OnceLock<bool> = OnceLock::new();
    let mut outcome = Ok(());
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_FILTER_VAR)
            .unwrap_or_else(|_| EnvFilter::new("decklink_frame=info"));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(false);
        #[cfg(target_os = "windows")]
        let installed = builder
            .with_writer(crate::platform::windows::DebugOutputWriter::default)
            .try_init();
        #[cfg(not(target_os = "windows"))]
        let installed = builder.with_writer(std::io::stderr).try_init();
        match installed {
            Ok(()) => true,
            Err(err) => {
                outcome = Err(ExtractError::Platform(
                    anyhow::anyhow!(err).context("installing tracing subscriber"),
                ));
                false
            }
        }
    });
    outcome
}

/// Classification of one 4-byte group in a row scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupClass {
    /// Ancillary data flag word.
    Anc,
    Black,
    Zero,
    Video,
}

impl GroupClass {
    pub fn of(group: &[u8]) -> Self {
        match group {
            [0x00, 0x02, 0x01, 0x20, ..] => Self::Anc,
            [0x00, 0x00, 0x00, 0x00, ..] => Self::Zero,
            g if g.starts_with(&UYVY_BLACK) => Self::Black,
            _ => Self::Video,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anc => "ANC",
            Self::Black => "BLACK",
            Self::Zero => "ZERO",
            Self::Video => "VIDEO",
        }
    }
}

/// Bounds-checked hex rendering of up to `len` bytes at `offset`.
pub fn hex_bytes(buf: &[u8], offset: usize, len: usize) -> String {
    let end = offset.saturating_add(len).min(buf.len());
    let Some(bytes) = buf.get(offset..end) else {
        return String::from("<out of range>");
    };
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// BT.601 conversion of one U/Y/V triple, clamped to 8 bits.
pub fn uyvy_to_rgb(u: u8, y: u8, v: u8) -> [u8; 3] {
    let (y, u, v) = (f64::from(y), f64::from(u) - 128.0, f64::from(v) - 128.0);
    let clamp = |value: f64| value.clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * v),
        clamp(y - 0.344 * u - 0.714 * v),
        clamp(y + 1.772 * u),
    ]
}

/// First pixel decoded at byte phases 0..3; a misaligned pointer shows up
/// as a plausible colour at a non-zero phase only.
pub fn phase_check(buf: &[u8]) -> Vec<(usize, [u8; 3])> {
    (0..4)
        .filter_map(|phase| {
            let group = buf.get(phase..phase + 4)?;
            Some((phase, uyvy_to_rgb(group[0], group[1], group[2])))
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowScan {
    pub row: usize,
    pub first: GroupClass,
    /// Byte offset within the row where the group class first changes.
    pub transition: Option<usize>,
}

const SCAN_STEP: usize = 64;

/// Walks one row in 64-byte steps looking for the first class change.
pub fn scan_row(buf: &[u8], row: usize, row_stride: usize) -> Option<RowScan> {
    let start = row.checked_mul(row_stride)?;
    let row_bytes = buf.get(start..start.checked_add(row_stride)?)?;
    let mut groups = row_bytes
        .chunks(SCAN_STEP)
        .enumerate()
        .filter(|(_, chunk)| chunk.len() >= 4)
        .map(|(i, chunk)| (i * SCAN_STEP, GroupClass::of(chunk)));
    let (_, first) = groups.next()?;
    let transition = groups
        .find(|(_, class)| *class != first)
        .map(|(offset, _)| offset);
    Some(RowScan {
        row,
        first,
        transition,
    })
}

/// Rows sampled by the structure scan, as fractions of a 1080-line frame.
const SCAN_ROWS_1080: [usize; 10] = [0, 42, 84, 200, 400, 540, 700, 900, 1000, 1070];

fn scan_rows(height: usize) -> impl Iterator<Item = usize> {
    SCAN_ROWS_1080
        .into_iter()
        .map(move |row| row * height / 1080)
}

pub(crate) fn log_accessor_frame(
    path: AccessPath,
    frame: u64,
    meta: &FrameMetadata,
    dst: &[u8],
    copied: usize,
) {
    let buf = &dst[..copied.min(dst.len())];
    let mid = (meta.height.max(0) as usize / 2) * meta.row_stride.max(0) as usize
        + (meta.width.max(0) as usize / 2) * 2;
    tracing::info!(
        path = path.as_str(),
        frame,
        width = meta.width,
        height = meta.height,
        copied,
        first = %hex_bytes(buf, 0, 4),
        mid = %hex_bytes(buf, mid, 4),
        "frame copied"
    );
}

pub(crate) fn log_raw_recovery(
    frame: u64,
    meta: &FrameMetadata,
    recovery: &RawRecovery,
    dst: &[u8],
    corruption: Option<&CorruptionReport>,
) {
    let buf = &dst[..recovery.copy.requested.min(dst.len())];
    let stride = meta.row_stride.max(0) as usize;
    tracing::info!(
        frame,
        width = meta.width,
        height = meta.height,
        row_stride = meta.row_stride,
        pixel_format = %meta.pixel_format,
        source = format_args!("{:#x}", recovery.source),
        copied = recovery.copy.copied,
        requested = recovery.copy.requested,
        filled_chunks = recovery.copy.filled_chunks.len(),
        suspect = corruption.is_some_and(|report| report.is_suspect()),
        "raw-offset frame"
    );
    for (label, offset) in [("row0", 0), ("row1", stride), ("row2", stride * 2)] {
        tracing::debug!(at = label, bytes = %hex_bytes(buf, offset, 16), "raw dump");
    }
    for (phase, [r, g, b]) in phase_check(buf) {
        tracing::debug!(phase, r, g, b, "uyvy phase check");
    }
    tracing::debug!(
        row_stride = meta.row_stride,
        active = i64::from(meta.width) * 2,
        padding = meta.horizontal_padding(),
        "horizontal padding"
    );
    let height = meta.height.max(0) as usize;
    for row in scan_rows(height) {
        let Some(scan) = scan_row(buf, row, stride) else {
            break;
        };
        tracing::debug!(
            row = scan.row,
            first = scan.first.as_str(),
            transition = ?scan.transition,
            "row scan"
        );
    }
    if let Some(report) = corruption {
        log_corruption(report);
    }
}

pub(crate) fn log_corruption(report: &CorruptionReport) {
    tracing::debug!(
        saturation = ?report.saturation(),
        variance = ?report.variance(),
        alpha_bias = report.alpha_bias,
        luma_variance = report.luma_variance,
        chroma_variance = report.chroma_variance,
        suspicious_alpha = report.suspicious_alpha,
        suspicious_variance = report.suspicious_variance,
        "corruption scores"
    );
}
