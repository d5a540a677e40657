//! Path selection for one extraction call.
//!
//! Order is fixed: buffered access, then the legacy accessor, then the
//! configured last-resort strategy. Each failure on the way is recorded in
//! the report and never surfaced on its own.

use std::sync::Arc;

use crate::access::{copy_buffered, copy_legacy};
use crate::detect::{CorruptionDetector, CorruptionReport, CorruptionThresholds};
use crate::diagnostics::{self, Diagnostics, OnceEvent};
use crate::error::{ExtractError, ExtractResult};
use crate::fallback::{FallbackStrategy, RawOffsetConfig, RawOffsetFallback};
use crate::frame::{ExtractionOutcome, FrameInfo, FrameMetadata};
use crate::platform::{FaultBoundary, default_fault_boundary};
use crate::provider::{BufferAccessMode, Capability, FrameProvider};
use crate::resolver::{ACCESS_ORDER, AccessInterface, InterfaceGeneration, acquire, resolve};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessPath {
    VideoBuffer,
    LegacyGetBytes,
    RawOffset,
}

impl AccessPath {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VideoBuffer => "video-buffer",
            Self::LegacyGetBytes => "legacy-get-bytes",
            Self::RawOffset => "raw-offset",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::VideoBuffer => 0,
            Self::LegacyGetBytes => 1,
            Self::RawOffset => 2,
        }
    }

    fn for_generation(generation: InterfaceGeneration) -> Option<Self> {
        match generation {
            InterfaceGeneration::SupportedV2 => Some(Self::VideoBuffer),
            InterfaceGeneration::SupportedV1 => Some(Self::LegacyGetBytes),
            InterfaceGeneration::Unsupported => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ExtractorConfig {
    /// `None` disables the raw-offset path entirely.
    pub raw_offset: Option<RawOffsetConfig>,
    pub corruption: CorruptionThresholds,
    /// Also check accessor output when the frame declares '2vuy'.
    pub verify_accessor_paths: bool,
    pub access_mode: BufferAccessMode,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            raw_offset: Some(RawOffsetConfig::default()),
            corruption: CorruptionThresholds::default(),
            verify_accessor_paths: true,
            access_mode: BufferAccessMode::Read,
        }
    }
}

impl ExtractorConfig {
    pub fn from_env() -> Self {
        Self {
            raw_offset: RawOffsetConfig::from_env(),
            ..Self::default()
        }
    }
}

/// A path that was tried and did not produce data.
#[derive(Debug)]
pub struct PathFailure {
    pub path: AccessPath,
    pub error: ExtractError,
}

#[derive(Debug)]
pub struct ExtractionReport {
    pub outcome: ExtractionOutcome,
    /// Path that produced the bytes, if any did.
    pub path: Option<AccessPath>,
    pub bytes_copied: usize,
    pub bytes_requested: usize,
    pub corruption: Option<CorruptionReport>,
    pub failures: Vec<PathFailure>,
    /// Why the call failed as a whole.
    pub error: Option<ExtractError>,
}

impl ExtractionReport {
    fn failed(error: ExtractError, failures: Vec<PathFailure>) -> Self {
        Self {
            outcome: ExtractionOutcome::Failure,
            path: None,
            bytes_copied: 0,
            bytes_requested: 0,
            corruption: None,
            failures,
            error: Some(error),
        }
    }

    fn copied(
        path: AccessPath,
        copied: usize,
        requested: usize,
        corruption: Option<CorruptionReport>,
        failures: Vec<PathFailure>,
    ) -> Self {
        let outcome = if corruption.is_some_and(|report| report.is_suspect()) {
            ExtractionOutcome::SuccessButSuspectCorrupt
        } else {
            ExtractionOutcome::Success
        };
        Self {
            outcome,
            path: Some(path),
            bytes_copied: copied,
            bytes_requested: requested,
            corruption,
            failures,
            error: None,
        }
    }
}

pub struct FrameExtractorBuilder {
    config: ExtractorConfig,
    boundary: Option<Arc<dyn FaultBoundary>>,
    fallback: Option<Box<dyn FallbackStrategy>>,
}

impl FrameExtractorBuilder {
    pub fn new() -> Self {
        Self::with_config(ExtractorConfig::default())
    }

    pub fn with_config(config: ExtractorConfig) -> Self {
        Self {
            config,
            boundary: None,
            fallback: None,
        }
    }

    pub fn raw_offset(mut self, raw_offset: Option<RawOffsetConfig>) -> Self {
        self.config.raw_offset = raw_offset;
        self
    }

    pub fn corruption_thresholds(mut self, thresholds: CorruptionThresholds) -> Self {
        self.config.corruption = thresholds;
        self
    }

    pub fn verify_accessor_paths(mut self, enabled: bool) -> Self {
        self.config.verify_accessor_paths = enabled;
        self
    }

    pub fn access_mode(mut self, mode: BufferAccessMode) -> Self {
        self.config.access_mode = mode;
        self
    }

    pub fn with_fault_boundary(mut self, boundary: Arc<dyn FaultBoundary>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// Replaces the raw-offset strategy; `raw_offset` is then ignored.
    pub fn with_fallback(mut self, fallback: Box<dyn FallbackStrategy>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn build(self) -> FrameExtractor {
        let fallback = self.fallback.or_else(|| {
            self.config
                .raw_offset
                .map(|config| Box::new(RawOffsetFallback::new(config)) as Box<dyn FallbackStrategy>)
        });
        FrameExtractor {
            boundary: self.boundary.unwrap_or_else(default_fault_boundary),
            detector: CorruptionDetector::new(self.config.corruption),
            fallback,
            config: self.config,
        }
    }
}

impl Default for FrameExtractorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FrameExtractor {
    config: ExtractorConfig,
    boundary: Arc<dyn FaultBoundary>,
    detector: CorruptionDetector,
    fallback: Option<Box<dyn FallbackStrategy>>,
}

impl FrameExtractor {
    pub fn builder() -> FrameExtractorBuilder {
        FrameExtractorBuilder::new()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Configuration from `DECKLINK_FRAME_*` variables.
    pub fn from_env() -> Self {
        FrameExtractorBuilder::with_config(ExtractorConfig::from_env()).build()
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn boundary(&self) -> &dyn FaultBoundary {
        self.boundary.as_ref()
    }

    pub fn copy_frame_bytes(
        &self,
        provider: &dyn FrameProvider,
        dst: &mut [u8],
        diagnostics: &Diagnostics,
    ) -> ExtractionOutcome {
        self.extract(provider, dst, diagnostics).outcome
    }

    /// Geometry only; no access path is touched.
    pub fn frame_info(&self, provider: &dyn FrameProvider) -> ExtractResult<FrameInfo> {
        provider.validate()?;
        provider.frame_info()
    }

    /// Copies at most `min(dst.len(), row_stride * height)` bytes of pixel
    /// data into `dst`.
    pub fn extract(
        &self,
        provider: &dyn FrameProvider,
        dst: &mut [u8],
        diagnostics: &Diagnostics,
    ) -> ExtractionReport {
        let frame = diagnostics.begin_frame();
        let report = self.run(provider, dst, diagnostics, frame);
        match report.outcome {
            ExtractionOutcome::Failure => {
                if diagnostics.record_failure() {
                    let error = report.error.as_ref().map(|err| err.to_string());
                    tracing::warn!(
                        frame,
                        error = error.as_deref().unwrap_or("unknown"),
                        tried = report.failures.len(),
                        "frame extraction failed"
                    );
                }
            }
            ExtractionOutcome::SuccessButSuspectCorrupt => diagnostics.record_suspect(),
            ExtractionOutcome::Success => {}
        }
        report
    }

    fn run(
        &self,
        provider: &dyn FrameProvider,
        dst: &mut [u8],
        diagnostics: &Diagnostics,
        frame: u64,
    ) -> ExtractionReport {
        let mut failures = Vec::new();
        if dst.is_empty() {
            return ExtractionReport::failed(
                ExtractError::InvalidArgument("empty destination"),
                failures,
            );
        }
        if let Err(err) = resolve(provider, diagnostics) {
            return ExtractionReport::failed(err, failures);
        }
        let meta = match provider.metadata().and_then(|meta| meta.frame_len().map(|_| meta)) {
            Ok(meta) => meta,
            Err(err) => return ExtractionReport::failed(err, failures),
        };

        for generation in ACCESS_ORDER {
            let Some(path) = AccessPath::for_generation(generation) else {
                continue;
            };
            match self.try_accessor(provider, generation, &meta, dst) {
                Ok(copied) => {
                    if diagnostics.record_success(path) {
                        diagnostics::log_accessor_frame(path, frame, &meta, dst, copied);
                    }
                    let corruption = self.verify_accessor(&meta, &dst[..copied]);
                    let requested = meta.copy_len(dst.len()).unwrap_or(copied);
                    return ExtractionReport::copied(path, copied, requested, corruption, failures);
                }
                Err(err) => {
                    self.note_path_failure(path, &err, diagnostics);
                    failures.push(PathFailure { path, error: err });
                }
            }
        }

        let Some(fallback) = self.fallback.as_deref() else {
            if diagnostics.once(OnceEvent::RawOffsetDisabled) {
                tracing::info!("raw-offset fallback disabled; no path left");
            }
            return ExtractionReport::failed(ExtractError::Exhausted, failures);
        };
        if diagnostics.once(OnceEvent::RawOffsetUsed) {
            tracing::info!(
                strategy = fallback.name(),
                width = meta.width,
                height = meta.height,
                row_stride = meta.row_stride,
                "accessor paths exhausted, using last-resort strategy"
            );
        }

        let recovery = match fallback.recover(provider, &meta, dst, self.boundary.as_ref()) {
            Ok(recovery) => recovery,
            Err(err) => {
                self.note_path_failure(AccessPath::RawOffset, &err, diagnostics);
                failures.push(PathFailure {
                    path: AccessPath::RawOffset,
                    error: err,
                });
                return ExtractionReport::failed(ExtractError::Exhausted, failures);
            }
        };

        let copy = &recovery.copy;
        let corruption = copy
            .is_sufficient()
            .then(|| self.detector.analyze(&dst[..copy.requested], &meta))
            .flatten();
        if diagnostics.record_success(AccessPath::RawOffset) {
            diagnostics::log_raw_recovery(frame, &meta, &recovery, dst, corruption.as_ref());
        }
        if !copy.is_sufficient() {
            return ExtractionReport::failed(
                ExtractError::InsufficientData {
                    copied: copy.copied,
                    requested: copy.requested,
                },
                failures,
            );
        }
        ExtractionReport::copied(
            AccessPath::RawOffset,
            copy.copied,
            copy.requested,
            corruption,
            failures,
        )
    }

    fn try_accessor(
        &self,
        provider: &dyn FrameProvider,
        generation: InterfaceGeneration,
        meta: &FrameMetadata,
        dst: &mut [u8],
    ) -> ExtractResult<usize> {
        let boundary = self.boundary.as_ref();
        match acquire(provider, generation)? {
            AccessInterface::Buffered(mut buffer) => {
                copy_buffered(buffer.as_mut(), self.config.access_mode, meta, dst, boundary)
            }
            AccessInterface::Legacy(mut frame) => copy_legacy(frame.as_mut(), meta, dst, boundary),
        }
    }

    fn verify_accessor(&self, meta: &FrameMetadata, pixels: &[u8]) -> Option<CorruptionReport> {
        let applies = self.config.verify_accessor_paths
            && meta.pixel_format.is_interleaved_chroma()
            && pixels.len().saturating_mul(2) >= meta.frame_len().ok()?;
        if !applies {
            return None;
        }
        self.detector.analyze(pixels, meta)
    }

    fn note_path_failure(&self, path: AccessPath, err: &ExtractError, diagnostics: &Diagnostics) {
        match err {
            ExtractError::CapabilityAbsent(capability) => {
                let event = match capability {
                    Capability::VideoBuffer => OnceEvent::VideoBufferAbsent,
                    _ => OnceEvent::LegacyAbsent,
                };
                if diagnostics.once(event) {
                    tracing::info!(capability = capability.as_str(), "capability not offered");
                }
            }
            _ if diagnostics.is_enabled() => {
                tracing::debug!(path = path.as_str(), %err, "access path failed");
            }
            _ => {}
        }
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::DEFAULT_RAW_OFFSET;
    use crate::fallback::tests::HoleyMemory;
    use crate::frame::{PixelFormat, UYVY_BLACK};
    use crate::platform::UncheckedMemory;
    use crate::testing::{
        BufferBehavior, LegacyBehavior, MockProvider, bgra_opaque, uyvy_gradient,
    };

    fn permissive_raw() -> RawOffsetConfig {
        RawOffsetConfig {
            min_address: 1,
            max_address: u64::MAX,
            ..RawOffsetConfig::default()
        }
    }

    fn extractor(raw_offset: Option<RawOffsetConfig>) -> FrameExtractor {
        FrameExtractor::builder()
            .raw_offset(raw_offset)
            .with_fault_boundary(Arc::new(UncheckedMemory))
            .build()
    }

    fn run(extractor: &FrameExtractor, provider: &MockProvider, len: usize) -> (ExtractionReport, Vec<u8>) {
        let mut dst = vec![0u8; len];
        let report = extractor.extract(provider, &mut dst, &Diagnostics::disabled());
        (report, dst)
    }

    #[test]
    fn buffered_path_wins_when_it_works() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64))
            .with_video_buffer()
            .with_legacy_frame();
        let (report, dst) = run(&extractor(None), &provider, 64 * 16);
        assert_eq!(report.outcome, ExtractionOutcome::Success);
        assert_eq!(report.path, Some(AccessPath::VideoBuffer));
        assert_eq!(dst, provider.pixels());
        let calls = provider.calls();
        assert_eq!(calls.legacy_queries, 0);
        assert_eq!((calls.start_calls, calls.end_calls), (1, 1));
    }

    #[test]
    fn legacy_path_used_when_buffer_fails() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64))
            .with_buffer_behavior(BufferBehavior::BytesFail)
            .with_legacy_frame();
        let (report, dst) = run(&extractor(None), &provider, 64 * 16);
        assert_eq!(report.outcome, ExtractionOutcome::Success);
        assert_eq!(report.path, Some(AccessPath::LegacyGetBytes));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(dst, provider.pixels());
        let calls = provider.calls();
        assert_eq!((calls.start_calls, calls.end_calls), (1, 1));
    }

    #[test]
    fn start_failure_without_legacy_or_raw_fails() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64))
            .with_buffer_behavior(BufferBehavior::StartFails);
        let (report, dst) = run(&extractor(None), &provider, 64 * 16);
        assert_eq!(report.outcome, ExtractionOutcome::Failure);
        assert!(matches!(report.error, Some(ExtractError::Exhausted)));
        assert!(dst.iter().all(|b| *b == 0));
        let calls = provider.calls();
        assert_eq!(calls.legacy_bytes_calls, 0);
        assert_eq!(calls.end_calls, 0);
        assert_eq!(calls.add_refs, 0);
    }

    #[test]
    fn start_failure_with_null_raw_field_fails() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64))
            .with_buffer_behavior(BufferBehavior::StartFails);
        let (report, _) = run(&extractor(Some(RawOffsetConfig::default())), &provider, 64 * 16);
        assert_eq!(report.outcome, ExtractionOutcome::Failure);
        let calls = provider.calls();
        assert_eq!((calls.add_refs, calls.releases), (1, 1));
    }

    #[test]
    fn absent_capabilities_are_never_used() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64)).with_legacy_frame();
        let (report, _) = run(&extractor(None), &provider, 64 * 16);
        assert_eq!(report.path, Some(AccessPath::LegacyGetBytes));
        assert!(matches!(
            report.failures[0].error,
            ExtractError::CapabilityAbsent(Capability::VideoBuffer)
        ));
        let calls = provider.calls();
        assert_eq!((calls.start_calls, calls.bytes_calls), (0, 0));
    }

    #[test]
    fn raw_offset_recovers_clean_uyvy() {
        let provider = MockProvider::new(uyvy_gradient(64, 32, 128))
            .with_legacy_behavior(LegacyBehavior::NullBytes)
            .with_raw_pixels_at(DEFAULT_RAW_OFFSET);
        let (report, dst) = run(&extractor(Some(permissive_raw())), &provider, 128 * 32);
        assert_eq!(report.outcome, ExtractionOutcome::Success);
        assert_eq!(report.path, Some(AccessPath::RawOffset));
        assert_eq!(report.bytes_copied, 128 * 32);
        assert!(report.corruption.is_some_and(|c| !c.is_suspect()));
        assert_eq!(dst, provider.pixels());
        let calls = provider.calls();
        assert_eq!((calls.add_refs, calls.releases), (1, 1));
    }

    #[test]
    fn failing_legacy_status_falls_through_to_raw_offset() {
        let provider = MockProvider::new(uyvy_gradient(64, 32, 128))
            .with_legacy_behavior(LegacyBehavior::Fails)
            .with_raw_pixels_at(DEFAULT_RAW_OFFSET);
        let (report, dst) = run(&extractor(Some(permissive_raw())), &provider, 128 * 32);
        assert_eq!(report.outcome, ExtractionOutcome::Success);
        assert_eq!(report.path, Some(AccessPath::RawOffset));
        assert!(matches!(
            report.failures.last().map(|f| (f.path, &f.error)),
            Some((AccessPath::LegacyGetBytes, ExtractError::Status { .. }))
        ));
        assert_eq!(dst, provider.pixels());
        assert_eq!(provider.calls().legacy_bytes_calls, 1);
    }

    #[test]
    fn raw_offset_with_half_the_frame_unreadable_still_succeeds() {
        let provider =
            MockProvider::new(uyvy_gradient(16, 8, 32)).with_raw_pixels_at(DEFAULT_RAW_OFFSET);
        let base = provider.pixels_address();
        let extractor = FrameExtractor::builder()
            .raw_offset(Some(RawOffsetConfig {
                chunk_size: 128,
                ..permissive_raw()
            }))
            .with_fault_boundary(Arc::new(HoleyMemory {
                start: base + 128,
                end: base + 256,
            }))
            .build();
        let (report, dst) = run(&extractor, &provider, 256);
        assert_eq!(report.outcome, ExtractionOutcome::Success);
        assert_eq!((report.bytes_copied, report.bytes_requested), (128, 256));
        assert_eq!(dst[..128], provider.pixels()[..128]);
        assert!(dst[128..].chunks(4).all(|group| group == UYVY_BLACK));
    }

    #[test]
    fn raw_offset_flags_bgra_payload() {
        let provider =
            MockProvider::new(bgra_opaque(64, 32, 128)).with_raw_pixels_at(DEFAULT_RAW_OFFSET);
        let (report, _) = run(&extractor(Some(permissive_raw())), &provider, 128 * 32);
        assert_eq!(report.outcome, ExtractionOutcome::SuccessButSuspectCorrupt);
        assert_eq!(report.outcome.as_status(), -1);
    }

    #[test]
    fn implausible_raw_pointer_fails_untouched() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64))
            .with_raw_pointer(DEFAULT_RAW_OFFSET, 0x42);
        let mut dst = vec![0x5Au8; 64 * 16];
        let report = extractor(Some(RawOffsetConfig::default()))
            .extract(&provider, &mut dst, &Diagnostics::default());
        assert_eq!(report.outcome, ExtractionOutcome::Failure);
        assert!(dst.iter().all(|b| *b == 0x5A));
        assert!(matches!(
            report.failures.last().map(|f| &f.error),
            Some(ExtractError::ImplausiblePointer(0x42))
        ));
    }

    #[test]
    fn accessor_output_is_verified_for_uyvy() {
        let provider = MockProvider::new(bgra_opaque(64, 32, 128)).with_video_buffer();
        let (report, _) = run(&extractor(None), &provider, 128 * 32);
        assert_eq!(report.outcome, ExtractionOutcome::SuccessButSuspectCorrupt);

        let quiet = FrameExtractor::builder()
            .raw_offset(None)
            .verify_accessor_paths(false)
            .with_fault_boundary(Arc::new(UncheckedMemory))
            .build();
        let (report, _) = run(&quiet, &provider, 128 * 32);
        assert_eq!(report.outcome, ExtractionOutcome::Success);
        assert!(report.corruption.is_none());
    }

    #[test]
    fn non_uyvy_accessor_output_is_not_judged() {
        let (mut meta, pixels) = bgra_opaque(64, 32, 128);
        meta.pixel_format = PixelFormat::BGRA_8BIT;
        let provider = MockProvider::new((meta, pixels)).with_video_buffer();
        let (report, _) = run(&extractor(None), &provider, 128 * 32);
        assert_eq!(report.outcome, ExtractionOutcome::Success);
    }

    #[test]
    fn invalid_inputs_fail_before_any_call() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64)).with_video_buffer();
        let (report, _) = run(&extractor(None), &provider, 0);
        assert!(matches!(report.error, Some(ExtractError::InvalidArgument(_))));
        assert_eq!(provider.calls().metadata_calls, 0);

        let dead = MockProvider::new(uyvy_gradient(32, 16, 64)).invalid();
        let (report, _) = run(&extractor(None), &dead, 64);
        assert!(matches!(report.error, Some(ExtractError::InvalidHandle(_))));
    }

    #[test]
    fn metadata_failure_is_total() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64))
            .with_video_buffer()
            .without_metadata();
        let (report, _) = run(&extractor(None), &provider, 64 * 16);
        assert!(matches!(report.error, Some(ExtractError::MetadataUnavailable)));
        assert_eq!(provider.calls().buffer_queries, 0);
    }

    #[test]
    fn diagnostics_do_not_change_results() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 64)).with_video_buffer();
        let extractor = extractor(None);
        let loud = Diagnostics::default();
        let mut a = vec![0u8; 64 * 16];
        let mut b = vec![0u8; 64 * 16];
        let first = extractor.extract(&provider, &mut a, &loud);
        let second = extractor.extract(&provider, &mut b, &Diagnostics::disabled());
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(a, b);
        assert_eq!(loud.snapshot().video_buffer, 1);
    }

    #[test]
    fn frame_info_reads_geometry() {
        let provider = MockProvider::new(uyvy_gradient(32, 16, 72));
        let info = extractor(None).frame_info(&provider).unwrap();
        assert_eq!((info.width, info.height, info.row_stride), (32, 16, 72));
        assert!(extractor(None).frame_info(&provider.invalid()).is_err());
    }
}
