pub mod access;
pub mod com;
pub mod decklink;
pub mod detect;
pub mod diagnostics;
pub(crate) mod env_config;
pub mod error;
pub mod extractor;
pub mod fallback;
pub mod ffi;
pub mod frame;
pub mod platform;
pub mod provider;
pub mod resolver;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod testing;

use diagnostics::Diagnostics;
use provider::FrameProvider;

pub use decklink::DeckLinkFrame;
pub use detect::{CorruptionDetector, CorruptionReport, CorruptionThresholds};
pub use diagnostics::{DiagnosticsSnapshot, RateLimit, init_tracing};
pub use error::{ErrorClass, ExtractError, ExtractResult, Fault};
pub use extractor::{
    AccessPath, ExtractionReport, ExtractorConfig, FrameExtractor, FrameExtractorBuilder,
};
pub use fallback::{FallbackStrategy, RawOffsetConfig, RawOffsetFallback};
pub use frame::{ExtractionOutcome, FrameInfo, FrameMetadata, PixelFormat};
pub use platform::{FaultBoundary, UncheckedMemory, default_fault_boundary};
pub use resolver::InterfaceGeneration;

/// One-off extraction with default configuration and a fresh
/// diagnostics context.
pub fn extract_once(provider: &dyn FrameProvider, dst: &mut [u8]) -> ExtractionOutcome {
    FrameExtractor::new().copy_frame_bytes(provider, dst, &Diagnostics::from_env())
}
