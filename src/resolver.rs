//! Capability negotiation.
//!
//! The object is asked for each interface through its own query
//! mechanism; nothing is inferred from table layout. A negative answer
//! only means "not this generation" and is never retried.

use crate::diagnostics::{Diagnostics, OnceEvent};
use crate::error::{ExtractError, ExtractResult};
use crate::provider::{Capability, FrameProvider, LegacyFrame, VideoBuffer};

/// Which byte-access generation an object honours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterfaceGeneration {
    Unsupported,
    /// Older input-frame layout with a direct byte accessor.
    SupportedV1,
    /// Buffered access with start/end bracketing.
    SupportedV2,
}

impl InterfaceGeneration {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unsupported => "unsupported",
            Self::SupportedV1 => "v1-legacy",
            Self::SupportedV2 => "v2-buffered",
        }
    }

    pub const fn capability(self) -> Option<Capability> {
        match self {
            Self::Unsupported => None,
            Self::SupportedV1 => Some(Capability::LegacyInputFrame),
            Self::SupportedV2 => Some(Capability::VideoBuffer),
        }
    }
}

/// Order in which accessor generations are attempted. An object may
/// answer both; the newer one wins when it actually produces bytes.
pub const ACCESS_ORDER: [InterfaceGeneration; 2] = [
    InterfaceGeneration::SupportedV2,
    InterfaceGeneration::SupportedV1,
];

/// A held accessor capability. Dropping it releases the reference.
pub enum AccessInterface<'a> {
    Buffered(Box<dyn VideoBuffer + 'a>),
    Legacy(Box<dyn LegacyFrame + 'a>),
}

impl AccessInterface<'_> {
    pub fn generation(&self) -> InterfaceGeneration {
        match self {
            Self::Buffered(_) => InterfaceGeneration::SupportedV2,
            Self::Legacy(_) => InterfaceGeneration::SupportedV1,
        }
    }
}

/// Queries the accessor capability for `generation`.
pub fn acquire<'a>(
    provider: &'a dyn FrameProvider,
    generation: InterfaceGeneration,
) -> ExtractResult<AccessInterface<'a>> {
    match generation {
        InterfaceGeneration::SupportedV2 => provider.video_buffer().map(AccessInterface::Buffered),
        InterfaceGeneration::SupportedV1 => provider.legacy_frame().map(AccessInterface::Legacy),
        InterfaceGeneration::Unsupported => {
            Err(ExtractError::InvalidArgument("no capability for unsupported generation"))
        }
    }
}

/// Newest accessor generation the object answers, without using it.
pub fn negotiate(provider: &dyn FrameProvider) -> InterfaceGeneration {
    ACCESS_ORDER
        .into_iter()
        .find(|generation| {
            generation
                .capability()
                .is_some_and(|capability| provider.supports(capability))
        })
        .unwrap_or(InterfaceGeneration::Unsupported)
}

/// Base interfaces seen on the handle. Informational only; path
/// selection never depends on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapabilityReport {
    pub video_frame: bool,
    pub video_input_frame: bool,
}

/// Validates the handle and probes the base interfaces.
pub fn resolve(
    provider: &dyn FrameProvider,
    diagnostics: &Diagnostics,
) -> ExtractResult<CapabilityReport> {
    if let Err(err) = provider.validate() {
        tracing::debug!(%err, "frame handle failed identity query");
        return Err(err);
    }

    let report = CapabilityReport {
        video_frame: provider.supports(Capability::VideoFrame),
        video_input_frame: provider.supports(Capability::VideoInputFrame),
    };
    if diagnostics.once(OnceEvent::BaseInterfaces) {
        tracing::debug!(
            address = format_args!("{:#x}", provider.object_address()),
            video_frame = report.video_frame,
            video_input_frame = report.video_input_frame,
            "resolved base interfaces"
        );
    }
    Ok(report)
}
