use std::fmt;

use windows::core::HRESULT;

use crate::provider::Capability;

/// Address range that could not be read (or called through) safely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fault {
    pub address: usize,
    pub len: usize,
    pub kind: FaultKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// Memory is not committed or not readable.
    Unreadable,
    /// A table slot points at memory that is not executable.
    NotExecutable,
    /// The OS refused or shortened the read.
    ReadFailed,
}

impl Fault {
    pub fn unreadable(address: usize, len: usize) -> Self {
        Self {
            address,
            len,
            kind: FaultKind::Unreadable,
        }
    }

    pub fn not_executable(address: usize) -> Self {
        Self {
            address,
            len: 0,
            kind: FaultKind::NotExecutable,
        }
    }

    pub fn read_failed(address: usize, len: usize) -> Self {
        Self {
            address,
            len,
            kind: FaultKind::ReadFailed,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            FaultKind::Unreadable => "unreadable memory",
            FaultKind::NotExecutable => "non-executable call target",
            FaultKind::ReadFailed => "failed read",
        };
        write!(f, "{what} at {:#x} (+{} bytes)", self.address, self.len)
    }
}

#[derive(Debug)]
pub enum ExtractError {
    /// Null handle, null destination or non-positive capacity.
    InvalidArgument(&'static str),

    /// The handle did not answer the identity query.
    InvalidHandle(HRESULT),

    CapabilityAbsent(Capability),

    /// A foreign call returned a failing status code.
    Status { call: &'static str, hresult: HRESULT },

    /// A foreign call succeeded but produced a null byte pointer.
    NullPointer(&'static str),

    /// Memory or table access was contained before it could crash.
    Fault { site: &'static str, fault: Fault },

    MetadataUnavailable,

    /// Frame geometry describes no bytes (non-positive or overflowing).
    EmptyGeometry { row_stride: i32, height: i32 },

    /// The raw-offset path recovered a pointer outside the plausible window.
    ImplausiblePointer(usize),

    /// Too little of the destination was filled with real bytes.
    InsufficientData { copied: usize, requested: usize },

    /// Every access strategy was exhausted.
    Exhausted,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidInput,
    /// Not an error in practice: drives fallback selection.
    CapabilityAbsent,
    /// One strategy failed; the next one is tried.
    SoftPathFailure,
    TotalFailure,
}

impl ExtractError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidArgument(_) | Self::InvalidHandle(_) => ErrorClass::InvalidInput,
            Self::CapabilityAbsent(_) => ErrorClass::CapabilityAbsent,
            Self::Status { .. }
            | Self::NullPointer(_)
            | Self::Fault { .. }
            | Self::EmptyGeometry { .. }
            | Self::ImplausiblePointer(_) => ErrorClass::SoftPathFailure,
            Self::MetadataUnavailable
            | Self::InsufficientData { .. }
            | Self::Exhausted
            | Self::Platform(_) => ErrorClass::TotalFailure,
        }
    }

    /// Whether the extractor should move on to the next strategy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::CapabilityAbsent | ErrorClass::SoftPathFailure
        )
    }

    pub(crate) fn fault(site: &'static str, fault: Fault) -> Self {
        Self::Fault { site, fault }
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            Self::InvalidHandle(hr) => {
                write!(f, "frame handle rejected identity query (hr={:#010x})", hr.0 as u32)
            }
            Self::CapabilityAbsent(cap) => write!(f, "capability {} not supported", cap.as_str()),
            Self::Status { call, hresult } => {
                write!(f, "{call} failed (hr={:#010x})", hresult.0 as u32)
            }
            Self::NullPointer(call) => write!(f, "{call} returned a null pointer"),
            Self::Fault { site, fault } => write!(f, "fault contained in {site}: {fault}"),
            Self::MetadataUnavailable => write!(f, "frame metadata unavailable"),
            Self::EmptyGeometry { row_stride, height } => {
                write!(f, "frame geometry is empty (rowBytes={row_stride}, height={height})")
            }
            Self::ImplausiblePointer(addr) => {
                write!(f, "recovered buffer pointer {addr:#x} is outside the plausible range")
            }
            Self::InsufficientData { copied, requested } => {
                write!(f, "only {copied} of {requested} bytes could be copied")
            }
            Self::Exhausted => write!(f, "no access strategy produced frame bytes"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;
