//! Error types shared across the pipeline crates

use crate::pcm::PcmFormat;
use std::fmt;
use thiserror::Error;

/// Reason recorded by a mixer's failure latch.
///
/// The latch is sticky: the first failure wins and the reason never changes
/// for the lifetime of the engine, so every attached track observes the same
/// value whenever it is next scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerFault {
    /// A producer presented a stream that cannot be merged into the
    /// canonical format.
    FormatMismatch,
    /// The shared cycle buffer could not be allocated.
    Alloc,
    /// A producer's upstream reported unrecoverable data loss.
    Upstream,
}

impl fmt::Display for MixerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MixerFault::FormatMismatch => "format mismatch",
            MixerFault::Alloc => "allocation failure",
            MixerFault::Upstream => "upstream decode error",
        };
        f.write_str(s)
    }
}

/// Pipeline error types
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer allocation failed while opening a stage.
    #[error("Allocation of {0} bytes failed")]
    Alloc(usize),

    /// A stream's verified format does not match what its consumer fixed.
    #[error("Format mismatch: expected {expected}, found {found}")]
    FormatMismatch {
        expected: PcmFormat,
        found: PcmFormat,
    },

    /// Unrecoverable data loss reported from upstream of a stage.
    #[error("Upstream decode error: {0}")]
    Upstream(String),

    /// The mixer's failure latch is set; the whole mix group is unwinding.
    #[error("Mixer failed: {0}")]
    MixerFailed(MixerFault),

    /// The mixer this stage was attached to no longer exists.
    #[error("Mixer is gone")]
    MixerGone,

    /// The mixer has reached end of stream; no further producers may join.
    #[error("Mixer already finished")]
    MixerFinished,

    /// No factory is registered under the requested filter name.
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
