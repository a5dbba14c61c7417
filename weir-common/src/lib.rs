//! Shared pipeline contract for the weir audio engine
//!
//! Everything a stage implementation needs to participate in a processing
//! chain: raw PCM descriptors and sample math ([`pcm`]), the cooperative
//! filter contract ([`filter`]), and the workspace-wide error type
//! ([`error`]).

pub mod error;
pub mod filter;
pub mod pcm;

// Re-export commonly used types
pub use error::{Error, MixerFault, Result};
pub use filter::{
    Filter, FilterFactory, FilterRegistry, InsertPlace, StepCode, StepContext, TrackWake,
};
pub use pcm::{PcmEncoding, PcmFormat};
