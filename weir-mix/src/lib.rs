//! N-producer additive PCM mixer
//!
//! Merges the audio of several producer tracks into one stream for a
//! single consumer track, a cycle buffer at a time, under cooperative
//! scheduling. Producers attach as [`MixIn`] stages (`"mix.in"`), the
//! consumer hosts the [`MixOut`] stage (`"mix.out"`) that owns the
//! [`Mixer`] engine, and a [`MixSession`] wires the two sides together
//! when stages are opened by name.
//!
//! The filter contract the stages implement lives in `weir-common`.

pub mod config;
pub mod engine;
pub mod input;
pub mod output;
pub mod session;

// Re-export commonly used types
pub use config::MixerConfig;
pub use engine::{ContributeResult, CyclePhase, DrainedCycle, InputId, Mixer, MixerStats};
pub use input::MixIn;
pub use output::MixOut;
pub use session::{register_filters, MixSession, MIX_IN, MIX_OUT};
