//! Mix group wiring
//!
//! A [`MixSession`] carries what the two mixer stages need to find each
//! other when they are opened by name through a
//! [`FilterRegistry`](weir_common::FilterRegistry): the configuration, the
//! number of producers the consumer should wait for, and the engine handle
//! the producer factories resolve. One session describes one mix group;
//! any number of groups can run side by side, each with its own engine.

use crate::config::MixerConfig;
use crate::engine::Mixer;
use crate::input::MixIn;
use crate::output::MixOut;
use std::sync::{Arc, Mutex, Weak};
use weir_common::{Filter, FilterRegistry};

/// Name the consumer-side stage is registered under.
pub const MIX_OUT: &str = "mix.out";
/// Name the producer-side stage is registered under.
pub const MIX_IN: &str = "mix.in";

/// Shared description of one mix group.
pub struct MixSession {
    config: MixerConfig,
    expected_inputs: u32,
    engine: Mutex<Weak<Mixer>>,
}

impl MixSession {
    pub fn new(config: MixerConfig, expected_inputs: u32) -> Arc<Self> {
        Arc::new(Self {
            config,
            expected_inputs,
            engine: Mutex::new(Weak::new()),
        })
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn expected_inputs(&self) -> u32 {
        self.expected_inputs
    }

    /// Handle to the group's engine. Dead until `"mix.out"` opens, and
    /// dead again once the consumer closes.
    pub fn engine(&self) -> Weak<Mixer> {
        self.engine.lock().unwrap().clone()
    }

    fn install(&self, engine: Weak<Mixer>) {
        *self.engine.lock().unwrap() = engine;
    }
}

/// Register the `"mix.out"` and `"mix.in"` factories for `session`.
///
/// Opening `"mix.in"` before `"mix.out"` (or after the consumer closed)
/// fails with [`MixerGone`](weir_common::Error::MixerGone): producers can
/// only join a live group.
pub fn register_filters(registry: &mut FilterRegistry, session: &Arc<MixSession>) {
    let s = Arc::clone(session);
    registry.register(
        MIX_OUT,
        Box::new(move |ctx| {
            let out = MixOut::open(&s.config, s.expected_inputs, ctx)?;
            s.install(out.engine_handle());
            Ok(Box::new(out) as Box<dyn Filter>)
        }),
    );

    let s = Arc::clone(session);
    registry.register(
        MIX_IN,
        Box::new(move |ctx| {
            let input = MixIn::open(s.engine(), ctx)?;
            Ok(Box::new(input) as Box<dyn Filter>)
        }),
    );
}
