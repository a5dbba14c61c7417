//! Name-indexed filter construction
//!
//! Chains are described by dotted filter names (`"mix.in"`, `"mix.out"`,
//! `"vorbis.decode"`, ...). [`StepCode::Insert`](crate::StepCode::Insert)
//! carries such a name, and the runtime resolves it here when a running
//! stage asks for a peer to be spliced into its chain (a container
//! parser, for example, names the decoder for the codec it found).

use crate::error::{Error, Result};
use crate::filter::{Filter, StepContext};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Constructor for one filter stage.
///
/// Runs at stage-open time with the opening track's context and may fail;
/// a failure unwinds the opening track.
pub type FilterFactory =
    Box<dyn Fn(&mut StepContext) -> Result<Box<dyn Filter>> + Send + Sync>;

/// Registry mapping filter names to their factories.
#[derive(Default)]
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, factory: FilterFactory) {
        let name = name.into();
        debug!("registered filter {}", name);
        self.factories.insert(name, factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Construct the filter registered under `name`.
    pub fn create(&self, name: &str, ctx: &mut StepContext) -> Result<Box<dyn Filter>> {
        match self.factories.get(name) {
            Some(factory) => factory(ctx),
            None => {
                warn!("no filter registered under {}", name);
                Err(Error::UnknownFilter(name.to_string()))
            }
        }
    }
}
