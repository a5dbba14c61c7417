//! Producer-side mixer stage
//!
//! Terminal stage of each producer track: takes the track's decoded bytes
//! and feeds them to the shared [`Mixer`](crate::Mixer). One lives per
//! producer; it registers with the engine when it opens and deregisters
//! when it drops.

use crate::engine::{ContributeResult, InputId, Mixer};
use std::sync::Weak;
use tracing::{debug, trace};
use weir_common::{Error, Filter, MixerFault, Result, StepCode, StepContext};

/// Format negotiation progress of one producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Negotiation {
    /// Ask upstream for the canonical format.
    Propose,
    /// Check what upstream actually delivers.
    Verify,
    /// Negotiated; every further step contributes audio.
    Steady,
}

/// Mixer input stage (`"mix.in"`).
///
/// Holds only a weak engine handle: the engine belongs to the consumer
/// side, and a producer that outlives it sees every operation turn into a
/// terminal no-op instead of touching freed state.
pub struct MixIn {
    mixer: Weak<Mixer>,
    id: InputId,
    negotiation: Negotiation,
}

impl MixIn {
    /// Attach a producer to `mixer`, registering it with the engine.
    ///
    /// Fails when the engine is already gone, failed, or finished.
    pub fn open(mixer: Weak<Mixer>, ctx: &mut StepContext) -> Result<Self> {
        let engine = mixer.upgrade().ok_or(Error::MixerGone)?;
        let id = engine.register(ctx.waker())?;
        debug!("track {} attached to mixer as {}", ctx.track(), id);
        Ok(Self {
            mixer,
            id,
            negotiation: Negotiation::Propose,
        })
    }

    /// The engine-side handle of this producer.
    pub fn id(&self) -> InputId {
        self.id
    }
}

impl Filter for MixIn {
    fn process(&mut self, ctx: &mut StepContext) -> Result<StepCode> {
        let Some(engine) = self.mixer.upgrade() else {
            return Err(Error::MixerGone);
        };
        if let Some(fault) = engine.fault() {
            return Err(Error::MixerFailed(fault));
        }
        // User stop: drop whatever is staged and close out; deregistration
        // happens when the stage is torn down.
        if ctx.stop_requested() {
            debug!("mixer {} closing on stop request", self.id);
            return Ok(StepCode::Done);
        }

        if self.negotiation == Negotiation::Propose {
            let mut want = engine.canonical_format();
            want.interleaved = true;
            ctx.want_format = Some(want);
            self.negotiation = Negotiation::Verify;
            trace!("mixer {} proposing {}", self.id, want);
            return Ok(StepCode::NeedInput);
        }

        if self.negotiation == Negotiation::Verify {
            let Some(found) = ctx.in_format else {
                // Bytes arrived without a declared format: upstream broke
                // its side of the negotiation.
                engine.fail(MixerFault::Upstream);
                return Err(Error::Upstream(
                    "no input format declared before first audio".to_string(),
                ));
            };
            engine.verify_format(&found)?;
            self.negotiation = Negotiation::Steady;
            debug!("mixer {} verified {}", self.id, found);
            // First audio usually rides in with the verification step;
            // fall through and contribute it.
        }

        let format = ctx
            .in_format
            .unwrap_or_else(|| engine.canonical_format());
        let chunk = ctx.input();
        let last = ctx.input_done();

        match engine.contribute(self.id, &format, chunk, last)? {
            ContributeResult::CycleFull { bytes } => {
                ctx.consume(bytes);
                trace!("mixer {} parked, cycle full", self.id);
                Ok(StepCode::Suspend)
            }
            ContributeResult::Accepted { bytes } => {
                ctx.consume(bytes);
                if last {
                    debug!("mixer {} delivered its last chunk", self.id);
                    Ok(StepCode::Done)
                } else {
                    Ok(StepCode::Produced)
                }
            }
        }
    }
}

impl Drop for MixIn {
    fn drop(&mut self) {
        // Engine already gone: nothing to detach from.
        if let Some(engine) = self.mixer.upgrade() {
            engine.deregister(self.id);
        }
    }
}
