//! Consumer-side mixer stage
//!
//! Source stage of the consumer track: owns the engine, pulls each
//! completed cycle out of it, and emits the mixed bytes downstream. There
//! is exactly one per mix group, and the engine lives and dies with it.

use crate::config::MixerConfig;
use crate::engine::{CyclePhase, Mixer};
use std::sync::{Arc, Weak};
use tracing::debug;
use weir_common::{Error, Filter, Result, StepCode, StepContext};

/// Mixer output stage (`"mix.out"`).
pub struct MixOut {
    engine: Arc<Mixer>,
}

impl MixOut {
    /// Build the engine for this mix group and take ownership of it.
    ///
    /// The consumer track's waker goes to the engine so producers and
    /// closures can rouse it; producers attach later through
    /// [`engine_handle`](MixOut::engine_handle).
    pub fn open(
        config: &MixerConfig,
        expected_inputs: u32,
        ctx: &mut StepContext,
    ) -> Result<Self> {
        let engine = Mixer::new(config, expected_inputs, ctx.waker())?;
        debug!(
            "track {} opened a mix group for {} producers",
            ctx.track(),
            expected_inputs
        );
        Ok(Self { engine })
    }

    /// Weak handle producers use to attach.
    pub fn engine_handle(&self) -> Weak<Mixer> {
        Arc::downgrade(&self.engine)
    }

    /// The owned engine, for inspection.
    pub fn engine(&self) -> &Arc<Mixer> {
        &self.engine
    }
}

impl Filter for MixOut {
    fn process(&mut self, ctx: &mut StepContext) -> Result<StepCode> {
        if let Some(fault) = self.engine.fault() {
            return Err(Error::MixerFailed(fault));
        }
        // User stop: discard any pending cycle and close out; the group
        // unwinds when this stage drops the engine.
        if ctx.stop_requested() {
            debug!("mixer output closing on stop request");
            return Ok(StepCode::Done);
        }

        // No-op after the first pull.
        self.engine.begin_filling();

        // The previous emission has been consumed downstream by the time
        // we are stepped again; only now is the buffer free to recycle.
        if self.engine.phase() == CyclePhase::Drained {
            self.engine.reset_cycle();
        }

        if self.engine.phase() == CyclePhase::ReadyToDrain {
            let cycle = self.engine.drain()?;
            ctx.push_output(&cycle.bytes);
            ctx.position = cycle.position;
            return Ok(if cycle.done {
                StepCode::Done
            } else {
                StepCode::Produced
            });
        }

        if self.engine.end_of_stream() {
            return Ok(StepCode::Done);
        }

        Ok(StepCode::Suspend)
    }
}

impl Drop for MixOut {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;
    use weir_common::{PcmEncoding, PcmFormat, TrackWake};

    #[derive(Default)]
    struct CountWake(AtomicUsize);

    impl TrackWake for CountWake {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountWake {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn tiny_config() -> MixerConfig {
        MixerConfig {
            encoding: PcmEncoding::I16,
            channels: 1,
            rate: 1000,
            buffer_ms: 4,
        }
    }

    fn fmt() -> PcmFormat {
        tiny_config().format()
    }

    fn ctx() -> StepContext {
        StepContext::new(Uuid::new_v4(), Arc::new(CountWake::default()))
    }

    fn samples(vals: &[i16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in vals {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_first_pull_suspends() {
        let mut c = ctx();
        let mut out = MixOut::open(&tiny_config(), 1, &mut c).unwrap();
        assert_eq!(out.process(&mut c).unwrap(), StepCode::Suspend);
        assert_eq!(out.engine().phase(), CyclePhase::Filling);
    }

    #[test]
    fn test_drain_then_reset_on_next_pull() {
        let mut c = ctx();
        let mut out = MixOut::open(&tiny_config(), 1, &mut c).unwrap();
        out.process(&mut c).unwrap();

        let in_wake = Arc::new(CountWake::default());
        let id = out.engine().register(in_wake.clone()).unwrap();
        out.engine()
            .contribute(id, &fmt(), &samples(&[1, 2, 3, 4]), false)
            .unwrap();

        // Completed cycle comes out in one pull.
        assert_eq!(out.process(&mut c).unwrap(), StepCode::Produced);
        assert_eq!(c.take_output(), samples(&[1, 2, 3, 4]));
        assert_eq!(c.position, 4);
        assert_eq!(out.engine().phase(), CyclePhase::Drained);

        // Next pull recycles the buffer and waits for the new cycle.
        assert_eq!(out.process(&mut c).unwrap(), StepCode::Suspend);
        assert_eq!(out.engine().phase(), CyclePhase::Filling);
        assert_eq!(in_wake.count(), 1, "parked producer woken by the reset");
    }

    #[test]
    fn test_empty_group_finishes_immediately_after_first_pull() {
        let mut c = ctx();
        let mut out = MixOut::open(&tiny_config(), 1, &mut c).unwrap();
        assert_eq!(out.process(&mut c).unwrap(), StepCode::Suspend);

        // The only expected producer comes and goes without contributing.
        let id = out.engine().register(Arc::new(CountWake::default())).unwrap();
        out.engine().deregister(id);

        assert_eq!(out.process(&mut c).unwrap(), StepCode::Done);
        assert_eq!(c.output_len(), 0);
        // Idempotent if the runtime steps once more.
        assert_eq!(out.process(&mut c).unwrap(), StepCode::Done);
    }

    #[test]
    fn test_zero_expected_group_is_done_on_first_pull() {
        let mut c = ctx();
        let mut out = MixOut::open(&tiny_config(), 0, &mut c).unwrap();
        assert_eq!(
            out.process(&mut c).unwrap(),
            StepCode::Done,
            "a mix expecting no producers should finish on the first pull"
        );
        assert_eq!(c.output_len(), 0);
    }

    #[test]
    fn test_final_cycle_is_done_with_bytes() {
        let mut c = ctx();
        let mut out = MixOut::open(&tiny_config(), 1, &mut c).unwrap();
        out.process(&mut c).unwrap();

        let id = out.engine().register(Arc::new(CountWake::default())).unwrap();
        out.engine()
            .contribute(id, &fmt(), &samples(&[7, 7]), true)
            .unwrap();
        out.engine().deregister(id);

        assert_eq!(out.process(&mut c).unwrap(), StepCode::Done);
        assert_eq!(c.take_output(), samples(&[7, 7]));
    }

    #[test]
    fn test_failure_poisons_the_pull() {
        let mut c = ctx();
        let mut out = MixOut::open(&tiny_config(), 2, &mut c).unwrap();
        out.process(&mut c).unwrap();

        out.engine().fail(weir_common::MixerFault::FormatMismatch);
        match out.process(&mut c) {
            Err(Error::MixerFailed(weir_common::MixerFault::FormatMismatch)) => {}
            other => panic!("expected MixerFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_request_discards_pending_cycle() {
        let mut c = ctx();
        let mut out = MixOut::open(&tiny_config(), 1, &mut c).unwrap();
        out.process(&mut c).unwrap();

        let id = out.engine().register(Arc::new(CountWake::default())).unwrap();
        out.engine()
            .contribute(id, &fmt(), &samples(&[1, 2, 3, 4]), false)
            .unwrap();
        assert_eq!(out.engine().phase(), CyclePhase::ReadyToDrain);

        c.request_stop();
        assert_eq!(out.process(&mut c).unwrap(), StepCode::Done);
        assert_eq!(c.output_len(), 0, "stop should not flush the cycle");
    }

    #[test]
    fn test_drop_wakes_parked_producers_and_frees_engine() {
        let mut c = ctx();
        let out = MixOut::open(&tiny_config(), 1, &mut c).unwrap();
        let weak = out.engine_handle();

        let in_wake = Arc::new(CountWake::default());
        let id = out.engine().register(in_wake.clone()).unwrap();
        out.engine()
            .contribute(id, &fmt(), &samples(&[0; 4]), false)
            .unwrap();

        drop(out);
        assert_eq!(in_wake.count(), 1, "suspended producer woken on shutdown");
        assert!(weak.upgrade().is_none(), "engine freed with its owner");
    }
}
