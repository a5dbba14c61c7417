//! Cooperative track runner
//!
//! Drives one filter per track against scripted upstream chunks, the way a
//! real pipeline runtime would: a step verdict decides whether the track
//! stays runnable, parks until woken, or leaves the run queue for good.
//! Scheduling is strict round-robin in array order, so test traces are
//! deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;
use weir_common::{Error, Filter, PcmFormat, Result, StepCode, StepContext, TrackWake};

/// Sticky wake flag standing in for a scheduler's run-queue permit.
/// A wake delivered while the track is running is kept until consumed.
#[derive(Default)]
pub struct TestWake {
    runnable: AtomicBool,
}

impl TestWake {
    /// Consume the pending permit, if any.
    pub fn take(&self) -> bool {
        self.runnable.swap(false, Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.runnable.load(Ordering::SeqCst)
    }
}

impl TrackWake for TestWake {
    fn wake(&self) {
        self.runnable.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackState {
    /// Runs whenever its turn comes around.
    Runnable,
    /// Runs again only after a wake permit arrives.
    Parked,
    Finished,
    Failed,
}

/// One scripted track: a filter plus the upstream chunks it will be fed.
pub struct Track {
    pub name: &'static str,
    ctx: StepContext,
    filter: Option<Box<dyn Filter>>,
    wake: Arc<TestWake>,
    script: VecDeque<Vec<u8>>,
    state: TrackState,
    /// Format upstream declares once the track requests a conversion.
    /// `None` means upstream never declares (consumer tracks).
    pub format: Option<PcmFormat>,
    /// Everything emitted downstream, in order.
    pub emitted: Vec<u8>,
    /// Verdict history, for exact-sequence assertions.
    pub history: Vec<StepCode>,
    /// Error the track unwound with, if it failed.
    pub error: Option<Error>,
}

impl Track {
    pub fn new(name: &'static str, chunks: Vec<Vec<u8>>) -> Self {
        let wake = Arc::new(TestWake::default());
        // A freshly added track gets an initial run-queue entry.
        wake.wake();
        let ctx = StepContext::new(Uuid::new_v4(), wake.clone());
        Track {
            name,
            ctx,
            filter: None,
            wake,
            script: chunks.into(),
            state: TrackState::Runnable,
            format: None,
            emitted: Vec::new(),
            history: Vec::new(),
            error: None,
        }
    }

    /// Install the track's filter; the constructor sees the track context,
    /// so adapters can capture the waker at open time.
    pub fn open_with(
        &mut self,
        open: impl FnOnce(&mut StepContext) -> Result<Box<dyn Filter>>,
    ) -> Result<()> {
        self.filter = Some(open(&mut self.ctx)?);
        Ok(())
    }

    /// Tear the track down without running it, as a runtime does when an
    /// earlier stage in the chain fails to open.
    pub fn close(&mut self) {
        self.filter = None;
        self.state = TrackState::Finished;
    }

    pub fn finished(&self) -> bool {
        self.state == TrackState::Finished
    }

    pub fn failed(&self) -> bool {
        self.state == TrackState::Failed
    }

    pub fn wake_handle(&self) -> Arc<TestWake> {
        self.wake.clone()
    }

    /// Stream position the track's last step reported, in frames.
    pub fn position(&self) -> u64 {
        self.ctx.position
    }

    /// Whether this track should run on the current scheduler turn.
    fn ready(&mut self) -> bool {
        match self.state {
            TrackState::Runnable => {
                // Running consumes any pending permit.
                self.wake.take();
                true
            }
            TrackState::Parked => {
                if self.wake.take() {
                    self.state = TrackState::Runnable;
                    true
                } else {
                    false
                }
            }
            TrackState::Finished | TrackState::Failed => false,
        }
    }

    /// One filter invocation plus the staging around it.
    fn step(&mut self) {
        let Some(filter) = self.filter.as_mut() else {
            self.state = TrackState::Finished;
            return;
        };
        // Upstream answers a conversion request before the next step.
        if self.ctx.in_format.is_none() && self.ctx.want_format.is_some() {
            if let Some(f) = self.format {
                self.ctx.in_format = Some(f);
            }
        }
        match filter.process(&mut self.ctx) {
            Ok(code) => {
                self.history.push(code.clone());
                self.emitted.extend(self.ctx.take_output());
                match code {
                    StepCode::NeedInput => self.stage_next(),
                    StepCode::Produced => {
                        if self.ctx.input().is_empty() {
                            self.stage_next();
                        }
                    }
                    StepCode::Suspend => self.state = TrackState::Parked,
                    StepCode::Done => {
                        self.filter = None;
                        self.state = TrackState::Finished;
                    }
                    StepCode::Seek(_) | StepCode::Insert { .. } => {
                        // Mixer stages never ask for these; a full runtime
                        // would act on the verdict and re-invoke.
                    }
                }
            }
            Err(e) => {
                self.error = Some(e);
                // Unwinding drops the stage, as track teardown would.
                self.filter = None;
                self.state = TrackState::Failed;
            }
        }
    }

    /// Stage the next scripted chunk; the final chunk carries the
    /// end-of-stream mark, and an exhausted script marks it alone.
    fn stage_next(&mut self) {
        match self.script.pop_front() {
            Some(chunk) => {
                self.ctx.feed(&chunk);
                if self.script.is_empty() {
                    self.ctx.set_input_done();
                }
            }
            None => self.ctx.set_input_done(),
        }
    }
}

/// Round-robin the tracks until every one finishes or fails. Panics if a
/// full pass makes no progress (deadlock) or `max_steps` is exceeded
/// (livelock).
pub fn run(tracks: &mut [Track], max_steps: usize) {
    let mut steps = 0;
    loop {
        if tracks
            .iter()
            .all(|t| matches!(t.state, TrackState::Finished | TrackState::Failed))
        {
            return;
        }
        let mut progressed = false;
        for track in tracks.iter_mut() {
            if track.ready() {
                track.step();
                progressed = true;
                steps += 1;
                assert!(steps <= max_steps, "scheduler exceeded {max_steps} steps");
            }
        }
        if !progressed {
            let stalled: Vec<_> = tracks.iter().map(|t| (t.name, t.state)).collect();
            panic!("all tracks stalled: {stalled:?}");
        }
    }
}

/// Run at most `passes` round-robin passes, for tests that change the
/// track set mid-stream. Returns true once every track is finished or
/// failed.
pub fn run_passes(tracks: &mut [Track], passes: usize) -> bool {
    let done =
        |tracks: &[Track]| tracks.iter().all(|t| matches!(t.state, TrackState::Finished | TrackState::Failed));
    for _ in 0..passes {
        if done(tracks) {
            return true;
        }
        for track in tracks.iter_mut() {
            if track.ready() {
                track.step();
            }
        }
    }
    done(tracks)
}
