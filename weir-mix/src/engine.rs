//! N-producer additive mix engine
//!
//! One [`Mixer`] merges the streams of N producer tracks into a shared
//! cycle buffer and hands the result to a single consumer track, one
//! buffer ("cycle") at a time. Producers add their bytes in at their own
//! write cursor; a producer whose cursor reaches the end of the buffer
//! suspends until the consumer has drained the cycle and reset it.
//!
//! # Cycle lifecycle
//!
//! ```text
//! AwaitingFirstPull --consumer pulls--------> Filling
//! Filling --every registered input filled--> ReadyToDrain
//! ReadyToDrain --drain()-------------------> Drained
//! Drained --reset_cycle()------------------> Filling
//! ```
//!
//! Membership is live: the set of currently registered inputs, not the
//! configured count, decides when a cycle is complete, so a producer that
//! closes early stops holding the mix up, and one that registers late
//! joins whatever cycle is in flight.
//!
//! # Alignment caveat
//!
//! Contributions are clamped to whole sample frames but otherwise land
//! wherever the producer's cursor points. The engine has no timeline:
//! producers are expected to feed chunks covering the same span of stream
//! time per cycle, and ones that drift apart are merged anyway, at
//! different logical positions.

use crate::config::MixerConfig;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};
use weir_common::pcm::{self, PcmFormat};
use weir_common::{Error, MixerFault, Result, TrackWake};

/// Handle to one registered producer slot.
///
/// Stale handles (used after deregistration) fail fast instead of aliasing
/// another producer's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputId(u64);

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in#{}", self.0)
    }
}

/// Where the shared buffer is in its fill/drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// The consumer has not pulled yet. Producers may already be filling.
    AwaitingFirstPull,
    /// Accumulating contributions.
    Filling,
    /// Every registered producer has filled; waiting on the consumer.
    ReadyToDrain,
    /// Drained but not yet reset; the consumer still owns the bytes.
    Drained,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::AwaitingFirstPull => "awaiting-first-pull",
            CyclePhase::Filling => "filling",
            CyclePhase::ReadyToDrain => "ready-to-drain",
            CyclePhase::Drained => "drained",
        };
        f.write_str(s)
    }
}

/// Outcome of one contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributeResult {
    /// `bytes` were merged and the cycle still has room; the producer may
    /// keep feeding.
    Accepted { bytes: usize },
    /// `bytes` were merged and the producer's cursor hit the end of the
    /// cycle; it should suspend until the cycle resets.
    CycleFull { bytes: usize },
}

/// One drained cycle, handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainedCycle {
    /// The mixed bytes: the used prefix of the cycle buffer.
    pub bytes: Vec<u8>,
    /// Stream position in frames after this cycle.
    pub position: u64,
    /// True when every configured producer has come and gone; this is the
    /// final cycle.
    pub done: bool,
}

/// Point-in-time snapshot of engine state, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerStats {
    pub registered: usize,
    pub expected: u32,
    pub filled: u32,
    pub used: usize,
    pub phase: CyclePhase,
    pub position: u64,
    pub end_of_stream: bool,
}

/// Engine-side state of one registered producer.
struct InputSlot {
    waker: Arc<dyn TrackWake>,
    cursor: usize,
    filled: bool,
    parked: bool,
}

struct MixerState {
    /// The shared cycle buffer. Allocated once; length never changes.
    buf: Vec<u8>,
    /// High-water mark of mixed bytes this cycle.
    used: usize,
    inputs: HashMap<InputId, InputSlot>,
    /// Producers that must still register or contribute. Decremented as
    /// inputs permanently close.
    expected: u32,
    /// How many registered inputs have filled their share this cycle.
    filled: u32,
    phase: CyclePhase,
    /// Sticky failure latch. Never cleared once set.
    fault: Option<MixerFault>,
    /// Latched when the registry empties (or at creation, for a mix that
    /// expects no producers): nothing will ever fill again.
    eos: bool,
    /// Canonical format. Fixed at creation except `interleaved`, which the
    /// first verified producer pins.
    format: PcmFormat,
    layout_pinned: bool,
    next_id: u64,
    /// Frames handed to the consumer so far.
    position: u64,
}

impl MixerState {
    /// Latch `fault` and collect every registered input's waker, clearing
    /// parked flags so nobody sleeps through the failure. Returns `None`
    /// when the latch was already set.
    fn latch_fault(&mut self, fault: MixerFault) -> Option<Vec<Arc<dyn TrackWake>>> {
        if self.fault.is_some() {
            return None;
        }
        self.fault = Some(fault);
        warn!("mixer failure latched: {}", fault);
        Some(
            self.inputs
                .values_mut()
                .map(|slot| {
                    slot.parked = false;
                    Arc::clone(&slot.waker)
                })
                .collect(),
        )
    }
}

/// N-producer additive mixer.
///
/// Created by (and owned by) the consumer side; producers hold only weak
/// handles, so the engine lives exactly as long as its consumer. All state
/// sits behind one mutex, uncontended under cooperative scheduling; wakes
/// are issued after the lock is released.
pub struct Mixer {
    cycle_bytes: usize,
    frame_size: usize,
    out_waker: Arc<dyn TrackWake>,
    state: Mutex<MixerState>,
}

impl Mixer {
    /// Build an engine for `expected_inputs` producers.
    ///
    /// Allocates the cycle buffer up front; allocation failure is reported
    /// as [`Error::Alloc`] rather than aborting.
    pub fn new(
        config: &MixerConfig,
        expected_inputs: u32,
        out_waker: Arc<dyn TrackWake>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let format = config.format();
        let cycle_bytes = config.cycle_bytes();
        let mut buf = Vec::new();
        buf.try_reserve_exact(cycle_bytes)
            .map_err(|_| Error::Alloc(cycle_bytes))?;
        buf.resize(cycle_bytes, 0);

        debug!(
            "mixer created: {}, {} byte cycle, {} expected inputs",
            format, cycle_bytes, expected_inputs
        );

        Ok(Arc::new(Self {
            cycle_bytes,
            frame_size: format.frame_size(),
            out_waker,
            state: Mutex::new(MixerState {
                buf,
                used: 0,
                inputs: HashMap::new(),
                expected: expected_inputs,
                filled: 0,
                phase: CyclePhase::AwaitingFirstPull,
                fault: None,
                // A mix expecting no producers is over before it starts;
                // the consumer's first pull reports the empty stream.
                eos: expected_inputs == 0,
                format,
                layout_pinned: false,
                next_id: 0,
                position: 0,
            }),
        }))
    }

    fn state(&self) -> MutexGuard<'_, MixerState> {
        self.state.lock().unwrap()
    }

    /// Register a producer. Legal at any time before end of stream,
    /// including mid-cycle; a late joiner's contributions land in whatever
    /// cycle is in flight.
    pub fn register(&self, waker: Arc<dyn TrackWake>) -> Result<InputId> {
        let mut s = self.state();
        if let Some(fault) = s.fault {
            return Err(Error::MixerFailed(fault));
        }
        if s.eos {
            return Err(Error::MixerFinished);
        }
        assert!(
            (s.inputs.len() as u32) < s.expected,
            "mixer input registry would exceed the {} configured producers",
            s.expected
        );
        let id = InputId(s.next_id);
        s.next_id += 1;
        s.inputs.insert(
            id,
            InputSlot {
                waker,
                cursor: 0,
                filled: false,
                parked: false,
            },
        );
        debug!(
            "mixer input {} registered ({} of {} expected)",
            id,
            s.inputs.len(),
            s.expected
        );
        Ok(id)
    }

    /// Verify a producer's negotiated format against the canonical format.
    ///
    /// The first verified producer pins the buffer's channel layout; after
    /// that only encoding, channel count and rate must match. A mismatch
    /// latches the failure flag before the error is returned, so the whole
    /// mix group unwinds.
    pub fn verify_format(&self, found: &PcmFormat) -> Result<()> {
        let mismatch = {
            let mut s = self.state();
            if let Some(fault) = s.fault {
                return Err(Error::MixerFailed(fault));
            }
            if !s.format.mixable_with(found) {
                let expected = s.format;
                let wakers = s.latch_fault(MixerFault::FormatMismatch);
                Some((expected, wakers))
            } else {
                if !s.layout_pinned {
                    s.format.interleaved = found.interleaved;
                    s.layout_pinned = true;
                    trace!("mixer layout pinned: {}", s.format);
                } else if s.format.interleaved != found.interleaved {
                    debug!(
                        "mixer input layout {} differs from pinned {}",
                        found, s.format
                    );
                }
                None
            }
        };

        match mismatch {
            None => Ok(()),
            Some((expected, wakers)) => {
                if let Some(wakers) = wakers {
                    self.out_waker.wake();
                    for w in &wakers {
                        w.wake();
                    }
                }
                Err(Error::FormatMismatch {
                    expected,
                    found: *found,
                })
            }
        }
    }

    /// Merge a producer's chunk into the cycle buffer at its cursor.
    ///
    /// Accepts at most the room left between the cursor and the end of the
    /// buffer, clamped down to whole frames; a partial trailing frame is
    /// left unconsumed. `last_chunk` marks the producer filled even if its
    /// cursor falls short, which is how a stream shorter than the cycle
    /// stops blocking everyone else.
    ///
    /// The chunk is merged at the cursor position, full stop: the engine
    /// does not know stream time, and contributions of drifting producers
    /// are merged at different logical positions without detection.
    pub fn contribute(
        &self,
        id: InputId,
        format: &PcmFormat,
        bytes: &[u8],
        last_chunk: bool,
    ) -> Result<ContributeResult> {
        let mut wake_out = false;
        let result;
        {
            let mut s = self.state();
            if let Some(fault) = s.fault {
                return Err(Error::MixerFailed(fault));
            }
            debug_assert!(
                format.mixable_with(&s.format),
                "contribution format {} does not match canonical {}",
                format,
                s.format
            );

            let (cursor, was_filled) = match s.inputs.get(&id) {
                Some(slot) => (slot.cursor, slot.filled),
                None => panic!("stale mixer input handle {}", id),
            };

            let mut n = (self.cycle_bytes - cursor).min(bytes.len());
            n -= n % self.frame_size;

            if n > 0 {
                let encoding = s.format.encoding;
                pcm::mix_into(encoding, &mut s.buf[cursor..cursor + n], &bytes[..n]);
            }

            let new_cursor = cursor + n;
            let cycle_full = new_cursor == self.cycle_bytes;
            let newly_filled = (cycle_full || last_chunk) && !was_filled;

            if let Some(slot) = s.inputs.get_mut(&id) {
                slot.cursor = new_cursor;
                if cycle_full {
                    slot.parked = true;
                }
                if newly_filled {
                    slot.filled = true;
                }
            }
            if new_cursor > s.used {
                s.used = new_cursor;
            }
            if newly_filled {
                s.filled += 1;
                trace!(
                    "mixer input {} filled ({} of {})",
                    id,
                    s.filled,
                    s.inputs.len()
                );
            }

            if s.filled > 0
                && s.filled as usize == s.inputs.len()
                && matches!(s.phase, CyclePhase::AwaitingFirstPull | CyclePhase::Filling)
            {
                s.phase = CyclePhase::ReadyToDrain;
                wake_out = true;
                debug!(
                    "mixer cycle complete: {} bytes from {} inputs",
                    s.used,
                    s.inputs.len()
                );
            }

            trace!(
                "mixer input {}: +{} bytes at offset {} [{}/{}]",
                id,
                n,
                cursor,
                new_cursor,
                self.cycle_bytes
            );

            result = if cycle_full {
                ContributeResult::CycleFull { bytes: n }
            } else {
                ContributeResult::Accepted { bytes: n }
            };
        }
        if wake_out {
            self.out_waker.wake();
        }
        Ok(result)
    }

    /// Remove a producer for good.
    ///
    /// Never fails: an innocent input unwinding while the failure latch is
    /// set must still close cleanly. Removing the last blocker can complete
    /// the cycle; removing the last input latches end of stream (a
    /// completed cycle still pending drain survives and is consumed first).
    pub fn deregister(&self, id: InputId) {
        let mut wake_out = false;
        {
            let mut s = self.state();
            let Some(slot) = s.inputs.remove(&id) else {
                return;
            };
            s.expected = s.expected.saturating_sub(1);
            if slot.filled {
                s.filled -= 1;
            }
            debug!(
                "mixer input {} closed ({} registered, {} still expected)",
                id,
                s.inputs.len(),
                s.expected
            );

            if s.inputs.is_empty() {
                s.eos = true;
                wake_out = true;
                debug!(
                    "mixer end of stream{}",
                    if s.phase == CyclePhase::ReadyToDrain {
                        " (after the pending cycle)"
                    } else {
                        ""
                    }
                );
            } else if s.filled as usize == s.inputs.len()
                && matches!(s.phase, CyclePhase::AwaitingFirstPull | CyclePhase::Filling)
            {
                s.phase = CyclePhase::ReadyToDrain;
                wake_out = true;
                debug!("mixer cycle completed by input {} closing", id);
            }
        }
        if wake_out {
            self.out_waker.wake();
        }
    }

    /// Hand the completed cycle to the consumer.
    ///
    /// Legal only in [`CyclePhase::ReadyToDrain`]; calling it in any other
    /// phase is a programming error. The buffer itself is retained for the
    /// next cycle; the consumer gets a copy of the used prefix.
    pub fn drain(&self) -> Result<DrainedCycle> {
        let mut s = self.state();
        if let Some(fault) = s.fault {
            return Err(Error::MixerFailed(fault));
        }
        assert_eq!(
            s.phase,
            CyclePhase::ReadyToDrain,
            "mixer drained outside the ready phase"
        );
        let used = s.used;
        let bytes = s.buf[..used].to_vec();
        s.position += (used / self.frame_size) as u64;
        s.phase = CyclePhase::Drained;
        let done = s.expected == 0;
        debug!(
            "mixer drained {} bytes, position {} frames{}",
            used,
            s.position,
            if done { ", final cycle" } else { "" }
        );
        Ok(DrainedCycle {
            bytes,
            position: s.position,
            done,
        })
    }

    /// Open the next cycle: zero the buffer, clear every cursor and fill
    /// mark, and wake exactly the producers that parked on a full buffer.
    ///
    /// Legal only in [`CyclePhase::Drained`]. This is the only place
    /// producers are woken for space; waking them any earlier would rouse
    /// them while the consumer still owns the bytes.
    pub fn reset_cycle(&self) {
        let wakers: Vec<Arc<dyn TrackWake>>;
        {
            let mut s = self.state();
            assert_eq!(
                s.phase,
                CyclePhase::Drained,
                "mixer cycle reset outside the drained phase"
            );
            s.buf.fill(0);
            s.used = 0;
            s.filled = 0;
            wakers = s
                .inputs
                .values_mut()
                .filter_map(|slot| {
                    slot.cursor = 0;
                    slot.filled = false;
                    if slot.parked {
                        slot.parked = false;
                        Some(Arc::clone(&slot.waker))
                    } else {
                        None
                    }
                })
                .collect();
            s.phase = CyclePhase::Filling;
            trace!("mixer cycle reset, waking {} parked inputs", wakers.len());
        }
        for w in &wakers {
            w.wake();
        }
    }

    /// Latch a failure and wake the whole mix group exactly once.
    ///
    /// Idempotent; the first reason wins and is never cleared. Every party
    /// observes the latch at the head of its next step and unwinds.
    pub fn fail(&self, fault: MixerFault) {
        let wakers = {
            let mut s = self.state();
            s.latch_fault(fault)
        };
        if let Some(wakers) = wakers {
            self.out_waker.wake();
            for w in &wakers {
                w.wake();
            }
        }
    }

    /// Wake still-parked producers so they can observe that the engine is
    /// going away. Called by the consumer side right before it drops its
    /// owning handle.
    pub(crate) fn shutdown(&self) {
        let wakers: Vec<Arc<dyn TrackWake>> = {
            let s = self.state();
            s.inputs
                .values()
                .filter(|slot| slot.parked)
                .map(|slot| Arc::clone(&slot.waker))
                .collect()
        };
        if !wakers.is_empty() {
            debug!("mixer shutting down, waking {} suspended inputs", wakers.len());
        }
        for w in &wakers {
            w.wake();
        }
    }

    /// First consumer pull: leave the pre-fill phase.
    pub(crate) fn begin_filling(&self) {
        let mut s = self.state();
        if s.phase == CyclePhase::AwaitingFirstPull {
            s.phase = CyclePhase::Filling;
            trace!("mixer first pull");
        }
    }

    pub fn cycle_bytes(&self) -> usize {
        self.cycle_bytes
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn phase(&self) -> CyclePhase {
        self.state().phase
    }

    pub fn fault(&self) -> Option<MixerFault> {
        self.state().fault
    }

    pub fn position(&self) -> u64 {
        self.state().position
    }

    pub fn end_of_stream(&self) -> bool {
        self.state().eos
    }

    /// Canonical mix format. `interleaved` reflects the pinned layout once
    /// the first producer has verified.
    pub fn canonical_format(&self) -> PcmFormat {
        self.state().format
    }

    pub fn stats(&self) -> MixerStats {
        let s = self.state();
        MixerStats {
            registered: s.inputs.len(),
            expected: s.expected,
            filled: s.filled,
            used: s.used,
            phase: s.phase,
            position: s.position,
            end_of_stream: s.eos,
        }
    }
}
