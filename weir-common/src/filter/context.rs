//! Per-track execution context shared along a filter chain

use crate::filter::TrackWake;
use crate::pcm::PcmFormat;
use std::sync::Arc;
use uuid::Uuid;

/// State the track runtime stages for (and receives back from) each filter
/// step.
///
/// One context exists per track. The runtime refills the input side when a
/// filter asks for more, forwards staged output to the next stage
/// downstream, and leaves the format fields for the stages themselves to
/// negotiate through.
///
/// Input staging is replace-on-feed: [`feed`](StepContext::feed) discards
/// whatever the previous chunk left unconsumed. A filter therefore returns
/// [`NeedInput`](crate::StepCode::NeedInput) only once it has consumed (or
/// deliberately forfeited) everything staged; a filter that suspends keeps
/// its residue staged and finds it untouched on the next step.
pub struct StepContext {
    track: Uuid,
    waker: Arc<dyn TrackWake>,

    input: Vec<u8>,
    input_pos: usize,
    input_done: bool,
    stop: bool,

    output: Vec<u8>,

    /// Format of the bytes currently staged as input, if declared.
    pub in_format: Option<PcmFormat>,
    /// Conversion target requested by a downstream stage. Stages that can
    /// convert watch this field; producers that cannot leave it for the
    /// runtime to act on.
    pub want_format: Option<PcmFormat>,

    /// Stream position in frames, maintained by whichever stage defines
    /// the track's notion of progress.
    pub position: u64,
}

impl StepContext {
    pub fn new(track: Uuid, waker: Arc<dyn TrackWake>) -> Self {
        Self {
            track,
            waker,
            input: Vec::new(),
            input_pos: 0,
            input_done: false,
            stop: false,
            output: Vec::new(),
            in_format: None,
            want_format: None,
            position: 0,
        }
    }

    /// Identity of the owning track, for diagnostics.
    pub fn track(&self) -> Uuid {
        self.track
    }

    /// Clone of this track's wake handle. Stages hand this to engines that
    /// will need to rouse the track later.
    pub fn waker(&self) -> Arc<dyn TrackWake> {
        Arc::clone(&self.waker)
    }

    /// Input bytes staged and not yet consumed.
    pub fn input(&self) -> &[u8] {
        &self.input[self.input_pos..]
    }

    /// Consume `n` bytes from the front of the staged input.
    ///
    /// Clamped to what is actually staged.
    pub fn consume(&mut self, n: usize) {
        self.input_pos = (self.input_pos + n).min(self.input.len());
    }

    /// No further input will ever be staged after what is here now.
    pub fn input_done(&self) -> bool {
        self.input_done
    }

    /// The track has been asked to finish as soon as it cleanly can.
    /// Stages honor this by wrapping up and returning
    /// [`Done`](crate::StepCode::Done) at the next opportunity.
    pub fn stop_requested(&self) -> bool {
        self.stop
    }

    /// Stage a fresh input chunk, replacing anything left unconsumed.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.clear();
        self.input.extend_from_slice(bytes);
        self.input_pos = 0;
    }

    /// Mark the input side exhausted. Latches.
    pub fn set_input_done(&mut self) {
        self.input_done = true;
    }

    /// Ask the track to finish early. Latches.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    /// Stage output bytes for the next stage downstream.
    pub fn push_output(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    /// Bytes currently staged as output.
    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    /// Take everything staged as output. Runtime side.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}
