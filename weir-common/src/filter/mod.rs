//! Cooperative filter execution contract
//!
//! A track is a chain of filters driven by an external runtime. The runtime
//! invokes one filter at a time, routing each filter's output bytes into
//! the input of the next. Filters never block: every invocation returns a
//! single [`StepCode`] verdict (or an error, which unwinds the whole
//! track), and a filter that must wait for something arranges an external
//! wake and suspends.
//!
//! # Verdicts
//!
//! - [`StepCode::NeedInput`]: staged input consumed; call again once more
//!   is staged (or the input is marked done).
//! - [`StepCode::Produced`]: output staged (possibly empty), more input
//!   welcome afterwards.
//! - [`StepCode::Done`]: final output staged (possibly empty); the filter
//!   will not be invoked again.
//! - [`StepCode::Suspend`]: waiting on an external event; call again only
//!   after the track's wake handle fires.
//! - [`StepCode::Seek`]: reposition the upstream byte source, then resume
//!   feeding.
//! - [`StepCode::Insert`]: splice a named filter into the chain, then
//!   call again.
//!
//! Failure is not a verdict: a filter that cannot continue returns `Err`,
//! and the runtime drops every stage of the track.

pub mod context;
pub mod registry;

pub use context::StepContext;
pub use registry::{FilterFactory, FilterRegistry};

use crate::error::Result;

/// Verdict returned by a successful filter step.
///
/// Exactly one verdict is produced per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCode {
    /// Everything staged was consumed and nothing useful can happen until
    /// more input arrives.
    NeedInput,
    /// Output bytes (possibly none) are staged for downstream and the
    /// filter can take more input afterwards.
    Produced,
    /// The staged output (possibly none) is the last this filter will ever
    /// produce.
    Done,
    /// The filter is waiting on an external event; re-invoke only after
    /// its track's wake handle fires.
    Suspend,
    /// Reposition the upstream byte source to this absolute offset before
    /// feeding any further input.
    Seek(u64),
    /// Splice the filter registered under `name` into the chain relative
    /// to the requesting filter, then re-invoke.
    Insert { name: String, place: InsertPlace },
}

/// Placement of a filter spliced in by [`StepCode::Insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPlace {
    /// Between the requesting filter's upstream and the requesting filter.
    Before,
    /// Between the requesting filter and its downstream.
    After,
}

/// A single stage of a track's processing chain.
///
/// Stages are constructed by a [`FilterFactory`] (so opening can fail) and
/// torn down by `Drop`.
pub trait Filter: Send {
    /// Advance the stage by one cooperative step.
    ///
    /// Must not block. Input is read from `ctx`, output is staged into
    /// `ctx`, and the return value tells the runtime what to do next.
    fn process(&mut self, ctx: &mut StepContext) -> Result<StepCode>;
}

/// Wake handle for one track.
///
/// The runtime re-invokes a suspended track only after something calls
/// [`wake`](TrackWake::wake) on its handle. Wakes are sticky: waking a
/// track that is currently runnable must leave it runnable, so a
/// completion racing a suspension is never lost.
pub trait TrackWake: Send + Sync {
    fn wake(&self);
}

/// Lets a tokio task host a track directly: suspend by awaiting
/// `notified()`, and hand the `Notify` to whoever needs to wake the track.
/// `notify_one` stores a permit, which is exactly the sticky-wake contract.
impl TrackWake for tokio::sync::Notify {
    fn wake(&self) {
        self.notify_one();
    }
}
