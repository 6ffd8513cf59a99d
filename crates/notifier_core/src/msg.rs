use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::{PipelineId, TerminalStatus};

/// One reading of the monitored page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sample {
    /// Every id currently marked as in progress.
    pub running: BTreeSet<PipelineId>,
    /// Classification of the ids that left the running set since the last
    /// tick. Missing ids count as `TerminalStatus::Unknown`.
    pub statuses: BTreeMap<PipelineId, TerminalStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Start a watch session, replacing any previous one.
    Initialize { enabled: bool },
    /// End the current session. Safe to repeat.
    Teardown,
    /// Navigation moved away from a monitored page.
    LeftMonitoredPage,
    /// The control surface flipped the enabled flag.
    Toggle { enabled: bool },
    /// Sampler tick. `sample` is `None` when the page could not be read, in
    /// which case the tick is skipped and the previous running set kept.
    Tick {
        enabled: bool,
        now: Instant,
        sample: Option<Sample>,
    },
    /// The control surface asked for the number of running pipelines.
    /// Answered from the last committed sample, so it is 0 while suspended or
    /// before the first tick; no fresh page read is made.
    QueryCount,
    /// Fallback for placeholder wiring.
    NoOp,
}
