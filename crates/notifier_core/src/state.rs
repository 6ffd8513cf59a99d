use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::{DedupLedger, DEFAULT_DEDUP_TTL};
use crate::transition::detect_completions;

/// Opaque identifier of one pipeline run, as found in the page markup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(String);

impl PipelineId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PipelineId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Success,
    Failed,
    Unknown,
}

impl TerminalStatus {
    /// Only success and failed are worth a notification.
    pub fn is_determinate(self) -> bool {
        !matches!(self, TerminalStatus::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerminalStatus::Success => "success",
            TerminalStatus::Failed => "failed",
            TerminalStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchPhase {
    #[default]
    Stopped,
    Armed,
    Suspended,
}

/// State bounded by one initialize/teardown cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSession {
    previous: BTreeSet<PipelineId>,
    phase: WatchPhase,
    timers_armed: bool,
}

impl WatchSession {
    pub(crate) fn armed() -> Self {
        Self {
            previous: BTreeSet::new(),
            phase: WatchPhase::Armed,
            timers_armed: true,
        }
    }

    pub(crate) fn suspended_without_timers() -> Self {
        Self {
            previous: BTreeSet::new(),
            phase: WatchPhase::Suspended,
            timers_armed: false,
        }
    }

    pub fn previous_running(&self) -> &BTreeSet<PipelineId> {
        &self.previous
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    /// Whether the periodic sampler is scheduled for this session.
    pub fn timers_armed(&self) -> bool {
        self.timers_armed
    }

    pub(crate) fn suspend(&mut self) {
        self.previous.clear();
        self.phase = WatchPhase::Suspended;
    }

    pub(crate) fn resume_armed(&mut self) {
        self.phase = WatchPhase::Armed;
        self.timers_armed = true;
    }

    pub(crate) fn replace_previous(&mut self, running: BTreeSet<PipelineId>) {
        self.phase = WatchPhase::Armed;
        self.previous = running;
    }
}

/// Whole tracking engine state: the enabled flag, the dedup ledger and the
/// current watch session, if any.
///
/// The ledger lives outside the session and is therefore kept across
/// teardown/initialize cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
    enabled: bool,
    ledger: DedupLedger,
    session: Option<WatchSession>,
    dedup_ttl: Duration,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

impl Tracker {
    pub fn new(dedup_ttl: Duration) -> Self {
        Self {
            enabled: true,
            ledger: DedupLedger::new(),
            session: None,
            dedup_ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn phase(&self) -> WatchPhase {
        self.session
            .as_ref()
            .map(WatchSession::phase)
            .unwrap_or(WatchPhase::Stopped)
    }

    pub fn session(&self) -> Option<&WatchSession> {
        self.session.as_ref()
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn dedup_ttl(&self) -> Duration {
        self.dedup_ttl
    }

    /// The running set recorded by the last completed tick; empty when stopped.
    pub fn previous_running(&self) -> &BTreeSet<PipelineId> {
        static EMPTY: BTreeSet<PipelineId> = BTreeSet::new();
        self.session
            .as_ref()
            .map(WatchSession::previous_running)
            .unwrap_or(&EMPTY)
    }

    pub fn running_count(&self) -> usize {
        self.previous_running().len()
    }

    /// Ids that would complete if `running` were the next sample. The engine
    /// classifies exactly these before handing the sample over.
    pub fn pending_completions(&self, running: &BTreeSet<PipelineId>) -> BTreeSet<PipelineId> {
        detect_completions(self.previous_running(), running)
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut WatchSession> {
        self.session.as_mut()
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut DedupLedger {
        &mut self.ledger
    }

    pub(crate) fn start_session(&mut self, session: WatchSession) {
        self.session = Some(session);
    }

    pub(crate) fn end_session(&mut self) -> bool {
        self.session.take().is_some()
    }
}
