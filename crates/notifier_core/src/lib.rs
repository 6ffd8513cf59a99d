//! Notifier core: pure pipeline tracking state machine.
mod effect;
mod ledger;
mod msg;
mod state;
mod transition;
mod update;

pub use effect::{CompletionEvent, Effect, StatusReport};
pub use ledger::{DedupLedger, DEFAULT_DEDUP_TTL};
pub use msg::{Msg, Sample};
pub use state::{PipelineId, TerminalStatus, Tracker, WatchPhase, WatchSession};
pub use transition::{detect_completions, rearm};
pub use update::update;
