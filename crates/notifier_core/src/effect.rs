use serde::Serialize;

use crate::{PipelineId, TerminalStatus};

pub const DEFAULT_STAGE: &str = "Pipeline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Schedule the settle sample, the periodic sampler and the change
    /// subscription.
    ArmWatch,
    /// Cancel every timer and subscription of the session.
    DisarmWatch,
    Notify(CompletionEvent),
    PublishStatus(StatusReport),
    StoreEnabled(bool),
    ReplyCount(usize),
}

/// Aggregate written to the settings store after every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusReport {
    pub count: usize,
    pub active: bool,
}

impl StatusReport {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn for_count(count: usize) -> Self {
        Self {
            count,
            active: count > 0,
        }
    }
}

/// A pipeline that left the running set with a determinate status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub pipeline_id: PipelineId,
    pub stage: String,
    pub status: TerminalStatus,
}

impl CompletionEvent {
    pub fn new(pipeline_id: PipelineId, status: TerminalStatus) -> Self {
        Self {
            pipeline_id,
            stage: DEFAULT_STAGE.to_string(),
            status,
        }
    }

    pub fn title(&self) -> &'static str {
        match self.status {
            TerminalStatus::Success => "Build succeeded",
            _ => "Build failed",
        }
    }

    pub fn message(&self) -> String {
        let outcome = match self.status {
            TerminalStatus::Success => "succeeded",
            _ => "failed",
        };
        format!(
            "Pipeline #{} - {} stage {outcome}",
            self.pipeline_id, self.stage
        )
    }
}
