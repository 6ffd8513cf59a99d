use std::collections::BTreeSet;

use crate::{DedupLedger, PipelineId};

/// Ids present in `previous` but missing from `current`.
pub fn detect_completions(
    previous: &BTreeSet<PipelineId>,
    current: &BTreeSet<PipelineId>,
) -> BTreeSet<PipelineId> {
    previous.difference(current).cloned().collect()
}

/// Clears ledger entries for ids running again, so a re-run can notify once
/// more when it finishes. Returns the re-armed ids.
pub fn rearm(ledger: &mut DedupLedger, current: &BTreeSet<PipelineId>) -> Vec<PipelineId> {
    current
        .iter()
        .filter(|id| ledger.clear(id))
        .cloned()
        .collect()
}
