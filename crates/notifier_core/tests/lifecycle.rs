use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use notifier_core::{
    update, Effect, Msg, PipelineId, Sample, StatusReport, TerminalStatus, Tracker, WatchPhase,
};
use pretty_assertions::assert_eq;

fn running(raw: &[&str]) -> Sample {
    Sample {
        running: raw.iter().map(|id| PipelineId::from(*id)).collect(),
        statuses: Default::default(),
    }
}

fn finished(still_running: &[&str], id: &str, status: TerminalStatus) -> Sample {
    let mut sample = running(still_running);
    sample.statuses.insert(PipelineId::from(id), status);
    sample
}

fn notifications(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|effect| matches!(effect, Effect::Notify(_)))
        .count()
}

fn tick(state: Tracker, enabled: bool, now: Instant, sample: Option<Sample>) -> (Tracker, Vec<Effect>) {
    update(
        state,
        Msg::Tick {
            enabled,
            now,
            sample,
        },
    )
}

#[test]
fn initialize_disabled_suspends_and_publishes_zero() {
    let (state, effects) = update(Tracker::default(), Msg::Initialize { enabled: false });
    assert_eq!(state.phase(), WatchPhase::Suspended);
    assert_eq!(effects, vec![Effect::PublishStatus(StatusReport::idle())]);
    assert!(!state.session().unwrap().timers_armed());
}

#[test]
fn reinitialize_disarms_previous_session_first() {
    let (state, _) = update(Tracker::default(), Msg::Initialize { enabled: true });
    let (state, effects) = update(state, Msg::Initialize { enabled: true });
    assert_eq!(effects, vec![Effect::DisarmWatch, Effect::ArmWatch]);
    assert_eq!(state.phase(), WatchPhase::Armed);
}

#[test]
fn teardown_is_idempotent() {
    let (state, _) = update(Tracker::default(), Msg::Initialize { enabled: true });
    let (state, _) = tick(state, true, Instant::now(), Some(running(&["1"])));
    let (state, first) = update(state, Msg::Teardown);
    let (state, second) = update(state, Msg::Teardown);

    assert_eq!(first, vec![Effect::DisarmWatch]);
    assert!(second.is_empty());
    assert_eq!(state.phase(), WatchPhase::Stopped);
    assert!(state.previous_running().is_empty());
}

#[test]
fn leaving_page_publishes_idle_even_when_stopped() {
    let (state, effects) = update(Tracker::default(), Msg::LeftMonitoredPage);
    assert_eq!(effects, vec![Effect::PublishStatus(StatusReport::idle())]);
    assert_eq!(state.phase(), WatchPhase::Stopped);
}

#[test]
fn disabled_tick_suspends_and_resume_does_not_replay_missed_completions() {
    let now = Instant::now();
    let (state, _) = update(Tracker::default(), Msg::Initialize { enabled: true });
    let (state, _) = tick(state, true, now, Some(running(&["11", "12"])));

    let (state, effects) = tick(state, false, now + Duration::from_secs(5), None);
    assert_eq!(effects, vec![Effect::PublishStatus(StatusReport::idle())]);
    assert_eq!(state.phase(), WatchPhase::Suspended);
    assert!(state.previous_running().is_empty());

    // 11 finished while suspended; the resumed tick must not report it.
    let mut finished = running(&["12"]);
    finished
        .statuses
        .insert(PipelineId::from("11"), TerminalStatus::Success);
    let (state, effects) = tick(state, true, now + Duration::from_secs(10), Some(finished));
    assert!(!effects.iter().any(|e| matches!(e, Effect::Notify(_))));
    assert_eq!(state.phase(), WatchPhase::Armed);
    assert_eq!(
        effects,
        vec![Effect::PublishStatus(StatusReport::for_count(1))]
    );
}

#[test]
fn toggle_off_suspends_and_toggle_on_arms_when_nothing_scheduled() {
    let (state, _) = update(Tracker::default(), Msg::Initialize { enabled: false });
    let (state, effects) = update(state, Msg::Toggle { enabled: true });
    assert_eq!(effects, vec![Effect::StoreEnabled(true), Effect::ArmWatch]);
    assert_eq!(state.phase(), WatchPhase::Armed);

    let (state, _) = tick(state, true, Instant::now(), Some(running(&["3"])));
    let (state, effects) = update(state, Msg::Toggle { enabled: false });
    assert_eq!(
        effects,
        vec![
            Effect::StoreEnabled(false),
            Effect::PublishStatus(StatusReport::idle())
        ]
    );
    assert!(!state.is_enabled());
    assert_eq!(state.previous_running(), &BTreeSet::new());

    // Timers are still scheduled, so enabling again waits for the next tick.
    let (_, effects) = update(state, Msg::Toggle { enabled: true });
    assert_eq!(effects, vec![Effect::StoreEnabled(true)]);
}

#[test]
fn query_count_reports_last_running_set() {
    let (state, _) = update(Tracker::default(), Msg::Initialize { enabled: true });
    let (state, _) = tick(state, true, Instant::now(), Some(running(&["1", "2", "3"])));
    let (_, effects) = update(state, Msg::QueryCount);
    assert_eq!(effects, vec![Effect::ReplyCount(3)]);
}

#[test]
fn query_count_while_suspended_reports_committed_set() {
    let (state, _) = update(Tracker::default(), Msg::Initialize { enabled: false });
    let (_, effects) = update(state, Msg::QueryCount);
    assert_eq!(effects, vec![Effect::ReplyCount(0)]);
}

#[test]
fn ledger_survives_reinitialize_and_rerun_still_rearms() {
    let now = Instant::now();
    let at = |secs| now + Duration::from_secs(secs);
    let (state, _) = update(Tracker::default(), Msg::Initialize { enabled: true });
    let (state, _) = tick(state, true, at(0), Some(running(&["9"])));
    let (state, effects) = tick(
        state,
        true,
        at(5),
        Some(finished(&[], "9", TerminalStatus::Success)),
    );
    assert_eq!(notifications(&effects), 1);

    let (state, _) = update(state, Msg::Teardown);
    let (state, effects) = update(state, Msg::Initialize { enabled: true });
    assert_eq!(effects, vec![Effect::ArmWatch]);
    assert!(state.ledger().contains(&PipelineId::from("9")));

    // Within the TTL the mark holds; 9 reported finished again without being
    // seen running in this session stays silent.
    assert!(state.ledger().has_fired(&PipelineId::from("9"), at(10)));
    let (state, effects) = tick(
        state,
        true,
        at(10),
        Some(finished(&[], "9", TerminalStatus::Success)),
    );
    assert_eq!(notifications(&effects), 0);

    // Running again re-arms it; the next completion notifies once.
    let (state, _) = tick(state, true, at(15), Some(running(&["9"])));
    assert!(!state.ledger().contains(&PipelineId::from("9")));
    let (state, effects) = tick(
        state,
        true,
        at(20),
        Some(finished(&[], "9", TerminalStatus::Failed)),
    );
    assert_eq!(notifications(&effects), 1);
    let (_, effects) = tick(state, true, at(25), Some(running(&[])));
    assert_eq!(notifications(&effects), 0);
}
