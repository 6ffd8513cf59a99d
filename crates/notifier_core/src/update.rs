use std::time::Instant;

use crate::transition::{detect_completions, rearm};
use crate::{
    CompletionEvent, Effect, Msg, Sample, StatusReport, TerminalStatus, Tracker, WatchSession,
};

/// Pure update function: applies a message to the tracker and returns the
/// effects the engine has to carry out.
pub fn update(mut state: Tracker, msg: Msg) -> (Tracker, Vec<Effect>) {
    let effects = match msg {
        Msg::Initialize { enabled } => {
            let mut effects = teardown(&mut state);
            state.set_enabled(enabled);
            if enabled {
                state.start_session(WatchSession::armed());
                effects.push(Effect::ArmWatch);
            } else {
                state.start_session(WatchSession::suspended_without_timers());
                effects.push(Effect::PublishStatus(StatusReport::idle()));
            }
            effects
        }
        Msg::Teardown => teardown(&mut state),
        Msg::LeftMonitoredPage => {
            let mut effects = teardown(&mut state);
            effects.push(Effect::PublishStatus(StatusReport::idle()));
            effects
        }
        Msg::Toggle { enabled } => toggle(&mut state, enabled),
        Msg::Tick {
            enabled,
            now,
            sample,
        } => tick(&mut state, enabled, now, sample),
        Msg::QueryCount => vec![Effect::ReplyCount(state.running_count())],
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn teardown(state: &mut Tracker) -> Vec<Effect> {
    if state.end_session() {
        vec![Effect::DisarmWatch]
    } else {
        Vec::new()
    }
}

fn toggle(state: &mut Tracker, enabled: bool) -> Vec<Effect> {
    state.set_enabled(enabled);
    let mut effects = vec![Effect::StoreEnabled(enabled)];
    let Some(session) = state.session_mut() else {
        return effects;
    };
    if !enabled {
        session.suspend();
        effects.push(Effect::PublishStatus(StatusReport::idle()));
    } else if !session.timers_armed() {
        // Suspended since initialize: nothing is scheduled yet.
        session.resume_armed();
        effects.push(Effect::ArmWatch);
    }
    effects
}

fn tick(state: &mut Tracker, enabled: bool, now: Instant, sample: Option<Sample>) -> Vec<Effect> {
    if state.session().is_none() {
        return Vec::new();
    }
    state.set_enabled(enabled);
    if !enabled {
        if let Some(session) = state.session_mut() {
            session.suspend();
        }
        return vec![Effect::PublishStatus(StatusReport::idle())];
    }
    let Some(Sample { running, statuses }) = sample else {
        return Vec::new();
    };

    let ttl = state.dedup_ttl();
    let completed = detect_completions(state.previous_running(), &running);
    let ledger = state.ledger_mut();
    ledger.expire_older_than(now);
    rearm(ledger, &running);

    let mut effects = Vec::new();
    for id in completed {
        let status = statuses
            .get(&id)
            .copied()
            .unwrap_or(TerminalStatus::Unknown);
        if !status.is_determinate() || ledger.has_fired(&id, now) {
            continue;
        }
        ledger.mark_fired(id.clone(), now, ttl);
        effects.push(Effect::Notify(CompletionEvent::new(id, status)));
    }

    let report = StatusReport::for_count(running.len());
    if let Some(session) = state.session_mut() {
        session.replace_previous(running);
    }
    effects.push(Effect::PublishStatus(report));
    effects
}
