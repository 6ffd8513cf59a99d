use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use engine_logging::{engine_debug, engine_info, engine_warn, set_watch_tick};
use notifier_core::{update, Effect, Msg, StatusReport, Tracker};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;

use crate::config::{NotifierConfig, WatchTimings};
use crate::control::{ControlMessage, ControlReply};
use crate::extract::PipelineExtractor;
use crate::feed::{ChangeFeed, MutationBatch, Subscription};
use crate::notify::NotificationDispatcher;
use crate::page::PageSource;
use crate::settings::{SettingsStore, SettingsUpdate};

/// Collaborators the watch loop drives.
pub struct WatchDeps {
    pub source: Arc<dyn PageSource>,
    pub feed: Option<Arc<dyn ChangeFeed>>,
    pub settings: Arc<dyn SettingsStore>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub extractor: Arc<PipelineExtractor>,
}

enum WatchCommand {
    Initialize { url: String },
    Teardown,
    Control {
        message: ControlMessage,
        reply: oneshot::Sender<ControlReply>,
    },
    Shutdown,
}

/// Handle to a running watch loop task.
pub struct WatchHandle {
    cmd_tx: mpsc::UnboundedSender<WatchCommand>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Spawns the loop on the current tokio runtime. It stays stopped until
    /// `initialize` is called.
    pub fn spawn(config: NotifierConfig, deps: WatchDeps) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let watch = WatchLoop::new(config, deps);
        let task = tokio::spawn(watch.run(cmd_rx));
        Self { cmd_tx, task }
    }

    pub fn initialize(&self, url: impl Into<String>) {
        let _ = self.cmd_tx.send(WatchCommand::Initialize { url: url.into() });
    }

    pub fn teardown(&self) {
        let _ = self.cmd_tx.send(WatchCommand::Teardown);
    }

    /// Sends a control message; `None` if the loop is gone.
    pub async fn control(&self, message: ControlMessage) -> Option<ControlReply> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(WatchCommand::Control { message, reply })
            .ok()?;
        rx.await.ok()
    }

    /// Tears the session down and waits for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(WatchCommand::Shutdown);
        if let Err(err) = self.task.await {
            engine_warn!("Watch loop ended abnormally: {}", err);
        }
    }
}

struct WatchLoop {
    config: NotifierConfig,
    timings: WatchTimings,
    deps: WatchDeps,
    tracker: Tracker,
    url: Option<String>,
    ticks: u64,
    /// Cancelled on disarm; anything scheduled under it becomes a no-op.
    liveness: Option<CancellationToken>,
    settle: Option<Pin<Box<Sleep>>>,
    sampler: Option<Interval>,
    subscription: Option<Subscription>,
    debounce: Option<Pin<Box<Sleep>>>,
    pending_init: Option<Pin<Box<Sleep>>>,
}

impl WatchLoop {
    fn new(config: NotifierConfig, deps: WatchDeps) -> Self {
        Self {
            timings: config.timings(),
            tracker: Tracker::new(config.dedup_ttl()),
            config,
            deps,
            url: None,
            ticks: 0,
            liveness: None,
            settle: None,
            sampler: None,
            subscription: None,
            debounce: None,
            pending_init: None,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<WatchCommand>) {
        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(WatchCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = fire(&mut self.pending_init) => {
                    self.pending_init = None;
                    self.initialize();
                }
                _ = fire(&mut self.settle) => {
                    self.settle = None;
                    self.tick().await;
                }
                _ = next_tick(&mut self.sampler) => self.tick().await,
                batch = next_batch(&mut self.subscription) => self.on_mutations(batch),
                _ = fire(&mut self.debounce) => {
                    self.debounce = None;
                    self.tick().await;
                }
            }
        }
        self.pending_init = None;
        self.apply(Msg::Teardown);
        engine_info!("Watch loop stopped");
    }

    fn handle_command(&mut self, command: WatchCommand) {
        match command {
            WatchCommand::Initialize { url } => {
                self.pending_init = None;
                self.url = Some(url);
                self.initialize();
            }
            WatchCommand::Teardown => {
                self.pending_init = None;
                self.apply(Msg::Teardown);
            }
            WatchCommand::Control { message, reply } => {
                let answer = self.handle_control(message);
                let _ = reply.send(answer);
            }
            WatchCommand::Shutdown => {}
        }
    }

    fn handle_control(&mut self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::Toggle { enabled } => {
                engine_info!(
                    "Notifications {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                self.apply(Msg::Toggle { enabled });
                ControlReply::Ack { ok: true }
            }
            ControlMessage::QueryCount => {
                let count = self.apply(Msg::QueryCount).unwrap_or(0);
                ControlReply::Count { count }
            }
            ControlMessage::Navigate { url } => {
                self.navigate(url);
                ControlReply::Ack { ok: true }
            }
        }
    }

    fn navigate(&mut self, url: String) {
        if self.url.as_deref() == Some(url.as_str()) {
            return;
        }
        self.pending_init = None;
        let monitored = self.config.is_monitored_url(&url);
        self.url = Some(url);
        if monitored {
            engine_info!("Entered pipeline page, re-initializing");
            self.apply(Msg::Teardown);
            self.pending_init = Some(Box::pin(sleep(self.timings.settle_delay)));
        } else {
            engine_info!("Left pipeline page, releasing resources");
            self.apply(Msg::LeftMonitoredPage);
        }
    }

    fn initialize(&mut self) {
        let Some(url) = self.url.as_deref() else {
            engine_warn!("Initialize requested without a page url");
            return;
        };
        engine_info!("Initializing watch session for {}", url);
        let enabled = self.read_enabled();
        self.apply(Msg::Initialize { enabled });
    }

    async fn tick(&mut self) {
        let Some(token) = self.liveness.clone() else {
            return;
        };
        if token.is_cancelled() {
            return;
        }
        self.ticks += 1;
        set_watch_tick(self.ticks);

        let enabled = self.read_enabled();
        let mut reading = None;
        if enabled {
            if let Some(url) = self.url.clone() {
                let source = Arc::clone(&self.deps.source);
                match source.load(&url).await {
                    Ok(page) => {
                        reading = Some(
                            self.deps
                                .extractor
                                .read_page(&page.html, self.tracker.previous_running()),
                        );
                    }
                    Err(err) => engine_warn!("Skipping tick, could not load {}: {}", url, err),
                }
            }
        }
        if token.is_cancelled() {
            return;
        }

        let has_listing = reading.as_ref().is_some_and(|r| r.has_listing);
        self.apply(Msg::Tick {
            enabled,
            now: Instant::now().into_std(),
            sample: reading.map(|r| r.sample),
        });
        if has_listing && self.subscription.is_none() {
            self.subscribe(&token);
        }
    }

    fn subscribe(&mut self, token: &CancellationToken) {
        let (Some(feed), Some(url)) = (&self.deps.feed, &self.url) else {
            return;
        };
        engine_debug!("Subscribing to listing changes of {}", url);
        self.subscription = Some(feed.subscribe(url, token.child_token()));
    }

    fn on_mutations(&mut self, batch: Option<MutationBatch>) {
        let Some(batch) = batch else {
            self.subscription = None;
            return;
        };
        if !self.is_live() || self.debounce.is_some() {
            return;
        }
        if self.deps.extractor.batch_touches_pipelines(&batch) {
            self.debounce = Some(Box::pin(sleep(self.timings.debounce)));
        }
    }

    fn is_live(&self) -> bool {
        self.liveness
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn read_enabled(&self) -> bool {
        match self.deps.settings.get() {
            Ok(settings) => settings.enabled,
            Err(err) => {
                engine_debug!("Settings unavailable, keeping enabled flag: {}", err);
                self.tracker.is_enabled()
            }
        }
    }

    /// Runs `msg` through the tracker and executes the resulting effects.
    /// Returns the count when the message asked for one.
    fn apply(&mut self, msg: Msg) -> Option<usize> {
        let (tracker, effects) = update(std::mem::take(&mut self.tracker), msg);
        self.tracker = tracker;

        let mut reply = None;
        for effect in effects {
            match effect {
                Effect::ArmWatch => self.arm(),
                Effect::DisarmWatch => self.disarm(),
                Effect::Notify(event) => {
                    if !self.is_live() {
                        continue;
                    }
                    engine_info!(
                        "Pipeline #{} finished: {}",
                        event.pipeline_id,
                        event.status.as_str()
                    );
                    self.deps.dispatcher.dispatch(event);
                }
                Effect::PublishStatus(report) => self.publish(report),
                Effect::StoreEnabled(enabled) => {
                    if let Err(err) = self.deps.settings.set(SettingsUpdate::enabled(enabled)) {
                        engine_debug!("Skipped storing enabled flag: {}", err);
                    }
                }
                Effect::ReplyCount(count) => reply = Some(count),
            }
        }
        reply
    }

    fn publish(&self, report: StatusReport) {
        let update = SettingsUpdate::status(report.count, report.active);
        if let Err(err) = self.deps.settings.set(update) {
            engine_debug!("Skipped publishing status: {}", err);
        }
    }

    fn arm(&mut self) {
        self.disarm();
        let period = self.timings.tick_period;
        let mut sampler = interval_at(Instant::now() + period, period);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.liveness = Some(CancellationToken::new());
        self.settle = Some(Box::pin(sleep(self.timings.settle_delay)));
        self.sampler = Some(sampler);
    }

    fn disarm(&mut self) {
        if let Some(token) = self.liveness.take() {
            token.cancel();
            engine_debug!("Watch timers cancelled");
        }
        self.settle = None;
        self.sampler = None;
        self.subscription = None;
        self.debounce = None;
    }
}

async fn fire(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn next_tick(sampler: &mut Option<Interval>) {
    match sampler {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn next_batch(subscription: &mut Option<Subscription>) -> Option<MutationBatch> {
    match subscription {
        Some(subscription) => subscription.next_batch().await,
        None => pending().await,
    }
}
