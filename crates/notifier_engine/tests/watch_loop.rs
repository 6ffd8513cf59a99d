use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notifier_core::{CompletionEvent, PipelineId, TerminalStatus};
use notifier_engine::{
    ChangeFeed, ControlMessage, ControlReply, FailureKind, LoadError, LoadedPage, MarkerConfig,
    MemorySettingsStore, MutationBatch, MutationRecord, NotificationDispatcher,
    NotificationGateway, NotifierConfig, NotifyError, PageSource, PipelineExtractor,
    SettingsStore, Subscription, WatchDeps, WatchHandle,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const PAGE_URL: &str = "https://gitlab.com/g/app/-/pipelines";

#[derive(Default)]
struct ScriptedPage {
    html: Mutex<String>,
    loads: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedPage {
    fn show(&self, running: &[u32], finished: &[(u32, &str)]) {
        *self.html.lock().unwrap() = listing(running, finished);
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PageSource for ScriptedPage {
    async fn load(&self, url: &str) -> Result<LoadedPage, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LoadError {
                kind: FailureKind::Network,
                message: "connection reset".to_string(),
            });
        }
        Ok(LoadedPage {
            html: self.html.lock().unwrap().clone(),
            final_url: url.to_string(),
            encoding_label: "UTF-8".to_string(),
        })
    }
}

fn listing(running: &[u32], finished: &[(u32, &str)]) -> String {
    let mut rows = String::new();
    for id in running {
        rows.push_str(&format!(
            r#"<tr data-testid="pipeline-table-row"><td><a class="ci-status ci-running" href="/g/app/-/pipelines/{id}">running</a></td></tr>"#
        ));
    }
    for (id, class) in finished {
        rows.push_str(&format!(
            r#"<tr data-testid="pipeline-table-row"><td><a class="{class}" href="/g/app/-/pipelines/{id}">done</a></td></tr>"#
        ));
    }
    format!("<html><body><table><tbody>{rows}</tbody></table></body></html>")
}

#[derive(Default)]
struct RecordingGateway {
    events: Mutex<Vec<CompletionEvent>>,
}

impl RecordingGateway {
    fn events(&self) -> Vec<CompletionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NotificationGateway for RecordingGateway {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, event: &CompletionEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedFeed {
    senders: Mutex<Vec<mpsc::UnboundedSender<MutationBatch>>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedFeed {
    fn subscriptions(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    fn push(&self, batch: MutationBatch) {
        if let Some(tx) = self.senders.lock().unwrap().last() {
            let _ = tx.send(batch);
        }
    }

    fn all_cancelled(&self) -> bool {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .all(CancellationToken::is_cancelled)
    }
}

impl ChangeFeed for ScriptedFeed {
    fn subscribe(&self, _url: &str, token: CancellationToken) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        self.tokens.lock().unwrap().push(token.clone());
        Subscription::new(rx, token)
    }
}

fn graph_batch() -> MutationBatch {
    vec![MutationRecord {
        added_nodes: vec![
            r#"<div class="row"><div data-testid="widget-mini-pipeline-graph"></div></div>"#
                .to_string(),
        ],
    }]
}

struct Harness {
    page: Arc<ScriptedPage>,
    gateway: Arc<RecordingGateway>,
    feed: Arc<ScriptedFeed>,
    settings: Arc<MemorySettingsStore>,
    handle: WatchHandle,
}

impl Harness {
    fn start() -> Self {
        engine_logging::initialize_for_tests();
        let page = Arc::new(ScriptedPage::default());
        let gateway = Arc::new(RecordingGateway::default());
        let feed = Arc::new(ScriptedFeed::default());
        let settings = Arc::new(MemorySettingsStore::default());
        let deps = WatchDeps {
            source: page.clone(),
            feed: Some(feed.clone()),
            settings: settings.clone(),
            dispatcher: Arc::new(NotificationDispatcher::new(gateway.clone(), None)),
            extractor: Arc::new(PipelineExtractor::new(&MarkerConfig::default()).unwrap()),
        };
        let handle = WatchHandle::spawn(NotifierConfig::default(), deps);
        Self {
            page,
            gateway,
            feed,
            settings,
            handle,
        }
    }

    fn status(&self) -> (usize, bool) {
        let settings = self.settings.get().unwrap();
        (settings.count, settings.active)
    }
}

fn success(id: &str) -> CompletionEvent {
    CompletionEvent::new(PipelineId::from(id), TerminalStatus::Success)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn finished_pipeline_is_notified_once() {
    let h = Harness::start();
    h.page.show(&[101, 102], &[]);
    h.handle.initialize(PAGE_URL);

    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.page.loads(), 1);
    assert_eq!(h.status(), (2, true));

    h.page.show(&[102], &[(101, "ci-status ci-success")]);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.gateway.events(), vec![success("101")]);
    assert_eq!(h.status(), (1, true));
    assert_eq!(
        h.handle.control(ControlMessage::QueryCount).await,
        Some(ControlReply::Count { count: 1 })
    );

    // Same page again: nothing new to report.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.gateway.events().len(), 1);

    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rerun_is_notified_again() {
    let h = Harness::start();
    h.page.show(&[7], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_millis(1_100)).await;

    h.page.show(&[], &[(7, "ci-status ci-success")]);
    sleep(Duration::from_secs(5)).await;
    h.page.show(&[7], &[]);
    sleep(Duration::from_secs(5)).await;
    h.page.show(&[], &[(7, "ci-status ci-failed")]);
    sleep(Duration::from_secs(5)).await;

    assert_eq!(
        h.gateway.events(),
        vec![
            success("7"),
            CompletionEvent::new(PipelineId::from("7"), TerminalStatus::Failed)
        ]
    );
    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn completion_without_marker_is_silent() {
    let h = Harness::start();
    h.page.show(&[103], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_millis(1_100)).await;

    h.page.show(&[], &[]);
    sleep(Duration::from_secs(5)).await;

    assert!(h.gateway.events().is_empty());
    assert_eq!(h.status(), (0, false));
    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn disabling_suspends_and_resuming_does_not_replay() {
    let h = Harness::start();
    h.page.show(&[11], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.status(), (1, true));

    assert_eq!(
        h.handle
            .control(ControlMessage::Toggle { enabled: false })
            .await,
        Some(ControlReply::Ack { ok: true })
    );
    assert_eq!(h.status(), (0, false));
    assert!(!h.settings.get().unwrap().enabled);

    h.page.show(&[], &[(11, "ci-status ci-success")]);
    let loads = h.page.loads();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.page.loads(), loads, "disabled ticks must not sample");
    assert_eq!(h.status(), (0, false));

    h.handle
        .control(ControlMessage::Toggle { enabled: true })
        .await;
    sleep(Duration::from_secs(5)).await;
    assert!(h.gateway.events().is_empty());

    h.page.show(&[12], &[]);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.status(), (1, true));
    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn disabled_at_start_waits_for_toggle() {
    let h = Harness::start();
    h.settings
        .set(notifier_engine::SettingsUpdate::enabled(false))
        .unwrap();
    h.page.show(&[5], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_secs(11)).await;
    assert_eq!(h.page.loads(), 0);
    assert_eq!(h.status(), (0, false));

    h.handle
        .control(ControlMessage::Toggle { enabled: true })
        .await;
    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.page.loads(), 1);
    assert_eq!(h.status(), (1, true));
    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn mutation_burst_triggers_one_debounced_sample() {
    let h = Harness::start();
    h.page.show(&[1], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.feed.subscriptions(), 1);
    assert_eq!(h.page.loads(), 1);

    h.feed.push(graph_batch());
    h.feed.push(graph_batch());
    h.feed.push(vec![MutationRecord {
        added_nodes: vec!["<span>tooltip</span>".to_string()],
    }]);
    sleep(Duration::from_millis(600)).await;
    assert_eq!(h.page.loads(), 2);
    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn teardown_cancels_pending_debounce() {
    let h = Harness::start();
    h.page.show(&[1], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.page.loads(), 1);

    h.feed.push(graph_batch());
    sleep(Duration::from_millis(100)).await;
    h.handle.teardown();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.page.loads(), 1);
    assert!(h.feed.all_cancelled());
    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn load_failure_skips_tick_and_keeps_previous_set() {
    let h = Harness::start();
    h.page.show(&[21], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_millis(1_100)).await;

    h.page.failing.store(true, Ordering::SeqCst);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.status(), (1, true));

    h.page.failing.store(false, Ordering::SeqCst);
    h.page.show(&[], &[(21, "ci-status-icon-success")]);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.gateway.events(), vec![success("21")]);
    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unavailable_store_does_not_stop_notifications() {
    let h = Harness::start();
    h.page.show(&[31], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_millis(1_100)).await;

    h.settings.set_available(false);
    h.page.show(&[], &[(31, "ci-status ci-success")]);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.gateway.events(), vec![success("31")]);

    h.settings.set_available(true);
    assert_eq!(h.status(), (1, true), "writes while unavailable are skipped");
    h.handle.shutdown().await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn navigation_tears_down_and_reinitializes() {
    let h = Harness::start();
    h.page.show(&[41], &[]);
    h.handle.initialize(PAGE_URL);
    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.status(), (1, true));

    h.handle
        .control(ControlMessage::Navigate {
            url: "https://gitlab.com/g/app/-/merge_requests".to_string(),
        })
        .await;
    assert_eq!(h.status(), (0, false));
    let loads = h.page.loads();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.page.loads(), loads);
    assert_eq!(
        h.handle.control(ControlMessage::QueryCount).await,
        Some(ControlReply::Count { count: 0 })
    );

    h.handle
        .control(ControlMessage::Navigate {
            url: format!("{PAGE_URL}?page=2"),
        })
        .await;
    // Navigation delay, then the settle delay of the new session.
    sleep(Duration::from_millis(2_100)).await;
    assert_eq!(h.page.loads(), loads + 1);
    assert_eq!(h.status(), (1, true));
    h.handle.shutdown().await;
}
