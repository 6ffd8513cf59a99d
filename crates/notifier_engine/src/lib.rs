//! Notifier engine: page loading, pipeline extraction and the watch loop.
mod config;
mod control;
mod extract;
mod feed;
mod notify;
mod page;
mod settings;
mod types;
mod watch;

pub use config::{ConfigError, MarkerConfig, NotifierConfig, WatchTimings};
pub use control::{ControlError, ControlMessage, ControlReply};
pub use extract::{pipeline_id_from_href, PageReading, PipelineExtractor};
pub use feed::{ChangeFeed, MutationBatch, MutationRecord, PollingChangeFeed, Subscription};
pub use notify::{
    DeliveryOutcome, LogAlert, NotificationDispatcher, NotificationGateway, NotifyError,
    WebhookGateway,
};
pub use page::{decode_page, LoadSettings, PageSource, ReqwestPageSource};
pub use settings::{
    MemorySettingsStore, RonSettingsStore, Settings, SettingsStore, SettingsUpdate, StoreError,
};
pub use types::{FailureKind, LoadError, LoadedPage};
pub use watch::{WatchDeps, WatchHandle};
