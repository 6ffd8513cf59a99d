use std::future::{pending, Future};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use engine_logging::{engine_info, engine_warn};
use notifier_engine::{
    ChangeFeed, ControlMessage, LogAlert, NotificationDispatcher, NotificationGateway,
    NotifierConfig, PageSource, PipelineExtractor, PollingChangeFeed, ReqwestPageSource,
    RonSettingsStore, WatchDeps, WatchHandle, WebhookGateway,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Runtime;

use super::cli::Args;
use super::logging;

pub fn run_app() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::initialize(args.log.into(), args.log_level());

    let config = load_config(args.config.as_deref())?;
    let runtime = build_runtime().context("failed to start tokio runtime")?;
    runtime.block_on(watch(config, args.url))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<NotifierConfig> {
    match path {
        Some(path) => {
            let config = NotifierConfig::load(path)?;
            engine_info!("Loaded config from {:?}", path);
            Ok(config)
        }
        None => Ok(NotifierConfig::default()),
    }
}

fn build_deps(config: &NotifierConfig) -> anyhow::Result<WatchDeps> {
    let extractor = Arc::new(PipelineExtractor::new(&config.markers)?);
    let source: Arc<dyn PageSource> =
        Arc::new(ReqwestPageSource::new(config.load_settings()).context("page client")?);
    let feed: Arc<dyn ChangeFeed> = Arc::new(PollingChangeFeed::new(
        source.clone(),
        extractor.clone(),
        config.change_poll_period(),
    ));

    let local: Arc<dyn NotificationGateway> = Arc::new(LogAlert);
    let dispatcher = match &config.webhook_url {
        Some(url) => {
            let webhook = WebhookGateway::new(reqwest::Client::new(), url.clone());
            NotificationDispatcher::new(Arc::new(webhook), Some(local))
        }
        None => NotificationDispatcher::new(local, None),
    };

    Ok(WatchDeps {
        source,
        feed: Some(feed),
        settings: Arc::new(RonSettingsStore::new(config.settings_path.clone())),
        dispatcher: Arc::new(dispatcher),
        extractor,
    })
}

async fn watch(config: NotifierConfig, url: String) -> anyhow::Result<()> {
    let monitored = config.is_monitored_url(&url);
    if !monitored {
        engine_warn!(
            "{} is not a pipeline page on {:?}; waiting for a navigate message",
            url,
            config.domains
        );
    }
    let deps = build_deps(&config)?;
    let handle = WatchHandle::spawn(config, deps);
    if monitored {
        handle.initialize(url);
    }

    let input = BufReader::new(tokio::io::stdin());
    let served = serve_control(&handle, input, tokio::io::stdout(), interrupted()).await;
    handle.shutdown().await;
    served
}

/// Single-threaded runtime; the watch tick log prefix is thread-local.
fn build_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        engine_warn!("Cannot listen for Ctrl-C: {}", err);
        pending::<()>().await;
    }
    engine_info!("Interrupted, shutting down");
}

/// Answers JSON control lines from `input` until `stop` resolves.
///
/// End of input only stops reading: the watch keeps running until `stop`.
async fn serve_control<R, W>(
    handle: &WatchHandle,
    input: R,
    mut output: W,
    stop: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::pin!(stop);
    let mut lines = input.lines();
    let mut input_open = true;
    loop {
        tokio::select! {
            _ = &mut stop => return Ok(()),
            line = lines.next_line(), if input_open => {
                let Some(line) = line.context("failed to read control input")? else {
                    engine_info!("Control input closed, watching until interrupted");
                    input_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message = match ControlMessage::from_json(&line) {
                    Ok(message) => message,
                    Err(err) => {
                        engine_warn!("Ignoring control line: {}", err);
                        continue;
                    }
                };
                let reply = tokio::select! {
                    _ = &mut stop => return Ok(()),
                    reply = handle.control(message) => reply,
                };
                if let Some(reply) = reply {
                    output.write_all(reply.to_json().as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
            }
        }
    }
}
