//! Application orchestrator: wires config, identity, transport, pipeline and tray

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{self, Config};
use crate::constants::paths;
use crate::effects::{DesktopEffects, SystemEffects};
use crate::identity::ClientId;
use crate::logging;
use crate::pipeline::{MessagePipeline, Outcome};
use crate::transport::{DeliveryHandler, MqttSubscriber, SessionState};
use crate::tray;

/// Startup overrides from the command line
#[derive(Debug, Default)]
pub struct Options {
    pub config_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

/// Process-lifetime state handed to collaborators
pub struct AppContext {
    pub config: Config,
    pub client_id: ClientId,
    pub pipeline: MessagePipeline,
    /// Cancelled once, by the tray Quit item or Ctrl-C
    pub shutdown: CancellationToken,
}

impl AppContext {
    pub fn new(config: Config, client_id: ClientId, effects: Arc<dyn DesktopEffects>) -> Self {
        Self {
            config,
            client_id,
            pipeline: MessagePipeline::new(effects),
            shutdown: CancellationToken::new(),
        }
    }

    /// Handler registered with the transport; runs on its worker thread
    pub fn delivery_handler(&self) -> DeliveryHandler {
        let pipeline = self.pipeline.clone();
        Box::new(move |topic: &str, payload: &[u8]| {
            if let Outcome::Handled(classification) = pipeline.handle(topic, payload) {
                debug!(topic = %topic, ?classification, "Payload handled");
            }
        })
    }
}

/// Run until Quit. Any error returned here is a fatal startup error.
pub fn run(options: Options) -> Result<()> {
    let log_path = match options.log_path {
        Some(path) => path,
        None => config::executable_dir()?.join(paths::LOG_FILENAME),
    };
    logging::init(&log_path, logging::level_from_env())?;
    info!(version = env!("CARGO_PKG_VERSION"), log = %log_path.display(), "Starting phone message receiver");

    let config_path = Config::resolve_path(options.config_path.as_deref())?;
    let config = Config::load(&config_path)?;
    let address = config.broker_address()?;
    let client_id = ClientId::generate()?;

    let ctx = AppContext::new(config, client_id, Arc::new(SystemEffects::new()));

    // Blocking handshake happens before the tray runtime exists: the
    // synchronous MQTT client drives its own runtime internally
    let mut subscriber = MqttSubscriber::connect(&address, &ctx.client_id, ctx.shutdown.clone())?;
    subscriber.subscribe(&ctx.config.topic, ctx.delivery_handler())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tray runtime")?;
    let state = runtime.block_on(run_until_quit(&ctx.shutdown, subscriber))?;

    info!(?state, "Exiting");
    Ok(())
}

/// Tray event loop; returns after the transport and tray are torn down
async fn run_until_quit(
    shutdown: &CancellationToken,
    mut subscriber: MqttSubscriber,
) -> Result<SessionState> {
    let tray = match tray::spawn(shutdown.clone()).await {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "Running without tray icon; press Ctrl-C to quit");
            None
        }
    };

    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Quit requested");
        }
        _ = ctrl_c => {
            info!("SIGINT received, shutting down");
            shutdown.cancel();
        }
    }

    // Joining the worker blocks; keep the tray serviced meanwhile
    let state = run_blocking(move || {
        subscriber.shutdown();
        subscriber.state()
    })
    .await?;

    if let Some(handle) = tray {
        handle.shutdown().await;
        info!("Tray icon removed");
    }

    Ok(state)
}

/// Run blocking work off the runtime thread
async fn run_blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Blocking task failed")
}
