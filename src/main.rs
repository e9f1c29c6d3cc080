use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use whatsapp_relay::channels::{EvolutionClient, Messenger};
use whatsapp_relay::config::{LogConfig, RelayConfig};
use whatsapp_relay::intake::{IntakeState, intake_routes};
use whatsapp_relay::pipeline::ItemProcessor;
use whatsapp_relay::store::{Database, LibSqlBackend};
use whatsapp_relay::worker::{Dispatcher, RetryAgent, spawn_dispatcher, spawn_retry_agent};
use whatsapp_relay::workflow::AiWorkflow;
use whatsapp_relay::workflow::n8n::N8nClient;

/// Console output always; a daily rolling file too when `LOG_DIR` is set.
/// The returned guard must outlive the program or buffered lines are lost.
fn init_tracing(log: &LogConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "whatsapp-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(&config.log);

    info!(version = env!("CARGO_PKG_VERSION"), "WhatsApp relay starting");

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.store.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.store.db_path.display()))?,
    );
    info!(path = %config.store.db_path.display(), "Database ready");

    // Items left in `processing` by a previous run belong to no live worker.
    let orphaned = db
        .recover_orphaned()
        .await
        .context("failed to recover orphaned items")?;
    if orphaned > 0 {
        info!(count = orphaned, "Recovered orphaned items as transient failures");
    }

    // ── Pipeline ─────────────────────────────────────────────────────────
    let messenger: Arc<dyn Messenger> = Arc::new(EvolutionClient::new(&config.evolution));
    let workflow: Arc<dyn AiWorkflow> = Arc::new(N8nClient::new(&config.workflow));
    let processor = Arc::new(ItemProcessor::new(
        Arc::clone(&db),
        messenger,
        workflow,
        config.flow.clone(),
        config.workflow.timeout,
    ));

    // ── Workers ──────────────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&db),
        processor,
        config.dispatch.clone(),
    ));
    let (dispatch_handle, dispatch_shutdown) = spawn_dispatcher(dispatcher);

    let retry_agent = Arc::new(RetryAgent::new(Arc::clone(&db), config.retry.clone()));
    let (retry_handle, retry_shutdown) = spawn_retry_agent(retry_agent);

    // ── Intake ───────────────────────────────────────────────────────────
    let app = intake_routes(IntakeState {
        db: Arc::clone(&db),
    });
    let addr = config.intake.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Intake server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("intake server failed")?;

    info!("Shutdown requested; draining in-flight items");
    retry_shutdown.store(true, Ordering::Relaxed);
    dispatch_shutdown.store(true, Ordering::Relaxed);
    retry_handle.abort();
    if let Err(e) = dispatch_handle.await {
        tracing::warn!(error = %e, "Dispatcher task ended abnormally");
    }
    info!("Stopped");

    Ok(())
}
