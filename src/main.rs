//! Margin settlement service.
//!
//! Loads the config, wires the engine to its collaborators and serves the
//! position routes until ctrl-c.

use anyhow::Context;
use clap::Parser;
use margin_settle::{
    routes, ApiContext, AuditSink, ChannelSink, Engine, HolderId, InMemoryLedger, Quote, ServiceConfig, Timestamp,
    TierPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Parser)]
#[command(name = "margin-settle", about = "Settlement engine for leveraged margin positions")]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `server.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Validate the config and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
        config.validate().context("invalid --bind")?;
    }
    if args.check {
        println!("config ok");
        return Ok(());
    }

    config.logging.init();
    let addr = config.bind_addr()?;

    let ledger = Arc::new(InMemoryLedger::new(config.engine.currency.clone()));
    let now = Timestamp::now();
    for seed in &config.seed_balances {
        let balance = ledger.fund(HolderId(seed.holder), Quote::new(seed.amount), now);
        tracing::info!(holder = seed.holder, available = %balance.available, "seeded balance");
    }

    let (audit, mut audit_rx) = ChannelSink::new(config.server.audit_buffer);
    let audit = Arc::new(audit);
    let engine = Engine::new(config.engine.clone(), ledger)
        .with_eligibility(Arc::new(TierPolicy::from_config(&config.eligibility)))
        .with_audit(audit.clone() as Arc<dyn AuditSink>);

    // audit writer: drains the channel into the structured log
    let audit_writer = tokio::spawn(async move {
        while let Some(event) = audit_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(target: "audit", event = %json),
                Err(e) => tracing::warn!(target: "audit", error = %e, "unserializable audit event"),
            }
        }
    });

    let gc_engine = engine.clone();
    let gc_every = Duration::from_secs(config.server.gc_interval_secs);
    let gc_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(gc_every);
        loop {
            interval.tick().await;
            gc_engine.gc_idempotency();
        }
    });

    let ctx = ApiContext::new(engine, Duration::from_millis(config.server.request_timeout_ms));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (bound, server) = warp::serve(routes(ctx)).try_bind_with_graceful_shutdown(addr, async {
        shutdown_rx.await.ok();
    })?;
    tracing::info!(addr = %bound, currency = %config.engine.currency, "margin-settle listening");

    let server = tokio::spawn(server);
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(());
    server.await.context("server task")?;

    gc_task.abort();
    let _ = gc_task.await;
    // last sender handle; the writer drains what is buffered and exits
    drop(audit);
    if tokio::time::timeout(Duration::from_secs(2), audit_writer).await.is_err() {
        tracing::warn!("audit writer did not drain in time");
    }
    tracing::info!("stopped");
    Ok(())
}
