use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fieldbook::clock::SystemClock;
use fieldbook::config::Config;
use fieldbook::engine::Engine;
use fieldbook::notify::NotifyHub;
use fieldbook::payment::{self, PaymentEvent};
use fieldbook::reaper;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Feed `<booking id> paid|failed` lines from stdin to the payment listener.
/// Runs on a plain thread: a blocking stdin read cannot be cancelled and must
/// not hold up runtime shutdown.
fn read_payment_lines(tx: mpsc::Sender<PaymentEvent>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("payment input closed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<PaymentEvent>() {
            Ok(event) => {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(e) => warn!("ignoring payment line {line:?}: {e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    fieldbook::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        notify,
        config.engine.clone(),
        Arc::new(SystemClock),
    )?);

    info!("fieldbook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  zone: {}", config.engine.zone);
    info!("  hold: {}s", config.engine.hold_duration_ms / 1000);
    info!("  guard_timeout: {:?}", config.engine.guard_timeout);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown = CancellationToken::new();
    let reaper_task = tokio::spawn(reaper::run_reaper(
        engine.clone(),
        config.sweep_interval,
        shutdown.clone(),
    ));
    let compactor_task = tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        COMPACT_CHECK_INTERVAL,
        shutdown.clone(),
    ));

    let (payments_tx, payments_rx) = mpsc::channel(1024);
    let listener_task = tokio::spawn(payment::run_payment_listener(engine.clone(), payments_rx));
    std::thread::spawn(move || read_payment_lines(payments_tx));

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("shutdown signal received");
    shutdown.cancel();
    let _ = reaper_task.await;
    let _ = compactor_task.await;
    // Payments already applied are durable; anything still queued is
    // re-sent by the collaborator.
    listener_task.abort();

    info!("fieldbook stopped");
    Ok(())
}
