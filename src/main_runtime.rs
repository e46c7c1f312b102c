use speedtrade::config::LoggingConfig;
use tokio::signal;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. When `logging.dir` is set and
/// writable, a daily-rotated `speedtrade.log` is written there too; keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},speedtrade=debug", config.level))
    });

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let (file_layer, guard) = match config.dir.as_deref().map(open_log_dir) {
        Some(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(&dir, "speedtrade.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            eprintln!("Logging to: {}/speedtrade.log", dir);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("Warning: {}, file logging disabled", e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

/// `tracing_appender::rolling::daily` panics if it cannot create the first
/// file, so check writability up front.
fn open_log_dir(dir: &str) -> std::result::Result<String, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("could not create log directory {} ({})", dir, e))?;

    let marker = std::path::Path::new(dir).join(".speedtrade_write_test");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)
        .map_err(|e| format!("could not write to log directory {} ({})", dir, e))?;
    let _ = std::fs::remove_file(&marker);

    Ok(dir.to_string())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
