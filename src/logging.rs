use color_eyre::Result;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "lifesync";

/// Log to a daily rolling file under `<data_dir>/logs`, and to stderr when
/// `verbose`. `RUST_LOG` takes precedence over the default level.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn enable_logging(data_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  let appender = tracing_appender::rolling::Builder::new()
    .rotation(Rotation::DAILY)
    .max_log_files(7)
    .filename_prefix(LOG_PREFIX)
    .filename_suffix("log")
    .build(data_dir.join("logs"))?;
  let (file, guard) = tracing_appender::non_blocking(appender);

  let stderr = std::io::stderr.with_filter(move |_| verbose);

  let default_level = if verbose {
    LevelFilter::DEBUG
  } else {
    LevelFilter::INFO
  };
  let filter = EnvFilter::builder()
    .with_default_directive(default_level.into())
    .from_env_lossy();

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(stderr.and(file))
    .try_init()
    .map_err(|e| color_eyre::eyre::eyre!("Failed to initialise logging: {e}"))?;

  Ok(guard)
}
