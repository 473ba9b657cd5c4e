use crate::config::HubConfig;
use std::{fs::File, fs::OpenOptions, io, path::Path, sync::Arc};
use tracing_subscriber::{
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    EnvFilter,
};

pub const LOG_FILE_NAME: &str = "figma-relay-hub.log";

/// Keeps the optional log file open for the life of the process.
pub struct LogGuard {
    file: Option<Arc<File>>,
}

impl LogGuard {
    /// Stdout, teed into the log file when one is open.
    fn writer(&self) -> BoxMakeWriter {
        match &self.file {
            Some(file) => BoxMakeWriter::new(io::stdout.and(file.clone())),
            None => BoxMakeWriter::new(io::stdout),
        }
    }
}

/// `RUST_LOG` wins; otherwise `--debug`, then `FIGMA_RELAY_LOG_LEVEL`, then info.
pub fn init_logging(config: &HubConfig) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else {
        std::env::var("FIGMA_RELAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let guard = match open_log_file(&config.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(guard.writer())
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = Path::new(log_dir);
    std::fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(file)),
    })
}
