use crate::error::Result;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Console + append-only log file. Level comes from `RUST_LOG`, `info` by default.
/// Calling it again after a subscriber is installed is a no-op.
pub fn init(log_file: &Path) -> Result<()> {
    if let Some(dir) = log_file.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init();
    if installed.is_err() {
        debug!("tracing subscriber already installed");
    }
    Ok(())
}

// Numeric series in one greppable shape: `scalar: step=.. name=.. value=..`
pub fn scalar(step: u64, name: &str, value: f32) {
    debug!(target: "scalar", step, name, value, "scalar");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_file_and_tolerates_reinit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("train.log");
        init(&path).unwrap();
        init(&path).unwrap();
        assert!(path.exists());
        scalar(1, "loss", 0.25);
    }
}
