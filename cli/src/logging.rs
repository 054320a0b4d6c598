//! Log output: lines on stderr, plus an uncolored copy in the `--log` file.
//! Stdout is left to the final report.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Install the global subscriber.
///
/// Fails without installing anything if the log file cannot be created.
pub(crate) fn init(verbose: bool, log: Option<&Path>) -> io::Result<()> {
    let file = log
        .map(File::create)
        .transpose()?
        .map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
        });
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(file)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.log");
        assert!(init(false, Some(&path)).is_err());
    }
}
