//! Console log store.
//!
//! Output of every command executed on the board is appended to one plain
//! text file. The DUT can fetch it and truncate it.

use crate::error::ErrorCode;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Default location of the console log.
pub const DEFAULT_CONSOLE_LOG: &str = "/tmp/cmd_console_logs";

/// Failure to collect the console log.
#[derive(Debug, Error)]
pub enum ConsoleLogError {
    #[error("console log {0} does not exist")]
    Missing(PathBuf),

    #[error("console log {0} is empty")]
    Empty(PathBuf),

    #[error("console log {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConsoleLogError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConsoleLogError::Empty(_) => ErrorCode::ConsoleLogsZeroSize,
            _ => ErrorCode::CollectConsoleLogsFail,
        }
    }
}

/// Handle to the console log file.
#[derive(Debug, Clone)]
pub struct ConsoleLog {
    path: PathBuf,
}

impl ConsoleLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(path = %path.display(), "Using console log");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole log.
    ///
    /// A missing file and an empty file are distinct errors; bytes that are
    /// not valid UTF-8 are replaced.
    pub async fn read(&self) -> Result<String, ConsoleLogError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConsoleLogError::Missing(self.path.clone()))
            }
            Err(source) => {
                return Err(ConsoleLogError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.is_empty() {
            return Err(ConsoleLogError::Empty(self.path.clone()));
        }

        debug!(len = contents.len(), "Console log collected");
        Ok(String::from_utf8_lossy(&contents).into_owned())
    }

    /// Truncate the log, creating it if needed.
    pub async fn clear(&self) -> io::Result<()> {
        tokio::fs::File::create(&self.path).await?;
        debug!(path = %self.path.display(), "Console log cleared");
        Ok(())
    }

    /// Append raw bytes to the log.
    pub async fn append(&self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(data).await?;
        file.flush().await
    }

    /// Open an append-mode handle, for redirecting child process output.
    pub fn open_append(&self) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}
