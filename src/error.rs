use std::path::PathBuf;

use symphonia::core::errors::Error as SymphoniaError;

#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unreadable audio: {0}")]
    Unreadable(String),
}

impl From<SymphoniaError> for ProbeError {
    fn from(value: SymphoniaError) -> Self {
        match value {
            // Running off the end while sniffing means no reader matched.
            SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                ProbeError::Unreadable(e.to_string())
            }
            SymphoniaError::IoError(e) => ProbeError::Io(e),
            other => ProbeError::Unreadable(other.to_string()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TagError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tag container error: {0}")]
    Lofty(#[from] lofty::error::LoftyError),
}

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serializing cache failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Replacing cache file failed: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("Pipeline has no steps")]
    EmptyPipeline,
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while running pipeline: {0}")]
    Io(#[from] std::io::Error),
    #[error("Pipeline cancelled")]
    Cancelled,
}

#[derive(thiserror::Error, Debug)]
pub enum PackageError {
    #[error("Packaging tool exited with code {exit_code}: {stderr}")]
    Tool { exit_code: i32, stderr: String },
    #[error("Packaging tool could not run: {0}")]
    Runner(#[from] RunnerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("Reading {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed tracker response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown {field} value: {value:?}")]
    UnknownValue { field: &'static str, value: String },
    #[error("Release {release_id} lists {path:?} more than once")]
    DuplicatePath { release_id: u64, path: String },
    #[error("Release group {0} not found")]
    GroupNotFound(u64),
    #[error("Release {release_id} not found in group {group_id}")]
    ReleaseNotFound { group_id: u64, release_id: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Cache at {path} failed: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: CacheError,
    },
    #[error("I/O error during processing of {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Tracker lookup failed: {0}")]
    Tracker(#[from] TrackerError),
}
