use crate::error::PackageError;
use crate::runner::{CommandRunner, Pipeline, ToolCommand};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Turns a finished release directory into a distributable artifact
pub trait Packager: Send + Sync {
    /// Packages `content_dir` and returns the path of the artifact
    fn package(&self, content_dir: &Path, name: &str) -> Result<PathBuf, PackageError>;
}

/// Builds private `.torrent` files with mktorrent
pub struct MktorrentPackager {
    runner: Arc<dyn CommandRunner>,
    announce_url: String,
    torrents_dir: PathBuf,
}

impl MktorrentPackager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        announce_url: impl Into<String>,
        torrents_dir: impl Into<PathBuf>,
    ) -> Self {
        MktorrentPackager {
            runner,
            announce_url: announce_url.into(),
            torrents_dir: torrents_dir.into(),
        }
    }
}

/// mktorrent invocation: private, source-tagged, 256 KiB pieces
pub fn mktorrent_command(announce_url: &str, output: &Path, content_dir: &Path) -> ToolCommand {
    ToolCommand::new(
        "mktorrent",
        [
            "-s".to_string(),
            "RED".to_string(),
            "-p".to_string(),
            "-l".to_string(),
            "18".to_string(),
            "-a".to_string(),
            announce_url.to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            content_dir.to_string_lossy().into_owned(),
        ],
    )
}

impl Packager for MktorrentPackager {
    fn package(&self, content_dir: &Path, name: &str) -> Result<PathBuf, PackageError> {
        fs::create_dir_all(&self.torrents_dir)?;
        let output = self.torrents_dir.join(format!("{}.torrent", name));
        let pipeline = Pipeline::new(vec![mktorrent_command(
            &self.announce_url,
            &output,
            content_dir,
        )]);
        let result = self.runner.run(&pipeline)?;
        if !result.success() {
            if output.exists() {
                let _ = fs::remove_file(&output);
            }
            return Err(PackageError::Tool {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        debug!("Created torrent {:?}", output);
        Ok(output)
    }
}
