/// Module for the processed-release cache
pub mod cache;
/// Module for the media, format and encoding vocabulary
pub mod catalog;
/// Module for deciding how one file is transcoded
pub mod decision;
/// Module for error handling
pub mod error;
/// Module for driving releases through reconciliation
pub mod orchestrator;
/// Module for turning release directories into torrents
pub mod package;
/// Module for reading audio stream properties and tags
pub mod probe;
/// Module for releases and release groups
pub mod release;
/// Module for running external tool pipelines
pub mod runner;
/// Module for tag validation and copying
pub mod tags;
/// Module for the tracker boundary
pub mod tracker;

pub use crate::orchestrator::{
    Finding, JobOutcome, ReconcileOptions, ReconciliationOrchestrator, ReleaseOutcome,
    ReleaseState,
};

use crate::cache::DedupCache;
use crate::error::Error;
use crate::package::{MktorrentPackager, Packager};
use crate::runner::{CommandRunner, ProcessRunner};
use crate::tracker::{JsonDumpTracker, Tracker, parse_torrent_url};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Every `(group, release)` pair from the saved groups whose files were
/// downloaded, in group then release order. Groups that fail to load are
/// logged and skipped.
pub fn downloaded_releases(
    tracker: &JsonDumpTracker,
    download_dir: impl AsRef<Path>,
) -> Vec<(release::ReleaseGroup, release::Release)> {
    let download_dir = download_dir.as_ref();
    let mut found = Vec::new();
    for group_id in tracker.group_ids() {
        let group = match tracker.release_group(group_id) {
            Ok(group) => group,
            Err(e) => {
                warn!("Skipping release group {}: {}", group_id, e);
                continue;
            }
        };
        for release in group.releases() {
            if release.root_dir(download_dir).is_dir() {
                found.push((group.clone(), release.clone()));
            }
        }
    }
    info!("Found {} downloaded release(s).", found.len());
    found
}

/// Resolves torrent permalinks against `tracker`. Unparseable URLs and
/// unknown releases are logged and skipped.
pub fn releases_for_urls<T: Tracker>(
    tracker: &T,
    urls: &[String],
) -> Vec<(release::ReleaseGroup, release::Release)> {
    urls.iter()
        .filter_map(|url| {
            let Some((group_id, release_id)) = parse_torrent_url(url) else {
                warn!("Not a torrent permalink, skipping: {}", url);
                return None;
            };
            match tracker.release(group_id, release_id) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!("Skipping {}: {}", url, e);
                    None
                }
            }
        })
        .collect()
}

/// Reconciles the given URLs, or every downloaded release when `urls` is
/// empty, using the external tools found on `PATH`.
pub fn reconcile(
    options: &ReconcileOptions,
    groups_dir: impl AsRef<Path>,
    urls: &[String],
    cancel: Arc<AtomicBool>,
) -> Result<Vec<ReleaseOutcome>, Error> {
    let tracker = JsonDumpTracker::new(groups_dir.as_ref());
    let candidates = if urls.is_empty() {
        downloaded_releases(&tracker, &options.download_dir)
    } else {
        releases_for_urls(&tracker, urls)
    };

    let cache =
        DedupCache::open(&options.cache_path, options.invalidate_cache).map_err(|source| {
            Error::Cache {
                path: options.cache_path.clone(),
                source,
            }
        })?;
    let runner: Arc<dyn CommandRunner> =
        Arc::new(ProcessRunner::new(options.tool_timeout, cancel.clone()));
    let packager: Option<Arc<dyn Packager>> = match (&options.announce_url, options.skip_packaging)
    {
        (Some(url), false) => Some(Arc::new(MktorrentPackager::new(
            runner.clone(),
            url.clone(),
            options.torrents_dir.clone(),
        )) as Arc<dyn Packager>),
        _ => None,
    };

    let orchestrator =
        ReconciliationOrchestrator::new(options.clone(), cache, runner, packager, cancel)?;
    Ok(orchestrator.reconcile_all(candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const GROUP: &str = r#"{
        "group": {"id": 9, "name": "Record", "year": 2001, "releaseType": 1,
                  "musicInfo": {"artists": [{"id": 1, "name": "Band"}]}},
        "torrents": [
            {"id": 90, "media": "CD", "format": "FLAC", "encoding": "Lossless",
             "fileList": "01.flac{{{1}}}", "filePath": "Band - Record"},
            {"id": 91, "media": "WEB", "format": "FLAC", "encoding": "Lossless",
             "fileList": "01.flac{{{1}}}", "filePath": "Band - Record [WEB]"}
        ]
    }"#;

    #[test]
    fn finds_only_downloaded_releases() {
        let groups = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        fs::write(groups.path().join("9.json"), GROUP).unwrap();
        fs::create_dir(downloads.path().join("Band - Record [WEB]")).unwrap();

        let tracker = JsonDumpTracker::new(groups.path());
        let found = downloaded_releases(&tracker, downloads.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.release_id, 91);
    }

    #[test]
    fn broken_group_does_not_hide_the_others() {
        let groups = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        fs::write(groups.path().join("9.json"), GROUP).unwrap();
        fs::write(
            groups.path().join("4.json"),
            GROUP.replace("\"encoding\": \"Lossless\"", "\"encoding\": \"V9 (VBR)\""),
        )
        .unwrap();
        fs::write(groups.path().join("5.json"), "{ truncated").unwrap();
        fs::create_dir(downloads.path().join("Band - Record")).unwrap();

        let tracker = JsonDumpTracker::new(groups.path());
        let found = downloaded_releases(&tracker, downloads.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.group_id, 9);
        assert_eq!(found[0].1.release_id, 90);
    }

    #[test]
    fn other_encoding_loads_next_to_lossless() {
        let groups = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        fs::write(
            groups.path().join("9.json"),
            GROUP.replacen(
                "\"format\": \"FLAC\", \"encoding\": \"Lossless\"",
                "\"format\": \"AAC\", \"encoding\": \"Other\"",
                1,
            ),
        )
        .unwrap();
        fs::create_dir(downloads.path().join("Band - Record")).unwrap();
        fs::create_dir(downloads.path().join("Band - Record [WEB]")).unwrap();

        let found = downloaded_releases(&JsonDumpTracker::new(groups.path()), downloads.path());
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn resolves_permalinks_and_skips_the_rest() {
        let groups = tempfile::tempdir().unwrap();
        fs::write(groups.path().join("9.json"), GROUP).unwrap();
        let tracker = JsonDumpTracker::new(groups.path());

        let urls = vec![
            "https://redacted.ch/torrents.php?id=9&torrentid=90".to_string(),
            "https://redacted.ch/torrents.php?id=9&torrentid=99".to_string(),
            "https://redacted.ch/torrents.php?id=8&torrentid=80".to_string(),
            "not a url".to_string(),
        ];
        let found = releases_for_urls(&tracker, &urls);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.release_id, 90);
    }
}
