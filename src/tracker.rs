//! Boundary to the tracker: wire records, their validation into the typed
//! model, and an offline lookup backed by saved `torrentgroup` responses.
//!
//! Request rate limiting is the business of `Tracker` implementations that
//! talk to the network; callers never see it.

use crate::catalog::{Encoding, Format, Media, ReleaseType};
use crate::error::TrackerError;
use crate::release::{Artist, Release, ReleaseGroup};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use walkdir::WalkDir;

static FILE_LIST_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\{\d+\}\}\}(?:\|\|\|)?").expect("file list pattern is valid")
});

static TORRENT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"torrents\.php\?id=(\d+)&torrentid=(\d+)").expect("torrent url pattern is valid")
});

#[derive(Debug, Clone, Deserialize)]
pub struct GroupResponse {
    pub group: GroupData,
    pub torrents: Vec<TorrentData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupData {
    pub id: u64,
    pub name: String,
    pub year: u32,
    #[serde(default)]
    pub record_label: Option<String>,
    #[serde(default)]
    pub catalogue_number: Option<String>,
    pub release_type: u32,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub music_info: MusicInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MusicInfo {
    #[serde(default)]
    pub artists: Vec<ArtistData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistData {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentData {
    pub id: u64,
    pub media: String,
    pub format: String,
    pub encoding: String,
    #[serde(default)]
    pub remastered: bool,
    #[serde(default)]
    pub remaster_year: Option<u32>,
    #[serde(default)]
    pub remaster_title: Option<String>,
    #[serde(default)]
    pub remaster_record_label: Option<String>,
    #[serde(default)]
    pub remaster_catalogue_number: Option<String>,
    #[serde(default)]
    pub scene: bool,
    #[serde(default)]
    pub file_list: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

static HTML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#(\d+)|#[xX]([0-9a-fA-F]+)|(quot|apos|lt|gt|amp));")
        .expect("entity pattern is valid")
});

/// Decodes the HTML entities the tracker escapes its strings with, in a
/// single pass. Numeric references that are not a valid code point stay as
/// written.
pub fn unescape_html(s: &str) -> String {
    HTML_ENTITY
        .replace_all(s, |caps: &regex::Captures| {
            let code = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(dec), _, _) => dec.as_str().parse::<u32>().ok(),
                (_, Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                (_, _, Some(name)) => match name.as_str() {
                    "quot" => Some('"' as u32),
                    "apos" => Some('\'' as u32),
                    "lt" => Some('<' as u32),
                    "gt" => Some('>' as u32),
                    _ => Some('&' as u32),
                },
                _ => None,
            };
            match code.and_then(char::from_u32) {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn text(value: Option<String>) -> String {
    value.as_deref().map(unescape_html).unwrap_or_default()
}

/// Splits the tracker's `name{{{size}}}|||name{{{size}}}` file list
pub fn parse_file_list(raw: &str) -> Vec<PathBuf> {
    FILE_LIST_SEPARATOR
        .split(raw)
        .map(unescape_html)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Extracts `(group_id, release_id)` from a torrent permalink
pub fn parse_torrent_url(url: &str) -> Option<(u64, u64)> {
    let captures = TORRENT_URL.captures(url)?;
    Some((captures[1].parse().ok()?, captures[2].parse().ok()?))
}

fn parse_enum<T: FromStr>(field: &'static str, value: &str) -> Result<T, TrackerError> {
    T::from_str(value).map_err(|_| TrackerError::UnknownValue {
        field,
        value: value.to_string(),
    })
}

impl TryFrom<TorrentData> for Release {
    type Error = TrackerError;

    fn try_from(data: TorrentData) -> Result<Self, Self::Error> {
        let file_manifest = parse_file_list(&data.file_list);
        let mut seen = HashSet::new();
        if let Some(dup) = file_manifest.iter().find(|p| !seen.insert(p.as_path())) {
            return Err(TrackerError::DuplicatePath {
                release_id: data.id,
                path: dup.to_string_lossy().into_owned(),
            });
        }
        Ok(Release {
            release_id: data.id,
            media: parse_enum::<Media>("media", &data.media)?,
            format: parse_enum::<Format>("format", &data.format)?,
            encoding: parse_enum::<Encoding>("encoding", &data.encoding)?,
            is_remaster: data.remastered,
            remaster_year: data.remaster_year.unwrap_or(0),
            remaster_title: text(data.remaster_title),
            remaster_label: text(data.remaster_record_label),
            remaster_catalogue_number: text(data.remaster_catalogue_number),
            scene: data.scene,
            file_path: text(data.file_path),
            file_manifest,
        })
    }
}

impl TryFrom<GroupResponse> for ReleaseGroup {
    type Error = TrackerError;

    fn try_from(response: GroupResponse) -> Result<Self, Self::Error> {
        let g = response.group;
        let release_type =
            ReleaseType::from_id(g.release_type).ok_or_else(|| TrackerError::UnknownValue {
                field: "releaseType",
                value: g.release_type.to_string(),
            })?;
        let mut group = ReleaseGroup::new(
            g.id,
            g.music_info
                .artists
                .into_iter()
                .map(|a| Artist {
                    id: a.id,
                    name: unescape_html(&a.name),
                })
                .collect(),
            unescape_html(&g.name),
            g.year,
            text(g.record_label),
            text(g.catalogue_number),
            release_type,
            text(g.category_name),
            g.tags.iter().map(|t| unescape_html(t)).collect::<BTreeSet<_>>(),
        );
        for torrent in response.torrents {
            group.register_release(Release::try_from(torrent)?);
        }
        Ok(group)
    }
}

/// Source of release group data
pub trait Tracker {
    fn release_group(&self, group_id: u64) -> Result<ReleaseGroup, TrackerError>;

    fn release(&self, group_id: u64, release_id: u64) -> Result<(ReleaseGroup, Release), TrackerError> {
        let group = self.release_group(group_id)?;
        let release = group
            .release(release_id)
            .cloned()
            .ok_or(TrackerError::ReleaseNotFound {
                group_id,
                release_id,
            })?;
        Ok((group, release))
    }
}

/// Reads `<dir>/<group_id>.json` files holding saved `torrentgroup` responses
#[derive(Debug, Clone)]
pub struct JsonDumpTracker {
    dir: PathBuf,
}

impl JsonDumpTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonDumpTracker { dir: dir.into() }
    }

    fn path_for(&self, group_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", group_id))
    }

    /// Ids of every saved group, ascending
    pub fn group_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let path = e.path();
                if path.extension()? != "json" {
                    return None;
                }
                path.file_stem()?.to_str()?.parse().ok()
            })
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl Tracker for JsonDumpTracker {
    fn release_group(&self, group_id: u64) -> Result<ReleaseGroup, TrackerError> {
        let path = self.path_for(group_id);
        if !Path::new(&path).exists() {
            return Err(TrackerError::GroupNotFound(group_id));
        }
        let raw = fs::read_to_string(&path).map_err(|source| TrackerError::Io {
            path: path.clone(),
            source,
        })?;
        let response: GroupResponse = serde_json::from_str(&raw)?;
        ReleaseGroup::try_from(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FormatEncoding;

    const RESPONSE: &str = r#"{
        "group": {
            "id": 1073646, "name": "Night &amp; Day", "year": 2011,
            "recordLabel": "Label", "catalogueNumber": null, "releaseType": 1,
            "categoryName": "Music", "tags": ["electronic", "house"],
            "musicInfo": {"artists": [{"id": 5, "name": "Band"}]}
        },
        "torrents": [
            {"id": 2311120, "media": "CD", "format": "FLAC", "encoding": "Lossless",
             "remastered": false, "remasterYear": 0, "remasterTitle": "",
             "remasterRecordLabel": "", "remasterCatalogueNumber": "", "scene": false,
             "fileList": "01 - Intro.flac{{{1234}}}|||CD2/02 - Outro.flac{{{5678}}}|||folder.jpg{{{90}}}",
             "filePath": "Band - Night &amp; Day (2011) [FLAC]"},
            {"id": 2311121, "media": "CD", "format": "MP3", "encoding": "V0 (VBR)",
             "remastered": false, "remasterYear": 0, "remasterTitle": "",
             "remasterRecordLabel": "", "remasterCatalogueNumber": "", "scene": false,
             "fileList": "01 - Intro.mp3{{{12}}}", "filePath": "V0"}
        ]
    }"#;

    fn response() -> GroupResponse {
        serde_json::from_str(RESPONSE).unwrap()
    }

    #[test]
    fn decodes_named_and_numeric_entities() {
        assert_eq!(unescape_html("Rock &amp; Roll"), "Rock & Roll");
        assert_eq!(unescape_html("It&#39;s &#039;On&#x27;"), "It's 'On'");
        assert_eq!(unescape_html("Don&#8217;t &#X2014; &lt;b&gt;"), "Don\u{2019}t \u{2014} <b>");
        assert_eq!(unescape_html("&amp;lt; stays escaped once"), "&lt; stays escaped once");
        assert_eq!(unescape_html("&#1114112; &#xD800; &nbsp;"), "&#1114112; &#xD800; &nbsp;");
    }

    #[test]
    fn splits_file_lists() {
        assert_eq!(
            parse_file_list("a.flac{{{1}}}|||b/c.flac{{{22}}}"),
            vec![PathBuf::from("a.flac"), PathBuf::from("b/c.flac")]
        );
        assert!(parse_file_list("").is_empty());
    }

    #[test]
    fn parses_torrent_urls() {
        assert_eq!(
            parse_torrent_url("https://redacted.ch/torrents.php?id=1073646&torrentid=2311120"),
            Some((1_073_646, 2_311_120))
        );
        assert_eq!(parse_torrent_url("https://redacted.ch/artist.php?id=1"), None);
    }

    #[test]
    fn validates_response_into_typed_model() {
        let group = ReleaseGroup::try_from(response()).unwrap();
        assert_eq!(group.name, "Night & Day");
        assert_eq!(group.catalogue_number, "");
        assert_eq!(group.release_type, ReleaseType::Album);
        assert_eq!(group.releases().len(), 2);

        let flac = group.release(2_311_120).unwrap();
        assert_eq!(flac.file_path, "Band - Night & Day (2011) [FLAC]");
        assert_eq!(flac.file_manifest.len(), 3);
        assert_eq!(
            group.formats_missing(flac),
            vec![FormatEncoding::new(Format::Mp3, Encoding::Cbr320)]
        );
    }

    #[test]
    fn unknown_vocabulary_is_rejected_once_at_the_boundary() {
        let mut r = response();
        r.torrents[1].encoding = "V9 (VBR)".to_string();
        assert!(matches!(
            ReleaseGroup::try_from(r),
            Err(TrackerError::UnknownValue { field: "encoding", .. })
        ));

        let mut r = response();
        r.group.release_type = 2;
        assert!(matches!(
            ReleaseGroup::try_from(r),
            Err(TrackerError::UnknownValue { field: "releaseType", .. })
        ));
    }

    #[test]
    fn duplicate_manifest_paths_are_rejected() {
        let mut r = response();
        r.torrents[0].file_list = "a.flac{{{1}}}|||a.flac{{{1}}}".to_string();
        assert!(matches!(
            ReleaseGroup::try_from(r),
            Err(TrackerError::DuplicatePath { release_id: 2_311_120, .. })
        ));
    }

    #[test]
    fn dump_tracker_reads_saved_responses() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1073646.json"), RESPONSE).unwrap();
        let tracker = JsonDumpTracker::new(dir.path());

        let (group, release) = tracker.release(1_073_646, 2_311_121).unwrap();
        assert_eq!(group.group_id, 1_073_646);
        assert_eq!(release.encoding, Encoding::V0);
        assert!(matches!(
            tracker.release_group(1),
            Err(TrackerError::GroupNotFound(1))
        ));
        assert!(matches!(
            tracker.release(1_073_646, 3),
            Err(TrackerError::ReleaseNotFound { .. })
        ));
    }

    #[test]
    fn dump_tracker_lists_saved_groups() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("20.json"), RESPONSE).unwrap();
        fs::write(dir.path().join("3.json"), RESPONSE).unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("draft.json"), "").unwrap();
        fs::create_dir(dir.path().join("7.json")).unwrap();
        assert_eq!(JsonDumpTracker::new(dir.path()).group_ids(), vec![3, 20]);
    }
}
