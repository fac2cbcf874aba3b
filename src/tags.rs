use crate::error::TagError;
use crate::probe::probe;
use log::{debug, warn};
use lofty::TextEncoding;
use lofty::config::{ParseOptions, WriteOptions};
use lofty::file::AudioFile;
use lofty::flac::FlacFile;
use lofty::id3::v2::{Frame, FrameId, Id3v2Tag, TextInformationFrame, TimestampFrame};
use lofty::mpeg::MpegFile;
use lofty::ogg::VorbisComments;
use lofty::tag::items::Timestamp;
use lofty::tag::{Accessor, TagExt};
use regex::Regex;
use std::collections::BTreeMap;
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::LazyLock;

/// Tags every lossless source must carry
pub const REQUIRED_TAGS: [&str; 4] = ["TITLE", "ARTIST", "ALBUM", "TRACKNUMBER"];

/// Tags carried over to transcoded files
pub const COPIED_TAGS: [&str; 7] = [
    "TITLE",
    "ARTIST",
    "ALBUM",
    "TRACKNUMBER",
    "YEAR",
    "GENRE",
    "COMMENTS",
];

static TRACK_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]?\d+$").expect("track number pattern is valid"));

/// A single tag problem found in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagProblem {
    pub file_name: String,
    pub message: String,
}

impl TagProblem {
    fn new(file_name: &str, message: impl Into<String>) -> Self {
        TagProblem {
            file_name: file_name.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TagProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file_name, self.message)
    }
}

/// Checks the required tags of one file's tag map. All problems are returned.
pub fn validate_tags(file_name: &str, tags: &BTreeMap<String, String>) -> Vec<TagProblem> {
    let mut problems = Vec::new();
    for name in REQUIRED_TAGS {
        let label = name.to_lowercase();
        match tags.get(name) {
            None => problems.push(TagProblem::new(file_name, format!("Missing {} tag.", label))),
            Some(value) if value.trim().is_empty() => {
                problems.push(TagProblem::new(file_name, format!("Blank {} tag.", label)))
            }
            Some(value) if name == "TRACKNUMBER" && !TRACK_NUMBER.is_match(value) => {
                problems.push(TagProblem::new(file_name, "Malformed track number tag."))
            }
            Some(_) => {}
        }
    }
    problems
}

/// Probes `path` and validates its required tags
pub fn validate(path: impl AsRef<Path>) -> Result<(), Vec<TagProblem>> {
    let path = path.as_ref();
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let metadata = probe(path)
        .map_err(|e| vec![TagProblem::new(&file_name, format!("Unreadable file: {}", e))])?;
    let problems = validate_tags(&file_name, &metadata.tags);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// Tag container of a destination file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagContainer {
    VorbisComments,
    Id3v2,
}

impl TagContainer {
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        let is_flac = path
            .as_ref()
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("flac"));
        if is_flac {
            TagContainer::VorbisComments
        } else {
            TagContainer::Id3v2
        }
    }

    /// Vorbis comments are loaded one `KEY=value` line at a time
    pub fn represents_multiline(self) -> bool {
        matches!(self, TagContainer::Id3v2)
    }
}

/// Vorbis comment keys holding `name`, in read preference; the first is written
fn vorbis_keys(name: &str) -> &'static [&'static str] {
    match name {
        "TITLE" => &["TITLE"],
        "ARTIST" => &["ARTIST"],
        "ALBUM" => &["ALBUM"],
        "TRACKNUMBER" => &["TRACKNUMBER"],
        "YEAR" => &["DATE", "YEAR"],
        "GENRE" => &["GENRE"],
        "COMMENTS" => &["COMMENT"],
        _ => &[],
    }
}

/// ID3v2 frame holding `name`. Comments live in COMM frames instead.
fn id3v2_frame(name: &str) -> Option<&'static str> {
    Some(match name {
        "TITLE" => "TIT2",
        "ARTIST" => "TPE1",
        "ALBUM" => "TALB",
        "TRACKNUMBER" => "TRCK",
        "YEAR" => "TDRC",
        "GENRE" => "TCON",
        _ => return None,
    })
}

/// The tag of one file, kept in its native container so values such as
/// `A12` track numbers are stored verbatim.
#[derive(Debug, Clone)]
enum ContainerTag {
    Vorbis(VorbisComments),
    Id3v2(Id3v2Tag),
}

impl ContainerTag {
    fn read(path: &Path) -> Result<Self, TagError> {
        let mut file = File::open(path)?;
        Ok(match TagContainer::for_path(path) {
            TagContainer::VorbisComments => {
                let flac = FlacFile::read_from(&mut file, ParseOptions::new())?;
                ContainerTag::Vorbis(flac.vorbis_comments().cloned().unwrap_or_default())
            }
            TagContainer::Id3v2 => {
                let mpeg = MpegFile::read_from(&mut file, ParseOptions::new())?;
                ContainerTag::Id3v2(mpeg.id3v2().cloned().unwrap_or_default())
            }
        })
    }

    fn get(&self, name: &str) -> Option<String> {
        match self {
            ContainerTag::Vorbis(tag) => vorbis_keys(name)
                .iter()
                .find_map(|key| tag.get(key))
                .map(str::to_string),
            ContainerTag::Id3v2(tag) if name == "COMMENTS" => tag.comment().map(Cow::into_owned),
            ContainerTag::Id3v2(tag) => {
                let id = FrameId::Valid(Cow::Borrowed(id3v2_frame(name)?));
                match tag.get(&id)? {
                    Frame::Text(frame) => Some(frame.value.to_string()),
                    Frame::Timestamp(frame) => Some(frame.timestamp.to_string()),
                    _ => None,
                }
            }
        }
    }

    /// False when the container has no place for `value`
    fn set(&mut self, name: &str, value: String) -> bool {
        match self {
            ContainerTag::Vorbis(tag) => match vorbis_keys(name).first() {
                Some(key) => {
                    tag.insert(key.to_string(), value);
                    true
                }
                None => false,
            },
            ContainerTag::Id3v2(tag) if name == "COMMENTS" => {
                tag.set_comment(value);
                true
            }
            ContainerTag::Id3v2(tag) => {
                let Some(id) = id3v2_frame(name) else {
                    return false;
                };
                let id = FrameId::Valid(Cow::Borrowed(id));
                let frame = if name == "YEAR" {
                    match value.parse::<Timestamp>() {
                        Ok(timestamp) => {
                            Frame::Timestamp(TimestampFrame::new(id, TextEncoding::UTF8, timestamp))
                        }
                        Err(_) => return false,
                    }
                } else {
                    Frame::Text(TextInformationFrame::new(id, TextEncoding::UTF8, value))
                };
                tag.insert(frame);
                true
            }
        }
    }

    fn save(&self, path: &Path) -> Result<(), TagError> {
        match self {
            ContainerTag::Vorbis(tag) => tag.save_to_path(path, WriteOptions::default())?,
            ContainerTag::Id3v2(tag) => tag.save_to_path(path, WriteOptions::default())?,
        }
        Ok(())
    }

    fn values(&self) -> BTreeMap<String, String> {
        COPIED_TAGS
            .iter()
            .filter_map(|name| Some((name.to_string(), self.get(name)?)))
            .collect()
    }
}

/// Values to write to a destination of `container`, and the names of the
/// tags dropped because their value spans several lines.
pub fn plan_copy(
    source: &BTreeMap<String, String>,
    container: TagContainer,
) -> (Vec<(&'static str, String)>, Vec<&'static str>) {
    let mut values = Vec::new();
    let mut dropped = Vec::new();
    for name in COPIED_TAGS {
        let Some(value) = source.get(name) else {
            continue;
        };
        if value.contains('\n') && !container.represents_multiline() {
            dropped.push(name);
            continue;
        }
        values.push((name, value.clone()));
    }
    (values, dropped)
}

/// Reads the copied tag set of a FLAC or MP3 file from its native container
pub fn read_tag_values(path: impl AsRef<Path>) -> Result<BTreeMap<String, String>, TagError> {
    Ok(ContainerTag::read(path.as_ref())?.values())
}

fn try_copy_tags(source: &Path, destination: &Path) -> Result<Vec<String>, TagError> {
    let source_values = read_tag_values(source)?;
    let container = TagContainer::for_path(destination);
    let (values, dropped) = plan_copy(&source_values, container);
    let file_name = destination.file_name().unwrap_or_default().to_string_lossy();
    for name in &dropped {
        warn!(
            "Dropping multi-line {} tag while tagging {}: not representable in {:?}",
            name, file_name, container
        );
    }
    if values.is_empty() {
        return Ok(Vec::new());
    }

    let mut tag = ContainerTag::read(destination)?;
    let mut errors = Vec::new();
    for (name, value) in &values {
        if !tag.set(name, value.clone()) {
            errors.push(format!(
                "{}: {} value {:?} not supported by {:?}",
                file_name, name, value, container
            ));
        }
    }
    tag.save(destination)?;

    let written = read_tag_values(destination)?;
    for (name, value) in &values {
        if written.get(*name) != Some(value) {
            errors.push(format!(
                "{}: {} tag changed while writing ({:?} became {:?})",
                file_name,
                name,
                value,
                written.get(*name)
            ));
        }
    }
    debug!("Copied {} tag(s) onto {}", values.len(), file_name);
    Ok(errors)
}

/// Copies the allow-listed tags from `source` onto `destination`, returning
/// a message for every tag that could not be copied faithfully.
pub fn copy_tags(source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Vec<String> {
    let (source, destination) = (source.as_ref(), destination.as_ref());
    try_copy_tags(source, destination).unwrap_or_else(|e| {
        vec![format!(
            "copying tags from {:?} to {:?} failed: {}",
            source.file_name().unwrap_or_default(),
            destination.file_name().unwrap_or_default(),
            e
        )]
    })
}
