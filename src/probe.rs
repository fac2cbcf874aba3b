use crate::catalog::Format;
use crate::error::ProbeError;
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use symphonia::core::codecs::{CODEC_TYPE_AAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

/// Stream parameters and tags of a single audio file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Bits per sample. Lossy codecs have no fixed bit depth and report `None`.
    pub bit_depth: Option<u32>,
    pub sample_rate_hz: u32,
    pub channels: u32,
    /// Codec family of the source, when it is one the tracker knows
    pub format: Option<Format>,
    /// Tag values keyed by upper-case canonical names (`TITLE`, `TRACKNUMBER`, ...)
    pub tags: BTreeMap<String, String>,
}

impl Metadata {
    #[inline]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Reads container and stream metadata without decoding any audio
pub fn probe(path: impl AsRef<Path>) -> Result<Metadata, ProbeError> {
    let path = path.as_ref();
    let file = fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let mut probed = symphonia::default::get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;

    let mut tags = BTreeMap::new();
    if let Some(metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.current() {
            collect_tags(revision, &mut tags);
        }
    }

    let mut format = probed.format;
    if let Some(revision) = format.metadata().current() {
        collect_tags(revision, &mut tags);
    }

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ProbeError::Unreadable("no audio track found".to_string()))?;
    let params = &track.codec_params;

    let sample_rate_hz = params
        .sample_rate
        .ok_or_else(|| ProbeError::Unreadable("sample rate unknown".to_string()))?;
    let channels = params
        .channels
        .ok_or_else(|| ProbeError::Unreadable("channel layout unknown".to_string()))?
        .count() as u32;

    let source_format = match params.codec {
        CODEC_TYPE_FLAC => Some(Format::Flac),
        CODEC_TYPE_MP3 => Some(Format::Mp3),
        CODEC_TYPE_AAC => Some(Format::Aac),
        _ => None,
    };

    let metadata = Metadata {
        bit_depth: params.bits_per_sample,
        sample_rate_hz,
        channels,
        format: source_format,
        tags,
    };
    debug!(
        "Probed {:?}: {:?}-bit, {} Hz, {} channel(s), {} tag(s)",
        path.file_name().unwrap_or_default(),
        metadata.bit_depth,
        metadata.sample_rate_hz,
        metadata.channels,
        metadata.tags.len()
    );
    Ok(metadata)
}

fn canonical_key(std_key: Option<StandardTagKey>, raw: &str) -> String {
    match std_key {
        Some(StandardTagKey::TrackTitle) => "TITLE".to_string(),
        Some(StandardTagKey::Artist) => "ARTIST".to_string(),
        Some(StandardTagKey::Album) => "ALBUM".to_string(),
        Some(StandardTagKey::TrackNumber) => "TRACKNUMBER".to_string(),
        Some(StandardTagKey::Date) => "YEAR".to_string(),
        Some(StandardTagKey::Genre) => "GENRE".to_string(),
        Some(StandardTagKey::Comment) => "COMMENTS".to_string(),
        _ => raw.to_uppercase(),
    }
}

// The first value seen for a key wins.
fn collect_tags(revision: &MetadataRevision, tags: &mut BTreeMap<String, String>) {
    for tag in revision.tags() {
        tags.entry(canonical_key(tag.std_key, &tag.key))
            .or_insert_with(|| tag.value.to_string());
    }
}
