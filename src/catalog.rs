use crate::release::Release;
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};

/// Physical or digital source a release was ripped from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Media {
    #[strum(to_string = "CD")]
    Cd,
    #[strum(to_string = "WEB")]
    Web,
    Vinyl,
    Soundboard,
    #[strum(to_string = "DVD")]
    Dvd,
    #[strum(to_string = "Blu-Ray")]
    BluRay,
    Cassette,
    #[strum(to_string = "SACD")]
    Sacd,
    #[strum(to_string = "DAT")]
    Dat,
}

/// Audio container/codec family as the tracker names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Format {
    #[strum(to_string = "FLAC")]
    Flac,
    #[strum(to_string = "MP3")]
    Mp3,
    #[strum(to_string = "AAC")]
    Aac,
    #[strum(to_string = "AC3")]
    Ac3,
    #[strum(to_string = "DTS")]
    Dts,
}

impl Format {
    #[inline]
    pub fn is_lossless(self) -> bool {
        matches!(self, Format::Flac)
    }

    /// File extension used for files produced in this format
    #[inline]
    pub fn extension(self) -> &'static str {
        match self {
            Format::Flac => "flac",
            Format::Mp3 => "mp3",
            Format::Aac => "m4a",
            Format::Ac3 => "ac3",
            Format::Dts => "dts",
        }
    }
}

/// Bitrate or quality label of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Encoding {
    Lossless,
    #[strum(to_string = "24bit Lossless")]
    Lossless24,
    #[strum(to_string = "320")]
    Cbr320,
    #[strum(to_string = "256")]
    Cbr256,
    #[strum(to_string = "192")]
    Cbr192,
    #[strum(to_string = "V0 (VBR)")]
    V0,
    #[strum(to_string = "V1 (VBR)")]
    V1,
    #[strum(to_string = "V2 (VBR)")]
    V2,
    #[strum(to_string = "APS (VBR)")]
    Aps,
    #[strum(to_string = "APX (VBR)")]
    Apx,
    #[strum(to_string = "Q8.x (VBR)")]
    Q8x,
    #[strum(to_string = "24bit Lossy")]
    Lossy24,
    Other,
}

/// Tracker release type, identified on the wire by a numeric id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ReleaseType {
    Album,
    Soundtrack,
    #[strum(to_string = "EP")]
    Ep,
    Anthology,
    Compilation,
    Single,
    #[strum(to_string = "Live album")]
    LiveAlbum,
    Remix,
    Bootleg,
    Interview,
    Mixtape,
    Demo,
    #[strum(to_string = "Concert recording")]
    ConcertRecording,
    #[strum(to_string = "DJ mix")]
    DjMix,
    Unknown,
}

impl ReleaseType {
    pub fn id(self) -> u32 {
        match self {
            ReleaseType::Album => 1,
            ReleaseType::Soundtrack => 3,
            ReleaseType::Ep => 5,
            ReleaseType::Anthology => 6,
            ReleaseType::Compilation => 7,
            ReleaseType::Single => 9,
            ReleaseType::LiveAlbum => 11,
            ReleaseType::Remix => 13,
            ReleaseType::Bootleg => 14,
            ReleaseType::Interview => 15,
            ReleaseType::Mixtape => 16,
            ReleaseType::Demo => 17,
            ReleaseType::ConcertRecording => 18,
            ReleaseType::DjMix => 19,
            ReleaseType::Unknown => 21,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        <Self as strum::IntoEnumIterator>::iter().find(|t| t.id() == id)
    }
}

/// A `(format, encoding)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatEncoding {
    pub format: Format,
    pub encoding: Encoding,
}

impl FormatEncoding {
    pub const fn new(format: Format, encoding: Encoding) -> Self {
        FormatEncoding { format, encoding }
    }

    /// Short label used in release names, e.g. `FLAC24` or `MP3v0`
    pub fn shorthand(&self) -> String {
        match (self.format, self.encoding) {
            (Format::Flac, Encoding::Lossless24) => "FLAC24".to_string(),
            (Format::Flac, _) => "FLAC".to_string(),
            (Format::Mp3, Encoding::Cbr320) => "320".to_string(),
            (Format::Mp3, Encoding::V0) => "MP3v0".to_string(),
            (Format::Mp3, Encoding::V2) => "MP3v2".to_string(),
            (format, encoding) => format!("{} {}", format, encoding),
        }
    }
}

impl fmt::Display for FormatEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.format, self.encoding)
    }
}

const ACCEPTED_FORMATS: [FormatEncoding; 3] = [
    FormatEncoding::new(Format::Flac, Encoding::Lossless),
    FormatEncoding::new(Format::Mp3, Encoding::Cbr320),
    FormatEncoding::new(Format::Mp3, Encoding::V0),
];

/// Formats the tracker accepts as uploads, in processing order
#[inline]
pub fn accepted_formats() -> &'static [FormatEncoding] {
    &ACCEPTED_FORMATS
}

/// True when both releases belong to the same edition of their group
pub fn in_same_lineage(a: &Release, b: &Release) -> bool {
    a.media == b.media
        && a.remaster_year == b.remaster_year
        && a.remaster_title == b.remaster_title
        && a.remaster_label == b.remaster_label
        && a.remaster_catalogue_number == b.remaster_catalogue_number
}
