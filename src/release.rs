use crate::catalog::{
    Encoding, Format, FormatEncoding, Media, ReleaseType, accepted_formats, in_same_lineage,
};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// Characters that may not appear in a release directory name
pub const FORBIDDEN_PATH_CHARS: &[char] = &['?', ':', '<', '>', '\\', '*', '|', '"', '/'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub id: u64,
    pub name: String,
}

/// One format/encoding instance of a group, i.e. a single torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub release_id: u64,
    pub media: Media,
    pub format: Format,
    pub encoding: Encoding,
    pub is_remaster: bool,
    pub remaster_year: u32,
    pub remaster_title: String,
    pub remaster_label: String,
    pub remaster_catalogue_number: String,
    pub scene: bool,
    /// Root directory of the torrent, relative to the download directory.
    /// Empty for single-file torrents.
    pub file_path: String,
    /// Unique paths relative to `file_path`
    pub file_manifest: Vec<PathBuf>,
}

impl Release {
    #[inline]
    pub fn format_encoding(&self) -> FormatEncoding {
        FormatEncoding::new(self.format, self.encoding)
    }

    pub fn effective_year(&self, group_year: u32) -> u32 {
        if self.is_remaster && self.remaster_year != 0 {
            self.remaster_year
        } else {
            group_year
        }
    }

    /// Directory that holds this release's files on disk
    pub fn root_dir(&self, download_dir: impl AsRef<Path>) -> PathBuf {
        download_dir.as_ref().join(&self.file_path)
    }

    /// Absolute paths of every manifest entry, in manifest order
    pub fn files(&self, download_dir: impl AsRef<Path>) -> Vec<PathBuf> {
        let root = self.root_dir(download_dir);
        self.file_manifest.iter().map(|p| root.join(p)).collect()
    }

    /// Absolute paths of the FLAC files in the manifest
    pub fn flac_files(&self, download_dir: impl AsRef<Path>) -> Vec<PathBuf> {
        self.files(download_dir)
            .into_iter()
            .filter(|p| is_flac_path(p))
            .collect()
    }

    /// Basenames of manifest entries that do not exist on disk
    pub fn missing_files(&self, download_dir: impl AsRef<Path>) -> Vec<String> {
        self.files(download_dir)
            .into_iter()
            .filter(|p| !p.exists())
            .map(|p| p.file_name().unwrap_or_default().to_string_lossy().into_owned())
            .collect()
    }
}

pub fn is_flac_path(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("flac"))
}

/// The parent work aggregating all releases and editions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseGroup {
    pub group_id: u64,
    pub artists: Vec<Artist>,
    pub name: String,
    pub year: u32,
    pub record_label: String,
    pub catalogue_number: String,
    pub release_type: ReleaseType,
    pub category: String,
    pub tags: BTreeSet<String>,
    releases: Vec<Release>,
}

impl ReleaseGroup {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group_id: u64,
        artists: Vec<Artist>,
        name: impl Into<String>,
        year: u32,
        record_label: impl Into<String>,
        catalogue_number: impl Into<String>,
        release_type: ReleaseType,
        category: impl Into<String>,
        tags: BTreeSet<String>,
    ) -> Self {
        ReleaseGroup {
            group_id,
            artists,
            name: name.into(),
            year,
            record_label: record_label.into(),
            catalogue_number: catalogue_number.into(),
            release_type,
            category: category.into(),
            tags,
            releases: Vec::new(),
        }
    }

    #[inline]
    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    pub fn release(&self, release_id: u64) -> Option<&Release> {
        self.releases.iter().find(|r| r.release_id == release_id)
    }

    /// Adds a release to the group. A release with an id already present
    /// replaces the earlier entry.
    pub fn register_release(&mut self, release: Release) {
        match self
            .releases
            .iter_mut()
            .find(|r| r.release_id == release.release_id)
        {
            Some(existing) => *existing = release,
            None => self.releases.push(release),
        }
    }

    /// Every release sharing the reference's edition, the reference included
    pub fn lineage<'a>(&'a self, reference: &'a Release) -> Vec<&'a Release> {
        let mut selected: Vec<&Release> = self
            .releases
            .iter()
            .filter(|r| in_same_lineage(r, reference))
            .collect();
        if !selected.iter().any(|r| r.release_id == reference.release_id) {
            selected.push(reference);
        }
        selected
    }

    /// Accepted formats not yet present in the reference's lineage, in
    /// catalog order
    pub fn formats_missing(&self, reference: &Release) -> Vec<FormatEncoding> {
        let present: HashSet<FormatEncoding> = self
            .lineage(reference)
            .into_iter()
            .map(Release::format_encoding)
            .collect();
        accepted_formats()
            .iter()
            .filter(|f| !present.contains(f))
            .copied()
            .collect()
    }

    pub fn artist_credit(&self) -> String {
        match self.artists.as_slice() {
            [only] => only.name.clone(),
            [first, second] => format!("{} & {}", first.name, second.name),
            _ => "Various Artists".to_string(),
        }
    }

    fn title_for(&self, release: &Release, format: FormatEncoding) -> String {
        format!(
            "{} - {} ({}) [{} {}]",
            self.artist_credit(),
            self.name,
            release.effective_year(self.year),
            release.media,
            format.shorthand()
        )
    }

    /// Human readable name of a release, used in logs and the cache
    pub fn display_name(&self, release: &Release) -> String {
        self.title_for(release, release.format_encoding())
    }

    /// Directory name for a new release of `target` derived from `source`
    pub fn release_dir_name(&self, source: &Release, target: FormatEncoding) -> String {
        self.title_for(source, target)
            .chars()
            .map(|c| if FORBIDDEN_PATH_CHARS.contains(&c) { '_' } else { c })
            .collect::<String>()
            .trim()
            .to_string()
    }

    pub fn permalink(&self, release: &Release) -> String {
        format!(
            "https://redacted.ch/torrents.php?id={}&torrentid={}",
            self.group_id, release.release_id
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn release(id: u64, format: Format, encoding: Encoding) -> Release {
        Release {
            release_id: id,
            media: Media::Cd,
            format,
            encoding,
            is_remaster: false,
            remaster_year: 0,
            remaster_title: String::new(),
            remaster_label: String::new(),
            remaster_catalogue_number: String::new(),
            scene: false,
            file_path: format!("release-{id}"),
            file_manifest: vec![PathBuf::from("01 - Intro.flac")],
        }
    }

    pub(crate) fn group(artists: &[&str]) -> ReleaseGroup {
        ReleaseGroup::new(
            42,
            artists
                .iter()
                .enumerate()
                .map(|(i, name)| Artist {
                    id: i as u64 + 1,
                    name: name.to_string(),
                })
                .collect(),
            "Night Drive",
            2011,
            "Label",
            "CAT-001",
            ReleaseType::Album,
            "Music",
            BTreeSet::new(),
        )
    }

    #[test]
    fn lone_flac_is_missing_both_mp3_formats_in_order() {
        let mut g = group(&["Solo"]);
        let flac = release(1, Format::Flac, Encoding::Lossless);
        g.register_release(flac.clone());

        assert_eq!(
            g.formats_missing(&flac),
            vec![
                FormatEncoding::new(Format::Mp3, Encoding::Cbr320),
                FormatEncoding::new(Format::Mp3, Encoding::V0),
            ]
        );
    }

    #[test]
    fn complete_lineage_has_no_gap() {
        let mut g = group(&["Solo"]);
        let flac = release(1, Format::Flac, Encoding::Lossless);
        g.register_release(flac.clone());
        g.register_release(release(2, Format::Mp3, Encoding::Cbr320));
        g.register_release(release(3, Format::Mp3, Encoding::V0));

        assert!(g.formats_missing(&flac).is_empty());
    }

    #[test]
    fn other_editions_do_not_fill_the_gap() {
        let mut g = group(&["Solo"]);
        let flac = release(1, Format::Flac, Encoding::Lossless);
        let mut vinyl = release(2, Format::Mp3, Encoding::Cbr320);
        vinyl.media = Media::Vinyl;
        let mut remaster = release(3, Format::Mp3, Encoding::V0);
        remaster.remaster_title = "Deluxe".to_string();
        g.register_release(flac.clone());
        g.register_release(vinyl);
        g.register_release(remaster);

        assert_eq!(g.formats_missing(&flac).len(), 2);
    }

    #[test]
    fn reference_counts_even_when_not_registered() {
        let g = group(&["Solo"]);
        let mp3 = release(9, Format::Mp3, Encoding::V0);

        assert_eq!(
            g.formats_missing(&mp3),
            vec![
                FormatEncoding::new(Format::Flac, Encoding::Lossless),
                FormatEncoding::new(Format::Mp3, Encoding::Cbr320),
            ]
        );
    }

    #[test]
    fn lineage_is_symmetric_and_sensitive_to_each_field() {
        let a = release(1, Format::Flac, Encoding::Lossless);
        let b = release(2, Format::Mp3, Encoding::V0);
        assert!(in_same_lineage(&a, &b));
        assert!(in_same_lineage(&b, &a));

        let mutations: [fn(&mut Release); 5] = [
            |r| r.media = Media::Web,
            |r| r.remaster_year = 2020,
            |r| r.remaster_title = "Remastered".into(),
            |r| r.remaster_label = "Other Label".into(),
            |r| r.remaster_catalogue_number = "X-2".into(),
        ];
        for mutate in mutations {
            let mut changed = b.clone();
            mutate(&mut changed);
            assert!(!in_same_lineage(&a, &changed));
            assert!(!in_same_lineage(&changed, &a));
        }
    }

    #[test]
    fn effective_year_prefers_nonzero_remaster_year() {
        let mut r = release(1, Format::Flac, Encoding::Lossless);
        assert_eq!(r.effective_year(2011), 2011);
        r.is_remaster = true;
        assert_eq!(r.effective_year(2011), 2011);
        r.remaster_year = 2019;
        assert_eq!(r.effective_year(2011), 2019);
    }

    #[test]
    fn artist_credit_collapses_large_casts() {
        assert_eq!(group(&["A"]).artist_credit(), "A");
        assert_eq!(group(&["A", "B"]).artist_credit(), "A & B");
        assert_eq!(group(&["A", "B", "C"]).artist_credit(), "Various Artists");
    }

    #[test]
    fn names_and_links() {
        let g = group(&["AC/DC"]);
        let flac = release(7, Format::Flac, Encoding::Lossless);
        assert_eq!(g.display_name(&flac), "AC/DC - Night Drive (2011) [CD FLAC]");
        assert_eq!(
            g.release_dir_name(&flac, FormatEncoding::new(Format::Mp3, Encoding::V0)),
            "AC_DC - Night Drive (2011) [CD MP3v0]"
        );
        assert_eq!(
            g.permalink(&flac),
            "https://redacted.ch/torrents.php?id=42&torrentid=7"
        );
    }

    #[test]
    fn register_release_replaces_same_id() {
        let mut g = group(&["Solo"]);
        g.register_release(release(1, Format::Flac, Encoding::Lossless));
        g.register_release(release(1, Format::Flac, Encoding::Lossless24));
        assert_eq!(g.releases().len(), 1);
        assert_eq!(g.release(1).unwrap().encoding, Encoding::Lossless24);
    }

    #[test]
    fn missing_files_reports_basenames() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = release(1, Format::Flac, Encoding::Lossless);
        r.file_manifest = vec![PathBuf::from("CD1/01.flac"), PathBuf::from("cover.jpg")];
        std::fs::create_dir_all(r.root_dir(dir.path()).join("CD1")).unwrap();
        std::fs::write(r.root_dir(dir.path()).join("cover.jpg"), b"").unwrap();

        assert_eq!(r.missing_files(dir.path()), vec!["01.flac".to_string()]);
        assert_eq!(r.flac_files(dir.path()).len(), 1);
    }
}
