use crate::catalog::{Encoding, Format};
use crate::probe::Metadata;
use crate::runner::{Pipeline, ToolCommand};
use std::path::{Path, PathBuf};

/// Sample rates accepted for 16-bit sources and for sources without a bit depth
pub const RATES_16BIT: &[u32] = &[44_100, 48_000];

/// Sample rates accepted for 24-bit sources
pub const RATES_24BIT: &[u32] = &[
    44_100, 48_000, 88_200, 96_000, 176_400, 192_000, 352_800, 384_000,
];

/// Encoder registered for a target `(format, encoding)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    /// lame with fixed quality flags
    Lame(&'static [&'static str]),
    /// flac re-encode at the highest compression level
    Flac,
}

impl Encoder {
    pub fn for_target(format: Format, encoding: Encoding) -> Option<Self> {
        match (format, encoding) {
            (Format::Mp3, Encoding::Cbr320) => Some(Encoder::Lame(&["-h", "-b", "320"])),
            (Format::Mp3, Encoding::V0) => Some(Encoder::Lame(&["-V", "0", "--vbr-new"])),
            (Format::Mp3, Encoding::V2) => Some(Encoder::Lame(&["-V", "2", "--vbr-new"])),
            (Format::Flac, Encoding::Lossless) => Some(Encoder::Flac),
            _ => None,
        }
    }

    /// Encode step reading 16-bit WAV from stdin
    fn command(self, destination: &Path) -> ToolCommand {
        let destination = destination.to_string_lossy().into_owned();
        match self {
            Encoder::Lame(flags) => {
                let mut args = vec!["-S".to_string()];
                args.extend(flags.iter().map(|f| f.to_string()));
                args.extend(["--ignore-tag-errors".to_string(), "-".to_string(), destination]);
                ToolCommand::new("lame", args)
            }
            Encoder::Flac => {
                ToolCommand::new("flac", ["--best", "-s", "-o", destination.as_str(), "-"])
            }
        }
    }
}

/// One planned file conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub target_format: Format,
    pub target_encoding: Encoding,
    pub target_sample_rate_hz: u32,
    pub resample_required: bool,
    /// Bit depth has to drop to 16
    pub rescale_required: bool,
    pub pipeline: Pipeline,
    pub validation_errors: Vec<String>,
}

impl TranscodeJob {
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.validation_errors.is_empty() && !self.pipeline.is_empty()
    }

    /// The pipeline as shell command lines, piped left to right
    pub fn command_pipeline(&self) -> Vec<String> {
        self.pipeline.command_strings()
    }
}

fn khz(sample_rate_hz: u32) -> String {
    format!("{}", sample_rate_hz as f64 / 1000.0)
}

/// Checks bit depth, channel count and sample rate of a source file.
/// Every problem is reported, in that order.
pub fn validate(metadata: &Metadata) -> Vec<String> {
    let mut errors = Vec::new();
    let is_flac = metadata.format == Some(Format::Flac);

    match metadata.bit_depth {
        Some(16) | Some(24) => {}
        Some(depth) => errors.push(format!("{} is an invalid bit depth", depth)),
        None if is_flac => errors.push("unable to determine bit depth".to_string()),
        None => {}
    }

    if metadata.channels > 2 {
        errors.push(format!(
            "Multichannel releases are unsupported - found {}",
            metadata.channels
        ));
    }

    let accepted = match metadata.bit_depth {
        Some(16) => Some((RATES_16BIT, "16-bit lossless file")),
        Some(24) => Some((RATES_24BIT, "24-bit lossless file")),
        None if is_flac => Some((RATES_16BIT, "file of unknown bit depth")),
        None => Some((RATES_16BIT, "lossy file format")),
        Some(_) => None,
    };
    if let Some((rates, kind)) = accepted {
        let rate = metadata.sample_rate_hz;
        if !rates.contains(&rate) {
            errors.push(format!(
                "{} kHz ({} Hz) is not a valid sample rate for a {}",
                khz(rate),
                rate,
                kind
            ));
        }
    }

    errors
}

#[inline]
pub fn resample_required(metadata: &Metadata) -> bool {
    metadata.sample_rate_hz > 48_000 || metadata.bit_depth.unwrap_or(0) > 16
}

/// The lattice a source rate can be cleanly downsampled onto
pub fn resample_target(sample_rate_hz: u32) -> Option<u32> {
    if sample_rate_hz == 0 {
        None
    } else if sample_rate_hz % 44_100 == 0 {
        Some(44_100)
    } else if sample_rate_hz % 48_000 == 0 {
        Some(48_000)
    } else {
        None
    }
}

fn sox_args(source: &Path, output: &[&str], rate: u32) -> Vec<String> {
    let mut args = vec![source.to_string_lossy().into_owned(), "-G".into(), "-b".into(), "16".into()];
    args.extend(output.iter().map(|s| s.to_string()));
    args.extend(["rate", "-v", "-L"].iter().map(|s| s.to_string()));
    args.push(rate.to_string());
    args.push("dither".into());
    args
}

/// Decides whether `source` can become `target_format`/`target_encoding` and,
/// if so, how.
pub fn evaluate(
    metadata: &Metadata,
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    target_format: Format,
    target_encoding: Encoding,
) -> TranscodeJob {
    let source = source.as_ref();
    let destination = destination.as_ref();
    let mut validation_errors = validate(metadata);

    match metadata.format {
        Some(Format::Flac) => {}
        Some(other) => validation_errors.push(format!("cannot transcode from lossy source {}", other)),
        None => validation_errors.push("source is not a FLAC file".to_string()),
    }

    let encoder = Encoder::for_target(target_format, target_encoding);
    if encoder.is_none() {
        validation_errors.push(format!(
            "no encoder registered for {} {}",
            target_format, target_encoding
        ));
    }

    let resample = resample_required(metadata);
    let target_sample_rate_hz = if resample {
        match resample_target(metadata.sample_rate_hz) {
            Some(rate) => rate,
            None => {
                validation_errors.push(format!(
                    "{}Hz sample rate unsupported",
                    metadata.sample_rate_hz
                ));
                metadata.sample_rate_hz
            }
        }
    } else {
        metadata.sample_rate_hz
    };

    let mut job = TranscodeJob {
        source_path: source.to_path_buf(),
        destination_path: destination.to_path_buf(),
        target_format,
        target_encoding,
        target_sample_rate_hz,
        resample_required: resample,
        rescale_required: metadata.bit_depth.unwrap_or(0) > 16,
        pipeline: Pipeline::default(),
        validation_errors,
    };
    if !job.validation_errors.is_empty() {
        return job;
    }
    let Some(encoder) = encoder else {
        return job;
    };

    job.pipeline = if target_format == Format::Flac && resample {
        let dest = destination.to_string_lossy();
        Pipeline::new(vec![ToolCommand::new(
            "sox",
            sox_args(source, &[dest.as_ref()], target_sample_rate_hz),
        )])
    } else {
        let decode = if resample {
            ToolCommand::new("sox", sox_args(source, &["-t", "wav", "-"], target_sample_rate_hz))
        } else {
            ToolCommand::new(
                "flac",
                ["-dcs".to_string(), "--".to_string(), source.to_string_lossy().into_owned()],
            )
        };
        Pipeline::new(vec![decode, encoder.command(destination)])
    };
    job
}

/// Full test decode of a FLAC source, including its MD5 signature
pub fn verify_pipeline(source: &Path) -> Pipeline {
    Pipeline::new(vec![ToolCommand::new(
        "flac",
        ["-wt".to_string(), "--".to_string(), source.to_string_lossy().into_owned()],
    )])
}

/// Reason a source failed `flac -wt`, quoting the stderr line naming the file
pub fn verification_failure(source: &Path, stderr: &str) -> String {
    let file_name = source.file_name().unwrap_or_default().to_string_lossy();
    match stderr.lines().find(|line| line.contains(file_name.as_ref())) {
        Some(line) => format!("failed flac verification test: {}", line.trim()),
        None => "failed flac verification test".to_string(),
    }
}

/// True when every FLAC file is deeper than 16 bits yet the release claims
/// plain lossless. One 16-bit file, or no files at all, clears the flag.
pub fn mislabeled_24bit(declared: Encoding, flacs: &[Metadata]) -> bool {
    !flacs.is_empty()
        && flacs.iter().all(|m| m.bit_depth.unwrap_or(0) > 16)
        && declared != Encoding::Lossless24
}

#[inline]
pub fn is_multichannel(metadata: &Metadata) -> bool {
    metadata.channels > 2
}

pub fn any_multichannel(flacs: &[Metadata]) -> bool {
    flacs.iter().any(is_multichannel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flac(bit_depth: Option<u32>, sample_rate_hz: u32, channels: u32) -> Metadata {
        Metadata {
            bit_depth,
            sample_rate_hz,
            channels,
            format: Some(Format::Flac),
            ..Default::default()
        }
    }

    fn job(metadata: &Metadata, format: Format, encoding: Encoding) -> TranscodeJob {
        evaluate(metadata, "/in/01.flac", "/out/01.ext", format, encoding)
    }

    #[test]
    fn cd_quality_rates_pass() {
        assert!(validate(&flac(Some(16), 44_100, 2)).is_empty());
        assert!(validate(&flac(Some(16), 48_000, 2)).is_empty());
    }

    #[test]
    fn low_sample_rate_is_rejected_with_value() {
        let errors = validate(&flac(Some(16), 22_050, 2));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("22050"));
        assert!(errors[0].contains("22.05 kHz"));
    }

    #[test]
    fn odd_bit_depths_are_rejected() {
        for depth in [8, 12, 20, 32] {
            let errors = validate(&flac(Some(depth), 44_100, 2));
            assert!(
                errors.iter().any(|e| e.contains(&depth.to_string())),
                "{depth}: {errors:?}"
            );
        }
    }

    #[test]
    fn missing_bit_depth_only_matters_for_flac() {
        assert_eq!(
            validate(&flac(None, 44_100, 2)),
            vec!["unable to determine bit depth".to_string()]
        );
        let lossy = Metadata {
            format: Some(Format::Mp3),
            ..flac(None, 44_100, 2)
        };
        assert!(validate(&lossy).is_empty());
        let lossy_odd_rate = Metadata {
            sample_rate_hz: 32_000,
            ..lossy
        };
        assert!(validate(&lossy_odd_rate)[0].contains("lossy file format"));
    }

    #[test]
    fn hi_res_rates_are_accepted_only_at_24_bit() {
        for rate in RATES_24BIT {
            assert!(validate(&flac(Some(24), *rate, 2)).is_empty(), "{rate}");
        }
        assert!(!validate(&flac(Some(16), 96_000, 2)).is_empty());
    }

    #[test]
    fn three_channels_always_fail() {
        for (depth, rate) in [(16, 44_100), (24, 96_000), (24, 48_000)] {
            let metadata = flac(Some(depth), rate, 3);
            assert!(validate(&metadata)
                .iter()
                .any(|e| e == "Multichannel releases are unsupported - found 3"));
            assert!(!job(&metadata, Format::Mp3, Encoding::V0).is_runnable());
            assert!(any_multichannel(&[flac(Some(16), 44_100, 2), metadata]));
        }
    }

    #[test]
    fn hi_res_sources_downsample_onto_their_lattice() {
        let j = job(&flac(Some(24), 96_000, 2), Format::Flac, Encoding::Lossless);
        assert!(j.resample_required);
        assert_eq!(j.target_sample_rate_hz, 48_000);

        let j = job(&flac(Some(24), 88_200, 2), Format::Mp3, Encoding::Cbr320);
        assert!(j.resample_required);
        assert_eq!(j.target_sample_rate_hz, 44_100);
    }

    #[test]
    fn unsupported_lattice_is_an_error_not_a_guess() {
        assert_eq!(resample_target(50_000), None);
        let j = job(&flac(Some(24), 50_000, 2), Format::Mp3, Encoding::V0);
        assert!(j
            .validation_errors
            .contains(&"50000Hz sample rate unsupported".to_string()));
        assert!(j.pipeline.is_empty());
    }

    #[test]
    fn flac_resample_is_a_single_sox_step() {
        let j = job(&flac(Some(24), 192_000, 2), Format::Flac, Encoding::Lossless);
        assert_eq!(
            j.command_pipeline(),
            vec!["sox /in/01.flac -G -b 16 /out/01.ext rate -v -L 48000 dither"]
        );
    }

    #[test]
    fn mp3_from_hi_res_dithers_to_wav_then_encodes() {
        let j = job(&flac(Some(24), 44_100, 2), Format::Mp3, Encoding::V0);
        assert!(j.rescale_required);
        assert_eq!(
            j.command_pipeline(),
            vec![
                "sox /in/01.flac -G -b 16 -t wav - rate -v -L 44100 dither",
                "lame -S -V 0 --vbr-new --ignore-tag-errors - /out/01.ext",
            ]
        );
    }

    #[test]
    fn cd_quality_decodes_straight_into_encoder() {
        let j = job(&flac(Some(16), 44_100, 2), Format::Mp3, Encoding::Cbr320);
        assert!(!j.resample_required);
        assert_eq!(j.target_sample_rate_hz, 44_100);
        assert_eq!(
            j.command_pipeline(),
            vec![
                "flac -dcs -- /in/01.flac",
                "lame -S -h -b 320 --ignore-tag-errors - /out/01.ext",
            ]
        );

        let j = job(&flac(Some(16), 48_000, 1), Format::Flac, Encoding::Lossless);
        assert_eq!(j.pipeline.steps[1].program, "flac");
        assert_eq!(j.pipeline.steps[1].args, ["--best", "-s", "-o", "/out/01.ext", "-"]);
    }

    #[test]
    fn lossy_sources_and_unknown_targets_are_not_runnable() {
        let mp3 = Metadata {
            format: Some(Format::Mp3),
            ..flac(None, 44_100, 2)
        };
        let j = job(&mp3, Format::Mp3, Encoding::V0);
        assert_eq!(j.validation_errors, vec!["cannot transcode from lossy source MP3"]);

        let j = job(&flac(Some(16), 44_100, 2), Format::Aac, Encoding::Cbr256);
        assert_eq!(j.validation_errors, vec!["no encoder registered for AAC 256"]);
        assert!(!j.is_runnable());
    }

    #[test]
    fn verification_tests_the_source_in_place() {
        let pipeline = verify_pipeline(Path::new("/music/-01 Intro.flac"));
        assert_eq!(pipeline.steps.len(), 1);
        assert_eq!(pipeline.steps[0].program, "flac");
        assert_eq!(pipeline.steps[0].args, ["-wt", "--", "/music/-01 Intro.flac"]);
    }

    #[test]
    fn verification_failure_quotes_the_line_naming_the_file() {
        let source = Path::new("/music/01 Intro.flac");
        let stderr = "\nflac 1.4.3\n01 Intro.flac: ERROR while decoding data\n  state = FLAC__STREAM_DECODER_READ_FRAME\n";
        assert_eq!(
            verification_failure(source, stderr),
            "failed flac verification test: 01 Intro.flac: ERROR while decoding data"
        );
        assert_eq!(verification_failure(source, "segfault"), "failed flac verification test");
    }

    #[test]
    fn mislabel_requires_every_flac_to_be_deep() {
        let deep = flac(Some(24), 96_000, 2);
        let cd = flac(Some(16), 44_100, 2);
        assert!(mislabeled_24bit(Encoding::Lossless, &[deep.clone(), deep.clone()]));
        assert!(!mislabeled_24bit(Encoding::Lossless, &[deep.clone(), cd]));
        assert!(!mislabeled_24bit(Encoding::Lossless24, &[deep]));
        assert!(!mislabeled_24bit(Encoding::Lossless, &[]));
    }
}
