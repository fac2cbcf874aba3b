use crate::cache::DedupCache;
use crate::catalog::{Encoding, FormatEncoding};
use crate::decision;
use crate::error::{Error, ProbeError};
use crate::package::Packager;
use crate::probe::{self, Metadata};
use crate::release::{Release, ReleaseGroup};
use crate::runner::CommandRunner;
use crate::tags;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strum_macros::Display;

/// Substrings that may not appear in a release's file paths
pub const FORBIDDEN_SUBSTRINGS: &[&str] = &["?", ":", "<", ">", "\\", "*", "|", "\"", "//"];

/// Configuration for a reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Directory the owned torrents were downloaded into
    pub download_dir: PathBuf,
    /// Directory new release directories are created in
    pub output_dir: PathBuf,
    /// Directory packaged torrents are written to
    pub torrents_dir: PathBuf,
    /// Tracker announce URL embedded in packaged torrents
    pub announce_url: Option<String>,
    /// JSON file remembering processed releases
    pub cache_path: PathBuf,
    /// Discard the cache before starting
    pub invalidate_cache: bool,
    /// Reprocess releases already present in the cache
    pub retry: bool,
    /// Number of threads for parallel format jobs
    pub num_threads: Option<usize>,
    /// Deadline for each external tool pipeline
    pub tool_timeout: Option<Duration>,
    /// Transcode but do not build torrents
    pub skip_packaging: bool,
    /// Draw a progress bar while jobs run
    pub show_progress: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            download_dir: PathBuf::from("."),
            output_dir: PathBuf::from("./transcodes"),
            torrents_dir: PathBuf::from("./torrents"),
            announce_url: None,
            cache_path: PathBuf::from("cache.json"),
            invalidate_cache: false,
            retry: false,
            num_threads: None,
            tool_timeout: Some(Duration::from_secs(600)),
            skip_packaging: false,
            show_progress: true,
        }
    }
}

/// Where a release ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ReleaseState {
    AlreadyProcessed,
    Discovered,
    FilesChecked,
    FormatGapComputed,
    NoGapTerminal,
    NoLosslessSource,
    TranscodeEligible,
    TranscodeRunning,
    TagsValidated,
    Registered,
    MissingFiles,
    MultichannelRejected,
    InvalidTags,
    /// A source file failed its FLAC integrity test
    CorruptSource,
    TranscodeFailed,
    /// An I/O failure ended processing of this release
    Aborted,
}

impl ReleaseState {
    /// States after which the release is retried on the next run
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ReleaseState::MissingFiles
                | ReleaseState::MultichannelRejected
                | ReleaseState::InvalidTags
                | ReleaseState::CorruptSource
                | ReleaseState::TranscodeFailed
                | ReleaseState::Aborted
        )
    }
}

/// Advisory observation that does not stop reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Mislabeled24Bit { declared: Encoding },
    PathProblem { path: String, problem: String },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::Mislabeled24Bit { declared } => write!(
                f,
                "labeled as {} but every FLAC file is 24-bit; this release should be reported and fixed",
                declared
            ),
            Finding::PathProblem { path, problem } => write!(f, "{}: {}", path, problem),
        }
    }
}

/// Result of producing one missing format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub target: FormatEncoding,
    pub release_dir: Option<PathBuf>,
    pub artifact: Option<PathBuf>,
    /// Command lines run per file, in manifest order
    pub commands: Vec<Vec<String>>,
    pub errors: Vec<String>,
}

impl JobOutcome {
    fn new(target: FormatEncoding) -> Self {
        JobOutcome {
            target,
            release_dir: None,
            artifact: None,
            commands: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[inline]
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Structured result of reconciling one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub release_id: u64,
    pub display_name: String,
    pub state: ReleaseState,
    /// Every state passed through, in order
    pub history: Vec<ReleaseState>,
    pub missing_formats: Vec<FormatEncoding>,
    pub findings: Vec<Finding>,
    pub jobs: Vec<JobOutcome>,
    /// Human readable reasons and details
    pub messages: Vec<String>,
    pub registered: bool,
}

impl ReleaseOutcome {
    fn new(release_id: u64, display_name: String) -> Self {
        ReleaseOutcome {
            release_id,
            display_name,
            state: ReleaseState::Discovered,
            history: Vec::new(),
            missing_formats: Vec::new(),
            findings: Vec::new(),
            jobs: Vec::new(),
            messages: Vec::new(),
            registered: false,
        }
    }

    fn advance(&mut self, state: ReleaseState) {
        debug!("  {} -> {}", self.state, state);
        self.state = state;
        self.history.push(state);
    }

    fn stop(mut self, state: ReleaseState, reason: impl Into<String>, details: Vec<String>) -> Self {
        let reason = reason.into();
        warn!("  {}", reason);
        for detail in &details {
            warn!("  - {}", detail);
        }
        self.advance(state);
        self.messages.push(reason);
        self.messages.extend(details);
        self
    }
}

/// Signature of the audio metadata reader used for source files
pub type Prober = fn(&Path) -> Result<Metadata, ProbeError>;

fn default_prober(path: &Path) -> Result<Metadata, ProbeError> {
    probe::probe(path)
}

/// Problems with a release-relative path that would block an upload
pub fn path_problems(relative: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if let Some(component) = Path::new(relative).components().find_map(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with(char::is_whitespace).then(|| name.into_owned())
        }
        _ => None,
    }) {
        problems.push(format!(
            "path contains a file or directory name with leading whitespace: {:?}",
            component
        ));
    }
    let forbidden: Vec<&str> = FORBIDDEN_SUBSTRINGS
        .iter()
        .copied()
        .filter(|s| relative.contains(s))
        .collect();
    if !forbidden.is_empty() {
        problems.push(format!(
            "path contains invalid character(s): {}",
            forbidden.join(" ")
        ));
    }
    problems
}

/// Drives releases through checks, transcoding, packaging and the cache
pub struct ReconciliationOrchestrator {
    options: ReconcileOptions,
    cache: DedupCache,
    runner: Arc<dyn CommandRunner>,
    packager: Option<Arc<dyn Packager>>,
    cancel: Arc<AtomicBool>,
    prober: Prober,
    pool: Option<rayon::ThreadPool>,
}

fn validate_options(options: &ReconcileOptions) -> Result<(), Error> {
    if !options.download_dir.is_dir() {
        return Err(Error::InvalidOptions(format!(
            "Download path is not a valid directory: {:?}",
            options.download_dir
        )));
    }
    for dir in [&options.output_dir, &options.torrents_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| Error::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
            info!("Created directory: {:?}", dir);
        } else if !dir.is_dir() {
            return Err(Error::InvalidOptions(format!(
                "Path exists but is not a directory: {:?}",
                dir
            )));
        }
    }
    Ok(())
}

impl ReconciliationOrchestrator {
    pub fn new(
        options: ReconcileOptions,
        cache: DedupCache,
        runner: Arc<dyn CommandRunner>,
        packager: Option<Arc<dyn Packager>>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, Error> {
        validate_options(&options)?;
        if packager.is_none() && !options.skip_packaging {
            warn!("No packager configured; produced releases will not be packaged.");
        }

        let pool = match options.num_threads {
            Some(n) if n > 0 => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => {
                    info!("Using {} threads for format jobs.", n);
                    Some(pool)
                }
                Err(e) => {
                    warn!(
                        "Failed to configure Rayon thread pool: {}. Using default number of threads.",
                        e
                    );
                    None
                }
            },
            _ => None,
        };

        Ok(ReconciliationOrchestrator {
            options,
            cache,
            runner,
            packager,
            cancel,
            prober: default_prober,
            pool,
        })
    }

    /// Replaces the audio metadata reader
    pub fn with_prober(mut self, prober: Prober) -> Self {
        self.prober = prober;
        self
    }

    #[inline]
    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    #[inline]
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn register(&self, mut outcome: ReleaseOutcome) -> ReleaseOutcome {
        match self.cache.add(outcome.release_id, outcome.display_name.clone()) {
            Ok(()) => {
                outcome.registered = true;
                outcome
            }
            Err(e) => outcome.stop(
                ReleaseState::Aborted,
                format!("Could not record release in cache {:?}: {}", self.cache.path(), e),
                Vec::new(),
            ),
        }
    }

    /// Processes every `(group, release)` pair one after another
    pub fn reconcile_all<I>(&self, candidates: I) -> Vec<ReleaseOutcome>
    where
        I: IntoIterator<Item = (ReleaseGroup, Release)>,
    {
        let mut outcomes = Vec::new();
        for (group, release) in candidates {
            if self.cancelled() {
                warn!("Interrupted; not starting further releases.");
                break;
            }
            outcomes.push(self.reconcile(&group, &release));
        }

        let registered = outcomes.iter().filter(|o| o.registered).count();
        let failed = outcomes.iter().filter(|o| o.state.is_failure()).count();
        info!(
            "Reconciliation complete. {} release(s) examined, {} registered, {} failed, {} skipped.",
            outcomes.len(),
            registered,
            failed,
            outcomes.len() - registered - failed
        );
        outcomes
    }

    /// Runs one release through the full state machine. Errors never
    /// escape: they end up in the returned outcome.
    pub fn reconcile(&self, group: &ReleaseGroup, release: &Release) -> ReleaseOutcome {
        let mut outcome = ReleaseOutcome::new(release.release_id, group.display_name(release));
        info!("Release found: {}", outcome.display_name);
        info!("  {}", group.permalink(release));

        match self.cache.contains(release.release_id) {
            Ok(true) if !self.options.retry => {
                return outcome.stop(
                    ReleaseState::AlreadyProcessed,
                    "Already processed in an earlier run, skipping.",
                    Vec::new(),
                );
            }
            Ok(true) => match self.cache.remove(release.release_id) {
                Ok(_) => info!("  Retrying previously processed release."),
                Err(e) => {
                    return outcome.stop(
                        ReleaseState::Aborted,
                        format!("Could not update cache: {}", e),
                        Vec::new(),
                    );
                }
            },
            Ok(false) => {}
            Err(e) => {
                return outcome.stop(
                    ReleaseState::Aborted,
                    format!("Could not read cache: {}", e),
                    Vec::new(),
                );
            }
        }
        outcome.advance(ReleaseState::Discovered);

        let download_dir = &self.options.download_dir;
        let missing_files = release.missing_files(download_dir);
        if !missing_files.is_empty() {
            return outcome.stop(
                ReleaseState::MissingFiles,
                format!("Missing {} file(s), skipping.", missing_files.len()),
                missing_files,
            );
        }
        outcome.advance(ReleaseState::FilesChecked);

        for entry in &release.file_manifest {
            let relative = Path::new(&release.file_path).join(entry);
            let relative = relative.to_string_lossy();
            for problem in path_problems(&relative) {
                outcome.findings.push(Finding::PathProblem {
                    path: relative.to_string(),
                    problem,
                });
            }
        }

        outcome.missing_formats = group.formats_missing(release);
        outcome.advance(ReleaseState::FormatGapComputed);
        if outcome.missing_formats.is_empty() {
            info!("  No formats missing.");
            outcome.advance(ReleaseState::NoGapTerminal);
            return self.register(outcome);
        }
        info!(
            "  Missing formats: {}",
            outcome
                .missing_formats
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let flac_paths = release.flac_files(download_dir);
        if !release.format.is_lossless() || flac_paths.is_empty() {
            return self.register(outcome.stop(
                ReleaseState::NoLosslessSource,
                "No lossless source files; nothing can be produced from this release.",
                Vec::new(),
            ));
        }

        let mut sources: Vec<(PathBuf, Metadata)> = Vec::with_capacity(flac_paths.len());
        let mut unreadable = Vec::new();
        for path in flac_paths {
            match (self.prober)(&path) {
                Ok(metadata) => sources.push((path, metadata)),
                Err(e) => unreadable.push(format!(
                    "{}: {}",
                    path.file_name().unwrap_or_default().to_string_lossy(),
                    e
                )),
            }
        }
        if !unreadable.is_empty() {
            return outcome.stop(
                ReleaseState::Aborted,
                "One or more FLAC files could not be read, skipping.",
                unreadable,
            );
        }
        let metadata: Vec<Metadata> = sources.iter().map(|(_, m)| m.clone()).collect();

        if decision::any_multichannel(&metadata) {
            let files = sources
                .iter()
                .filter(|(_, m)| decision::is_multichannel(m))
                .map(|(p, m)| {
                    format!(
                        "{} ({} channels)",
                        p.file_name().unwrap_or_default().to_string_lossy(),
                        m.channels
                    )
                })
                .collect();
            return outcome.stop(
                ReleaseState::MultichannelRejected,
                "Release is multichannel, skipping.",
                files,
            );
        }

        if decision::mislabeled_24bit(release.encoding, &metadata) {
            let finding = Finding::Mislabeled24Bit {
                declared: release.encoding,
            };
            warn!("  {}", finding);
            outcome.findings.push(finding);
        }
        for finding in &outcome.findings {
            if let Finding::PathProblem { .. } = finding {
                warn!("  {}", finding);
            }
        }

        let tag_problems: Vec<String> = sources
            .iter()
            .flat_map(|(path, m)| {
                let file_name = path.file_name().unwrap_or_default().to_string_lossy();
                tags::validate_tags(&file_name, &m.tags)
            })
            .map(|p| p.to_string())
            .collect();
        if !tag_problems.is_empty() {
            return outcome.stop(
                ReleaseState::InvalidTags,
                "One or more files has invalid tags, skipping.",
                tag_problems,
            );
        }

        let mut corrupt = Vec::new();
        for (path, _) in &sources {
            let file_name = path.file_name().unwrap_or_default().to_string_lossy();
            match self.runner.run(&decision::verify_pipeline(path)) {
                Ok(output) if output.success() => {}
                Ok(output) => corrupt.push(format!(
                    "{}: {}",
                    file_name,
                    decision::verification_failure(path, &output.stderr)
                )),
                Err(e) => {
                    return outcome.stop(
                        ReleaseState::Aborted,
                        format!("Could not verify {}: {}", file_name, e),
                        Vec::new(),
                    );
                }
            }
        }
        if !corrupt.is_empty() {
            return outcome.stop(
                ReleaseState::CorruptSource,
                "One or more FLAC files failed verification, skipping.",
                corrupt,
            );
        }
        outcome.advance(ReleaseState::TranscodeEligible);

        outcome.advance(ReleaseState::TranscodeRunning);
        let jobs = self.run_jobs(group, release, &sources, &outcome.missing_formats);
        outcome.jobs = jobs;

        if self.cancelled() {
            for job in &mut outcome.jobs {
                if let Some(dir) = job.release_dir.take() {
                    if let Err(e) = fs::remove_dir_all(&dir) {
                        warn!("  Failed to remove {:?}: {}", dir, e);
                    }
                }
                if let Some(artifact) = job.artifact.take() {
                    if let Err(e) = fs::remove_file(&artifact) {
                        warn!("  Failed to remove {:?}: {}", artifact, e);
                    }
                }
            }
            return outcome.stop(
                ReleaseState::TranscodeFailed,
                "Interrupted while transcoding; partial output was removed.",
                Vec::new(),
            );
        }
        outcome.advance(ReleaseState::TagsValidated);

        let mut failures = Vec::new();
        for job in &outcome.jobs {
            if job.succeeded() {
                info!("  {}: completed successfully.", job.target);
            } else {
                for e in &job.errors {
                    error!("  {}: {}", job.target, e);
                    failures.push(format!("{}: {}", job.target, e));
                }
            }
        }
        outcome.messages.extend(failures);

        outcome = self.register(outcome);
        if outcome.registered {
            outcome.advance(ReleaseState::Registered);
        }
        outcome
    }

    fn run_jobs(
        &self,
        group: &ReleaseGroup,
        release: &Release,
        sources: &[(PathBuf, Metadata)],
        targets: &[FormatEncoding],
    ) -> Vec<JobOutcome> {
        let pb = if self.options.show_progress {
            ProgressBar::new(targets.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}").expect("Internal Error: Failed to set progress bar style")
            .progress_chars("#>-"));
        pb.set_message("Processing missing formats");

        let run = || -> Vec<JobOutcome> {
            targets
                .par_iter()
                .progress_with(pb.clone())
                .map(|target| self.run_job(group, release, sources, *target))
                .collect()
        };
        let jobs = match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        };
        pb.finish_with_message("Formats done");
        jobs
    }

    fn run_job(
        &self,
        group: &ReleaseGroup,
        release: &Release,
        sources: &[(PathBuf, Metadata)],
        target: FormatEncoding,
    ) -> JobOutcome {
        let mut job = JobOutcome::new(target);
        let name = group.release_dir_name(release, target);
        let final_dir = self.options.output_dir.join(&name);
        if final_dir.exists() {
            job.errors
                .push(format!("output directory {:?} already exists", final_dir));
            return job;
        }

        // Staging lives next to the final directory so the last step is a rename.
        let staging = match tempfile::Builder::new()
            .prefix(".reconcile-")
            .tempdir_in(&self.options.output_dir)
        {
            Ok(dir) => dir,
            Err(e) => {
                job.errors.push(format!("creating staging directory failed: {}", e));
                return job;
            }
        };
        let work_dir = staging.path().join(&name);
        let root = release.root_dir(&self.options.download_dir);

        for (source, metadata) in sources {
            if self.cancelled() {
                job.errors.push("cancelled".to_string());
                return job;
            }
            let file_name = source.file_name().unwrap_or_default().to_string_lossy();
            let relative = pathdiff::diff_paths(source, &root)
                .unwrap_or_else(|| PathBuf::from(source.file_name().unwrap_or_default()));
            let mut destination = work_dir.join(relative);
            destination.set_extension(target.format.extension());
            if let Some(parent) = destination.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    job.errors.push(format!("creating {:?} failed: {}", parent, e));
                    return job;
                }
            }

            let plan = decision::evaluate(
                metadata,
                source,
                &destination,
                target.format,
                target.encoding,
            );
            if !plan.is_runnable() {
                job.errors.extend(
                    plan.validation_errors
                        .iter()
                        .map(|e| format!("{}: {}", file_name, e)),
                );
                return job;
            }
            debug!("  {} {}: {}", target, file_name, plan.pipeline);

            match self.runner.run(&plan.pipeline) {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    job.errors.push(format!(
                        "{}: transcode exited with code {}{}",
                        file_name,
                        output.exit_code,
                        if output.stderr.trim().is_empty() {
                            String::new()
                        } else {
                            format!(": {}", output.stderr.trim())
                        }
                    ));
                    return job;
                }
                Err(e) => {
                    job.errors.push(format!("{}: {}", file_name, e));
                    return job;
                }
            }

            let tag_errors = tags::copy_tags(source, &destination);
            if !tag_errors.is_empty() {
                job.errors.extend(tag_errors);
                return job;
            }
            job.commands.push(plan.command_pipeline());
        }

        if let Err(e) = fs::rename(&work_dir, &final_dir) {
            job.errors
                .push(format!("moving output into {:?} failed: {}", final_dir, e));
            return job;
        }
        job.release_dir = Some(final_dir.clone());
        drop(staging);

        if self.options.skip_packaging {
            return job;
        }
        if let Some(packager) = &self.packager {
            match packager.package(&final_dir, &name) {
                Ok(artifact) => job.artifact = Some(artifact),
                Err(e) => job.errors.push(format!("packaging failed: {}", e)),
            }
        }
        job
    }
}
