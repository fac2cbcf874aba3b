use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use release_reconcile::{ReconcileOptions, reconcile};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// torrent permalinks to process, default to every downloaded release
    urls: Vec<String>,

    /// directory of saved release group responses, named <group id>.json
    #[arg(short, long)]
    groups: PathBuf,

    /// directory the owned torrents were downloaded into
    #[arg(short, long)]
    download_dir: PathBuf,

    /// directory new releases are written to
    #[arg(short, long)]
    output_dir: PathBuf,

    /// directory packaged torrents are written to
    #[arg(long, default_value = "./torrents")]
    torrents_dir: PathBuf,

    /// tracker announce URL, packaging is skipped when absent
    #[arg(short, long)]
    announce: Option<String>,

    /// cache file of processed releases
    #[arg(long, default_value = "cache.json")]
    cache: PathBuf,

    /// discard the cache before starting
    #[arg(long)]
    invalidate_cache: bool,

    /// reprocess releases found in the cache
    #[arg(long)]
    retry: bool,

    /// number of threads to use, default to CPU core count
    #[arg(short, long)]
    threads: Option<usize>,

    /// seconds before an external tool is killed, 0 to wait forever
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    /// transcode without building torrents
    #[arg(long)]
    skip_packaging: bool,

    /// hide the progress bar
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_filters("symphonia=error,lofty=error")
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();

    let options = ReconcileOptions {
        download_dir: cli.download_dir,
        output_dir: cli.output_dir,
        torrents_dir: cli.torrents_dir,
        announce_url: cli.announce,
        cache_path: cli.cache,
        invalidate_cache: cli.invalidate_cache,
        retry: cli.retry,
        num_threads: cli.threads,
        tool_timeout: (cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs)),
        skip_packaging: cli.skip_packaging,
        show_progress: !cli.quiet,
    };

    info!("Starting reconciliation with options:");
    info!("  Groups Directory: {:?}", cli.groups);
    info!("  Download Directory: {:?}", options.download_dir);
    info!("  Output Directory: {:?}", options.output_dir);
    info!("  Cache: {:?}", options.cache_path);
    if options.skip_packaging || options.announce_url.is_none() {
        info!("  Packaging: Disabled");
    } else {
        info!("  Torrents Directory: {:?}", options.torrents_dir);
    }
    if let Some(n) = options.num_threads {
        info!("  Threads: {}", n);
    } else {
        info!("  Threads: Default");
    }
    if cli.urls.is_empty() {
        info!("  Releases: All downloaded");
    } else {
        info!("  Releases: {} URL(s)", cli.urls.len());
    }
    info!("---");

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after cleanup...");
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to install interrupt handler: {}", e);
    }

    match reconcile(&options, &cli.groups, &cli.urls, cancel.clone()) {
        Ok(outcomes) => {
            for outcome in outcomes.iter().filter(|o| o.state.is_failure()) {
                warn!("{}: {}", outcome.display_name, outcome.state);
            }
            if cancel.load(Ordering::SeqCst) {
                warn!("Reconciliation interrupted.");
            } else {
                info!("Reconciliation finished successfully!");
            }
            Ok(())
        }
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            Err(e)?
        }
    }
}
