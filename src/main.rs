use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use podsync::{
    EngineConfig, EngineHandle, NoopReporter, ProgressEvent, ProgressReporter, ReqwestClient,
    SharedProgressReporter, SyncEngine, SyncReport,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

/// Keep podcast feeds cached locally and download their episodes
#[derive(Parser, Debug)]
#[command(name = "podsync")]
#[command(about = "Keep podcast feeds cached locally and download their episodes")]
#[command(version)]
struct Args {
    /// Directory holding sources.json, Cache/ and Podcasts/
    #[arg(short, long, default_value = ".", global = true)]
    data_dir: PathBuf,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "30", global = true)]
    timeout: u64,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every subscribed feed, from the cache when possible
    Sync,
    /// Delete the feed cache and fetch every feed again
    Refresh,
    /// List subscribed sources, or the episodes of one source
    List {
        /// Index of the source whose episodes to list
        source: Option<usize>,

        /// Only list episodes whose title contains this text (case-insensitive)
        #[arg(short, long, requires = "source")]
        search: Option<String>,
    },
    /// Subscribe to a feed under the given title
    Add { title: String, url: String },
    /// Subscribe to a feed, taking the title from the feed itself
    AddFeed { url: String },
    /// Download one episode, by index or by title
    Download {
        source: usize,

        /// Index of the episode within the source
        #[arg(required_unless_present = "title", conflicts_with = "title")]
        episode: Option<usize>,

        /// Download the first episode whose title contains this text
        #[arg(long)]
        title: Option<String>,
    },
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<usize, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .expect("valid spinner template");

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn get_or_create_bar(&self, download_id: usize) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(bar) = bars.get(&download_id) {
            return bar.clone();
        }

        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{pos:>3}}% {{wide_msg}}"
            ))
            .expect("valid download template")
            .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(style);
        bars.insert(download_id, bar.clone());
        bar
    }

    fn finish_bar(&self, download_id: usize) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = bars.remove(&download_id) {
            bar.finish_and_clear();
        }
    }

    fn line(&self, message: String) {
        let _ = self.multi.println(message);
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StateChanged { syncing: true } => {
                self.main_bar.reset();
                self.main_bar
                    .enable_steady_tick(Duration::from_millis(100));
                self.main_bar.set_message("Syncing feeds");
            }

            ProgressEvent::StateChanged { syncing: false } => {
                self.main_bar.finish_and_clear();
            }

            ProgressEvent::LoadingSource {
                title, from_cache, ..
            } => {
                let origin = if from_cache { "cache" } else { "network" };
                self.main_bar.set_message(format!(
                    "{SEARCH}Loading {} from {}",
                    title.cyan(),
                    origin.dimmed()
                ));
            }

            ProgressEvent::SourceLoaded {
                title,
                episode_count,
                ..
            } => {
                self.line(format!(
                    "{HEADPHONES}{} • {} episodes",
                    title.bold().green(),
                    episode_count.to_string().cyan()
                ));
            }

            ProgressEvent::SourceFailed { title, error } => {
                self.line(format!("{FAILURE}{} - {}", title.red(), error.dimmed()));
            }

            ProgressEvent::SyncCompleted { .. } => {}

            ProgressEvent::SyncFailed { error } => {
                self.line(format!("{FAILURE}{}", error.red()));
            }

            ProgressEvent::DownloadStarting {
                download_id,
                episode_title,
                ..
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.set_position(0);
                bar.set_message(truncate_title(&episode_title, 40));
            }

            ProgressEvent::DownloadProgressChanged {
                download_id,
                percent,
                ..
            } => {
                self.get_or_create_bar(download_id)
                    .set_position(u64::from(percent));
            }

            ProgressEvent::DownloadAudioCompleted {
                download_id,
                episode_title,
                ..
            } => {
                self.finish_bar(download_id);
                self.line(format!(
                    "{SUCCESS}{}",
                    truncate_title(&episode_title, 40).green()
                ));
            }

            ProgressEvent::DownloadFailed {
                download_id,
                episode_title,
                error,
            } => {
                self.finish_bar(download_id);
                self.line(format!(
                    "{FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
            }

            ProgressEvent::DownloadCancelled {
                download_id,
                episode_title,
            } => {
                self.finish_bar(download_id);
                self.line(format!(
                    "{FAILURE}{} cancelled",
                    truncate_title(&episode_title, 30).yellow()
                ));
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let head: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn print_summary(report: &SyncReport) {
    println!(
        "\n{} {} sources, {} from cache, {} fetched, {} failed",
        "Sync complete:".bold().green(),
        report.sources.len().to_string().cyan(),
        report.from_cache.to_string().yellow(),
        report.fetched.to_string().green(),
        if report.failed_sources.is_empty() {
            "0".green()
        } else {
            report.failed_sources.len().to_string().red().bold()
        }
    );
}

fn print_sources(
    engine: &EngineHandle<ReqwestClient>,
    source: Option<usize>,
    search: Option<&str>,
) -> Result<()> {
    let sources = engine.sources();

    match source {
        None => {
            for (index, source) in sources.iter().enumerate() {
                println!(
                    "{:>3}  {} ({} episodes) {}",
                    index.to_string().cyan(),
                    source.title.bold(),
                    source.episodes.len(),
                    source.url.dimmed()
                );
            }
        }
        Some(index) => {
            let source = sources
                .get(index)
                .with_context(|| format!("No source at index {index}"))?;
            println!("{HEADPHONES}{}\n", source.title.bold().green());
            let matching = engine.find_episodes(index, search.unwrap_or_default())?;
            for (index, episode) in source
                .episodes
                .iter()
                .enumerate()
                .filter(|(_, e)| matching.contains(e))
            {
                println!(
                    "{:>4}  {} {}",
                    index.to_string().cyan(),
                    episode.title,
                    episode.published_date.dimmed()
                );
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podsync".bold().magenta(),
            "- Podcast Feed Sync".dimmed()
        );
    }

    let mut config = EngineConfig::in_dir(&args.data_dir);
    config.request_timeout = Duration::from_secs(args.timeout);

    let client = ReqwestClient::with_timeout(config.request_timeout)
        .context("Failed to create HTTP client")?;

    let reporter: SharedProgressReporter = if args.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let engine = SyncEngine::spawn(client, config, reporter);

    match args.command {
        Command::Sync => {
            let report = engine.sync().await.context("Failed to sync feeds")?;
            if !args.quiet {
                print_summary(&report);
            }
        }

        Command::Refresh => {
            let report = engine.refresh().await.context("Failed to refresh feeds")?;
            if !args.quiet {
                print_summary(&report);
            }
        }

        Command::List { source, search } => {
            engine.sync().await.context("Failed to sync feeds")?;
            print_sources(&engine, source, search.as_deref())?;
        }

        Command::Add { title, url } => {
            let added = engine
                .add_source(&title, &url)
                .await
                .context("Failed to add source")?;
            added.synced().await.context("Failed to sync feeds")?;
            println!("{SUCCESS}Added {}", title.bold().green());
        }

        Command::AddFeed { url } => {
            let added = engine.add_feed(&url).await.context("Failed to add feed")?;
            let title = added.title.clone();
            added.synced().await.context("Failed to sync feeds")?;
            println!("{SUCCESS}Added {}", title.bold().green());
        }

        Command::Download {
            source,
            episode,
            title,
        } => {
            engine.sync().await.context("Failed to sync feeds")?;
            let download = match (episode, title) {
                (Some(episode), _) => engine.download(source, episode),
                (None, title) => {
                    engine.download_matching(source, title.as_deref().unwrap_or_default())
                }
            }
            .context("Failed to start download")?;

            // Ctrl-C cancels the transfer so no partial file is left behind
            let result = download
                .cancel_on(async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                })
                .await
                .context("Download failed")?;

            if !args.quiet {
                println!(
                    "\n{FOLDER}Output: {} ({} bytes, {})\n",
                    result.path.display().to_string().cyan(),
                    result.bytes_downloaded,
                    result.content_hash.dimmed()
                );
            }
        }
    }

    Ok(())
}
