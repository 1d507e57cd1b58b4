use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use iptv_curator::{
    channels::{Channel, ChannelStatus},
    checker::{CheckSummary, Checker, CheckerConfig},
    create_app,
    fetch::{FetchConfig, Fetcher, Source},
    filter::{self, ChannelFilter, FilterConfig},
    load_channels,
    loader::{self, PlaylistSource},
    metrics::MonitoringConfig,
    player::{Player, PlayerConfig},
    writer::{self, WriteOptions},
};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Extra playlist location (repeatable, added after configured ones)
    #[arg(long = "playlist", global = true)]
    playlists: Vec<String>,

    /// Directory searched for local .m3u/.m3u8 playlists (repeatable)
    #[arg(long = "playlist-dir", global = true)]
    playlist_dirs: Vec<PathBuf>,

    /// Extra XMLTV location (repeatable)
    #[arg(long = "epg-source", global = true)]
    epg_sources: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Case-insensitive substring of the channel name
    #[arg(long)]
    name: Option<String>,
    /// Exact group title
    #[arg(long)]
    category: Option<String>,
    /// Country code or name
    #[arg(long)]
    country: Option<String>,
    /// Only channels from official sources
    #[arg(long)]
    official_only: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the merged channel set
    Channels {
        #[command(flatten)]
        filter: FilterArgs,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Probe stream URLs and report which ones respond
    Check {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Per-probe timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Write the working channels into this directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a curated playlist
    Generate {
        #[command(flatten)]
        filter: FilterArgs,
        /// Probe the selection before writing
        #[arg(long)]
        check: bool,
        /// Keep only channels that passed the probe (implies --check)
        #[arg(long)]
        working_only: bool,
        /// Also write an XMLTV companion file
        #[arg(long)]
        epg: bool,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Open a channel in the configured player
    Play {
        /// Name substring or exact stream URL
        query: String,
    },
    /// Serve the merged channel set over HTTP
    Serve {
        /// Probe every channel before serving
        #[arg(long)]
        check: bool,
    },
}

#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default)]
    playlists: PlaylistsConfig,
    #[serde(default)]
    epg: EpgConfig,
    #[serde(default)]
    fetch: FetchConfig,
    #[serde(default)]
    checker: CheckerConfig,
    #[serde(default)]
    filter: FilterConfig,
    #[serde(default)]
    output: OutputConfig,
    #[serde(default)]
    player: PlayerConfig,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    monitoring: MonitoringConfig,
}

#[derive(Debug, Default, Deserialize)]
struct PlaylistsConfig {
    #[serde(default, alias = "source", deserialize_with = "deserialize_one_or_many")]
    sources: Vec<PlaylistSource>,
    #[serde(default, alias = "directory", deserialize_with = "deserialize_one_or_many")]
    directories: Vec<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct EpgConfig {
    #[serde(default, alias = "source", deserialize_with = "deserialize_one_or_many")]
    sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OutputConfig {
    #[serde(default = "default_output_dir")]
    directory: PathBuf,
    #[serde(default = "default_output_name")]
    name: String,
    #[serde(default)]
    include_epg: bool,
    #[serde(default)]
    group_order: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_name() -> String {
    "playlist".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            name: default_output_name(),
            include_epg: false,
            group_order: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn deserialize_one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    #[derive(Deserialize)]
    #[serde(untagged, bound = "T: DeserializeOwned")]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

impl FilterArgs {
    /// Command-line values win over the configured ones.
    fn apply(self, base: &FilterConfig) -> FilterConfig {
        FilterConfig {
            name_contains: self.name.or_else(|| base.name_contains.clone()),
            category: self.category.or_else(|| base.category.clone()),
            country: self.country.or_else(|| base.country.clone()),
            official_only: self.official_only || base.official_only,
            working_only: base.working_only,
        }
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing probes in flight...");
            token.cancel();
        }
    });
    cancel
}

async fn run_check(
    checker: &Checker,
    selection: Vec<&mut Channel>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> CheckSummary {
    let step = (selection.len() / 10).max(1);
    checker
        .check(
            selection,
            concurrency,
            |completed, total| {
                if completed % step == 0 || completed == total {
                    info!("Checked {}/{} channels", completed, total);
                }
            },
            cancel,
        )
        .await
}

fn print_channels(channels: &[&Channel]) {
    for channel in channels {
        let status = match channel.status {
            ChannelStatus::Unchecked => "-",
            ChannelStatus::Working => "ok",
            ChannelStatus::Failed => "FAIL",
        };
        println!(
            "{:<4} {:<3} {:<4} {:<24} {:<40} {}",
            status,
            channel.country.as_deref().unwrap_or("--"),
            if channel.epg_available { "epg" } else { "" },
            channel.group,
            channel.name,
            channel.url
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let settings = Config::builder()
        .add_source(config::File::with_name(&args.config).required(false))
        .build()?;
    let settings: Settings = settings.try_deserialize()?;

    info!("Configuration loaded from {}: {:?}", args.config, settings);

    let mut playlists = settings.playlists.sources.clone();
    playlists.extend(args.playlists.iter().map(|p| PlaylistSource::new(p)));
    let output_playlist = writer::playlist_path(
        &settings.output.directory,
        &WriteOptions {
            output_name: settings.output.name.clone(),
            ..Default::default()
        },
    );
    for dir in settings.playlists.directories.iter().chain(&args.playlist_dirs) {
        playlists.extend(loader::discover(dir, &[output_playlist.clone()])?);
    }
    if playlists.is_empty() {
        anyhow::bail!("no playlist sources configured (use [playlists] in {}, --playlist or --playlist-dir)", args.config);
    }
    let epg_sources: Vec<Source> = settings
        .epg
        .sources
        .iter()
        .chain(&args.epg_sources)
        .map(|s| Source::parse(s))
        .collect();

    let fetcher = Fetcher::new(settings.fetch.clone()).context("failed to build HTTP client")?;
    let mut channels = load_channels(&fetcher, &playlists, &epg_sources).await?;

    match args.command {
        Command::Channels { filter: filter_args, json } => {
            let filter = ChannelFilter::from(&filter_args.apply(&settings.filter));
            let view = filter::filter(&channels, &filter);
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_channels(&view);
                info!("{} of {} channels match", view.len(), channels.len());
            }
        }
        Command::Check {
            filter: filter_args,
            concurrency,
            timeout,
            output,
        } => {
            let mut checker_config = settings.checker.clone();
            if let Some(timeout) = timeout {
                checker_config.timeout_secs = timeout;
            }
            let concurrency = concurrency.unwrap_or(checker_config.concurrency);
            let checker = Checker::new(&checker_config)?;

            let filter = ChannelFilter::from(&filter_args.apply(&settings.filter));
            let selection = filter::select_mut(&mut channels, &filter.without_status());
            let cancel = cancel_on_ctrl_c();
            let summary = run_check(&checker, selection, concurrency, &cancel).await;
            println!(
                "{} channels: {} working, {} failed, {} not checked",
                summary.total, summary.working, summary.failed, summary.skipped
            );

            if let Some(dir) = output {
                let working: Vec<&Channel> = channels
                    .iter()
                    .filter(|c| c.status == ChannelStatus::Working)
                    .collect();
                let options = WriteOptions {
                    include_epg: settings.output.include_epg,
                    output_name: settings.output.name.clone(),
                    group_order: settings.output.group_order,
                };
                writer::write(&working, &dir, &options)?;
            }
        }
        Command::Generate {
            filter: filter_args,
            check,
            working_only,
            epg,
            output_dir,
            name,
        } => {
            let mut config = filter_args.apply(&settings.filter);
            let filter = ChannelFilter::from(&config);

            config.working_only |= working_only;
            if check || config.working_only {
                let checker = Checker::new(&settings.checker)?;
                let selection = filter::select_mut(&mut channels, &filter.without_status());
                let cancel = cancel_on_ctrl_c();
                let summary = run_check(&checker, selection, settings.checker.concurrency, &cancel).await;
                if summary.cancelled {
                    anyhow::bail!("check cancelled, playlist not written");
                }
            }

            let view = filter::filter(&channels, &ChannelFilter::from(&config));
            let options = WriteOptions {
                include_epg: epg || settings.output.include_epg,
                output_name: name.unwrap_or_else(|| settings.output.name.clone()),
                group_order: settings.output.group_order,
            };
            let dir = output_dir.unwrap_or_else(|| settings.output.directory.clone());
            let written = writer::write(&view, &dir, &options)?;
            println!("{}", written.playlist.display());
            if let Some(path) = written.epg {
                println!("{}", path.display());
            }
        }
        Command::Play { query } => {
            let needle = query.to_lowercase();
            let channel = channels
                .iter()
                .find(|c| c.url == query)
                .or_else(|| channels.iter().find(|c| c.name.to_lowercase().contains(&needle)))
                .with_context(|| format!("no channel matches '{}'", query))?;
            Player::new(settings.player.clone()).launch(channel)?;
        }
        Command::Serve { check } => {
            if check {
                let checker = Checker::new(&settings.checker)?;
                let selection = filter::select_mut(&mut channels, &ChannelFilter::all());
                let cancel = cancel_on_ctrl_c();
                run_check(&checker, selection, settings.checker.concurrency, &cancel).await;
            }

            let app = create_app(channels, settings.monitoring.enabled);
            let addr = format!("{}:{}", settings.server.host, settings.server.port);
            info!("Listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
                error!("Failed to bind {}: {}", addr, e);
                e
            })?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
