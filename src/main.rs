use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use hymnal_downloader::api::{ArtifactSizes, DownloadableSong};
use hymnal_downloader::config::AppConfig;
use hymnal_downloader::downloader::http_pool::HttpPool;
use hymnal_downloader::downloader::{
    DownloadManager, DownloadManagerDeps, DownloadOptions, SettingsUpdate,
};
use hymnal_downloader::platform::{
    HttpProbe, JsonFileStore, LocalFileStore, LogNotifier, NetworkStatus, StaticNetworkStatus,
};
use hymnal_downloader::security::InputValidator;
use hymnal_downloader::utils::{ensure_dir_exists, format_bytes};

#[derive(Parser)]
#[command(name = "hymnal-downloader", version, about = "Keep hymn lyrics, audio and notation available offline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a song's artifacts for offline use
    Download(DownloadArgs),
    /// List downloaded songs
    List,
    /// Delete one downloaded song
    Delete { id: String },
    /// Delete every downloaded song
    Clear,
    /// Show storage usage against the quota
    Usage,
    /// Show or change download settings
    Settings(SettingsArgs),
    /// Remove files no downloaded song refers to
    Prune,
    /// Write the effective configuration to the config file
    InitConfig,
}

#[derive(clap::Args)]
struct DownloadArgs {
    id: String,
    title: String,
    #[arg(long)]
    number: Option<u32>,
    #[arg(long)]
    lyrics_url: Option<String>,
    #[arg(long)]
    audio_url: Option<String>,
    #[arg(long)]
    notation_url: Option<String>,
    #[arg(long)]
    lyrics_size: Option<u64>,
    #[arg(long)]
    audio_size: Option<u64>,
    #[arg(long)]
    notation_size: Option<u64>,
    /// Include audio (defaults to the stored setting)
    #[arg(long)]
    audio: Option<bool>,
    /// Include notation (defaults to the stored setting)
    #[arg(long)]
    notation: Option<bool>,
    #[arg(long)]
    notify: Option<bool>,
}

#[derive(clap::Args)]
struct SettingsArgs {
    /// Quota in bytes
    #[arg(long)]
    max_storage_size: Option<u64>,
    #[arg(long)]
    auto_download_on_wifi: Option<bool>,
    #[arg(long)]
    download_audio_by_default: Option<bool>,
    #[arg(long)]
    download_notation_by_default: Option<bool>,
    #[arg(long)]
    notify_on_complete: Option<bool>,
}

impl SettingsArgs {
    fn to_update(&self) -> Option<SettingsUpdate> {
        let update = SettingsUpdate {
            max_storage_size: self.max_storage_size,
            auto_download_on_wifi: self.auto_download_on_wifi,
            download_audio_by_default: self.download_audio_by_default,
            download_notation_by_default: self.download_notation_by_default,
            notify_on_complete: self.notify_on_complete,
        };
        (update != SettingsUpdate::default()).then_some(update)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            AppConfig::default()
        }
    };

    if let Command::InitConfig = cli.command {
        let path = AppConfig::get_config_path()?;
        config.save_to(&path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let manager = Arc::new(build_manager(&config).await?);

    match cli.command {
        Command::Download(args) => download(&manager, args).await?,
        Command::List => {
            let songs = manager.downloaded_songs().await;
            if songs.is_empty() {
                println!("No songs downloaded");
            }
            for song in songs {
                let kinds: Vec<&str> = song.artifacts().map(|(kind, _)| kind.as_str()).collect();
                println!(
                    "{:<12} {:<40} {:>10}  [{}]  {}",
                    song.id,
                    song.title,
                    format_bytes(song.total_size),
                    kinds.join(", "),
                    song.download_date.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Delete { id } => {
            if !manager.delete_song(&id).await {
                bail!("Song {} is not downloaded or could not be removed", id);
            }
            println!("Deleted {}", id);
        }
        Command::Clear => {
            if !manager.clear_all_downloads().await {
                bail!("Failed to clear downloads");
            }
            println!("All downloads cleared");
        }
        Command::Usage => {
            let usage = manager.storage_info().await;
            println!(
                "{} songs, {} of {} used ({} free)",
                usage.song_count,
                format_bytes(usage.used_bytes),
                format_bytes(usage.max_bytes),
                format_bytes(usage.available_bytes)
            );
            println!("Files under {}", manager.layout().root().display());
        }
        Command::Settings(args) => {
            let settings = match args.to_update() {
                Some(update) => manager.update_settings(&update).await?,
                None => manager.settings().await,
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Prune => {
            let removed = manager.prune_orphans().await;
            println!("Removed {} orphaned file(s)", removed);
        }
        Command::InitConfig => {}
    }

    Ok(())
}

async fn build_manager(config: &AppConfig) -> anyhow::Result<DownloadManager> {
    ensure_dir_exists(&config.download_root)
        .await
        .with_context(|| format!("Cannot create download root {:?}", config.download_root))?;

    let http_pool = Arc::new(HttpPool::new(&config.http)?);
    let network: Arc<dyn NetworkStatus> = if config.assume_online {
        Arc::new(StaticNetworkStatus::online())
    } else {
        Arc::new(HttpProbe::new(http_pool.get_client().clone(), config.connectivity_probe_url.clone()))
    };

    let deps = DownloadManagerDeps::new(
        Arc::new(JsonFileStore::new(config.state_file.clone())),
        Arc::new(LocalFileStore::new(http_pool)),
        network,
        config.download_root.clone(),
    )
    .with_notifier(Arc::new(LogNotifier))
    .with_transfer_timeout(config.transfer_timeout());

    Ok(DownloadManager::new(deps))
}

async fn download(manager: &Arc<DownloadManager>, args: DownloadArgs) -> anyhow::Result<()> {
    let validator = InputValidator::new();
    for url in [&args.lyrics_url, &args.audio_url, &args.notation_url].into_iter().flatten() {
        validator.validate_url(url)?;
    }

    let defaults = manager.default_options().await;
    let options = DownloadOptions {
        include_audio: args.audio.unwrap_or(defaults.include_audio),
        include_notation: args.notation.unwrap_or(defaults.include_notation),
        show_notification: args.notify.unwrap_or(defaults.show_notification),
    };

    let song = DownloadableSong {
        id: args.id,
        number: args.number,
        title: args.title,
        lyrics_url: args.lyrics_url,
        audio_url: args.audio_url,
        notation_url: args.notation_url,
        size: ArtifactSizes {
            lyrics: args.lyrics_size,
            audio: args.audio_size,
            notation: args.notation_size,
        },
    };

    let interrupt = {
        let manager = manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, cancelling downloads");
                manager.cancel_all();
            }
        })
    };

    let bar = ProgressBar::new(1000);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {percent:>3}% {msg}")?
            .progress_chars("=>-"),
    );
    bar.set_prefix(song.id.clone());

    let mut events = manager.subscribe();
    let renderer = {
        let bar = bar.clone();
        let song_id = song.id.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.song_id == song_id => {
                        bar.set_position((event.progress * 1000.0) as u64);
                        if let Some(kind) = event.artifact {
                            bar.set_message(kind.to_string());
                        }
                        if event.status.is_terminal() {
                            break;
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let result = manager.download_song(&song, options, None).await;
    settle_renderer(renderer, Duration::from_millis(250)).await;
    interrupt.abort();

    match result {
        Ok(entry) => {
            bar.finish_with_message("done");
            println!("{} stored offline ({})", entry.title, format_bytes(entry.total_size));
            Ok(())
        }
        Err(e) => {
            bar.abandon_with_message(match e.kind() {
                Some(kind) => format!("{:?}", kind),
                None => "failed".to_string(),
            });
            Err(e.into())
        }
    }
}

/// Gives the renderer `grace` to draw the terminal event, then aborts it.
/// Returns whether it finished on its own.
async fn settle_renderer(mut renderer: JoinHandle<()>, grace: Duration) -> bool {
    if tokio::time::timeout(grace, &mut renderer).await.is_ok() {
        return true;
    }
    renderer.abort();
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_download() {
        let cli = Cli::try_parse_from([
            "hymnal-downloader",
            "download",
            "12",
            "Be Thou My Vision",
            "--lyrics-url",
            "https://hymns.test/12.txt",
            "--audio",
            "false",
        ])
        .unwrap();

        match cli.command {
            Command::Download(args) => {
                assert_eq!(args.id, "12");
                assert_eq!(args.audio, Some(false));
                assert_eq!(args.notation, None);
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn test_empty_settings_args_show_only() {
        let cli = Cli::try_parse_from(["hymnal-downloader", "settings"]).unwrap();
        match cli.command {
            Command::Settings(args) => assert!(args.to_update().is_none()),
            _ => panic!("expected settings"),
        }
    }

    #[tokio::test]
    async fn test_renderer_finishes_its_last_event() {
        let drawn = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let renderer = {
            let drawn = drawn.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                drawn.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };

        assert!(settle_renderer(renderer, Duration::from_millis(500)).await);
        assert!(drawn.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stuck_renderer_is_aborted() {
        let renderer = tokio::spawn(std::future::pending::<()>());
        assert!(!settle_renderer(renderer, Duration::from_millis(20)).await);
    }
}
