//! ReplayKit CLI - Command-line tools for inspecting and following replays

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use replaykit_core::prelude::*;

#[derive(Parser)]
#[command(name = "replaykit")]
#[command(about = "Replay stream store CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to replaykit.toml and REPLAYKIT_* variables)
    #[arg(short, long, global = true, env = "REPLAYKIT_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Replay store root directory, overriding the configured store
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List finished replays
    List {
        /// Only replays recorded with this network version
        #[arg(long)]
        network_version: Option<u32>,

        /// Only replays recorded with this changelist
        #[arg(long)]
        changelist: Option<u32>,

        /// Only replays this user participated in
        #[arg(long)]
        user: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a replay's summary and checkpoints
    Info {
        /// Stream name
        name: String,
    },
    /// Resolve a time to a checkpoint and stream offset
    Seek {
        /// Stream name
        name: String,

        /// Target time in milliseconds
        time_ms: u32,
    },
    /// Delete a finished replay
    Delete {
        /// Stream name
        name: String,
    },
    /// Follow a replay's main stream until it is finalized
    Tail {
        /// Stream name
        name: String,

        /// Poll interval, overriding playback.poll_interval
        #[arg(long, value_parser = parse_millis)]
        interval_ms: Option<Duration>,
    },
    /// Version information
    Version,
}

fn parse_millis(value: &str) -> std::result::Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| format!("invalid milliseconds '{}': {}", value, e))
}

fn load_config(cli: &Cli) -> Result<ReplayConfig> {
    let mut config = match &cli.config {
        Some(path) => ReplayConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ReplayConfig::load()?,
    };

    if let Some(root) = &cli.root {
        config.store = StoreConfig::File {
            root_dir: root.clone(),
        };
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("replaykit {}", env!("CARGO_PKG_VERSION"));
        println!("replaykit-core {}", replaykit_core::VERSION);
        return Ok(());
    }

    let config = load_config(&cli)?;
    if config.store == StoreConfig::Memory {
        tracing::warn!("In-memory store selected; nothing persists between invocations");
    }
    let factory = ReplayStreamerFactory::from_replay_config(&config)?;

    match cli.command {
        Commands::List {
            network_version,
            changelist,
            user,
            json,
        } => {
            let filter = ReplayVersion::new(
                network_version.unwrap_or(config.version.network_version),
                changelist.unwrap_or(config.version.changelist),
            );
            list(&factory, &filter, user.as_deref(), json)?;
        }
        Commands::Info { name } => info(&factory, &name)?,
        Commands::Seek { name, time_ms } => seek(&factory, &name, time_ms)?,
        Commands::Delete { name } => {
            if factory.store().find(&name)?.is_none() {
                bail!("replay '{}' not found", name);
            }
            if !factory.store().delete(&name)? {
                bail!("replay '{}' is still being recorded", name);
            }
            println!("Deleted {}", name);
        }
        Commands::Tail { name, interval_ms } => {
            let interval = interval_ms.unwrap_or(config.playback.poll_interval);
            let mut streamer = factory.create_streamer();
            streamer.start_streaming(StartStreamingRequest::playback(&name))?;

            let mut stdout = std::io::stdout();
            tokio::select! {
                result = follow(streamer.as_mut(), interval, &mut stdout) => {
                    let total = result?;
                    tracing::info!(stream = %name, bytes = total, "Replay finalized");
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(stream = %name, "Interrupted");
                }
            }
            streamer.stop_streaming()?;
        }
        Commands::Version => {}
    }

    Ok(())
}

fn list(
    factory: &ReplayStreamerFactory,
    filter: &ReplayVersion,
    user: Option<&str>,
    json: bool,
) -> Result<()> {
    let infos = factory.store().enumerate(filter, user)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    if infos.is_empty() {
        println!("No replays found");
        return Ok(());
    }

    println!(
        "{:<40} {:>10} {:>12} {:>8} {:>10}  {}",
        "NAME", "LENGTH_MS", "SIZE", "NETVER", "CHANGELIST", "RECORDED"
    );
    for info in infos {
        println!(
            "{:<40} {:>10} {:>12} {:>8} {:>10}  {}{}",
            info.name,
            info.length_in_ms,
            info.size_in_bytes,
            info.version.network_version,
            info.version.changelist,
            info.timestamp.format("%Y-%m-%d %H:%M:%S"),
            if info.is_live { " (live)" } else { "" }
        );
    }
    Ok(())
}

fn info(factory: &ReplayStreamerFactory, name: &str) -> Result<()> {
    let store = factory.store();
    let Some(info) = store.find(name)? else {
        bail!("replay '{}' not found", name);
    };
    let checkpoints = store.checkpoints(name)?;

    println!("Name:          {}", info.name);
    println!("Friendly name: {}", info.friendly_name);
    println!("Recorded:      {}", info.timestamp.to_rfc3339());
    println!("Live:          {}", info.is_live);
    println!("Length:        {} ms", info.length_in_ms);
    println!("Size:          {} bytes", info.size_in_bytes);
    println!(
        "Version:       network {} / changelist {}",
        info.version.network_version, info.version.changelist
    );
    if !info.user_names.is_empty() {
        println!("Users:         {}", info.user_names.join(", "));
    }

    println!("Checkpoints:   {}", checkpoints.len());
    for (index, entry) in checkpoints.entries().iter().enumerate() {
        println!(
            "  #{:<4} {:>10} ms  offset {}",
            index, entry.timestamp_ms, entry.byte_offset
        );
    }
    Ok(())
}

fn seek(factory: &ReplayStreamerFactory, name: &str, time_ms: u32) -> Result<()> {
    let mut streamer = factory.create_streamer();
    streamer.start_streaming(StartStreamingRequest::playback(name))?;
    let ready = streamer.goto_time_in_ms(time_ms)?;
    streamer.stop_streaming()?;

    let checkpoint = match ready.target {
        SeekTarget::StreamStart => "stream start".to_string(),
        SeekTarget::Checkpoint(index) => format!("checkpoint #{}", index),
    };
    println!(
        "{} ms -> {} at offset {}, fast-forward {} ms",
        time_ms,
        checkpoint,
        ready.byte_offset,
        ready.residual_ms.unwrap_or(0)
    );
    Ok(())
}

/// Copy newly available main-stream bytes to `out` until the replay is finalized
/// and fully read. Returns the number of bytes copied.
async fn follow(
    streamer: &mut dyn ReplayStreamer,
    interval: Duration,
    out: &mut dyn Write,
) -> Result<u64> {
    let mut ticker = tokio::time::interval(interval);
    let mut total = 0u64;

    loop {
        ticker.tick().await;

        // Sample liveness before reading so bytes written just before finalize are not lost
        let live = streamer.is_live();
        if streamer.is_data_available() {
            let bytes = streamer.streaming_archive()?.read_remaining()?;
            out.write_all(&bytes)?;
            out.flush()?;
            total += bytes.len() as u64;
            tracing::debug!(bytes = bytes.len(), total, "Read new data");
        }

        if !live && !streamer.is_data_available() {
            return Ok(total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_follow_reads_finished_replay() {
        let factory = ReplayStreamerFactory::in_memory();
        let mut recorder = factory.create_streamer();
        recorder
            .start_streaming(StartStreamingRequest::record("done"))
            .unwrap();
        recorder
            .streaming_archive()
            .unwrap()
            .write_all(b"abcdef")
            .unwrap();
        recorder.stop_streaming().unwrap();

        let mut player = factory.create_streamer();
        player
            .start_streaming(StartStreamingRequest::playback("done"))
            .unwrap();

        let mut out = Vec::new();
        let total = follow(player.as_mut(), Duration::from_millis(1), &mut out)
            .await
            .unwrap();
        assert_eq!(total, 6);
        assert_eq!(out, b"abcdef");
    }

    #[tokio::test]
    async fn test_follow_waits_for_live_replay() {
        let dir = tempfile::TempDir::new().unwrap();
        let factory = ReplayStreamerFactory::file(dir.path()).unwrap();

        let mut recorder = factory.create_streamer();
        recorder
            .start_streaming(StartStreamingRequest::record("live"))
            .unwrap();
        recorder
            .streaming_archive()
            .unwrap()
            .write_all(b"first")
            .unwrap();
        recorder.flush_checkpoint(10).unwrap();

        let mut player = factory.create_streamer();
        player
            .start_streaming(StartStreamingRequest::playback("live"))
            .unwrap();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            recorder
                .streaming_archive()
                .unwrap()
                .write_all(b"-second")
                .unwrap();
            recorder.stop_streaming().unwrap();
        });

        let mut out = Vec::new();
        let total = follow(player.as_mut(), Duration::from_millis(5), &mut out)
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(total, 12);
        assert_eq!(out, b"first-second");
    }

    #[test]
    fn test_cli_parses_global_root() {
        let cli = Cli::try_parse_from(["replaykit", "seek", "match", "1500", "--root", "/tmp/demos"])
            .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/demos")));
        assert!(matches!(
            cli.command,
            Commands::Seek { ref name, time_ms: 1500 } if name == "match"
        ));
    }

    #[test]
    fn test_cli_parses_list_user() {
        let cli = Cli::try_parse_from(["replaykit", "list", "--user", "alice"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List { user: Some(ref user), json: false, .. } if user == "alice"
        ));
    }
}
