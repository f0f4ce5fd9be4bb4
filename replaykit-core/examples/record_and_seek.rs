//! Record a short replay to disk and seek around in it

use std::io::{Read, Write};

use replaykit_core::prelude::*;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,replaykit_core=debug")),
        )
        .init();

    let root = std::env::temp_dir().join("replaykit-example");
    let factory = ReplayStreamerFactory::file(&root)?.with_name_prefix("example");

    // One packet per 50ms, a checkpoint every 200ms
    let mut recorder = factory.create_streamer();
    let name = recorder.start_streaming(
        StartStreamingRequest::record("")
            .with_friendly_name("Example match")
            .with_user_names(vec!["player1".to_string()]),
    )?;
    recorder.header_archive()?.write_all(b"example header v1")?;

    for tick in 0u32..20 {
        let time_ms = tick * 50;
        if time_ms > 0 && time_ms % 200 == 0 {
            recorder
                .checkpoint_archive()?
                .write_all(format!("tick={}", tick).as_bytes())?;
            recorder.flush_checkpoint(time_ms)?;
        }
        recorder
            .streaming_archive()?
            .write_all(&time_ms.to_le_bytes())?;
        recorder.update_total_demo_time(time_ms)?;
    }
    recorder.stop_streaming()?;

    tracing::info!(stream = %name, "Recorded replay");

    let mut player = factory.create_streamer();
    player.start_streaming(StartStreamingRequest::playback(&name))?;

    for target_ms in [0, 130, 420, 950] {
        let ready = player.goto_time_in_ms(target_ms)?;

        let mut snapshot = String::new();
        player.checkpoint_archive()?.read_to_string(&mut snapshot)?;

        let mut packet = [0u8; 4];
        player.streaming_archive()?.read_exact(&mut packet)?;

        tracing::info!(
            target_ms,
            checkpoint = ?ready.target,
            residual_ms = ?ready.residual_ms,
            snapshot = %snapshot,
            first_packet_ms = u32::from_le_bytes(packet),
            "Seek resolved"
        );
    }
    player.stop_streaming()?;

    for info in factory.store().enumerate(&ReplayVersion::any(), None)? {
        tracing::info!(
            stream = %info.name,
            friendly_name = %info.friendly_name,
            length_ms = info.length_in_ms,
            size = info.size_in_bytes,
            "Stored replay"
        );
    }

    if factory.store().delete(&name)? {
        tracing::info!(stream = %name, "Deleted replay");
    }

    Ok(())
}
