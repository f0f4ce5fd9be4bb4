//! Following a replay while it is still being recorded

use std::io::{Read, Write};

use replaykit_core::prelude::*;
use tempfile::TempDir;

fn follow_live_recording(factory: &ReplayStreamerFactory) {
    let mut recorder = factory.create_streamer();
    recorder
        .start_streaming(StartStreamingRequest::record("live"))
        .unwrap();
    recorder
        .streaming_archive()
        .unwrap()
        .write_all(&[7u8; 8])
        .unwrap();
    recorder.flush_checkpoint(100).unwrap();

    let mut player = factory.create_streamer();
    player
        .start_streaming(StartStreamingRequest::playback("live"))
        .unwrap();
    assert!(player.is_live());
    assert!(player.is_data_available());

    let mut first = [0u8; 8];
    player
        .streaming_archive()
        .unwrap()
        .read_exact(&mut first)
        .unwrap();
    assert!(!player.is_data_available());

    // Bytes and checkpoints flushed after playback started become visible
    recorder
        .streaming_archive()
        .unwrap()
        .write_all(&[8u8; 4])
        .unwrap();
    recorder.flush_checkpoint(300).unwrap();
    assert!(player.is_data_available());

    let ready = player.goto_time_in_ms(350).unwrap();
    assert_eq!(ready.target, SeekTarget::Checkpoint(1));
    assert_eq!(ready.byte_offset, 12);
    assert_eq!(ready.residual_ms, Some(50));

    recorder.stop_streaming().unwrap();
    assert!(!player.is_live());
    player.stop_streaming().unwrap();
}

#[test]
fn test_follow_live_recording_in_memory() {
    follow_live_recording(&ReplayStreamerFactory::in_memory());
}

#[test]
fn test_follow_live_recording_on_disk() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let factory = ReplayStreamerFactory::file(dir.path()).unwrap();
    follow_live_recording(&factory);
}

#[test]
fn test_live_viewer_reads_header_from_disk() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let factory = ReplayStreamerFactory::file(dir.path()).unwrap();

    let mut recorder = factory.create_streamer();
    recorder
        .start_streaming(StartStreamingRequest::record("live"))
        .unwrap();
    recorder.header_archive().unwrap().write_all(b"HEADER").unwrap();
    recorder
        .metadata_archive()
        .unwrap()
        .write_all(b"map=dm1")
        .unwrap();

    let read_header = || {
        let mut player = factory.create_streamer();
        player
            .start_streaming(StartStreamingRequest::playback("live"))
            .unwrap();
        assert!(player.is_live());
        let mut header = Vec::new();
        player
            .header_archive()
            .unwrap()
            .read_to_end(&mut header)
            .unwrap();
        header
    };

    // Writing the first packet pushes the header out
    recorder
        .streaming_archive()
        .unwrap()
        .write_all(&[1u8; 6])
        .unwrap();
    assert_eq!(read_header(), b"HEADER");

    recorder.flush_checkpoint(100).unwrap();
    assert_eq!(read_header(), b"HEADER");
    let partial = dir.path().join("live").join("live.metadata.partial");
    assert_eq!(std::fs::read(partial).unwrap(), b"map=dm1");

    recorder.stop_streaming().unwrap();
}

#[test]
fn test_file_store_hides_live_replays_from_listing() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let factory = ReplayStreamerFactory::file(dir.path()).unwrap();

    let mut recorder = factory.create_streamer();
    recorder
        .start_streaming(StartStreamingRequest::record("in-progress"))
        .unwrap();
    assert!(dir.path().join("in-progress").join("in-progress.header").exists());
    assert!(
        !dir.path()
            .join("in-progress")
            .join("in-progress.metadata")
            .exists()
    );

    let listed = factory.store().enumerate(&ReplayVersion::any(), None).unwrap();
    assert!(listed.is_empty());

    recorder.stop_streaming().unwrap();
    let listed = factory.store().enumerate(&ReplayVersion::any(), None).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(
        dir.path()
            .join("in-progress")
            .join("in-progress.metadata")
            .exists()
    );
}

#[test]
fn test_memory_store_lists_live_replays() {
    let factory = ReplayStreamerFactory::in_memory();
    let mut recorder = factory.create_streamer();
    recorder
        .start_streaming(StartStreamingRequest::record("in-progress"))
        .unwrap();

    let listed = factory.store().enumerate(&ReplayVersion::any(), None).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_live);
}
