//! End-to-end runs of the engine against real adapters where practical.

use super::engine::Engine;
use super::testing::{encoder, test_config, wait_for, ScriptedEncoder, ScriptedTransport};
use crate::adapters::local::{HttpTransport, LocalStore};
use crate::domain::{EncoderSpec, Source, TaskStatus, Video, VideoEvent, VideoState};
use crate::ports::repository::EntityStore;
use axum::{routing::get, Router};
use tempfile::tempdir;

fn mp4_720p() -> EncoderSpec {
    EncoderSpec {
        name: "mp4-720p".into(),
        extension: "mp4".into(),
        params: "-vcodec libx264 -s 1280x720".into(),
    }
}

#[tokio::test]
async fn test_local_source_encodes_to_deterministic_path() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("holiday.mov");
    tokio::fs::write(&source, b"raw frames").await.unwrap();
    let store = LocalStore::in_memory();

    let running = Engine::new(
        test_config(dir.path()),
        store.clone(),
        ScriptedEncoder::default(),
        ScriptedTransport::default(),
    )
    .start()
    .await
    .unwrap();

    let service = running.service();
    let enc = service.create_encoder(mp4_720p()).await.unwrap();
    let video = service
        .register_video(&source.to_string_lossy(), &enc.id)
        .await
        .unwrap();
    assert_eq!(video.state(), VideoState::Unencoded);

    let done = wait_for(&store, &video.id, VideoState::Complete).await;
    running.shutdown().await;

    let expected = enc.output_path(&dir.path().join("encoded"), &done.id);
    assert!(expected.is_file());
    let tasks = store.list_tasks_for_video(&done.id).await.unwrap();
    assert_eq!(
        tasks[0].status(),
        &TaskStatus::Complete {
            output_path: expected
        }
    );
    assert_eq!(done.error(), None);
}

#[tokio::test]
async fn test_remote_source_downloads_then_encodes() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let origin = Router::new().route("/media/talk.mov", get(|| async { "remote frames" }));
    tokio::spawn(async move {
        axum::serve(listener, origin).await.unwrap();
    });

    let dir = tempdir().unwrap();
    let store = LocalStore::in_memory();
    let running = Engine::new(
        test_config(dir.path()),
        store.clone(),
        ScriptedEncoder::default(),
        HttpTransport::default(),
    )
    .start()
    .await
    .unwrap();

    let service = running.service();
    let enc = service.create_encoder(mp4_720p()).await.unwrap();
    let video = service
        .register_video(&format!("http://{addr}/media/talk.mov"), &enc.id)
        .await
        .unwrap();
    assert_eq!(video.state(), VideoState::WaitingForDownload);

    let done = wait_for(&store, &video.id, VideoState::Complete).await;
    running.shutdown().await;

    let local = done.source().local_path().unwrap().to_path_buf();
    assert!(local.starts_with(dir.path().join("downloads")));
    assert_eq!(tokio::fs::read(&local).await.unwrap(), b"remote frames");
    assert!(enc
        .output_path(&dir.path().join("encoded"), &done.id)
        .is_file());
}

#[tokio::test]
async fn test_restart_recovers_interrupted_encode() {
    let dir = tempdir().unwrap();
    let snapshot = dir.path().join("state").join("enigma.json");
    let source = dir.path().join("lecture.mov");
    tokio::fs::write(&source, b"raw frames").await.unwrap();

    // A previous process claimed the video and died mid-encode.
    let video_id = {
        let store = LocalStore::open(&snapshot).unwrap();
        let enc = encoder("mp4-720p");
        store.create_encoder(&enc).await.unwrap();
        let mut video = Video::new(Source::Local(source.clone()), &enc.id);
        store
            .create_task(&crate::domain::EncodingTask::new(&video.id, &enc.id))
            .await
            .unwrap();
        store.create_video(&video).await.unwrap();
        video.apply(VideoEvent::StartEncode).unwrap();
        store
            .update_video(&video, VideoState::Unencoded)
            .await
            .unwrap();
        video.id
    };

    let store = LocalStore::open(&snapshot).unwrap();
    assert_eq!(
        store.get_video(&video_id).await.unwrap().state(),
        VideoState::Encoding
    );

    let mut config = test_config(dir.path());
    config.store_path = Some(snapshot.clone());
    let running = Engine::new(
        config,
        store.clone(),
        ScriptedEncoder::default(),
        ScriptedTransport::default(),
    )
    .start()
    .await
    .unwrap();

    assert_eq!(running.recovery_report().encodes_reset, 1);
    assert_eq!(running.recovery_report().downloads_reset, 0);

    wait_for(&store, &video_id, VideoState::Complete).await;
    running.shutdown().await;

    let reopened = LocalStore::open(&snapshot).unwrap();
    assert_eq!(
        reopened.get_video(&video_id).await.unwrap().state(),
        VideoState::Complete
    );
}
