//! End-to-end training simulation test
//!
//! Simulates an async training loop that writes a checkpoint per epoch,
//! hands it to the archiver without waiting, and later resumes from the
//! latest archived epoch.

use anyhow::Result;
use archive_core::ArchiverConfig;
use std::path::Path;
use std::time::{Duration, Instant};
use tar_checkpoints::{extract, extract_strict, list_epochs, TarCheckpoints};
use tokio::time::sleep;

const EPOCHS: u64 = 25;

fn checkpoint_bytes(epoch: u64) -> Vec<u8> {
    format!("{epoch}.").repeat(50_000).into_bytes()
}

/// Simulates one training epoch and writes its checkpoint files
async fn train_epoch(run_dir: &Path, epoch: u64) -> Result<Vec<std::path::PathBuf>> {
    sleep(Duration::from_millis(2)).await;

    let model = run_dir.join("model.safetensors");
    let state = run_dir.join(format!("trainer_state_{epoch}.json"));
    tokio::fs::write(&model, checkpoint_bytes(epoch)).await?;
    tokio::fs::write(&state, format!("{{\"epoch\": {epoch}}}")).await?;
    Ok(vec![model, state])
}

#[tokio::test]
async fn test_training_run_archives_and_resumes() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let run_dir = tempfile::tempdir()?;
    let archive = run_dir.path().join("checkpoints.tar");
    let config = ArchiverConfig::new(&archive).with_sync_each_task(true);

    let mut archiver = TarCheckpoints::with_config(config);
    let sender = archiver.activate()?;

    for epoch in 0..EPOCHS {
        let files = train_epoch(run_dir.path(), epoch).await?;

        // model.safetensors is rewritten every epoch, so it must be moved
        // before the next epoch writes it again
        let start = Instant::now();
        sender.enqueue(epoch, files)?;
        assert!(start.elapsed() < Duration::from_millis(500), "enqueue blocked");

        while sender.pending() > 0 {
            sleep(Duration::from_millis(1)).await;
        }
    }

    let summary = archiver.finish_async().await?.expect("session was active");
    assert_eq!(summary.stats.tasks_archived, EPOCHS);
    assert_eq!(summary.stats.files_archived, EPOCHS * 2);

    // Resume from the latest epoch
    let listing = list_epochs(&archive)?;
    let (&latest, names) = listing.last_key_value().expect("archive has epochs");
    assert_eq!(latest, EPOCHS - 1);
    assert_eq!(names.len(), 2);

    let restore = run_dir.path().join("restore");
    let epoch_dir = extract_strict(&archive, latest, Some(restore.as_path()))?;
    let model = tokio::fs::read(epoch_dir.join("model.safetensors")).await?;
    assert_eq!(model, checkpoint_bytes(latest));

    // An epoch that never ran extracts to an empty directory
    let empty = extract(&archive, EPOCHS + 10, Some(restore.as_path()))?;
    assert!(empty.is_dir());
    assert_eq!(std::fs::read_dir(&empty)?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_producer_never_waits_for_archiving() -> Result<()> {
    let run_dir = tempfile::tempdir()?;
    let archive = run_dir.path().join("burst.tar");

    let mut archiver = TarCheckpoints::new(&archive);
    let sender = archiver.activate()?;

    // Distinct names so the producer can run ahead of the worker
    for epoch in 0..50u64 {
        let path = run_dir.path().join(format!("shard_{epoch}.bin"));
        tokio::fs::write(&path, vec![epoch as u8; 64 * 1024]).await?;
        sender.enqueue(epoch, [path])?;
    }

    let summary = archiver.finish_async().await?.expect("session was active");
    assert_eq!(summary.stats.files_archived, 50);
    assert_eq!(summary.stats.bytes_archived, 50 * 64 * 1024);
    assert_eq!(list_epochs(&archive)?.len(), 50);
    Ok(())
}
