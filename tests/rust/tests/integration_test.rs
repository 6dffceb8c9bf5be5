use anyhow::Result;
use archive_core::{ArchiverConfig, Error};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar_checkpoints::{extract, list_epochs, TarCheckpoints};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}

// Archive members in order, with their content
fn read_members(archive: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = tar::Archive::new(File::open(archive)?);
    let mut members = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        members.push((name, content));
    }
    Ok(members)
}

#[test]
fn test_three_epochs_then_extract_one() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("my_tar_file.tar");

    let mut archiver = TarCheckpoints::new(&archive);
    let sender = archiver.activate()?;
    for epoch in 0..3u64 {
        let content = epoch.to_string().repeat(1000);
        let path = write_file(dir.path(), &format!("file_{epoch}.txt"), content.as_bytes())?;
        sender.enqueue(epoch, [path])?;
    }
    archiver.deactivate()?;

    let out = dir.path().join("restore");
    let epoch_dir = extract(&archive, 1, Some(out.as_path()))?;

    let files: Vec<_> = std::fs::read_dir(&epoch_dir)?.collect::<std::io::Result<_>>()?;
    assert_eq!(files.len(), 1);
    let restored = std::fs::read_to_string(epoch_dir.join("file_1.txt"))?;
    assert_eq!(restored, "1".repeat(1000));
    Ok(())
}

#[test]
fn test_no_data_loss() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("run.tar");

    let mut expected = Vec::new();
    let mut sources = Vec::new();

    let mut archiver = TarCheckpoints::new(&archive);
    let sender = archiver.activate()?;
    for epoch in 0..10u64 {
        let model: Vec<u8> = (0..4096u32).map(|i| (i as u64 * 31 + epoch) as u8).collect();
        let optim = format!("optimizer state {epoch}").into_bytes();
        let a = write_file(dir.path(), &format!("model_{epoch}.bin"), &model)?;
        let b = write_file(dir.path(), &format!("optim_{epoch}.bin"), &optim)?;

        expected.push((format!("{epoch:05}/model_{epoch}.bin"), model));
        expected.push((format!("{epoch:05}/optim_{epoch}.bin"), optim));
        sources.push(a.clone());
        sources.push(b.clone());

        sender.enqueue(epoch, [a, b])?;
    }
    let summary = archiver.deactivate()?.expect("session was active");

    assert_eq!(summary.stats.tasks_archived, 10);
    assert_eq!(summary.stats.files_archived, 20);
    assert_eq!(read_members(&archive)?, expected);
    for source in sources {
        assert!(!source.exists(), "{} was not removed", source.display());
    }
    Ok(())
}

#[test]
fn test_same_epoch_tasks_keep_queue_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("run.tar");

    let mut archiver = TarCheckpoints::new(&archive);
    let sender = archiver.activate()?;
    let first = write_file(dir.path(), "b_first.bin", b"1")?;
    let second = write_file(dir.path(), "a_second.bin", b"2")?;
    sender.enqueue(5, [first])?;
    sender.enqueue(5, [second])?;
    archiver.deactivate()?;

    let names: Vec<_> = read_members(&archive)?.into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["00005/b_first.bin", "00005/a_second.bin"]);
    Ok(())
}

#[test]
fn test_same_basename_across_epochs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("run.tar");

    let mut archiver = TarCheckpoints::new(&archive);
    let sender = archiver.activate()?;
    for epoch in 0..2u64 {
        let path = write_file(dir.path(), "checkpoint.pt", format!("epoch {epoch}").as_bytes())?;
        sender.enqueue(epoch, [path])?;
        // Wait for the file to be moved before reusing its name
        while sender.pending() > 0 {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
    archiver.deactivate()?;

    let members = read_members(&archive)?;
    assert_eq!(members.len(), 2);
    assert_eq!(members[0], ("00000/checkpoint.pt".to_string(), b"epoch 0".to_vec()));
    assert_eq!(members[1], ("00001/checkpoint.pt".to_string(), b"epoch 1".to_vec()));
    Ok(())
}

#[test]
fn test_second_session_appends() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("run.tar");

    for epoch in 0..4u64 {
        let mut archiver = TarCheckpoints::new(&archive);
        let sender = archiver.activate()?;
        let path = write_file(dir.path(), &format!("e{epoch}.bin"), &[epoch as u8; 700])?;
        sender.enqueue(epoch, [path])?;
        archiver.deactivate()?;
    }

    let listing = list_epochs(&archive)?;
    assert_eq!(listing.len(), 4);
    for (epoch, names) in &listing {
        assert_eq!(names, &vec![format!("{epoch:05}/e{epoch}.bin")]);
    }
    Ok(())
}

#[test]
fn test_scope_drains_when_body_fails() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("run.tar");
    let mut sources = Vec::new();

    let result: std::result::Result<(), Error> =
        TarCheckpoints::scope(ArchiverConfig::new(&archive), |sender| {
            for epoch in 0..20u64 {
                let path = dir.path().join(format!("e{epoch}.bin"));
                std::fs::write(&path, vec![1u8; 10_000])?;
                sources.push(path.clone());
                sender.enqueue(epoch, [path])?;
            }
            Err(Error::InvalidTask {
                message: "loss is NaN".to_string(),
            })
        });

    assert!(matches!(result, Err(Error::InvalidTask { .. })));
    assert!(sources.iter().all(|s| !s.exists()));
    assert_eq!(list_epochs(&archive)?.len(), 20);
    Ok(())
}

#[test]
fn test_drop_drains_when_body_panics() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("run.tar");
    let src = write_file(dir.path(), "model.bin", b"weights")?;

    let archive_clone = archive.clone();
    let src_clone = src.clone();
    let outcome = std::panic::catch_unwind(move || {
        let mut archiver = TarCheckpoints::new(&archive_clone);
        let sender = archiver.activate().unwrap();
        sender.enqueue(0, [&src_clone]).unwrap();
        panic!("training crashed");
    });

    assert!(outcome.is_err());
    assert!(!src.exists());
    assert_eq!(list_epochs(&archive)?[&0u64], vec!["00000/model.bin".to_string()]);
    Ok(())
}

#[test]
fn test_unopenable_archive_fails_activation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = write_file(dir.path(), "broken.tar", &[0x5Au8; 4096])?;

    let mut archiver = TarCheckpoints::new(&archive);
    let result = archiver.activate();
    assert!(matches!(result, Err(Error::Archive { .. })));
    assert!(!archiver.is_active());
    Ok(())
}
