//! Demo binary entry point
//!
//! Writes one large text file per epoch, archives them in the background and
//! extracts a single epoch at the end.
//!
//! Usage: `tar-checkpoints-demo [archive] [epochs] [extract-epoch]`

use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tar_checkpoints::{extract, TarCheckpoints};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tar_checkpoints=info,archive_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let archive_path = PathBuf::from(args.next().unwrap_or_else(|| "my_tar_file.tar".to_string()));
    let epochs: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(100);
    let extract_epoch: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(42);

    let mut archiver = TarCheckpoints::new(&archive_path);
    let sender = archiver.activate()?;

    for epoch in 0..epochs {
        let path = PathBuf::from(format!("file_{}.txt", epoch));
        tracing::info!("Writing file {}", path.display());

        let line = vec![epoch.to_string(); 1000].join(".");
        std::fs::write(&path, line.repeat(1000))?;

        // Returns immediately; the worker thread does the archiving
        sender.enqueue(epoch, [path])?;
    }

    // Blocks until every file is in the archive
    if let Some(summary) = archiver.deactivate()? {
        tracing::info!(
            files = summary.stats.files_archived,
            size_bytes = summary.stats.bytes_archived,
            "Archive complete"
        );
    }

    let extracted = extract(&archive_path, extract_epoch, None)?;
    println!("Your checkpoint has been extracted to `{}`", extracted.display());

    Ok(())
}
