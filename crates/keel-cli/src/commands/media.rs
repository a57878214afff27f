//! Media upload command.

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use keel_media::StorageSelector;
use keel_media::paths::cover_image_path;
use std::path::Path;
use uuid::Uuid;

/// Upload a file through the media storage selected from the environment.
pub async fn upload(file: &Path, dest: Option<String>) -> Result<()> {
    let storage = StorageSelector::new()
        .select_from_env()
        .context("Failed to select media storage")?;

    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let dest = match dest {
        Some(dest) => dest,
        None => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("File name is not valid UTF-8")?;
            cover_image_path(&Uuid::new_v4().to_string(), Utc::now(), filename)
        }
    };

    println!("Uploading {} via {} storage", file.display(), storage.name());
    let url = storage
        .upload(&dest, Bytes::from(data))
        .await
        .with_context(|| format!("Failed to upload {}", file.display()))?;
    println!("✓ {}", url);
    Ok(())
}
