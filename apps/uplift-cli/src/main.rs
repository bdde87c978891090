//! Uplift command-line host.
//!
//! Thin shell over the engine facade: upload a file and watch it to
//! completion, list persisted uploads, or resume everything interrupted.

mod config;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing_subscriber::EnvFilter;

use uplift_engine::{HostSignal, Uploader, UploaderConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::CliConfig::load()?;
    tracing::info!(api_url = %config.api_url, "starting uplift");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: config::CliConfig) -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let uploader = Uploader::new(UploaderConfig {
        base_url: config.api_url,
        data_dir: config.data_dir,
        auto_resume_on_reload: config.auto_resume_on_reload,
        ..UploaderConfig::default()
    })?;
    let signal_loop = uploader.init().await;

    let result = match args.first().map(String::as_str) {
        Some("upload") => {
            let path = args.get(1).context("usage: uplift-cli upload <file>")?;
            upload(&uploader, Path::new(path)).await
        }
        Some("list") => {
            list(&uploader);
            Ok(())
        }
        Some("resume") => resume_all(&uploader).await,
        _ => {
            eprintln!("usage: uplift-cli <upload FILE | list | resume>");
            Ok(())
        }
    };

    uploader.shutdown();
    let _ = signal_loop.await;
    result
}

async fn upload(uploader: &Uploader, path: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no usable file name")?
        .to_string();

    let id = uploader
        .add_upload(&filename, "application/octet-stream", bytes)
        .await?;
    println!("registered {filename} as {id}");

    uploader.start_upload(&id).await?;
    watch(uploader, &id).await
}

/// Polls the record until it reaches a resting state, printing progress.
async fn watch(uploader: &Uploader, id: &str) -> anyhow::Result<()> {
    let mut last_percent = -1i64;
    loop {
        let Some(record) = uploader.get_upload(id) else {
            bail!("upload {id} disappeared");
        };

        let percent = record.progress as i64;
        if percent != last_percent {
            println!(
                "{}: {percent}% ({}/{} chunks)",
                record.filename,
                record.uploaded_chunks.len(),
                record.total_chunks
            );
            last_percent = percent;
        }

        match record.status {
            uplift_engine::UploadStatus::Completed => {
                println!("{} uploaded", record.filename);
                return Ok(());
            }
            uplift_engine::UploadStatus::Failed => {
                bail!(
                    "upload failed: {}",
                    record.last_error.unwrap_or_else(|| "unknown error".into())
                );
            }
            uplift_engine::UploadStatus::Canceled => bail!("upload canceled"),
            uplift_engine::UploadStatus::Paused => {
                bail!(
                    "upload paused: {}",
                    record
                        .last_error
                        .unwrap_or_else(|| "paused externally".into())
                );
            }
            _ => {}
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn list(uploader: &Uploader) {
    let uploads = uploader.get_uploads();
    if uploads.is_empty() {
        println!("no uploads");
        return;
    }
    for record in uploads {
        println!(
            "{}  {}  {}  {:.1}%{}",
            record.upload_id,
            record.filename,
            record.status,
            record.progress,
            record
                .last_error
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }
}

/// Kicks every interrupted upload and waits for the engine to settle.
async fn resume_all(uploader: &Uploader) -> anyhow::Result<()> {
    uploader
        .signal_sender()
        .send(HostSignal::Online)
        .await
        .ok();

    loop {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let uploads = uploader.get_uploads();
        let busy = uploads.iter().any(|r| {
            matches!(
                r.status,
                uplift_engine::UploadStatus::Uploading | uplift_engine::UploadStatus::Pending
            )
        });
        if !busy {
            list(uploader);
            return Ok(());
        }
    }
}
