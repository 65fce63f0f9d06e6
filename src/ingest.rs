//! `askpdf ingest`: index local files without going through HTTP.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::Config;
use crate::qa::QaService;

pub async fn run_ingest(config: &Config, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        bail!("no files given");
    }

    let service = QaService::from_config(config).await?;

    let batch: Vec<(String, PathBuf)> = files
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            (name, path.clone())
        })
        .collect();

    let statuses = service.ingest_batch(&batch).await;

    println!("ingest");
    let mut failed = 0;
    for status in &statuses {
        match (status.chunks, &status.error) {
            (Some(chunks), _) => println!(
                "  {}: {} ({} chunks)",
                status.filename, status.status, chunks
            ),
            (None, Some(err)) => {
                failed += 1;
                println!("  {}: {} ({})", status.filename, status.status, err);
            }
            (None, None) => println!("  {}: {}", status.filename, status.status),
        }
    }
    println!("  indexed entries: {}", service.index().count().await?);

    if failed > 0 {
        bail!("{} of {} files failed", failed, statuses.len());
    }
    println!("ok");
    Ok(())
}
