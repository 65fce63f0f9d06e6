use anyhow::{Context, Result};

use crate::config::Config;
use crate::embedding;
use crate::index::{SqliteIndex, VectorIndex};
use crate::models::SearchHit;

const EXCERPT_CHARS: usize = 240;

/// `askpdf search`: print the passages closest to `query`.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let index = SqliteIndex::open(&config.index.path, config.embedding.batch_size)
        .await
        .with_context(|| format!("failed to open index at {}", config.index.path.display()))?;

    let k = limit.unwrap_or(config.retrieval.top_k);
    let hits = index.search(query, k, embedder.as_ref()).await?;
    index.close().await;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    match hit.page {
        Some(page) => println!("{}. [{:.2}] {} (page {})", rank, hit.score, hit.source, page),
        None => println!("{}. [{:.2}] {}", rank, hit.score, hit.source),
    }
    println!("    excerpt: \"{}\"", excerpt(&hit.content));
    println!();
}

fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}
