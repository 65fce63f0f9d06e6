use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{QaError, Result};

/// Open (creating if needed) the SQLite database inside `dir`.
///
/// WAL mode lets concurrent searches proceed while an upload is being
/// written; the busy timeout covers two uploads committing at once.
pub async fn connect(dir: &Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(dir).map_err(|e| {
        QaError::IndexUnavailable(format!("cannot create {}: {}", dir.display(), e))
    })?;

    let db_path = dir.join("index.sqlite");
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
