//! Live ChartEntry persistence
//!
//! One live row per (chart, movie), enforced by a UNIQUE index. The row is
//! overwritten in place as ranks change; the audit trail lives in
//! `chart_history`, not here.

use crate::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Lifecycle of a live chart entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Passed filters in the most recent run that observed it
    Active,
    /// Observed in a recent run but failed the configured thresholds
    Filtered,
    /// Present in an earlier run, absent from the latest one
    Retired,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Filtered => "filtered",
            EntryStatus::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(EntryStatus::Active),
            "filtered" => Ok(EntryStatus::Filtered),
            "retired" => Ok(EntryStatus::Retired),
            other => Err(Error::InvalidInput(format!("Unknown entry status: {}", other))),
        }
    }
}

/// Current standing of one movie within one chart
#[derive(Debug, Clone, PartialEq)]
pub struct ChartEntry {
    pub guid: Uuid,
    pub chart_id: Uuid,
    pub movie_id: Uuid,
    pub rank: i64,
    pub score: f64,
    pub votes: i64,
    pub status: EntryStatus,
}

/// Load every entry row for (chart, movie)
///
/// The UNIQUE index makes more than one row impossible through this module;
/// callers that find several anyway are looking at an invariant violation and
/// decide for themselves how loudly to fail.
pub async fn find_live_entries(
    pool: &SqlitePool,
    chart_id: Uuid,
    movie_id: Uuid,
) -> Result<Vec<ChartEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, chart_id, movie_id, rank, score, votes, status
        FROM chart_entries
        WHERE chart_id = ? AND movie_id = ?
        "#,
    )
    .bind(chart_id.to_string())
    .bind(movie_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(entry_from_row).collect()
}

/// Load the live entry for (chart, movie), if any
///
/// Errors if the single-live-entry invariant is violated rather than silently
/// picking one row.
pub async fn get_live_entry(
    pool: &SqlitePool,
    chart_id: Uuid,
    movie_id: Uuid,
) -> Result<Option<ChartEntry>> {
    let mut rows = find_live_entries(pool, chart_id, movie_id).await?;

    if rows.len() > 1 {
        return Err(Error::Internal(format!(
            "Duplicate live chart entries for chart {} movie {}",
            chart_id, movie_id
        )));
    }

    Ok(rows.pop())
}

/// Overwrite (or create) the live entry for (chart, movie)
pub async fn upsert_live_entry(pool: &SqlitePool, entry: &ChartEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chart_entries (
            guid, chart_id, movie_id, rank, score, votes, status,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(chart_id, movie_id) DO UPDATE SET
            rank = excluded.rank,
            score = excluded.score,
            votes = excluded.votes,
            status = excluded.status,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(entry.guid.to_string())
    .bind(entry.chart_id.to_string())
    .bind(entry.movie_id.to_string())
    .bind(entry.rank)
    .bind(entry.score)
    .bind(entry.votes)
    .bind(entry.status.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Change only the status of an existing live entry
pub async fn set_entry_status(
    pool: &SqlitePool,
    chart_id: Uuid,
    movie_id: Uuid,
    status: EntryStatus,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE chart_entries
        SET status = ?, updated_at = CURRENT_TIMESTAMP
        WHERE chart_id = ? AND movie_id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(chart_id.to_string())
    .bind(movie_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// List movie ids with non-retired entries on a chart
///
/// The tracker diffs this against the movies seen in the current run to find
/// entries that should be retired.
pub async fn list_live_movie_ids(pool: &SqlitePool, chart_id: Uuid) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        "SELECT movie_id FROM chart_entries WHERE chart_id = ? AND status != 'retired'",
    )
    .bind(chart_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("movie_id");
            Uuid::parse_str(&id)
                .map_err(|e| Error::Internal(format!("Bad movie id in chart entry: {}", e)))
        })
        .collect()
}

/// List movie ids with `active` entries on a chart (gap-scan input)
pub async fn list_active_movie_ids(pool: &SqlitePool, chart_id: Uuid) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        "SELECT movie_id FROM chart_entries WHERE chart_id = ? AND status = 'active' ORDER BY rank",
    )
    .bind(chart_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("movie_id");
            Uuid::parse_str(&id)
                .map_err(|e| Error::Internal(format!("Bad movie id in chart entry: {}", e)))
        })
        .collect()
}

fn entry_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ChartEntry> {
    let guid_str: String = row.get("guid");
    let chart_str: String = row.get("chart_id");
    let movie_str: String = row.get("movie_id");
    let status_str: String = row.get("status");

    Ok(ChartEntry {
        guid: Uuid::parse_str(&guid_str)
            .map_err(|e| Error::Internal(format!("Bad entry guid: {}", e)))?,
        chart_id: Uuid::parse_str(&chart_str)
            .map_err(|e| Error::Internal(format!("Bad chart id: {}", e)))?,
        movie_id: Uuid::parse_str(&movie_str)
            .map_err(|e| Error::Internal(format!("Bad movie id: {}", e)))?,
        rank: row.get("rank"),
        score: row.get("score"),
        votes: row.get("votes"),
        status: EntryStatus::parse(&status_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{charts, create_tables, movies};

    async fn fixture() -> (SqlitePool, Uuid, Uuid) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_tables(&pool).await.unwrap();

        let chart_type = charts::ensure_chart_type(&pool, "top-n", "").await.unwrap();
        let chart = charts::ensure_chart(&pool, "weekly", "", chart_type.guid)
            .await
            .unwrap();
        let movie = movies::Movie::stub("ABC-001".to_string());
        movies::save_movie(&pool, &movie).await.unwrap();

        (pool, chart.guid, movie.guid)
    }

    fn entry(chart_id: Uuid, movie_id: Uuid, rank: i64) -> ChartEntry {
        ChartEntry {
            guid: Uuid::new_v4(),
            chart_id,
            movie_id,
            rank,
            score: 4.0,
            votes: 300,
            status: EntryStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_live_row() {
        let (pool, chart_id, movie_id) = fixture().await;

        upsert_live_entry(&pool, &entry(chart_id, movie_id, 1)).await.unwrap();
        upsert_live_entry(&pool, &entry(chart_id, movie_id, 2)).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chart_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let live = get_live_entry(&pool, chart_id, movie_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.rank, 2);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let (pool, chart_id, movie_id) = fixture().await;
        upsert_live_entry(&pool, &entry(chart_id, movie_id, 1)).await.unwrap();

        set_entry_status(&pool, chart_id, movie_id, EntryStatus::Retired)
            .await
            .unwrap();

        let live = get_live_entry(&pool, chart_id, movie_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.status, EntryStatus::Retired);

        assert!(list_active_movie_ids(&pool, chart_id).await.unwrap().is_empty());
        assert!(list_live_movie_ids(&pool, chart_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_listing_ordered_by_rank() {
        let (pool, chart_id, movie_id) = fixture().await;
        let other = movies::Movie::stub("ABC-002".to_string());
        movies::save_movie(&pool, &other).await.unwrap();

        upsert_live_entry(&pool, &entry(chart_id, other.guid, 2)).await.unwrap();
        upsert_live_entry(&pool, &entry(chart_id, movie_id, 1)).await.unwrap();

        let active = list_active_movie_ids(&pool, chart_id).await.unwrap();
        assert_eq!(active, vec![movie_id, other.guid]);
    }
}
