//! Append-only ChartHistory persistence
//!
//! History rows capture *change*: the tracker appends one whenever a live
//! entry's observed rank/score/votes differ from the stored snapshot. Rows are
//! never updated or deleted.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Immutable snapshot of a chart entry at one observation
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub chart_id: Uuid,
    pub movie_id: Uuid,
    pub rank: i64,
    pub score: f64,
    pub votes: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Append one history record
pub async fn append_history(pool: &SqlitePool, record: &HistoryRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chart_history (chart_id, movie_id, rank, score, votes, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.chart_id.to_string())
    .bind(record.movie_id.to_string())
    .bind(record.rank)
    .bind(record.score)
    .bind(record.votes)
    .bind(record.recorded_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Count history rows for (chart, movie)
pub async fn count_history(pool: &SqlitePool, chart_id: Uuid, movie_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chart_history WHERE chart_id = ? AND movie_id = ?",
    )
    .bind(chart_id.to_string())
    .bind(movie_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Load the full history for (chart, movie), oldest first
pub async fn list_history(
    pool: &SqlitePool,
    chart_id: Uuid,
    movie_id: Uuid,
) -> Result<Vec<HistoryRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT chart_id, movie_id, rank, score, votes, recorded_at
        FROM chart_history
        WHERE chart_id = ? AND movie_id = ?
        ORDER BY recorded_at, id
        "#,
    )
    .bind(chart_id.to_string())
    .bind(movie_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let chart_str: String = row.get("chart_id");
            let movie_str: String = row.get("movie_id");
            let recorded_str: String = row.get("recorded_at");

            Ok(HistoryRecord {
                chart_id: Uuid::parse_str(&chart_str)
                    .map_err(|e| Error::Internal(format!("Bad chart id: {}", e)))?,
                movie_id: Uuid::parse_str(&movie_str)
                    .map_err(|e| Error::Internal(format!("Bad movie id: {}", e)))?,
                rank: row.get("rank"),
                score: row.get("score"),
                votes: row.get("votes"),
                recorded_at: DateTime::parse_from_rfc3339(&recorded_str)
                    .map_err(|e| Error::Internal(format!("Bad recorded_at: {}", e)))?
                    .with_timezone(&Utc),
            })
        })
        .collect()
}
