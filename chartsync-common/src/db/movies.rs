//! Movie catalog persistence
//!
//! A Movie is identified by its normalized `censored_id`. Movies are created
//! as stubs by the resolver on first sighting and enriched opportunistically;
//! the pipeline never deletes them.

use crate::Result;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Movie catalog record
#[derive(Debug, Clone, PartialEq)]
pub struct Movie {
    pub guid: Uuid,
    /// Normalized identifier, the sole resolution key
    pub censored_id: String,
    pub serial_number: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub length_minutes: Option<i64>,
    pub score: Option<f64>,
    /// Set once a verified local copy exists
    pub have_file: bool,
}

impl Movie {
    /// Create a stub movie with only the identifier populated
    pub fn stub(censored_id: String) -> Self {
        Self {
            guid: Uuid::new_v4(),
            censored_id,
            serial_number: None,
            name: None,
            release_date: None,
            length_minutes: None,
            score: None,
            have_file: false,
        }
    }
}

/// Richer attributes that may arrive after the stub was created
#[derive(Debug, Clone, Default)]
pub struct MovieDetails {
    pub serial_number: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub length_minutes: Option<i64>,
    pub score: Option<f64>,
}

/// Save movie, keyed by censored_id
///
/// On conflict the existing row keeps its guid; attribute columns take the
/// incoming values. Used by the resolver for stub creation, where a concurrent
/// insert of the same identifier must converge on one row.
pub async fn save_movie(pool: &SqlitePool, movie: &Movie) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO movies (
            guid, censored_id, serial_number, name, release_date,
            length_minutes, score, have_file, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(censored_id) DO UPDATE SET
            serial_number = COALESCE(excluded.serial_number, serial_number),
            name = COALESCE(excluded.name, name),
            release_date = COALESCE(excluded.release_date, release_date),
            length_minutes = COALESCE(excluded.length_minutes, length_minutes),
            score = COALESCE(excluded.score, score),
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(movie.guid.to_string())
    .bind(&movie.censored_id)
    .bind(&movie.serial_number)
    .bind(&movie.name)
    .bind(movie.release_date.map(|d| d.to_string()))
    .bind(movie.length_minutes)
    .bind(movie.score)
    .bind(movie.have_file as i64)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load movie by normalized censored_id
pub async fn find_by_censored_id(pool: &SqlitePool, censored_id: &str) -> Result<Option<Movie>> {
    let row = sqlx::query(
        r#"
        SELECT guid, censored_id, serial_number, name, release_date,
               length_minutes, score, have_file
        FROM movies
        WHERE censored_id = ?
        "#,
    )
    .bind(censored_id)
    .fetch_optional(pool)
    .await?;

    row.map(movie_from_row).transpose()
}

/// Load movie by primary key
pub async fn find_by_guid(pool: &SqlitePool, guid: Uuid) -> Result<Option<Movie>> {
    let row = sqlx::query(
        r#"
        SELECT guid, censored_id, serial_number, name, release_date,
               length_minutes, score, have_file
        FROM movies
        WHERE guid = ?
        "#,
    )
    .bind(guid.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(movie_from_row).transpose()
}

/// Opportunistically enrich a movie with richer attribute data
///
/// Only fills columns the incoming details actually carry; existing non-null
/// values are never overwritten with nulls.
pub async fn update_details(pool: &SqlitePool, guid: Uuid, details: &MovieDetails) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE movies SET
            serial_number = COALESCE(?, serial_number),
            name = COALESCE(?, name),
            release_date = COALESCE(?, release_date),
            length_minutes = COALESCE(?, length_minutes),
            score = COALESCE(?, score),
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(&details.serial_number)
    .bind(&details.name)
    .bind(details.release_date.map(|d| d.to_string()))
    .bind(details.length_minutes)
    .bind(details.score)
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record whether a verified local copy of the movie exists
pub async fn set_have_file(pool: &SqlitePool, guid: Uuid, have_file: bool) -> Result<()> {
    sqlx::query(
        "UPDATE movies SET have_file = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(have_file as i64)
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

fn movie_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Movie> {
    let guid_str: String = row.get("guid");
    let release_date_str: Option<String> = row.get("release_date");
    let have_file: i64 = row.get("have_file");

    Ok(Movie {
        guid: Uuid::parse_str(&guid_str)
            .map_err(|e| crate::Error::Internal(format!("Bad movie guid: {}", e)))?,
        censored_id: row.get("censored_id"),
        serial_number: row.get("serial_number"),
        name: row.get("name"),
        release_date: release_date_str.and_then(|s| s.parse().ok()),
        length_minutes: row.get("length_minutes"),
        score: row.get("score"),
        have_file: have_file != 0,
    })
}
