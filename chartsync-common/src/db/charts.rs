//! Chart and ChartType persistence
//!
//! A Chart is one externally sourced ranking feed and belongs to exactly one
//! ChartType. Charts are immutable after creation except for `description`.

use crate::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Chart category (e.g. "top-n", "by-actor")
#[derive(Debug, Clone)]
pub struct ChartType {
    pub guid: Uuid,
    pub name: String,
    pub description: String,
}

/// One named ranking source instance
#[derive(Debug, Clone)]
pub struct Chart {
    pub guid: Uuid,
    pub name: String,
    pub description: String,
    pub chart_type_id: Uuid,
}

/// Load a chart type by name, creating it if absent
pub async fn ensure_chart_type(
    pool: &SqlitePool,
    name: &str,
    description: &str,
) -> Result<ChartType> {
    if let Some(existing) = find_chart_type_by_name(pool, name).await? {
        return Ok(existing);
    }

    let chart_type = ChartType {
        guid: Uuid::new_v4(),
        name: name.to_string(),
        description: description.to_string(),
    };

    sqlx::query(
        "INSERT INTO chart_types (guid, name, description) VALUES (?, ?, ?)
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(chart_type.guid.to_string())
    .bind(&chart_type.name)
    .bind(&chart_type.description)
    .execute(pool)
    .await?;

    // A concurrent creator may have won the insert; read back the winner
    find_chart_type_by_name(pool, name)
        .await?
        .ok_or_else(|| crate::Error::Internal(format!("Chart type {} vanished", name)))
}

async fn find_chart_type_by_name(pool: &SqlitePool, name: &str) -> Result<Option<ChartType>> {
    let row = sqlx::query("SELECT guid, name, description FROM chart_types WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let guid_str: String = row.get("guid");
            Ok(Some(ChartType {
                guid: Uuid::parse_str(&guid_str)
                    .map_err(|e| crate::Error::Internal(format!("Bad chart type guid: {}", e)))?,
                name: row.get("name"),
                description: row.get("description"),
            }))
        }
        None => Ok(None),
    }
}

/// Load a chart by name, creating it under the given type if absent
pub async fn ensure_chart(
    pool: &SqlitePool,
    name: &str,
    description: &str,
    chart_type_id: Uuid,
) -> Result<Chart> {
    if let Some(existing) = find_chart_by_name(pool, name).await? {
        return Ok(existing);
    }

    let chart = Chart {
        guid: Uuid::new_v4(),
        name: name.to_string(),
        description: description.to_string(),
        chart_type_id,
    };

    sqlx::query(
        "INSERT INTO charts (guid, name, description, chart_type_id) VALUES (?, ?, ?, ?)
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(chart.guid.to_string())
    .bind(&chart.name)
    .bind(&chart.description)
    .bind(chart.chart_type_id.to_string())
    .execute(pool)
    .await?;

    find_chart_by_name(pool, name)
        .await?
        .ok_or_else(|| crate::Error::Internal(format!("Chart {} vanished", name)))
}

/// Load chart by name
pub async fn find_chart_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Chart>> {
    let row = sqlx::query(
        "SELECT guid, name, description, chart_type_id FROM charts WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let guid_str: String = row.get("guid");
            let type_str: String = row.get("chart_type_id");
            Ok(Some(Chart {
                guid: Uuid::parse_str(&guid_str)
                    .map_err(|e| crate::Error::Internal(format!("Bad chart guid: {}", e)))?,
                name: row.get("name"),
                description: row.get("description"),
                chart_type_id: Uuid::parse_str(&type_str)
                    .map_err(|e| crate::Error::Internal(format!("Bad chart type id: {}", e)))?,
            }))
        }
        None => Ok(None),
    }
}

/// Update chart description (the only mutable chart attribute)
pub async fn update_chart_description(
    pool: &SqlitePool,
    chart_id: Uuid,
    description: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE charts SET description = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(description)
    .bind(chart_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
