use chrono::{DateTime, NaiveDateTime};
use sqlx::{Connection, PgConnection};

use crate::config::Config;
use crate::error::PollError;
use crate::tesla::TelemetryRecord;

/// Inserts one record into `<schema>.live_data`. One write per poll interval
/// does not justify a pool, so a fresh connection is opened per call, used
/// for the single statement, and closed again on success and failure alike.
pub async fn persist(config: &Config, record: &TelemetryRecord) -> Result<(), PollError> {
    let ts = record.ts.as_deref().map(naive_utc_timestamp).transpose()?;

    let url = config.warehouse_url.as_deref().ok_or_else(|| {
        PollError::Connection(sqlx::Error::Configuration(
            "WAREHOUSE_DATABASE_URL is not set".into(),
        ))
    })?;
    let mut conn = PgConnection::connect(url)
        .await
        .map_err(PollError::Connection)?;

    let statement = format!(
        r#"
        INSERT INTO {}.live_data
            (ts, solar_w, load_w, grid_w, battery_w, battery_soc, grid_status, island_status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
        config.warehouse_schema
    );
    let inserted = sqlx::query(&statement)
        .bind(ts)
        .bind(record.solar_w)
        .bind(record.load_w)
        .bind(record.grid_w)
        .bind(record.battery_w)
        .bind(record.battery_soc)
        .bind(record.grid_status.as_deref())
        .bind(record.island_status.as_deref())
        .execute(&mut conn)
        .await;

    if let Err(err) = conn.close().await {
        tracing::warn!(error = %err, "warehouse connection close failed");
    }

    inserted.map_err(PollError::Write)?;
    tracing::debug!("live_data row written");
    Ok(())
}

/// Collapses the source's timezone-bearing timestamp to a naive UTC instant,
/// so equal instants store identically regardless of source offset.
fn naive_utc_timestamp(raw: &str) -> Result<NaiveDateTime, PollError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.naive_utc())
        .map_err(|source| PollError::BadTimestamp {
            raw: raw.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;
    use std::env;

    #[test]
    fn naive_utc_timestamp_normalizes_source_offsets() {
        let utc = naive_utc_timestamp("2024-01-01T05:00:00Z").expect("utc");
        let offset = naive_utc_timestamp("2024-01-01T00:00:00-05:00").expect("offset");
        assert_eq!(utc, offset);
        assert_eq!(utc.to_string(), "2024-01-01 05:00:00");
    }

    #[test]
    fn naive_utc_timestamp_rejects_garbage() {
        let err = naive_utc_timestamp("not a timestamp").expect_err("must not parse");
        assert!(matches!(err, PollError::BadTimestamp { .. }));
    }

    #[tokio::test]
    async fn persist_without_a_url_is_a_connection_error() {
        let config = Config {
            account_email: None,
            token_cache_path: "/nonexistent".into(),
            interval_seconds: 60,
            warehouse_url: None,
            warehouse_schema: "public".to_string(),
        };
        let record = TelemetryRecord {
            ts: Some("2024-01-01T00:00:00Z".to_string()),
            solar_w: None,
            load_w: None,
            grid_w: None,
            battery_w: None,
            battery_soc: None,
            grid_status: None,
            island_status: None,
        };
        let err = persist(&config, &record).await.expect_err("no url");
        assert!(matches!(err, PollError::Connection(_)));
    }

    #[tokio::test]
    async fn persist_rejects_a_bad_timestamp_before_connecting() {
        let config = Config {
            account_email: None,
            token_cache_path: "/nonexistent".into(),
            interval_seconds: 60,
            warehouse_url: None,
            warehouse_schema: "public".to_string(),
        };
        let record = TelemetryRecord {
            ts: Some("yesterday-ish".to_string()),
            solar_w: Some(1.0),
            load_w: None,
            grid_w: None,
            battery_w: None,
            battery_soc: None,
            grid_status: None,
            island_status: None,
        };
        let err = persist(&config, &record).await.expect_err("bad ts");
        assert!(matches!(err, PollError::BadTimestamp { .. }));
    }

    #[tokio::test]
    async fn live_data_round_trip() -> Result<()> {
        if env::var("POLLER_INTEGRATION_TEST").ok().as_deref() != Some("1") {
            return Ok(());
        }
        let database_url = match env::var("POLLER_TEST_DATABASE_URL") {
            Ok(value) => value,
            Err(_) => return Ok(()),
        };

        let schema = format!("poller_test_{}", std::process::id());
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&admin_pool)
            .await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {}.live_data (
                ts timestamp null,
                solar_w double precision null,
                load_w double precision null,
                grid_w double precision null,
                battery_w double precision null,
                battery_soc double precision null,
                grid_status text null,
                island_status text null
            )
            "#,
            schema
        ))
        .execute(&admin_pool)
        .await?;

        let config = Config {
            account_email: None,
            token_cache_path: "/nonexistent".into(),
            interval_seconds: 60,
            warehouse_url: Some(database_url.clone()),
            warehouse_schema: schema.clone(),
        };

        let full = TelemetryRecord {
            ts: Some("2024-01-01T00:00:00-05:00".to_string()),
            solar_w: Some(1000.0),
            load_w: Some(800.0),
            grid_w: Some(-200.0),
            battery_w: Some(0.0),
            battery_soc: Some(80.0),
            grid_status: Some("Connected".to_string()),
            island_status: Some("on_grid".to_string()),
        };
        persist(&config, &full).await?;

        let sparse = TelemetryRecord {
            ts: None,
            solar_w: None,
            load_w: None,
            grid_w: None,
            battery_w: None,
            battery_soc: None,
            grid_status: None,
            island_status: None,
        };
        persist(&config, &sparse).await?;

        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}.live_data", schema))
                .fetch_one(&admin_pool)
                .await?;
        assert_eq!(count, 2);

        let row: (Option<NaiveDateTime>, Option<f64>, Option<String>) = sqlx::query_as(&format!(
            "SELECT ts, grid_w, grid_status FROM {}.live_data WHERE ts IS NOT NULL",
            schema
        ))
        .fetch_one(&admin_pool)
        .await?;
        assert_eq!(row.0.map(|ts| ts.to_string()).as_deref(), Some("2024-01-01 05:00:00"));
        assert_eq!(row.1, Some(-200.0));
        assert_eq!(row.2.as_deref(), Some("Connected"));

        let nulls: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}.live_data WHERE ts IS NULL AND solar_w IS NULL AND island_status IS NULL",
            schema
        ))
        .fetch_one(&admin_pool)
        .await?;
        assert_eq!(nulls, 1);

        let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
            .execute(&admin_pool)
            .await;

        Ok(())
    }
}
