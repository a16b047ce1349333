//! Component D -- Consumption Store.
//!
//! An embedded, single-writer relational store of hourly household
//! consumption samples (§4.4). Backed by `sqlx`'s SQLite driver against a
//! single file -- the teacher's Postgres-pool persistence layer is the
//! wrong shape for "embedded, single file, single instance assumed"; see
//! DESIGN.md for the stack-adjustment rationale.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;

use crate::domain::{ConsumptionStatistics, ImportReport};

#[derive(Debug, Error)]
pub enum ConsumptionStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("consumption value {0} kWh is outside the valid [0, 50] range")]
    OutOfRange(f64),
}

const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS hourly_consumption (
    timestamp TEXT PRIMARY KEY,
    hour INTEGER NOT NULL,
    consumption_kwh REAL NOT NULL,
    is_manual INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub struct ConsumptionStore {
    pool: SqlitePool,
    learning_days: i64,
    default_hourly_fallback: Option<f64>,
    average_daily_consumption: Option<f64>,
}

impl ConsumptionStore {
    /// Open (creating if absent) the single SQLite file at `path`.
    pub async fn open(
        path: &std::path::Path,
        learning_days: i64,
        default_hourly_fallback: Option<f64>,
        average_daily_consumption: Option<f64>,
    ) -> Result<Self, ConsumptionStoreError> {
        let url = if path.as_os_str() == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            format!("sqlite://{}?mode=rwc", path.display())
        };
        let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await?;
        sqlx::query(MIGRATION).execute(&pool).await?;
        Ok(Self {
            pool,
            learning_days,
            default_hourly_fallback,
            average_daily_consumption,
        })
    }

    /// Record one hour's consumption, overwriting any existing row for
    /// that hour, then purge anything older than the retention horizon.
    pub async fn record_consumption(
        &self,
        ts: DateTime<FixedOffset>,
        kwh: f64,
    ) -> Result<(), ConsumptionStoreError> {
        self.insert_row(ts, kwh, false).await?;
        self.purge_older_than(self.learning_days).await?;
        Ok(())
    }

    async fn insert_row(
        &self,
        ts: DateTime<FixedOffset>,
        kwh: f64,
        is_manual: bool,
    ) -> Result<(), ConsumptionStoreError> {
        if !(0.0..=50.0).contains(&kwh) {
            return Err(ConsumptionStoreError::OutOfRange(kwh));
        }
        let hour_ts = round_to_hour(ts);
        // A manual sample (is_manual = true) must never clobber an already
        // recorded non-manual reading for the same hour; a real reading
        // (is_manual = false) always wins.
        sqlx::query(
            "INSERT INTO hourly_consumption (timestamp, hour, consumption_kwh, is_manual, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(timestamp) DO UPDATE SET
                consumption_kwh = excluded.consumption_kwh,
                is_manual = excluded.is_manual,
                created_at = excluded.created_at
             WHERE hourly_consumption.is_manual = 1 OR excluded.is_manual = 0",
        )
        .bind(hour_ts.to_rfc3339())
        .bind(hour_ts.hour() as i64)
        .bind(kwh)
        .bind(is_manual as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Seed `learning_days * 24` hourly rows from a manual hour-of-day profile.
    pub async fn add_manual_profile(
        &self,
        profile: &std::collections::BTreeMap<u32, f64>,
        now: DateTime<FixedOffset>,
    ) -> Result<(), ConsumptionStoreError> {
        for day in 0..self.learning_days {
            for (hour, kwh) in profile {
                let ts = (now - chrono::Duration::days(day))
                    .date_naive()
                    .and_hms_opt(*hour, 0, 0)
                    .expect("hour is 0..23")
                    .and_local_timezone(*now.offset())
                    .single()
                    .unwrap_or(now);
                self.insert_row(ts, *kwh, true).await?;
            }
        }
        Ok(())
    }

    /// Validate and insert a batch of `{date, 24 hourly values}` rows.
    pub async fn import_detailed_history(
        &self,
        days: &[(chrono::NaiveDate, [f64; 24])],
    ) -> Result<ImportReport, ConsumptionStoreError> {
        let mut report = ImportReport::default();
        for (date, hours) in days {
            for (hour, raw) in hours.iter().enumerate() {
                let clamped = raw.clamp(0.0, 50.0);
                if (clamped - raw).abs() > f64::EPSILON {
                    tracing::warn!(%date, hour, raw, "clamped out-of-range consumption sample");
                }
                let ts = date
                    .and_hms_opt(hour as u32, 0, 0)
                    .expect("hour is 0..23")
                    .and_utc()
                    .fixed_offset();
                match self.insert_row(ts, clamped, true).await {
                    Ok(()) => report.imported += 1,
                    Err(e) => {
                        tracing::warn!(%date, hour, error = %e, "skipped row during import");
                        report.skipped += 1;
                    }
                }
            }
        }
        report.success = report.skipped == 0;
        Ok(report)
    }

    /// Adapter for history samples pulled from the home-automation history
    /// API (§11.1): group by date+hour, average duplicates, then reuse the
    /// same validated insert path as a detailed-history import.
    pub async fn import_from_history(
        &self,
        samples: &[(DateTime<FixedOffset>, f64)],
    ) -> Result<ImportReport, ConsumptionStoreError> {
        use std::collections::BTreeMap;
        let mut grouped: BTreeMap<(chrono::NaiveDate, u32), (f64, u32)> = BTreeMap::new();
        for (ts, value) in samples {
            let key = (ts.date_naive(), ts.hour());
            let entry = grouped.entry(key).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        let mut by_date: BTreeMap<chrono::NaiveDate, [f64; 24]> = BTreeMap::new();
        for ((date, hour), (sum, count)) in grouped {
            let entry = by_date.entry(date).or_insert([0.0; 24]);
            entry[hour as usize] = sum / count as f64;
        }
        let days: Vec<_> = by_date.into_iter().collect();
        self.import_detailed_history(&days).await
    }

    /// CSV import tolerant of `YYYY-MM-DD`/`DD.MM.YYYY` dates, comma or dot
    /// decimals, and columns `datum,wochentag,h0..h23`.
    pub async fn import_from_csv(&self, text: &str) -> Result<ImportReport, ConsumptionStoreError> {
        let mut report = ImportReport::default();
        let mut days = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line_no == 0 && line.to_ascii_lowercase().starts_with("datum") {
                continue; // header row
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_csv_row(line) {
                Some(row) => days.push(row),
                None => {
                    tracing::warn!(line_no, "skipped malformed CSV row");
                    report.skipped += 1;
                }
            }
        }
        let imported = self.import_detailed_history(&days).await?;
        report.imported += imported.imported;
        report.skipped += imported.skipped;
        report.success = report.skipped == 0;
        Ok(report)
    }

    /// `AVG(consumption_kwh)` across all samples for the given hour-of-day,
    /// falling back through the §9 chain when no samples exist.
    pub async fn average_at_hour(&self, hour: u32) -> Result<f64, ConsumptionStoreError> {
        let row = sqlx::query("SELECT AVG(consumption_kwh) as avg_kwh, COUNT(*) as n FROM hourly_consumption WHERE hour = ?1")
            .bind(hour as i64)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        if count == 0 {
            return Ok(self.fallback());
        }
        let avg: f64 = row.try_get("avg_kwh")?;
        Ok(avg)
    }

    fn fallback(&self) -> f64 {
        self.default_hourly_fallback
            .or_else(|| self.average_daily_consumption.map(|avg| avg / 24.0))
            .unwrap_or(1.0)
    }

    /// Full 24-entry hourly profile, missing hours filled with 0.5 kWh.
    pub async fn hourly_profile(&self) -> Result<std::collections::BTreeMap<u32, f64>, ConsumptionStoreError> {
        let rows = sqlx::query("SELECT hour, AVG(consumption_kwh) as avg_kwh FROM hourly_consumption GROUP BY hour")
            .fetch_all(&self.pool)
            .await?;
        let mut profile: std::collections::BTreeMap<u32, f64> =
            (0..24).map(|h| (h, 0.5)).collect();
        for row in rows {
            let hour: i64 = row.try_get("hour")?;
            let avg: f64 = row.try_get("avg_kwh")?;
            profile.insert(hour as u32, avg);
        }
        Ok(profile)
    }

    /// Integrate the hourly average from `now` until `target_hour` (exclusive),
    /// using a fractional weight for the current partial hour.
    pub async fn predict_consumption_until(
        &self,
        now: DateTime<FixedOffset>,
        target_hour: u32,
    ) -> Result<f64, ConsumptionStoreError> {
        let profile = self.hourly_profile().await?;
        let mut total = 0.0;
        let current_hour = now.hour();
        let fraction_remaining = (60 - now.minute()) as f64 / 60.0;
        total += profile.get(&current_hour).copied().unwrap_or(0.5) * fraction_remaining;
        let mut hour = (current_hour + 1) % 24;
        while hour != target_hour {
            total += profile.get(&hour).copied().unwrap_or(0.5);
            hour = (hour + 1) % 24;
        }
        Ok(total)
    }

    pub async fn statistics(&self) -> Result<ConsumptionStatistics, ConsumptionStoreError> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) as total,
                SUM(is_manual) as manual,
                MIN(timestamp) as oldest,
                MAX(timestamp) as newest
             FROM hourly_consumption",
        )
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let manual: Option<i64> = row.try_get("manual")?;
        let manual = manual.unwrap_or(0);
        let learned = total - manual;
        let oldest: Option<String> = row.try_get("oldest")?;
        let newest: Option<String> = row.try_get("newest")?;
        let progress = if total > 0 {
            (learned as f64 / total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        Ok(ConsumptionStatistics {
            total_samples: total,
            manual_samples: manual,
            learned_samples: learned,
            oldest: oldest.and_then(|s| s.parse().ok()),
            newest: newest.and_then(|s| s.parse().ok()),
            learning_progress_percent: progress,
        })
    }

    pub async fn clear_manual_data(&self) -> Result<u64, ConsumptionStoreError> {
        let result = sqlx::query("DELETE FROM hourly_consumption WHERE is_manual = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Bare connectivity check used by the HTTP health endpoint.
    pub async fn ping(&self) -> Result<(), ConsumptionStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn clear_all_data(&self) -> Result<u64, ConsumptionStoreError> {
        let result = sqlx::query("DELETE FROM hourly_consumption")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_older_than(&self, days: i64) -> Result<u64, ConsumptionStoreError> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let result = sqlx::query("DELETE FROM hourly_consumption WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn round_to_hour(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    ts.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(ts)
}

fn parse_csv_row(line: &str) -> Option<(chrono::NaiveDate, [f64; 24])> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 26 {
        return None;
    }
    let date = parse_flexible_date(fields[0].trim())?;
    let mut hours = [0.0; 24];
    for (i, field) in fields[2..26].iter().enumerate() {
        hours[i] = field.trim().replace(',', ".").parse().ok()?;
    }
    Some((date, hours))
}

fn parse_flexible_date(raw: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| chrono::NaiveDate::parse_from_str(raw, "%d.%m.%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> ConsumptionStore {
        ConsumptionStore::open(std::path::Path::new(":memory:"), 28, None, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_out_of_range_consumption() {
        let store = test_store().await;
        let now: DateTime<FixedOffset> = Utc::now().fixed_offset();
        let err = store.record_consumption(now, 51.0).await.unwrap_err();
        assert!(matches!(err, ConsumptionStoreError::OutOfRange(_)));
    }

    #[tokio::test]
    async fn manual_profile_round_trips_through_average_at_hour() {
        let store = test_store().await;
        let now: DateTime<FixedOffset> = Utc::now().fixed_offset();
        let mut profile = std::collections::BTreeMap::new();
        profile.insert(14u32, 2.5);
        store.add_manual_profile(&profile, now).await.unwrap();
        let avg = store.average_at_hour(14).await.unwrap();
        assert!((avg - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn average_at_hour_falls_back_when_empty() {
        let store = ConsumptionStore::open(std::path::Path::new(":memory:"), 28, Some(3.0), None)
            .await
            .unwrap();
        let avg = store.average_at_hour(5).await.unwrap();
        assert_eq!(avg, 3.0);
    }

    #[test]
    fn parses_both_date_formats_and_decimal_styles() {
        assert!(parse_flexible_date("2024-01-01").is_some());
        assert!(parse_flexible_date("01.02.2024").is_some());
        assert!(parse_flexible_date("garbage").is_none());
    }

    #[test]
    fn csv_row_requires_24_hour_columns() {
        let line = "2024-01-01,Monday,0.1,0.2";
        assert!(parse_csv_row(line).is_none());
    }
}
