use std::{env, fs, path::Path};

use chrono::{Duration, NaiveDateTime, Utc};
use sqlx::SqlitePool;

/// The salon runs on Argentina time (UTC-3, no DST). Timestamps are stored
/// as naive local TEXT so that date() bucketing in queries matches the
/// business day instead of the UTC day.
const BUSINESS_UTC_OFFSET_HOURS: i64 = -3;

/// Layout of every stored timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn now_local() -> NaiveDateTime {
    Utc::now().naive_utc() + Duration::hours(BUSINESS_UTC_OFFSET_HOURS)
}

/// Current business-local time formatted for TEXT columns. No offset
/// suffix: SQLite's date() would shift offset-bearing strings back to UTC.
pub fn now_str() -> String {
    now_local().format(TIMESTAMP_FORMAT).to_string()
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_employees(pool).await
}

/// Seeds the staff roster from SEED_EMPLOYEES ("Name:color,Name2") the first
/// time the service starts against an empty database.
async fn seed_employees(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let Ok(seed) = env::var("SEED_EMPLOYEES") else {
        return Ok(());
    };

    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM employees")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let mut seeded = 0;
    for entry in seed.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, color) = match entry.split_once(':') {
            Some((name, color)) => (name.trim(), Some(color.trim())),
            None => (entry, None),
        };
        sqlx::query("INSERT INTO employees (name, color, active, created_at) VALUES (?, ?, 1, ?)")
            .bind(name)
            .bind(color)
            .bind(now_str())
            .execute(pool)
            .await?;
        seeded += 1;
    }

    if seeded > 0 {
        log::info!("Seeded {seeded} employees from SEED_EMPLOYEES");
    }
    Ok(())
}
