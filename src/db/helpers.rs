use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

pub fn parse_datetime(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime in column {column}: '{value}': {err}"))
}

pub fn to_score(value: i64, column: &str) -> Result<u8> {
    if !(0..=100).contains(&value) {
        return Err(anyhow!("score in column {column} out of range: {value}"));
    }
    Ok(value as u8)
}

pub fn to_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("value in column {column} is negative: {value}"))
}

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}
