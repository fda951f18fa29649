use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, to_i64, to_score, to_u64},
    models::{TMEntry, TMKey},
    Database,
};

fn row_to_tm_entry(row: &Row) -> Result<TMEntry, rusqlite::Error> {
    let map_err = |e: anyhow::Error| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )))
    };

    let last_used_str: String = row.get("last_used")?;
    let created_at_str: String = row.get("created_at")?;

    Ok(TMEntry {
        key: TMKey {
            normalized_source_text: row.get("normalized_source_text")?,
            source_language: row.get("source_language")?,
            target_language: row.get("target_language")?,
            domain_category: row.get("domain_category")?,
        },
        target_text: row.get("target_text")?,
        quality_score: to_score(row.get("quality_score")?, "quality_score").map_err(map_err)?,
        confidence_score: to_score(row.get("confidence_score")?, "confidence_score")
            .map_err(map_err)?,
        usage_count: to_u64(row.get("usage_count")?, "usage_count").map_err(map_err)?,
        last_used: parse_datetime(&last_used_str, "last_used").map_err(map_err)?,
        created_at: parse_datetime(&created_at_str, "created_at").map_err(map_err)?,
    })
}

impl Database {
    /// Idempotent upsert under the TM identity key. Concurrent upserts of the
    /// same key fold into one row: last writer updates quality/confidence,
    /// usage counts are additive, `last_used` is refreshed.
    pub async fn upsert_tm_entry(&self, entry: &TMEntry) -> Result<()> {
        let entry = entry.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO tm_entries (
                    normalized_source_text,
                    source_language,
                    target_language,
                    domain_category,
                    target_text,
                    quality_score,
                    confidence_score,
                    usage_count,
                    last_used,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT (normalized_source_text, source_language, target_language, domain_category)
                DO UPDATE SET
                    target_text = excluded.target_text,
                    quality_score = excluded.quality_score,
                    confidence_score = excluded.confidence_score,
                    usage_count = tm_entries.usage_count + excluded.usage_count,
                    last_used = excluded.last_used",
                params![
                    entry.key.normalized_source_text,
                    entry.key.source_language,
                    entry.key.target_language,
                    entry.key.domain_category,
                    entry.target_text,
                    entry.quality_score as i64,
                    entry.confidence_score as i64,
                    to_i64(entry.usage_count)?,
                    entry.last_used.to_rfc3339(),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert TM entry")?;
            Ok(())
        })
        .await
    }

    /// Candidate pool for the scorer, scoped to a language pair and optional
    /// domain. Performs no ranking; row order is insertion order.
    pub async fn query_tm_entries(
        &self,
        source_language: &str,
        target_language: &str,
        domain_filter: Option<&str>,
    ) -> Result<Vec<TMEntry>> {
        let source_language = source_language.to_string();
        let target_language = target_language.to_string();
        let domain_filter = domain_filter.map(|d| d.to_string());

        self.execute(move |conn| {
            let base = "SELECT
                    normalized_source_text,
                    source_language,
                    target_language,
                    domain_category,
                    target_text,
                    quality_score,
                    confidence_score,
                    usage_count,
                    last_used,
                    created_at
                FROM tm_entries
                WHERE source_language = ?1 AND target_language = ?2";

            let mut entries = Vec::new();
            if let Some(domain) = domain_filter {
                let sql = format!("{base} AND domain_category = ?3 ORDER BY rowid ASC");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    params![source_language, target_language, domain],
                    row_to_tm_entry,
                )?;
                for row in rows {
                    entries.push(row?);
                }
            } else {
                let sql = format!("{base} ORDER BY rowid ASC");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    params![source_language, target_language],
                    row_to_tm_entry,
                )?;
                for row in rows {
                    entries.push(row?);
                }
            }

            Ok(entries)
        })
        .await
    }

    /// Record that a user accepted a retrieval of this entry.
    pub async fn record_tm_usage(&self, key: &TMKey, used_at: DateTime<Utc>) -> Result<()> {
        let key = key.clone();
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE tm_entries
                     SET usage_count = usage_count + 1,
                         last_used = ?1
                     WHERE normalized_source_text = ?2
                       AND source_language = ?3
                       AND target_language = ?4
                       AND domain_category = ?5",
                    params![
                        used_at.to_rfc3339(),
                        key.normalized_source_text,
                        key.source_language,
                        key.target_language,
                        key.domain_category,
                    ],
                )
                .with_context(|| "failed to record TM usage")?;

            if updated == 0 {
                return Err(anyhow!(
                    "no TM entry for key '{}' ({} -> {}, {})",
                    key.normalized_source_text,
                    key.source_language,
                    key.target_language,
                    key.domain_category
                ));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_db() -> (TempDir, Database) {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::new(dir.path().join("test.sqlite3")).expect("open db");
        (dir, db)
    }

    fn sample_entry(quality: u8) -> TMEntry {
        TMEntry::new(
            TMKey::new("Hello  World", "en", "de", "general"),
            "Hallo Welt".into(),
            quality,
            80,
        )
    }

    #[tokio::test]
    async fn upsert_same_key_twice_keeps_one_row_and_adds_usage() {
        let (_dir, db) = open_db().await;

        db.upsert_tm_entry(&sample_entry(70)).await.unwrap();
        db.upsert_tm_entry(&sample_entry(95)).await.unwrap();

        let entries = db.query_tm_entries("en", "de", None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].usage_count, 2);
        // Last writer wins on quality.
        assert_eq!(entries[0].quality_score, 95);
    }

    #[tokio::test]
    async fn query_scopes_by_language_pair_and_domain() {
        let (_dir, db) = open_db().await;

        db.upsert_tm_entry(&sample_entry(80)).await.unwrap();
        let mut legal = sample_entry(80);
        legal.key.domain_category = "legal".into();
        db.upsert_tm_entry(&legal).await.unwrap();
        let mut fr = sample_entry(80);
        fr.key.target_language = "fr".into();
        db.upsert_tm_entry(&fr).await.unwrap();

        assert_eq!(db.query_tm_entries("en", "de", None).await.unwrap().len(), 2);
        assert_eq!(
            db.query_tm_entries("en", "de", Some("legal"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(db.query_tm_entries("en", "fr", None).await.unwrap().len(), 1);
        assert!(db.query_tm_entries("de", "en", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_usage_increments_count_and_refreshes_last_used() {
        let (_dir, db) = open_db().await;

        let entry = sample_entry(80);
        db.upsert_tm_entry(&entry).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(60);
        db.record_tm_usage(&entry.key, later).await.unwrap();

        let entries = db.query_tm_entries("en", "de", None).await.unwrap();
        assert_eq!(entries[0].usage_count, 2);
        assert!(entries[0].last_used > entry.last_used);
    }

    #[tokio::test]
    async fn record_usage_for_missing_key_fails() {
        let (_dir, db) = open_db().await;
        let key = TMKey::new("never stored", "en", "de", "general");
        assert!(db.record_tm_usage(&key, Utc::now()).await.is_err());
    }
}
