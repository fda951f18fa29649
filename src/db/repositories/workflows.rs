use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};

use crate::db::{helpers::parse_datetime, models::WorkflowRecord, Database};
use crate::registry::Segment;

impl Database {
    /// Write the full segment snapshot for one (project, target language)
    /// unit. Total-snapshot semantics: the stored array is replaced, never
    /// patched, so a later write always converges the row.
    pub async fn upsert_workflow(&self, workflow: &WorkflowRecord) -> Result<()> {
        let record = workflow.clone();
        self.execute(move |conn| {
            let segments_json = serde_json::to_string(&record.segments)
                .with_context(|| "failed to serialize segment snapshot")?;
            conn.execute(
                "INSERT INTO workflows (id, project_id, target_language, segment_translations, is_complete, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (project_id, target_language)
                 DO UPDATE SET
                     segment_translations = excluded.segment_translations,
                     is_complete = excluded.is_complete,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.project_id,
                    record.target_language,
                    segments_json,
                    record.is_complete,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert workflow snapshot")?;
            Ok(())
        })
        .await
    }

    pub async fn get_workflow(
        &self,
        project_id: &str,
        target_language: &str,
    ) -> Result<Option<WorkflowRecord>> {
        let project_id = project_id.to_string();
        let target_language = target_language.to_string();
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, project_id, target_language, segment_translations, is_complete, updated_at
                     FROM workflows
                     WHERE project_id = ?1 AND target_language = ?2",
                    params![project_id, target_language],
                    |row| {
                        Ok((
                            row.get::<_, String>("id")?,
                            row.get::<_, String>("project_id")?,
                            row.get::<_, String>("target_language")?,
                            row.get::<_, String>("segment_translations")?,
                            row.get::<_, bool>("is_complete")?,
                            row.get::<_, String>("updated_at")?,
                        ))
                    },
                )
                .optional()
                .with_context(|| "failed to load workflow snapshot")?;

            let Some((id, project_id, target_language, segments_json, is_complete, updated_at)) =
                row
            else {
                return Ok(None);
            };

            let segments: Vec<Segment> = serde_json::from_str(&segments_json)
                .with_context(|| "failed to deserialize segment snapshot")?;

            Ok(Some(WorkflowRecord {
                id,
                project_id,
                target_language,
                segments,
                is_complete,
                updated_at: parse_datetime(&updated_at, "updated_at")?,
            }))
        })
        .await
    }
}
