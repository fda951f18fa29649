use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::parse_datetime,
    models::{ProjectRecord, ProjectStatus},
    Database,
};

fn row_to_project(row: &Row) -> Result<ProjectRecord, rusqlite::Error> {
    let map_err = |e: anyhow::Error| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )))
    };

    let status_str: String = row.get("status")?;
    let created_at_str: String = row.get("created_at")?;
    let updated_at_str: String = row.get("updated_at")?;

    Ok(ProjectRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        source_language: row.get("source_language")?,
        target_language: row.get("target_language")?,
        market: row.get("market")?,
        status: ProjectStatus::from_str(&status_str).map_err(map_err)?,
        created_at: parse_datetime(&created_at_str, "created_at").map_err(map_err)?,
        updated_at: parse_datetime(&updated_at_str, "updated_at").map_err(map_err)?,
    })
}

impl Database {
    pub async fn insert_project(&self, project: &ProjectRecord) -> Result<()> {
        let record = project.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO projects (id, name, source_language, target_language, market, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.name,
                    record.source_language,
                    record.target_language,
                    record.market,
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert project")?;
            Ok(())
        })
        .await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let project_id = project_id.to_string();
        self.execute(move |conn| {
            let project = conn
                .query_row(
                    "SELECT id, name, source_language, target_language, market, status, created_at, updated_at
                     FROM projects
                     WHERE id = ?1",
                    params![project_id],
                    row_to_project,
                )
                .optional()
                .with_context(|| "failed to load project")?;
            Ok(project)
        })
        .await
    }

    /// Delete a project and its workflow rows. TM entries are a shared
    /// cross-project asset and are deliberately left untouched; there is no
    /// delete-by-project operation on them anywhere in this crate.
    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        let project_id = project_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM workflows WHERE project_id = ?1",
                params![project_id],
            )
            .with_context(|| "failed to delete project workflows")?;
            tx.execute("DELETE FROM projects WHERE id = ?1", params![project_id])
                .with_context(|| "failed to delete project")?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
