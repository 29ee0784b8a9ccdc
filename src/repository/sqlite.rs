use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use tracing::debug;

use super::Repository;
use crate::error::{EvalError, Result};
use crate::state_machine::{
    FileType, NewProjectFile, NewRemark, PipelineKind, Project, ProjectFile, ProjectId,
    ProjectStatus, Remark,
};

const PROJECT_COLUMNS: &str = "id, name, status, created_at";
const FILE_COLUMNS: &str = "id, project_id, filename, original_name, file_path, file_size, \
                            extension, file_type, uploaded_at";
const REMARK_COLUMNS: &str =
    "id, project_id, direction, section, subsection, content, created_at";

/// SQLite-backed repository.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Opens (creating if missing) the database at `path` and ensures the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.migrate().await?;
        debug!(path = %path.display(), "sqlite repository ready");
        Ok(repo)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ready',
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS project_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                filename TEXT NOT NULL,
                original_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                extension TEXT NOT NULL,
                file_type TEXT NOT NULL,
                uploaded_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remarks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                direction TEXT NOT NULL,
                section TEXT NOT NULL,
                subsection TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_project_files_project_type \
             ON project_files(project_id, file_type)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_remarks_project ON remarks(project_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_ts(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ProjectStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status,
        created_at: decode_ts(row.try_get("created_at")?),
    })
}

fn file_from_row(row: &SqliteRow) -> Result<ProjectFile> {
    let file_type: String = row.try_get("file_type")?;
    let file_type = file_type
        .parse::<FileType>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(ProjectFile {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        filename: row.try_get("filename")?,
        original_name: row.try_get("original_name")?,
        file_path: row.try_get("file_path")?,
        file_size: row.try_get("file_size")?,
        extension: row.try_get("extension")?,
        file_type,
        uploaded_at: decode_ts(row.try_get("uploaded_at")?),
    })
}

fn remark_from_row(row: &SqliteRow) -> Result<Remark> {
    Ok(Remark {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        direction: row.try_get("direction")?,
        section: row.try_get("section")?,
        subsection: row.try_get("subsection")?,
        content: row.try_get("content")?,
        created_at: decode_ts(row.try_get("created_at")?),
    })
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_project(&self, name: &str) -> Result<Project> {
        let row = sqlx::query(&format!(
            "INSERT INTO projects (name, status, created_at) VALUES (?, ?, ?) \
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(name)
        .bind(ProjectStatus::Ready.as_str())
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        project_from_row(&row)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project> {
        let row = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => project_from_row(&row),
            None => Err(EvalError::ProjectNotFound(id)),
        }
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn try_begin(&self, id: ProjectId, kind: PipelineKind) -> Result<Project> {
        let row = sqlx::query(&format!(
            "UPDATE projects SET status = ? WHERE id = ? AND status = ? \
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(kind.busy_status().as_str())
        .bind(id)
        .bind(ProjectStatus::Ready.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => project_from_row(&row),
            // No row matched: either the project is missing or it is busy.
            None => {
                let current = self.get_project(id).await?;
                Err(EvalError::ProjectBusy {
                    project_id: id,
                    status: current.status,
                })
            }
        }
    }

    async fn set_status(&self, id: ProjectId, status: ProjectStatus) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EvalError::ProjectNotFound(id));
        }
        Ok(())
    }

    async fn create_project_file(&self, file: NewProjectFile) -> Result<ProjectFile> {
        // Surfaces ProjectNotFound rather than a foreign-key violation.
        self.get_project(file.project_id).await?;

        let row = sqlx::query(&format!(
            "INSERT INTO project_files \
             (project_id, filename, original_name, file_path, file_size, extension, file_type, uploaded_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {FILE_COLUMNS}"
        ))
        .bind(file.project_id)
        .bind(&file.filename)
        .bind(&file.original_name)
        .bind(&file.file_path)
        .bind(file.file_size)
        .bind(&file.extension)
        .bind(file.file_type.as_str())
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        file_from_row(&row)
    }

    async fn create_project_file_if_ready(&self, file: NewProjectFile) -> Result<ProjectFile> {
        let row = sqlx::query(&format!(
            "INSERT INTO project_files \
             (project_id, filename, original_name, file_path, file_size, extension, file_type, uploaded_at) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ? \
             WHERE EXISTS (SELECT 1 FROM projects WHERE id = ? AND status = ?) \
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(file.project_id)
        .bind(&file.filename)
        .bind(&file.original_name)
        .bind(&file.file_path)
        .bind(file.file_size)
        .bind(&file.extension)
        .bind(file.file_type.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(file.project_id)
        .bind(ProjectStatus::Ready.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => file_from_row(&row),
            None => {
                let current = self.get_project(file.project_id).await?;
                Err(EvalError::ProjectBusy {
                    project_id: file.project_id,
                    status: current.status,
                })
            }
        }
    }

    async fn list_project_files(
        &self,
        project_id: ProjectId,
        file_type: Option<FileType>,
    ) -> Result<Vec<ProjectFile>> {
        let rows = match file_type {
            Some(file_type) => {
                sqlx::query(&format!(
                    "SELECT {FILE_COLUMNS} FROM project_files \
                     WHERE project_id = ? AND file_type = ? ORDER BY id DESC"
                ))
                .bind(project_id)
                .bind(file_type.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {FILE_COLUMNS} FROM project_files \
                     WHERE project_id = ? ORDER BY id DESC"
                ))
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(file_from_row).collect()
    }

    async fn create_remark(&self, remark: NewRemark) -> Result<Remark> {
        self.get_project(remark.project_id).await?;

        let row = sqlx::query(&format!(
            "INSERT INTO remarks (project_id, direction, section, subsection, content, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {REMARK_COLUMNS}"
        ))
        .bind(remark.project_id)
        .bind(&remark.direction)
        .bind(&remark.section)
        .bind(&remark.subsection)
        .bind(&remark.content)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        remark_from_row(&row)
    }

    async fn create_remarks(&self, remarks: Vec<NewRemark>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp_millis();
        for remark in &remarks {
            sqlx::query(
                "INSERT INTO remarks (project_id, direction, section, subsection, content, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(remark.project_id)
            .bind(&remark.direction)
            .bind(&remark.section)
            .bind(&remark.subsection)
            .bind(&remark.content)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(remarks.len())
    }

    async fn list_remarks(&self, project_id: ProjectId) -> Result<Vec<Remark>> {
        let rows = sqlx::query(&format!(
            "SELECT {REMARK_COLUMNS} FROM remarks WHERE project_id = ? ORDER BY id DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(remark_from_row).collect()
    }
}
