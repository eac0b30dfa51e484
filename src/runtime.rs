//! Migration runtime: the database side of a live rebase.
//!
//! The rebase itself never touches a database. In live mode it drives a
//! [`MigrationRuntime`] to confirm both heads are applied, step the database
//! back to the common ancestor and replay the linearized history.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::process::Command;

use crate::config::mask_database_url;
use crate::error::RebaseError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// A head given on the command line is not applied to the database.
    #[error("revision '{revision}' is not a current database head (heads: {heads:?})")]
    NotCurrentHead { revision: String, heads: Vec<String> },

    /// The database was stepped down to `ancestor` but the artifact could not
    /// be committed, so nothing has been replayed on top of it.
    #[error("database left at '{ancestor}' after the rewrite failed: {source}")]
    CommitFailed {
        ancestor: String,
        #[source]
        source: Box<RebaseError>,
    },

    /// Upgrading stopped part-way; `applied` lists the revisions that did
    /// go through, in order.
    #[error("upgrade to '{revision}' failed after applying {applied:?}: {source}")]
    PartialApply {
        revision: String,
        applied: Vec<String>,
        #[source]
        source: Box<RuntimeError>,
    },
}

fn exit_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Operations a live rebase needs from the migration tool.
pub trait MigrationRuntime {
    /// Revisions currently recorded as applied heads.
    fn current_heads(&self) -> impl Future<Output = Result<Vec<String>, RuntimeError>> + Send;

    /// Step the database down to `revision`.
    fn downgrade(&self, revision: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Apply exactly `revision` on top of the current state.
    fn upgrade(&self, revision: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;
}

/// Runs the `alembic` CLI and reads `alembic_version` over sqlx.
#[derive(Debug, Clone)]
pub struct AlembicRuntime {
    program: String,
    ini_path: PathBuf,
    database_url: String,
}

impl AlembicRuntime {
    /// `database_url` must already be in sqlx form (`postgres://`).
    pub fn new(program: impl Into<String>, ini_path: impl Into<PathBuf>, database_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ini_path: ini_path.into(),
            database_url: database_url.into(),
        }
    }

    fn working_dir(&self) -> &Path {
        self.ini_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    async fn alembic(&self, subcommand: &str, revision: &str) -> Result<(), RuntimeError> {
        let config = self
            .ini_path
            .file_name()
            .unwrap_or(self.ini_path.as_os_str());
        let command = format!(
            "{} -c {} {subcommand} {revision}",
            self.program,
            Path::new(config).display()
        );
        tracing::info!(command = %command, dir = %self.working_dir().display(), "running alembic");

        let output = Command::new(&self.program)
            .arg("-c")
            .arg(config)
            .arg(subcommand)
            .arg(revision)
            .current_dir(self.working_dir())
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl MigrationRuntime for AlembicRuntime {
    async fn current_heads(&self) -> Result<Vec<String>, RuntimeError> {
        tracing::debug!(url = %mask_database_url(&self.database_url), "reading alembic_version");

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.database_url)
            .await?;

        let heads = sqlx::query_scalar::<_, String>(
            "SELECT version_num FROM alembic_version ORDER BY version_num",
        )
        .fetch_all(&pool)
        .await;
        pool.close().await;

        match heads {
            Ok(heads) => Ok(heads),
            // 42P01: undefined_table, i.e. nothing has been migrated yet.
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("42P01") => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn downgrade(&self, revision: &str) -> Result<(), RuntimeError> {
        self.alembic("downgrade", revision).await
    }

    async fn upgrade(&self, revision: &str) -> Result<(), RuntimeError> {
        self.alembic("upgrade", revision).await
    }
}
