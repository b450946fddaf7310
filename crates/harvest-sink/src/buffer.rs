//! Durable Buffer: one CSV artifact per run with a column set that only
//! grows.
//!
//! When a record brings columns the artifact has not seen, the existing
//! rows are rewritten with the wider header into a temporary file in the
//! same directory, which then replaces the artifact by rename. A reader
//! opening the artifact sees either the old or the new file, never a half
//! written one. Rewrites and appends are serialized by the session lock.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use harvest_core::civil_time::now_civil;
use harvest_core::{AccountIdentity, HarvestRecord};
use indexmap::IndexSet;
use tokio::sync::Mutex;

use crate::error::SinkError;

const ARTIFACT_SUFFIX: &str = "order_details.csv";

/// The artifact and identity of the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub path: PathBuf,
    pub identity: AccountIdentity,
}

#[derive(Debug)]
struct SessionState {
    path: PathBuf,
    identity: AccountIdentity,
    columns: IndexSet<String>,
    rows: usize,
}

#[derive(Debug)]
pub struct DurableBuffer {
    data_dir: PathBuf,
    session: Mutex<Option<SessionState>>,
}

impl DurableBuffer {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            session: Mutex::new(None),
        }
    }

    /// Opens a session, reusing the active one unless `force_new` is set.
    ///
    /// The artifact file is created empty right away so that two sessions
    /// started within the same second never share a name.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::BufferIo`] if the data directory or artifact
    /// cannot be created.
    pub async fn start_session(
        &self,
        identity: &AccountIdentity,
        force_new: bool,
    ) -> Result<SessionHandle, SinkError> {
        let mut guard = self.session.lock().await;
        if !force_new {
            if let Some(state) = guard.as_ref() {
                return Ok(handle_of(state));
            }
        }
        let state = self.open_session(identity.clone()).await?;
        let handle = handle_of(&state);
        *guard = Some(state);
        Ok(handle)
    }

    /// Appends records to the active session, starting one if needed.
    /// Empty records are skipped. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::BufferIo`] or [`SinkError::Csv`] on write
    /// failure. A failed header migration leaves the previous artifact in
    /// place; a failed row append resyncs the session from the artifact.
    pub async fn append(&self, records: &[HarvestRecord]) -> Result<usize, SinkError> {
        let rows: Vec<HarvestRecord> = records.iter().filter(|r| !r.is_empty()).cloned().collect();
        if rows.is_empty() {
            return Ok(0);
        }

        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_session(AccountIdentity::resolve(None, "")).await?);
        }
        let Some(state) = guard.as_mut() else {
            return Ok(0);
        };

        let mut columns = state.columns.clone();
        for row in &rows {
            for column in row.columns() {
                if !columns.contains(column) {
                    columns.insert(column.to_owned());
                }
            }
        }

        if columns.len() > state.columns.len() {
            let (path, wider) = (state.path.clone(), columns.clone());
            run_blocking(move || migrate_header(&path, &wider)).await?;
            tracing::debug!(
                path = %state.path.display(),
                columns = columns.len(),
                "buffer header widened"
            );
            state.columns = columns;
        }

        let (path, write_columns) = (state.path.clone(), state.columns.clone());
        match run_blocking(move || append_rows(&path, &write_columns, &rows)).await {
            Ok(written) => {
                state.rows += written;
                Ok(written)
            }
            Err(e) => {
                resync_session(state).await;
                Err(e)
            }
        }
    }

    /// Column names of the active session, in discovery order.
    pub async fn session_columns(&self) -> Vec<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.columns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rows written to the active session so far.
    pub async fn row_count(&self) -> usize {
        self.session.lock().await.as_ref().map_or(0, |s| s.rows)
    }

    pub async fn current_session(&self) -> Option<SessionHandle> {
        self.session.lock().await.as_ref().map(handle_of)
    }

    /// Reads rows of the active session starting at row `from` (0-based),
    /// with every column of the current header present.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::BufferIo`] or [`SinkError::Csv`] on read failure.
    pub async fn read_rows(&self, from: usize) -> Result<Vec<HarvestRecord>, SinkError> {
        let guard = self.session.lock().await;
        let Some(state) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        let path = state.path.clone();
        let (_, rows) = run_blocking(move || read_artifact(&path)).await?;
        Ok(rows.into_iter().skip(from).collect())
    }

    async fn open_session(&self, identity: AccountIdentity) -> Result<SessionState, SinkError> {
        let dir = self.data_dir.clone();
        let stamp = now_civil().format("%Y%m%d_%H%M%S").to_string();
        let path = run_blocking(move || reserve_artifact(&dir, &stamp)).await?;
        tracing::info!(
            path = %path.display(),
            account = %identity.account_id,
            "started buffer session"
        );
        Ok(SessionState {
            path,
            identity,
            columns: IndexSet::new(),
            rows: 0,
        })
    }
}

/// Reloads header and row count from the artifact after a failed write, so
/// the next append lines up with what is actually on disk.
async fn resync_session(state: &mut SessionState) {
    let path = state.path.clone();
    match run_blocking(move || read_artifact(&path)).await {
        Ok((header, rows)) => {
            state.columns = header.into_iter().collect();
            state.rows = rows.len();
            tracing::warn!(
                path = %state.path.display(),
                columns = state.columns.len(),
                rows = state.rows,
                "buffer session resynced from artifact after failed write"
            );
        }
        Err(e) => {
            tracing::error!(
                path = %state.path.display(),
                error = %e,
                "cannot resync buffer session"
            );
        }
    }
}

async fn run_blocking<T, F>(job: F) -> Result<T, SinkError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SinkError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| SinkError::Worker(e.to_string()))?
}

fn handle_of(state: &SessionState) -> SessionHandle {
    SessionHandle {
        path: state.path.clone(),
        identity: state.identity.clone(),
    }
}

/// Reads a whole artifact: its header and every row keyed by header column.
///
/// # Errors
///
/// Returns [`SinkError::BufferIo`] or [`SinkError::Csv`].
pub fn read_artifact(path: &Path) -> Result<(Vec<String>, Vec<HarvestRecord>), SinkError> {
    let csv_err = |source| SinkError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(|source| SinkError::BufferIo {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let header: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_owned)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let row: HarvestRecord = header
            .iter()
            .enumerate()
            .map(|(i, column)| (column.clone(), record.get(i).unwrap_or_default().to_owned()))
            .collect();
        rows.push(row);
    }
    Ok((header, rows))
}

fn reserve_artifact(dir: &Path, stamp: &str) -> Result<PathBuf, SinkError> {
    let io_err = |path: &Path, source| SinkError::BufferIo {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let mut index = 0u32;
    loop {
        let name = if index == 0 {
            format!("{stamp}_{ARTIFACT_SUFFIX}")
        } else {
            format!("{stamp}_{index:02}_{ARTIFACT_SUFFIX}")
        };
        let candidate = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => index += 1,
            Err(e) => return Err(io_err(&candidate, e)),
        }
    }
}

fn is_empty_file(path: &Path) -> Result<bool, SinkError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(source) => Err(SinkError::BufferIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Rewrites the artifact under the wider header, backfilling new columns
/// with empty values. A still-empty artifact is left alone.
fn migrate_header(path: &Path, columns: &IndexSet<String>) -> Result<(), SinkError> {
    if is_empty_file(path)? {
        return Ok(());
    }
    let (_, rows) = read_artifact(path)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let io_err = |source| SinkError::BufferIo {
        path: path.to_path_buf(),
        source,
    };
    let csv_err = |source| SinkError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let staged = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut writer = csv::Writer::from_writer(staged.as_file());
        writer.write_record(columns.iter()).map_err(csv_err)?;
        for row in &rows {
            writer
                .write_record(columns.iter().map(|c| row.get(c).unwrap_or_default()))
                .map_err(csv_err)?;
        }
        writer.flush().map_err(io_err)?;
    }
    staged.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn append_rows(
    path: &Path,
    columns: &IndexSet<String>,
    rows: &[HarvestRecord],
) -> Result<usize, SinkError> {
    let io_err = |source| SinkError::BufferIo {
        path: path.to_path_buf(),
        source,
    };
    let csv_err = |source| SinkError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let needs_header = is_empty_file(path)?;
    let file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if needs_header {
        writer.write_record(columns.iter()).map_err(csv_err)?;
    }
    for row in rows {
        writer
            .write_record(columns.iter().map(|c| row.get(c).unwrap_or_default()))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(io_err)?;
    Ok(rows.len())
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod tests;
