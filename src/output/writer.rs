use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use super::cells::{render_value, table_reader, table_writer, MISSING_VALUE};
use crate::domain::{BatchLine, OutputRecord, METADATA_COLUMNS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Semicolon-delimited rows under a single header.
    Rows,
    /// One batch API request per line.
    Batch,
}

/// Appends results to one output file. Appends to the same path are
/// serialised process-wide, including across distinct writer values.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    path: PathBuf,
    mode: OutputMode,
}

impl ResultWriter {
    pub fn new(path: impl Into<PathBuf>, mode: OutputMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }

    pub fn rows(path: impl Into<PathBuf>) -> Self {
        Self::new(path, OutputMode::Rows)
    }

    pub fn batch(path: impl Into<PathBuf>) -> Self {
        Self::new(path, OutputMode::Batch)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn append_record(&self, record: &OutputRecord) -> io::Result<()> {
        let lock = path_lock(&self.path);
        let _guard = lock.lock();

        ensure_parent(&self.path)?;
        let existing = read_header(&self.path)?;
        let mut table = table_writer().from_writer(Vec::new());
        let columns = match existing {
            Some(header) => header,
            None => {
                let header = record.columns();
                table.write_record(&header)?;
                header
            }
        };
        // the trailing metadata columns are filled by position, never from the prediction
        let split = columns.len().saturating_sub(METADATA_COLUMNS.len());

        let dropped: Vec<&str> = record
            .prediction
            .keys()
            .filter(|key| !columns[..split].iter().any(|column| column == *key))
            .collect();
        if !dropped.is_empty() {
            warn!(
                path = %self.path.display(),
                fields = ?dropped,
                "message" = "champs absents de l'en-tête existant, ignorés"
            );
        }

        let row: Vec<String> = columns[..split]
            .iter()
            .map(|column| {
                record
                    .prediction
                    .get(column)
                    .map(render_value)
                    .unwrap_or_else(|| MISSING_VALUE.to_string())
            })
            .chain(record.metadata_values().into_iter().map(str::to_string))
            .collect();
        table.write_record(&row)?;
        let out = table.into_inner().map_err(|err| err.into_error())?;

        let mut file = open_append(&self.path)?;
        file.write_all(&out)?;
        file.flush()
    }

    pub fn append_batch_line(&self, line: &BatchLine) -> io::Result<()> {
        let lock = path_lock(&self.path);
        let _guard = lock.lock();

        ensure_parent(&self.path)?;
        let mut text = serde_json::to_string(line)?;
        text.push('\n');
        let mut file = open_append(&self.path)?;
        file.write_all(text.as_bytes())?;
        file.flush()
    }
}

fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = Lazy::new(Default::default);
    let key = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    LOCKS.lock().entry(key).or_default().clone()
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Header of an existing, non-empty output file.
fn read_header(path: &Path) -> io::Result<Option<Vec<String>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut reader = table_reader().from_reader(file);
    let header: Vec<String> = reader
        .headers()?
        .iter()
        .map(|column| column.trim_start_matches('\u{feff}').to_string())
        .collect();
    if header.iter().all(|column| column.trim().is_empty()) {
        return Ok(None);
    }
    Ok(Some(header))
}
