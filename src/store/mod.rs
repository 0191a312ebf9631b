pub mod result_line;

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

pub use result_line::ResultLine;

use crate::cnpj::Cnpj;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeEntry {
    Pending,
    Done,
    Error,
}

struct Inner {
    done: HashSet<String>,
    errored: HashSet<String>,
    results: File,
    done_log: File,
    error_log: csv::Writer<File>,
}

/// Durable done/error bookkeeping backed by three append-only files.
///
/// Every append is flushed before returning, so a killed process loses at most
/// the identifiers that were still in flight.
pub struct ResumeStore {
    inner: Mutex<Inner>,
    result_path: PathBuf,
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for appending", path.display()))
}

fn load_done(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let file = File::open(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut done = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let id = line.trim();
        if !id.is_empty() {
            done.insert(id.to_string());
        }
    }
    Ok(done)
}

fn load_errors(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut errored = HashSet::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("Malformed row in {}", path.display()))?;
        if let Some(id) = row.get(0).map(str::trim).filter(|id| !id.is_empty()) {
            errored.insert(id.to_string());
        }
    }
    Ok(errored)
}

impl ResumeStore {
    pub fn open(result_path: &Path, done_path: &Path, error_path: &Path) -> Result<Self> {
        let done = load_done(done_path)?;
        let errored: HashSet<String> = load_errors(error_path)?
            .into_iter()
            .filter(|id| !done.contains(id))
            .collect();

        info!(
            "Resume state: {} done, {} errored ({}, {})",
            done.len(),
            errored.len(),
            done_path.display(),
            error_path.display()
        );

        let inner = Inner {
            done,
            errored,
            results: open_append(result_path)?,
            done_log: open_append(done_path)?,
            error_log: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(open_append(error_path)?),
        };

        Ok(Self {
            inner: Mutex::new(inner),
            result_path: result_path.to_path_buf(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn entry(&self, id: &str) -> ResumeEntry {
        let inner = self.lock();
        if inner.done.contains(id) {
            ResumeEntry::Done
        } else if inner.errored.contains(id) {
            ResumeEntry::Error
        } else {
            ResumeEntry::Pending
        }
    }

    pub fn done_count(&self) -> usize {
        self.lock().done.len()
    }

    pub fn error_count(&self) -> usize {
        self.lock().errored.len()
    }

    /// Identifiers from `input` that still need work, in input order.
    ///
    /// With `retry_errors`, previously errored identifiers are reset to pending.
    pub fn pending(&self, input: &[Cnpj], retry_errors: bool) -> Vec<Cnpj> {
        let mut inner = self.lock();
        let mut pending = Vec::new();

        for cnpj in input {
            let id = cnpj.as_str();
            if inner.done.contains(id) {
                continue;
            }
            if inner.errored.contains(id) {
                if !retry_errors {
                    continue;
                }
                inner.errored.remove(id);
            }
            pending.push(cnpj.clone());
        }

        pending
    }

    /// Appends the result line, then marks the identifier done.
    pub fn record_done(&self, line: &ResultLine) -> Result<()> {
        let json = serde_json::to_string(line).context("Failed to serialize result line")?;
        let mut inner = self.lock();

        writeln!(inner.results, "{}", json)
            .and_then(|_| inner.results.flush())
            .with_context(|| format!("Failed to append to {}", self.result_path.display()))?;
        writeln!(inner.done_log, "{}", line.cnpj)
            .and_then(|_| inner.done_log.flush())
            .context("Failed to append to done file")?;

        inner.errored.remove(&line.cnpj);
        inner.done.insert(line.cnpj.clone());
        debug!("[{}] Marked done", line.cnpj);
        Ok(())
    }

    /// Appends an error row unless the identifier is already decided.
    ///
    /// Returns whether a row was written.
    pub fn record_error(&self, id: &str, reason: &str) -> Result<bool> {
        let mut inner = self.lock();
        if inner.done.contains(id) || inner.errored.contains(id) {
            return Ok(false);
        }

        let timestamp = Utc::now().to_rfc3339();
        inner
            .error_log
            .write_record([id, reason, timestamp.as_str()])
            .context("Failed to append to error file")?;
        inner.error_log.flush().context("Failed to flush error file")?;

        inner.errored.insert(id.to_string());
        debug!("[{}] Marked error: {}", id, reason);
        Ok(true)
    }
}
