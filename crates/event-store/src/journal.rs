//! JSON-lines journal: one committed event per line, flushed before the
//! append is acknowledged.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::errors::{EsError, EsErrorKind};
use crate::model::Event;

pub struct JournalWriter {
    path: PathBuf,
    file: File,
}

impl JournalWriter {
    pub fn open(path: &Path) -> Result<Self, EsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| EsErrorKind::JournalWrite(format!("{}: {err}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| EsErrorKind::JournalWrite(format!("{}: {err}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes all events as a single buffer so a batch lands in one write call.
    pub fn append(&mut self, events: &[Event]) -> Result<(), EsError> {
        let mut buf = Vec::with_capacity(events.len() * 256);
        for event in events {
            serde_json::to_writer(&mut buf, event)
                .map_err(|err| EsErrorKind::JournalWrite(err.to_string()))?;
            buf.push(b'\n');
        }
        self.file
            .write_all(&buf)
            .and_then(|_| self.file.flush())
            .map_err(|err| EsErrorKind::JournalWrite(err.to_string()))?;
        Ok(())
    }
}

/// Reads a journal back, checking that indices are contiguous from zero.
pub fn read_all(path: &Path) -> Result<Vec<Event>, EsError> {
    let file = File::open(path)
        .map_err(|err| EsErrorKind::JournalRead(format!("{}: {err}", path.display())))?;
    let mut events = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| EsErrorKind::JournalRead(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line)
            .map_err(|err| EsErrorKind::Corrupt(format!("line {}: {err}", line_no + 1)))?;
        let expected = events.len() as u64;
        if event.index != expected {
            return Err(EsErrorKind::Corrupt(format!(
                "line {}: index {} where {} was expected",
                line_no + 1,
                event.index,
                expected
            ))
            .into());
        }
        events.push(event);
    }
    Ok(events)
}
