//! Attendance ledger: who was marked present, and when.
//!
//! Persisted as CSV with the header `Name,Time`. A name appears at most once
//! for the lifetime of the file; marking someone already present is a no-op
//! that touches nothing on disk.
//!
//! Unlike the gallery, a ledger that cannot be read is replaced by a fresh
//! empty one. Attendance can be retaken; enrolled faces cannot.

use crate::gallery::write_atomically;
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const NAME_COLUMN: &str = "Name";
pub const TIME_COLUMN: &str = "Time";

/// Timestamp layout used in the `Time` column.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("refusing to record an empty name")]
    EmptyName,
    #[error("ledger is missing required column {0:?}")]
    MalformedLedger(&'static str),
    #[error("ledger csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("ledger i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEntry {
    pub name: String,
    /// Local wall-clock time, formatted with [`TIME_FORMAT`].
    pub time: String,
}

/// Ordered attendance entries, at most one per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: Vec<AttendanceEntry>,
}

/// Where a ledger goes after every change.
pub trait LedgerSink {
    fn persist(&mut self, ledger: &Ledger) -> Result<(), LedgerError>;
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[AttendanceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact, case-sensitive lookup.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Mark `name` present now. See [`Ledger::mark_present_at`].
    pub fn mark_present<S>(&mut self, name: &str, sink: &mut S) -> Result<bool, LedgerError>
    where
        S: LedgerSink + ?Sized,
    {
        self.mark_present_at(name, Local::now().naive_local(), sink)
    }

    /// Append `name` with timestamp `at` and persist the whole ledger.
    ///
    /// Returns `false` without writing if `name` is already present. If the
    /// write fails the entry is rolled back so memory and disk agree.
    pub fn mark_present_at<S>(
        &mut self,
        name: &str,
        at: NaiveDateTime,
        sink: &mut S,
    ) -> Result<bool, LedgerError>
    where
        S: LedgerSink + ?Sized,
    {
        if name.trim().is_empty() {
            return Err(LedgerError::EmptyName);
        }
        if self.contains(name) {
            tracing::debug!(name, "already marked present");
            return Ok(false);
        }

        self.entries.push(AttendanceEntry {
            name: name.to_string(),
            time: at.format(TIME_FORMAT).to_string(),
        });

        if let Err(e) = sink.persist(self) {
            self.entries.pop();
            return Err(e);
        }

        tracing::info!(name, time = %at.format(TIME_FORMAT), "marked present");
        Ok(true)
    }
}

/// CSV file holding the ledger.
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
}

impl LedgerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the ledger, falling back to an empty one if the file is absent,
    /// unreadable, or missing a required column.
    pub fn load(&self) -> Ledger {
        if !self.path.exists() {
            return Ledger::new();
        }
        match self.try_load() {
            Ok(ledger) => {
                tracing::info!(path = %self.path.display(), entries = ledger.len(), "loaded ledger");
                ledger
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ledger unreadable; starting a fresh one"
                );
                Ledger::new()
            }
        }
    }

    fn try_load(&self) -> Result<Ledger, LedgerError> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or(LedgerError::MalformedLedger(name))
        };
        let name_idx = column(NAME_COLUMN)?;
        let time_idx = column(TIME_COLUMN)?;

        let mut entries = Vec::new();
        for row in reader.records() {
            let row = row?;
            let name = row.get(name_idx).unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            entries.push(AttendanceEntry {
                name: name.to_string(),
                time: row.get(time_idx).unwrap_or_default().to_string(),
            });
        }
        Ok(Ledger { entries })
    }

    fn encode(ledger: &Ledger) -> Result<Vec<u8>, LedgerError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([NAME_COLUMN, TIME_COLUMN])?;
        for entry in ledger.entries() {
            writer.write_record([entry.name.as_str(), entry.time.as_str()])?;
        }
        writer
            .into_inner()
            .map_err(|e| LedgerError::Csv(csv::Error::from(e.into_error())))
    }
}

impl LedgerSink for LedgerFile {
    fn persist(&mut self, ledger: &Ledger) -> Result<(), LedgerError> {
        let bytes = Self::encode(ledger)?;
        write_atomically(&self.path, &bytes)
            .map_err(|source| LedgerError::Io { path: self.path.clone(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;

    #[derive(Default)]
    struct CountingSink {
        writes: usize,
        fail: bool,
    }

    impl LedgerSink for CountingSink {
        fn persist(&mut self, _ledger: &Ledger) -> Result<(), LedgerError> {
            if self.fail {
                return Err(LedgerError::Io {
                    path: PathBuf::from("memory"),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                });
            }
            self.writes += 1;
            Ok(())
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_mark_present_appends_formatted_entry() {
        let mut ledger = Ledger::new();
        let mut sink = CountingSink::default();

        assert!(ledger.mark_present_at("Bob", at(9, 5, 7), &mut sink).unwrap());

        assert_eq!(
            ledger.entries(),
            &[AttendanceEntry { name: "Bob".into(), time: "2024-03-05 09:05:07".into() }]
        );
        assert_eq!(sink.writes, 1);
    }

    #[test]
    fn test_mark_present_is_idempotent() {
        let mut ledger = Ledger::new();
        let mut sink = CountingSink::default();

        ledger.mark_present("Bob", &mut sink).unwrap();
        let after_first = ledger.clone();
        assert!(!ledger.mark_present("Bob", &mut sink).unwrap());

        assert_eq!(ledger, after_first);
        assert_eq!(ledger.len(), 1);
        assert_eq!(sink.writes, 1);
    }

    #[test]
    fn test_names_compare_exactly() {
        let mut ledger = Ledger::new();
        let mut sink = CountingSink::default();

        ledger.mark_present_at("bob", at(9, 0, 0), &mut sink).unwrap();
        ledger.mark_present_at("Bob", at(9, 0, 1), &mut sink).unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(sink.writes, 2);
    }

    #[test]
    fn test_empty_name_rejected_without_write() {
        let mut ledger = Ledger::new();
        let mut sink = CountingSink::default();

        let err = ledger.mark_present("  ", &mut sink).unwrap_err();
        assert!(matches!(err, LedgerError::EmptyName));
        assert!(ledger.is_empty());
        assert_eq!(sink.writes, 0);
    }

    #[test]
    fn test_failed_write_rolls_back_entry() {
        let mut ledger = Ledger::new();
        let mut sink = CountingSink { fail: true, ..Default::default() };

        assert!(ledger.mark_present("Bob", &mut sink).is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = LedgerFile::new(dir.path().join("attendance.csv"));
        let mut ledger = Ledger::new();

        ledger.mark_present_at("Bob", at(8, 0, 0), &mut file).unwrap();
        ledger.mark_present_at("Smith, Jane", at(8, 1, 0), &mut file).unwrap();

        let text = fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            text,
            "Name,Time\nBob,2024-03-05 08:00:00\n\"Smith, Jane\",2024-03-05 08:01:00\n"
        );
        assert_eq!(file.load(), ledger);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = LedgerFile::new(dir.path().join("attendance.csv"));
        assert!(file.load().is_empty());
    }

    #[test]
    fn test_missing_time_column_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "Name,Room\nBob,101\n").unwrap();

        let ledger = LedgerFile::new(&path).load();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_ragged_rows_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "Name,Time\nBob,2024-03-05 08:00:00,extra\n").unwrap();

        assert!(LedgerFile::new(&path).load().is_empty());
    }

    #[test]
    fn test_extra_columns_and_order_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "Time,Room,Name\n2024-03-05 08:00:00,101,Bob\n").unwrap();

        let ledger = LedgerFile::new(&path).load();
        assert!(ledger.contains("Bob"));
        assert_eq!(ledger.entries()[0].time, "2024-03-05 08:00:00");
    }

    #[test]
    fn test_recovered_ledger_is_rewritten_on_next_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "garbage\n").unwrap();

        let mut file = LedgerFile::new(&path);
        let mut ledger = file.load();
        ledger.mark_present_at("Bob", at(8, 0, 0), &mut file).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "Name,Time\nBob,2024-03-05 08:00:00\n");
    }
}
