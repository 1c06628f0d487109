//! Snapshot artifact publishing
//!
//! Each rollup is written as its own CSV artifact (header + rows). A write
//! goes to `<name>.tmp` in the output directory, is fsynced, then renamed
//! over the final name, so a polling reader sees either the previous
//! complete file or the new complete file.
//!
//! Empty rollups are not written; whatever was published before stays.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::PublishError;
use crate::rollup::{HourlyRow, InstitutionRow, KpiRow, MonthlyRow, Rollups};

/// The four published artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    Kpis,
    Monthly,
    Institutions,
    Hourly,
}

impl Artifact {
    pub fn all() -> &'static [Artifact] {
        &[
            Artifact::Kpis,
            Artifact::Monthly,
            Artifact::Institutions,
            Artifact::Hourly,
        ]
    }

    /// File name the dashboard polls for.
    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Kpis => "dash_kpis_gerais.csv",
            Artifact::Monthly => "dash_analise_mes.csv",
            Artifact::Institutions => "dash_analise_inst.csv",
            Artifact::Hourly => "dash_analise_hora.csv",
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// What one publish call wrote and left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub written: Vec<Artifact>,
    pub skipped: Vec<Artifact>,
}

/// Writes rollups into a directory of CSV artifacts.
pub struct SnapshotPublisher {
    dir: PathBuf,
}

impl SnapshotPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_of(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    /// Publish every non-empty rollup, replacing the previous artifact.
    pub fn publish(&self, rollups: &Rollups) -> Result<PublishReport, PublishError> {
        if rollups.is_empty() {
            debug!(dir = %self.dir.display(), "Nothing aggregated yet, no artifacts written");
            return Ok(PublishReport {
                written: Vec::new(),
                skipped: Artifact::all().to_vec(),
            });
        }
        fs::create_dir_all(&self.dir).map_err(|e| PublishError::io(&self.dir, e))?;

        let mut report = PublishReport::default();
        self.write_artifact(Artifact::Kpis, rollups.kpis.as_slice(), &mut report)?;
        self.write_artifact(Artifact::Monthly, &rollups.monthly, &mut report)?;
        self.write_artifact(Artifact::Institutions, &rollups.institutions, &mut report)?;
        self.write_artifact(Artifact::Hourly, &rollups.hourly, &mut report)?;
        Ok(report)
    }

    fn write_artifact<T: Serialize>(
        &self,
        artifact: Artifact,
        rows: &[T],
        report: &mut PublishReport,
    ) -> Result<(), PublishError> {
        if rows.is_empty() {
            debug!(%artifact, "Empty rollup, keeping previous artifact");
            report.skipped.push(artifact);
            return Ok(());
        }

        let path = self.path_of(artifact);
        let tmp_path = self.dir.join(format!("{}.tmp", artifact.file_name()));

        let encoded = encode_csv(rows).map_err(|e| PublishError::csv(&path, e))?;

        // Atomic write: write to tmp, fsync, rename
        let written = write_synced(&tmp_path, &encoded)
            .and_then(|_| fs::rename(&tmp_path, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(PublishError::io(&path, e));
        }

        debug!(%artifact, rows = rows.len(), "Artifact published");
        report.written.push(artifact);
        Ok(())
    }
}

fn encode_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, csv::Error> {
    let mut buf = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    Ok(buf)
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Reads published artifacts the way the dashboard does.
///
/// A missing, partially visible or unparseable artifact reads as `None`:
/// data not yet available, to be retried on the next poll.
pub struct SnapshotReader {
    dir: PathBuf,
}

impl SnapshotReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn read_kpis(&self) -> Option<KpiRow> {
        self.read_rows(Artifact::Kpis)?.into_iter().next()
    }

    pub fn read_monthly(&self) -> Option<Vec<MonthlyRow>> {
        self.read_rows(Artifact::Monthly)
    }

    pub fn read_institutions(&self) -> Option<Vec<InstitutionRow>> {
        self.read_rows(Artifact::Institutions)
    }

    pub fn read_hourly(&self) -> Option<Vec<HourlyRow>> {
        self.read_rows(Artifact::Hourly)
    }

    /// Rows of `artifact`, or `None` when it is absent, empty or unreadable.
    pub fn read_rows<T: DeserializeOwned>(&self, artifact: Artifact) -> Option<Vec<T>> {
        let path = self.dir.join(artifact.file_name());
        let mut reader = match csv::Reader::from_path(&path) {
            Ok(reader) => reader,
            Err(e) => {
                debug!(%artifact, error = %e, "Artifact not available");
                return None;
            }
        };

        let rows: Result<Vec<T>, csv::Error> = reader.deserialize().collect();
        match rows {
            Ok(rows) if !rows.is_empty() => Some(rows),
            Ok(_) => None,
            Err(e) => {
                debug!(%artifact, error = %e, "Artifact unreadable");
                None
            }
        }
    }
}
