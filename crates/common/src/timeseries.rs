//! Append-only sample buffers and their CSV persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StageError, StageResult};

/// One logged value, timestamped relative to the session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub elapsed_ms: u64,
    pub value: f64,
}

/// Ordered samples plus the file they are saved to.
///
/// Not synchronised: the owning component wraps it in a lock and saves a
/// clone so the writer never holds that lock during file I/O.
#[derive(Debug, Clone)]
pub struct Timeseries {
    samples: Vec<Sample>,
    path: PathBuf,
}

impl Timeseries {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            samples: Vec::new(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Append a sample; elapsed times must never go backwards.
    pub fn append(&mut self, elapsed_ms: u64, value: f64) -> StageResult<()> {
        if let Some(last) = self.samples.last() {
            if elapsed_ms < last.elapsed_ms {
                return Err(StageError::NonMonotonic {
                    last: last.elapsed_ms,
                    next: elapsed_ms,
                });
            }
        }
        self.samples.push(Sample { elapsed_ms, value });
        Ok(())
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn last(&self) -> Option<Sample> {
        self.samples.last().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Write the full sequence to [`Self::path`], replacing any previous file.
    pub fn save(&self) -> StageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut wtr = csv::Writer::from_path(&self.path)?;
        for sample in &self.samples {
            wtr.serialize(sample)?;
        }
        wtr.flush()?;
        debug!(path = %self.path.display(), samples = self.samples.len(), "saved timeseries");
        Ok(())
    }

    /// Read back a file written by [`Self::save`].
    pub fn load(path: impl Into<PathBuf>) -> StageResult<Self> {
        let path = path.into();
        let mut rdr = csv::Reader::from_path(&path)?;
        let mut series = Timeseries::new(path);
        for row in rdr.deserialize() {
            let sample: Sample = row?;
            series.append(sample.elapsed_ms, sample.value)?;
        }
        Ok(series)
    }
}
