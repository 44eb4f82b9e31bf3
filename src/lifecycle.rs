//! Job lifecycle: the init/commit bracket around one run.

use std::fs;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::result_set::AggregateName;
use crate::sink::local_path;

pub const SUCCESS_MARKER: &str = "_SUCCESS";

pub trait JobLifecycle: Send + Sync {
    fn init(&mut self, job_name: &str) -> Result<()>;

    /// Called only after every aggregate was produced and written.
    fn commit(&mut self, written: &[AggregateName]) -> Result<()>;
}

/// Records the bracket through tracing only.
#[derive(Debug, Default)]
pub struct LoggingLifecycle {
    job_name: Option<String>,
    started: Option<Instant>,
}

impl JobLifecycle for LoggingLifecycle {
    fn init(&mut self, job_name: &str) -> Result<()> {
        info!(job = job_name, "Job started");
        self.job_name = Some(job_name.to_string());
        self.started = Some(Instant::now());
        Ok(())
    }

    fn commit(&mut self, written: &[AggregateName]) -> Result<()> {
        let job = self
            .job_name
            .as_deref()
            .ok_or_else(|| PipelineError::Lifecycle("commit before init".into()))?;
        let elapsed = self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0);
        info!(job, aggregates = written.len(), elapsed_secs = elapsed, "Job committed");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMarker {
    pub job_name: String,
    pub committed_at_ms: u64,
    pub aggregates: Vec<String>,
}

/// Writes a `_SUCCESS` marker under the output base on commit.
///
/// Any marker left by an earlier run is removed on init, so its presence
/// always means the latest run finished.
#[derive(Debug)]
pub struct MarkerLifecycle {
    output_location: String,
    inner: LoggingLifecycle,
}

impl MarkerLifecycle {
    pub fn new(output_location: impl Into<String>) -> Self {
        Self {
            output_location: output_location.into(),
            inner: LoggingLifecycle::default(),
        }
    }

    fn marker_path(&self) -> Result<std::path::PathBuf> {
        let base = local_path(&self.output_location)
            .map_err(|e| PipelineError::Lifecycle(e.to_string()))?;
        Ok(base.join(SUCCESS_MARKER))
    }
}

impl JobLifecycle for MarkerLifecycle {
    fn init(&mut self, job_name: &str) -> Result<()> {
        let marker = self.marker_path()?;
        if marker.exists() {
            fs::remove_file(&marker).map_err(|e| PipelineError::Lifecycle(e.to_string()))?;
        }
        self.inner.init(job_name)
    }

    fn commit(&mut self, written: &[AggregateName]) -> Result<()> {
        let marker = self.marker_path()?;
        let body = SuccessMarker {
            job_name: self.inner.job_name.clone().unwrap_or_default(),
            committed_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            aggregates: written.iter().map(|n| n.to_string()).collect(),
        };
        let json = serde_json::to_vec_pretty(&body)
            .map_err(|e| PipelineError::Lifecycle(e.to_string()))?;
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::Lifecycle(e.to_string()))?;
        }
        fs::write(&marker, json).map_err(|e| PipelineError::Lifecycle(e.to_string()))?;
        self.inner.commit(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_requires_init() {
        let mut lifecycle = LoggingLifecycle::default();
        assert!(matches!(
            lifecycle.commit(&[]),
            Err(PipelineError::Lifecycle(_))
        ));
    }

    #[test]
    fn marker_is_cleared_on_init_and_written_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_string_lossy().into_owned();
        let marker = dir.path().join(SUCCESS_MARKER);
        fs::write(&marker, b"stale").unwrap();

        let mut lifecycle = MarkerLifecycle::new(base);
        lifecycle.init("nightly").unwrap();
        assert!(!marker.exists());

        lifecycle
            .commit(&[AggregateName::CustomersByAge, AggregateName::TotalItemPrices])
            .unwrap();
        let body: SuccessMarker = serde_json::from_slice(&fs::read(&marker).unwrap()).unwrap();
        assert_eq!(body.job_name, "nightly");
        assert_eq!(body.aggregates, vec!["customers_by_age", "total_item_prices"]);
    }
}
