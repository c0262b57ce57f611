//! JSON exporter for recorded timelines.
//!
//! Writes one scenario run (every snapshot plus the verdict) to a file that
//! a presentation layer or a notebook can load offline.

use crate::runner::{ScenarioMetrics, ScenarioResult};
use crate::scenarios::Subsystem;
use rtlab_core::Timeline;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Complete export of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineExport {
    /// Scenario name
    pub scenario: String,

    pub subsystem: Subsystem,

    /// Seed used
    pub seed: u64,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,

    /// Snapshots in index order
    pub frames: Vec<serde_json::Value>,
}

impl TimelineExport {
    /// Creates an export container for a finished run.
    pub fn new(result: &ScenarioResult, frames: Vec<serde_json::Value>) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            subsystem: result.scenario.subsystem(),
            seed: result.seed,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            metrics: result.metrics.clone(),
            frames,
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Renders every snapshot of a timeline as JSON.
pub fn frames<S, A, V>(timeline: &Timeline<S, A, V>) -> serde_json::Result<Vec<serde_json::Value>>
where
    S: Serialize,
    A: Serialize,
    V: Serialize,
{
    timeline.iter().map(serde_json::to_value).collect()
}
