use std::error::Error;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

/// Which neighbors the light-merge stage waits for before it runs.
/// Seeding always uses the six face planes; the wider topology only
/// tightens the gate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeTopology {
    #[default]
    Faces6,
    Moore26,
}

/// Everything the pipeline is told at construction. No global statics;
/// loadable from TOML with per-field fallbacks to the defaults below.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunk_size_x: usize,
    pub chunk_size_y: usize,
    pub chunk_size_z: usize,
    /// World height in stacked chunks; chunk y outside `0..chunks_y` is
    /// out of bounds.
    pub chunks_y: usize,
    pub max_light: u8,
    /// Worker threads; 0 picks the machine's available parallelism.
    pub workers: usize,
    /// Failed stage attempts beyond the first before a flight is rejected.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base_ms: u64,
    /// How long a stage may sit blocked on unmet requirements. Zero fails
    /// a blocked stage at the first scheduler tick.
    pub requirement_deadline_ms: u64,
    pub merge_topology: MergeTopology,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size_x: 32,
            chunk_size_y: 64,
            chunk_size_z: 32,
            chunks_y: 4,
            max_light: 15,
            workers: 0,
            max_retries: 3,
            backoff_base_ms: 25,
            requirement_deadline_ms: 10_000,
            merge_topology: MergeTopology::Faces6,
        }
    }
}

impl PipelineConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    #[inline]
    pub fn chunk_size(&self) -> (usize, usize, usize) {
        (self.chunk_size_x, self.chunk_size_y, self.chunk_size_z)
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(8)
        }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    #[inline]
    pub fn requirement_deadline(&self) -> Duration {
        Duration::from_millis(self.requirement_deadline_ms)
    }
}
