use loam_chunk::ChunkState;
use loam_lighting::LightingError;
use loam_world::ChunkCoord;
use thiserror::Error;

/// Why a stage attempt went down. Cloneable so one failure can fan out to
/// every waiter and every dependent flight.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FailureCause {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("light propagation failed: {0}")]
    LightPropagation(String),
    #[error("border planes missing for neighbor {0:?}")]
    MissingNeighbor(ChunkCoord),
    #[error("cancelled")]
    Cancelled,
    #[error("requirement deadline passed, still waiting on {waited_on:?}")]
    Timeout { waited_on: Vec<ChunkCoord> },
    #[error("requirement {position:?} failed: {cause}")]
    Requirement {
        position: ChunkCoord,
        cause: Box<FailureCause>,
    },
}

impl FailureCause {
    /// Only stage-local faults are worth another attempt. Cancellation is
    /// final, a missing border plane stays missing, and timeouts/requirement
    /// failures already consumed their flight's patience downstream.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            FailureCause::Generation(_) | FailureCause::LightPropagation(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FailureCause::Cancelled)
    }
}

impl From<LightingError> for FailureCause {
    fn from(err: LightingError) -> Self {
        match err {
            LightingError::Cancelled => FailureCause::Cancelled,
            LightingError::MissingNeighbor(coord) => FailureCause::MissingNeighbor(coord),
        }
    }
}

/// Terminal rejection delivered to every ticket waiting on a position.
/// `stage` is the state the failed stage would have committed.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("chunk {:?} failed at {}: {}", .position, .stage.as_str(), .cause)]
pub struct PipelineFailure {
    pub position: ChunkCoord,
    pub stage: ChunkState,
    pub cause: FailureCause,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stage_local_faults_are_retryable() {
        assert!(FailureCause::Generation("boom".into()).retryable());
        assert!(FailureCause::LightPropagation("seam".into()).retryable());
        assert!(!FailureCause::MissingNeighbor(ChunkCoord::new(1, 0, 0)).retryable());
        assert!(!FailureCause::Cancelled.retryable());
        assert!(
            !FailureCause::Timeout {
                waited_on: vec![ChunkCoord::new(1, 0, 0)]
            }
            .retryable()
        );
        assert!(
            !FailureCause::Requirement {
                position: ChunkCoord::new(1, 0, 0),
                cause: Box::new(FailureCause::Cancelled),
            }
            .retryable()
        );
    }

    #[test]
    fn lighting_errors_map_onto_causes() {
        assert_eq!(
            FailureCause::from(LightingError::Cancelled),
            FailureCause::Cancelled
        );
        let coord = ChunkCoord::new(0, 1, 0);
        assert_eq!(
            FailureCause::from(LightingError::MissingNeighbor(coord)),
            FailureCause::MissingNeighbor(coord)
        );
    }
}
