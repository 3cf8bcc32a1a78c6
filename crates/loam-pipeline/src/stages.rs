use loam_chunk::ChunkState;
use loam_world::{ChunkCoord, FACE_OFFSETS};

use crate::config::MergeTopology;

/// How a stage gathers its inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    /// The target chunk alone.
    Single,
    /// The target plus a neighborhood that must already be lit.
    Neighbors(MergeTopology),
}

/// One rung of the pipeline ladder. The worker picks the transform body by
/// `result`; the scheduler gates dispatch on `prerequisite`.
#[derive(Clone, Copy, Debug)]
pub struct StageSpec {
    pub name: &'static str,
    pub kind: StageKind,
    /// Minimum state every requirement must hold before dispatch.
    pub prerequisite: ChunkState,
    /// State committed when the stage body returns.
    pub result: ChunkState,
}

/// The stage that advances a chunk out of `state`, or `None` once the pool
/// has nothing left to do (the final Ready hop is a scheduler commit, not
/// a worker task).
pub fn stage_after(state: ChunkState, topology: MergeTopology) -> Option<StageSpec> {
    match state {
        ChunkState::Raw => Some(StageSpec {
            name: "generate",
            kind: StageKind::Single,
            prerequisite: ChunkState::Raw,
            result: ChunkState::Generated,
        }),
        ChunkState::Generated => Some(StageSpec {
            name: "light",
            kind: StageKind::Single,
            prerequisite: ChunkState::Generated,
            result: ChunkState::InternallyLit,
        }),
        ChunkState::InternallyLit => Some(StageSpec {
            name: "merge",
            kind: StageKind::Neighbors(topology),
            prerequisite: ChunkState::InternallyLit,
            result: ChunkState::LightMerged,
        }),
        ChunkState::LightMerged => Some(StageSpec {
            name: "deflate",
            kind: StageKind::Single,
            prerequisite: ChunkState::LightMerged,
            result: ChunkState::Deflated,
        }),
        ChunkState::Deflated | ChunkState::Ready => None,
    }
}

/// Positions this stage reads, the target first. Neighbors above the world
/// roof or below its floor do not exist and are never required.
pub fn requirements_of(
    spec: &StageSpec,
    position: ChunkCoord,
    chunks_y: usize,
) -> Vec<ChunkCoord> {
    let mut reqs = vec![position];
    match spec.kind {
        StageKind::Single => {}
        StageKind::Neighbors(MergeTopology::Faces6) => reqs.extend(
            position
                .face_neighbors()
                .into_iter()
                .filter(|n| in_vertical_bounds(n, chunks_y)),
        ),
        StageKind::Neighbors(MergeTopology::Moore26) => reqs.extend(
            position
                .moore_neighbors()
                .into_iter()
                .filter(|n| in_vertical_bounds(n, chunks_y)),
        ),
    }
    reqs
}

/// Face mask for the merge seed pass: true where an in-bounds neighbor must
/// supply its border planes, in `FACE_OFFSETS` order.
pub fn merge_required_faces(position: ChunkCoord, chunks_y: usize) -> [bool; 6] {
    let mut required = [true; 6];
    for (face, &(_, dy, _)) in FACE_OFFSETS.iter().enumerate() {
        let ncy = position.cy + dy;
        if ncy < 0 || ncy as usize >= chunks_y {
            required[face] = false;
        }
    }
    required
}

fn in_vertical_bounds(c: &ChunkCoord, chunks_y: usize) -> bool {
    c.cy >= 0 && (c.cy as usize) < chunks_y
}
