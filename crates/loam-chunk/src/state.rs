/// Lifecycle of a chunk moving through the pipeline. States only ever
/// advance; each transition is applied exactly once per chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkState {
    Raw,
    Generated,
    InternallyLit,
    LightMerged,
    Deflated,
    Ready,
}

impl ChunkState {
    /// The state that follows this one, or `None` once terminal.
    #[inline]
    pub fn next(self) -> Option<ChunkState> {
        match self {
            ChunkState::Raw => Some(ChunkState::Generated),
            ChunkState::Generated => Some(ChunkState::InternallyLit),
            ChunkState::InternallyLit => Some(ChunkState::LightMerged),
            ChunkState::LightMerged => Some(ChunkState::Deflated),
            ChunkState::Deflated => Some(ChunkState::Ready),
            ChunkState::Ready => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkState::Raw => "raw",
            ChunkState::Generated => "generated",
            ChunkState::InternallyLit => "internally_lit",
            ChunkState::LightMerged => "light_merged",
            ChunkState::Deflated => "deflated",
            ChunkState::Ready => "ready",
        }
    }
}
