use std::collections::HashMap;
use std::mem;

use loam_blocks::BlockId;

/// A run of identical blocks starting at linear cell `start` and extending
/// until the next run (or the end of the store).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    pub start: u32,
    pub palette_ix: u16,
}

/// Block storage for one chunk. Chunks are built and lit in dense form and
/// compacted to palette + run-length form before publication. Reads work the
/// same against either representation.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockStore {
    Dense(Vec<BlockId>),
    Packed {
        len: usize,
        palette: Vec<BlockId>,
        runs: Vec<Run>,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct DeflateStats {
    pub cells: usize,
    pub palette_len: usize,
    pub run_count: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

impl DeflateStats {
    #[inline]
    pub fn ratio(&self) -> f32 {
        if self.bytes_before == 0 {
            return 1.0;
        }
        self.bytes_after as f32 / self.bytes_before as f32
    }
}

impl BlockStore {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            BlockStore::Dense(blocks) => blocks.len(),
            BlockStore::Packed { len, .. } => *len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_packed(&self) -> bool {
        matches!(self, BlockStore::Packed { .. })
    }

    /// Block at linear cell `i`. Callers index within `0..len()`.
    #[inline]
    pub fn get(&self, i: usize) -> BlockId {
        match self {
            BlockStore::Dense(blocks) => blocks[i],
            BlockStore::Packed { palette, runs, .. } => {
                let r = runs.partition_point(|r| (r.start as usize) <= i) - 1;
                palette[runs[r].palette_ix as usize]
            }
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            BlockStore::Dense(blocks) => blocks.len() * mem::size_of::<BlockId>(),
            BlockStore::Packed { palette, runs, .. } => {
                palette.len() * mem::size_of::<BlockId>() + runs.len() * mem::size_of::<Run>()
            }
        }
    }

    /// Compact dense storage into palette + run form. Already-packed stores
    /// are left untouched and report a no-op.
    pub fn deflate(&mut self) -> DeflateStats {
        let cells = self.len();
        let bytes_before = self.heap_bytes();
        if let BlockStore::Dense(blocks) = self {
            let blocks = mem::take(blocks);
            let mut palette: Vec<BlockId> = Vec::new();
            let mut index: HashMap<BlockId, u16> = HashMap::new();
            let mut runs: Vec<Run> = Vec::new();
            for (i, id) in blocks.iter().enumerate() {
                let ix = *index.entry(*id).or_insert_with(|| {
                    palette.push(*id);
                    (palette.len() - 1) as u16
                });
                match runs.last() {
                    Some(last) if last.palette_ix == ix => {}
                    _ => runs.push(Run {
                        start: i as u32,
                        palette_ix: ix,
                    }),
                }
            }
            *self = BlockStore::Packed {
                len: blocks.len(),
                palette,
                runs,
            };
        }
        let (palette_len, run_count) = match self {
            BlockStore::Dense(_) => (0, 0),
            BlockStore::Packed { palette, runs, .. } => (palette.len(), runs.len()),
        };
        DeflateStats {
            cells,
            palette_len,
            run_count,
            bytes_before,
            bytes_after: self.heap_bytes(),
        }
    }
}
