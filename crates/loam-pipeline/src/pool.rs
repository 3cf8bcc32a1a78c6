use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};
use loam_blocks::BlockRegistry;
use loam_chunk::{Chunk, ChunkState, DeflateStats, generate_chunk};
use loam_lighting::{LightBorders, LightingError, NeighborBorders, light_internal, merge_boundary_light};
use loam_world::{ChunkCoord, World};

use crate::errors::FailureCause;

/// One stage execution handed to a worker. The payload carries everything
/// the stage body reads; workers never touch scheduler state.
pub struct StageJob {
    pub position: ChunkCoord,
    pub task: StageTask,
    pub cancel: Arc<AtomicBool>,
}

/// The transform body plus its input, one variant per pool stage.
pub enum StageTask {
    Generate,
    Light(Chunk),
    Merge {
        chunk: Chunk,
        neighbors: NeighborBorders,
        required: [bool; 6],
    },
    Deflate(Chunk),
}

impl StageTask {
    pub fn target(&self) -> ChunkState {
        match self {
            StageTask::Generate => ChunkState::Generated,
            StageTask::Light(_) => ChunkState::InternallyLit,
            StageTask::Merge { .. } => ChunkState::LightMerged,
            StageTask::Deflate(_) => ChunkState::Deflated,
        }
    }
}

/// Outcome of one stage execution. A failed attempt returns the input chunk
/// only when the body left it untouched; aborted floods drop it.
pub struct StageDone {
    pub position: ChunkCoord,
    pub target: ChunkState,
    pub outcome: Result<StageOutput, StageFailure>,
    pub ms: u32,
}

pub struct StageOutput {
    pub chunk: Chunk,
    /// Face planes extracted after internal lighting, for the border store.
    pub borders: Option<LightBorders>,
    pub deflate: Option<DeflateStats>,
}

pub struct StageFailure {
    pub cause: FailureCause,
    pub chunk: Option<Chunk>,
}

fn run_stage_job(
    job: StageJob,
    world: &World,
    reg: &BlockRegistry,
    max_light: u8,
    tx: &Sender<StageDone>,
) {
    let StageJob {
        position,
        task,
        cancel,
    } = job;
    let target = task.target();
    let t0 = Instant::now();
    let outcome = match task {
        StageTask::Generate => {
            if cancel.load(Ordering::Relaxed) {
                Err(StageFailure {
                    cause: FailureCause::Cancelled,
                    chunk: None,
                })
            } else {
                let chunk = generate_chunk(world, reg, position);
                Ok(StageOutput {
                    chunk,
                    borders: None,
                    deflate: None,
                })
            }
        }
        StageTask::Light(mut chunk) => match light_internal(&mut chunk, reg, max_light, &cancel) {
            Ok(_) => {
                let borders = LightBorders::from_chunk(&chunk);
                Ok(StageOutput {
                    chunk,
                    borders: Some(borders),
                    deflate: None,
                })
            }
            Err(LightingError::Cancelled) => Err(StageFailure {
                cause: FailureCause::Cancelled,
                chunk: None,
            }),
            Err(err) => Err(StageFailure {
                cause: err.into(),
                chunk: Some(chunk),
            }),
        },
        StageTask::Merge {
            mut chunk,
            neighbors,
            required,
        } => match merge_boundary_light(&mut chunk, reg, &neighbors, required, &cancel) {
            Ok(_) => Ok(StageOutput {
                chunk,
                borders: None,
                deflate: None,
            }),
            Err(LightingError::Cancelled) => Err(StageFailure {
                cause: FailureCause::Cancelled,
                chunk: None,
            }),
            // plane presence is checked before any cell is written
            Err(err) => Err(StageFailure {
                cause: err.into(),
                chunk: Some(chunk),
            }),
        },
        StageTask::Deflate(mut chunk) => {
            if cancel.load(Ordering::Relaxed) {
                Err(StageFailure {
                    cause: FailureCause::Cancelled,
                    chunk: None,
                })
            } else {
                let stats = chunk.deflate();
                Ok(StageOutput {
                    chunk,
                    borders: None,
                    deflate: Some(stats),
                })
            }
        }
    };
    let ms = t0.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
    log::trace!(
        target: "worker",
        "stage={} cx={} cy={} cz={} ok={} ms={}",
        target.as_str(),
        position.cx,
        position.cy,
        position.cz,
        outcome.is_ok(),
        ms
    );
    let _ = tx.send(StageDone {
        position,
        target,
        outcome,
        ms,
    });
}

/// Bounded executor for stage bodies. The scheduler's heap does the
/// prioritisation; the job channel only ever holds what free workers can
/// take. Dropping the pool closes the job lane (`job_tx` precedes `_pool`
/// so worker loops end before the thread pool joins).
pub struct WorkerPool {
    job_tx: Sender<StageJob>,
    pub(crate) done_rx: Receiver<StageDone>,
    queued: Arc<AtomicUsize>,
    inflight: Arc<AtomicUsize>,
    workers: usize,
    _pool: Arc<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        world: Arc<World>,
        reg: Arc<BlockRegistry>,
        max_light: u8,
    ) -> WorkerPool {
        let (job_tx, job_rx) = unbounded::<StageJob>();
        let (done_tx, done_rx) = unbounded::<StageDone>();
        let queued = Arc::new(AtomicUsize::new(0));
        let inflight = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("loam-worker-{i}"))
                .build()
                .expect("worker pool"),
        );
        for _ in 0..workers {
            let rx = job_rx.clone();
            let tx = done_tx.clone();
            let q = queued.clone();
            let busy = inflight.clone();
            let world = world.clone();
            let reg = reg.clone();
            pool.spawn(move || {
                while let Ok(job) = rx.recv() {
                    q.fetch_sub(1, Ordering::Relaxed);
                    busy.fetch_add(1, Ordering::Relaxed);
                    run_stage_job(job, world.as_ref(), reg.as_ref(), max_light, &tx);
                    busy.fetch_sub(1, Ordering::Relaxed);
                }
            });
        }
        WorkerPool {
            job_tx,
            done_rx,
            queued,
            inflight,
            workers,
            _pool: pool,
        }
    }

    pub fn submit(&self, job: StageJob) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        if self.job_tx.send(job).is_err() {
            self.queued.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn try_drain(&self) -> Vec<StageDone> {
        self.done_rx.try_iter().collect()
    }

    #[inline]
    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub(crate) fn counter_handles(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (self.queued.clone(), self.inflight.clone())
    }
}
