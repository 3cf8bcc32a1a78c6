//! Chunk processing pipeline: a reactor thread turns position requests into
//! stage-ordered worker jobs, gates each stage on its cross-chunk
//! requirements, and publishes finished chunks to the result sink.
//!
//! All scheduling state lives on the reactor thread; the public handle talks
//! to it over channels, so waiter registration and resolution can never
//! race. Chunks transfer wholly into a worker for the duration of one stage
//! and back on commit, which keeps a single writer per chunk without any
//! per-cell locking.
#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod pool;
pub mod sink;
pub mod stages;

pub use config::{MergeTopology, PipelineConfig};
pub use errors::{FailureCause, PipelineFailure};
pub use sink::ResultSink;

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, select, unbounded,
};
use hashbrown::hash_map::Entry;
use hashbrown::{HashMap, HashSet};
use loam_blocks::BlockRegistry;
use loam_chunk::{Chunk, ChunkState, DeflateStats};
use loam_lighting::LightingStore;
use loam_world::{ChunkCoord, World};

use pool::{StageDone, StageFailure, StageJob, StageOutput, StageTask, WorkerPool};
use stages::{StageKind, merge_required_faces, requirements_of, stage_after};

/// Reactor idle wakeup, also the granularity of retry and deadline timers.
const TICK: Duration = Duration::from_millis(2);

type ReplySender = Sender<Result<Arc<Chunk>, PipelineFailure>>;

enum PipelineMessage {
    Request {
        position: ChunkCoord,
        priority: Option<u32>,
        reply: ReplySender,
    },
    Cancel {
        position: ChunkCoord,
    },
    Shutdown,
}

/// Awaitable handle for one requested position. Resolves once, to the
/// shared Ready chunk or the failure that ended its flight.
pub struct ChunkTicket {
    position: ChunkCoord,
    rx: Receiver<Result<Arc<Chunk>, PipelineFailure>>,
}

impl ChunkTicket {
    pub fn position(&self) -> ChunkCoord {
        self.position
    }

    pub fn wait(self) -> Result<Arc<Chunk>, PipelineFailure> {
        match self.rx.recv() {
            Ok(res) => res,
            Err(_) => Err(self.dropped()),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Arc<Chunk>, PipelineFailure>> {
        match self.rx.recv_timeout(timeout) {
            Ok(res) => Some(res),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(self.dropped())),
        }
    }

    pub fn try_poll(&self) -> Option<Result<Arc<Chunk>, PipelineFailure>> {
        match self.rx.try_recv() {
            Ok(res) => Some(res),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.dropped())),
        }
    }

    fn dropped(&self) -> PipelineFailure {
        PipelineFailure {
            position: self.position,
            stage: ChunkState::Raw,
            cause: FailureCause::Cancelled,
        }
    }
}

/// Min-order on (priority, morton key) over a max-heap.
struct ReadyItem {
    priority: u32,
    morton: u64,
    position: ChunkCoord,
}

impl PartialEq for ReadyItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.morton == other.morton
    }
}

impl Eq for ReadyItem {}

impl PartialOrd for ReadyItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.morton.cmp(&self.morton))
    }
}

/// One position's in-flight record. The chunk is present exactly when no
/// worker owns it; `goal` bounds how far the ladder runs before parking.
struct Flight {
    state: ChunkState,
    chunk: Option<Chunk>,
    goal: ChunkState,
    priority: u32,
    attempts: u32,
    waiters: Vec<ReplySender>,
    dependents: Vec<ChunkCoord>,
    blocked_on: HashSet<ChunkCoord>,
    queued: bool,
    running: bool,
    retry_at: Option<Instant>,
    blocked_since: Option<Instant>,
    cancel: Arc<AtomicBool>,
}

impl Flight {
    fn new(priority: u32, goal: ChunkState) -> Flight {
        Flight {
            state: ChunkState::Raw,
            chunk: None,
            goal,
            priority,
            attempts: 0,
            waiters: Vec::new(),
            dependents: Vec::new(),
            blocked_on: HashSet::new(),
            queued: false,
            running: false,
            retry_at: None,
            blocked_since: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StageStats {
    pub runs: u64,
    pub retries: u64,
    pub failures: u64,
    pub total_ms: u64,
}

/// Counter snapshot for progress reporting and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineStats {
    pub generate: StageStats,
    pub light: StageStats,
    pub merge: StageStats,
    pub deflate: StageStats,
    pub published: u64,
    pub failed: u64,
    pub deflate_bytes_in: u64,
    pub deflate_bytes_out: u64,
    pub queue_depth: usize,
    pub inflight: usize,
}

impl PipelineStats {
    /// Aggregate packed/dense size ratio over every committed deflate.
    pub fn deflate_ratio(&self) -> f64 {
        if self.deflate_bytes_in == 0 {
            return 1.0;
        }
        self.deflate_bytes_out as f64 / self.deflate_bytes_in as f64
    }
}

fn stage_slot(state: ChunkState) -> Option<usize> {
    match state {
        ChunkState::Generated => Some(0),
        ChunkState::InternallyLit => Some(1),
        ChunkState::LightMerged => Some(2),
        ChunkState::Deflated => Some(3),
        ChunkState::Raw | ChunkState::Ready => None,
    }
}

#[derive(Default)]
struct StatsShared {
    runs: [AtomicU64; 4],
    retries: [AtomicU64; 4],
    failures: [AtomicU64; 4],
    stage_ms: [AtomicU64; 4],
    published: AtomicU64,
    failed: AtomicU64,
    deflate_in: AtomicU64,
    deflate_out: AtomicU64,
}

impl StatsShared {
    fn record_run(&self, target: ChunkState, ms: u32) {
        if let Some(i) = stage_slot(target) {
            self.runs[i].fetch_add(1, Ordering::Relaxed);
            self.stage_ms[i].fetch_add(u64::from(ms), Ordering::Relaxed);
        }
    }

    fn record_retry(&self, target: ChunkState) {
        if let Some(i) = stage_slot(target) {
            self.retries[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_flight_failure(&self, stage: ChunkState) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(i) = stage_slot(stage) {
            self.failures[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn record_deflate(&self, st: &DeflateStats) {
        self.deflate_in
            .fetch_add(st.bytes_before as u64, Ordering::Relaxed);
        self.deflate_out
            .fetch_add(st.bytes_after as u64, Ordering::Relaxed);
    }

    fn snapshot(&self, queue_depth: usize, inflight: usize) -> PipelineStats {
        let stage = |i: usize| StageStats {
            runs: self.runs[i].load(Ordering::Relaxed),
            retries: self.retries[i].load(Ordering::Relaxed),
            failures: self.failures[i].load(Ordering::Relaxed),
            total_ms: self.stage_ms[i].load(Ordering::Relaxed),
        };
        PipelineStats {
            generate: stage(0),
            light: stage(1),
            merge: stage(2),
            deflate: stage(3),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deflate_bytes_in: self.deflate_in.load(Ordering::Relaxed),
            deflate_bytes_out: self.deflate_out.load(Ordering::Relaxed),
            queue_depth,
            inflight,
        }
    }
}

/// Public handle. Owns the reactor thread; dropping it shuts the pipeline
/// down and joins everything.
pub struct Pipeline {
    msg_tx: Sender<PipelineMessage>,
    states: Arc<Mutex<HashMap<ChunkCoord, ChunkState>>>,
    stats: Arc<StatsShared>,
    sink: Arc<ResultSink>,
    queued: Arc<AtomicUsize>,
    inflight: Arc<AtomicUsize>,
    closed: AtomicBool,
    reactor: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig, world: Arc<World>, reg: Arc<BlockRegistry>) -> Pipeline {
        let (msg_tx, msg_rx) = unbounded();
        let sink = Arc::new(ResultSink::new());
        let states = Arc::new(Mutex::new(HashMap::new()));
        let stats = Arc::new(StatsShared::default());
        let workers = cfg.worker_count();
        let pool = WorkerPool::new(workers, world.clone(), reg, cfg.max_light);
        let (queued, inflight) = pool.counter_handles();
        let reactor = Reactor {
            cfg,
            world,
            lighting: Arc::new(LightingStore::new()),
            pool,
            sink: sink.clone(),
            msg_rx,
            flights: HashMap::new(),
            ready: BinaryHeap::new(),
            plan_queue: VecDeque::new(),
            states: states.clone(),
            stats: stats.clone(),
            order: 0,
        };
        let handle = thread::Builder::new()
            .name("loam-reactor".into())
            .spawn(move || reactor.run())
            .expect("reactor thread");
        Pipeline {
            msg_tx,
            states,
            stats,
            sink,
            queued,
            inflight,
            closed: AtomicBool::new(false),
            reactor: Some(handle),
        }
    }

    /// Ask for `position` to be driven to Ready. Lower `priority` is served
    /// first; `None` means request order. A second request for an in-flight
    /// position attaches to the same run.
    pub fn request(&self, position: ChunkCoord, priority: Option<u32>) -> ChunkTicket {
        let (tx, rx) = bounded(1);
        let accepted = !self.closed.load(Ordering::Relaxed)
            && self
                .msg_tx
                .send(PipelineMessage::Request {
                    position,
                    priority,
                    reply: tx.clone(),
                })
                .is_ok();
        if !accepted {
            let _ = tx.send(Err(PipelineFailure {
                position,
                stage: ChunkState::Raw,
                cause: FailureCause::Cancelled,
            }));
        }
        ChunkTicket { position, rx }
    }

    /// Reject `position`'s waiters. The flight itself survives only if other
    /// flights still require it.
    pub fn cancel(&self, position: ChunkCoord) {
        let _ = self.msg_tx.send(PipelineMessage::Cancel { position });
    }

    pub fn subscribe(&self) -> Receiver<Arc<Chunk>> {
        self.sink.subscribe()
    }

    /// Last committed state for a position, if it is (or was) in flight.
    pub fn state_of(&self, position: ChunkCoord) -> Option<ChunkState> {
        self.states.lock().unwrap().get(&position).copied()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot(
            self.queued.load(Ordering::Relaxed),
            self.inflight.load(Ordering::Relaxed),
        )
    }

    /// Stop accepting work, reject everything pending, join the reactor.
    pub fn shutdown(&mut self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            let _ = self.msg_tx.send(PipelineMessage::Shutdown);
        }
        if let Some(handle) = self.reactor.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Reactor {
    cfg: PipelineConfig,
    world: Arc<World>,
    lighting: Arc<LightingStore>,
    pool: WorkerPool,
    sink: Arc<ResultSink>,
    msg_rx: Receiver<PipelineMessage>,
    flights: HashMap<ChunkCoord, Flight>,
    ready: BinaryHeap<ReadyItem>,
    plan_queue: VecDeque<ChunkCoord>,
    states: Arc<Mutex<HashMap<ChunkCoord, ChunkState>>>,
    stats: Arc<StatsShared>,
    order: u32,
}

impl Reactor {
    fn run(mut self) {
        let msg_rx = self.msg_rx.clone();
        let done_rx = self.pool.done_rx.clone();
        log::info!(
            target: "pipeline",
            "reactor up workers={} topology={:?}",
            self.pool.worker_count(),
            self.cfg.merge_topology
        );
        'main: loop {
            loop {
                match msg_rx.try_recv() {
                    Ok(msg) => {
                        if self.handle_message(msg) {
                            break 'main;
                        }
                    }
                    Err(_) => break,
                }
            }
            for done in done_rx.try_iter() {
                self.commit(done);
            }
            self.check_timers();
            self.run_plan_queue();
            self.dispatch_ready();
            select! {
                recv(msg_rx) -> msg => match msg {
                    Ok(msg) => {
                        if self.handle_message(msg) {
                            break 'main;
                        }
                    }
                    Err(_) => break 'main,
                },
                recv(done_rx) -> done => {
                    if let Ok(done) = done {
                        self.commit(done);
                    }
                }
                default(TICK) => {}
            }
        }
        self.drain();
    }

    fn handle_message(&mut self, msg: PipelineMessage) -> bool {
        match msg {
            PipelineMessage::Request {
                position,
                priority,
                reply,
            } => {
                self.handle_request(position, priority, reply);
                false
            }
            PipelineMessage::Cancel { position } => {
                self.handle_cancel(position);
                false
            }
            PipelineMessage::Shutdown => true,
        }
    }

    fn handle_request(&mut self, position: ChunkCoord, priority: Option<u32>, reply: ReplySender) {
        if !self.world.in_vertical_bounds(position.cy) {
            let _ = reply.send(Err(PipelineFailure {
                position,
                stage: ChunkState::Generated,
                cause: FailureCause::Generation(format!(
                    "chunk y {} outside world height {} chunks",
                    position.cy, self.world.chunks_y
                )),
            }));
            return;
        }
        let priority = priority.unwrap_or(self.order);
        self.order = self.order.saturating_add(1);
        match self.flights.entry(position) {
            Entry::Occupied(mut e) => {
                let f = e.get_mut();
                f.waiters.push(reply);
                if priority < f.priority {
                    f.priority = priority;
                }
                // a parked requirement resumes its ladder
                if f.goal < ChunkState::Ready {
                    f.goal = ChunkState::Ready;
                }
            }
            Entry::Vacant(v) => {
                let mut f = Flight::new(priority, ChunkState::Ready);
                f.waiters.push(reply);
                v.insert(f);
            }
        }
        self.plan_queue.push_back(position);
    }

    fn handle_cancel(&mut self, position: ChunkCoord) {
        let Some(flight) = self.flights.get_mut(&position) else {
            return;
        };
        flight.cancel.store(true, Ordering::Relaxed);
        let stage = flight.state.next().unwrap_or(flight.state);
        let failure = PipelineFailure {
            position,
            stage,
            cause: FailureCause::Cancelled,
        };
        for tx in flight.waiters.drain(..) {
            let _ = tx.send(Err(failure.clone()));
        }
        let keep = !flight.dependents.is_empty();
        if keep {
            // dependents still need its planes; a fresh flag lets the
            // retained flight run again
            flight.goal = ChunkState::InternallyLit;
            flight.cancel = Arc::new(AtomicBool::new(false));
        }
        if keep {
            self.plan_queue.push_back(position);
        } else {
            self.flights.remove(&position);
            self.states.lock().unwrap().remove(&position);
        }
        log::debug!(
            target: "pipeline",
            "cancel cx={} cy={} cz={} kept={}",
            position.cx, position.cy, position.cz, keep
        );
    }

    fn commit(&mut self, done: StageDone) {
        let StageDone {
            position,
            target,
            outcome,
            ms,
        } = done;
        match outcome {
            Ok(out) => {
                self.stats.record_run(target, ms);
                self.commit_success(position, target, out);
            }
            Err(fail) => self.handle_failure(position, target, fail),
        }
    }

    fn commit_success(&mut self, position: ChunkCoord, target: ChunkState, out: StageOutput) {
        let StageOutput {
            mut chunk,
            borders,
            deflate,
        } = out;
        chunk.state = target;
        let deps = {
            let Some(flight) = self.flights.get_mut(&position) else {
                // cancelled and evicted while the worker ran; drop the result
                return;
            };
            flight.running = false;
            flight.attempts = 0;
            flight.state = target;
            flight.chunk = Some(chunk);
            flight.blocked_since = None;
            flight.dependents.clone()
        };
        if let Some(lb) = borders {
            self.lighting.update_borders(position, lb);
        }
        if let Some(st) = deflate {
            self.stats.record_deflate(&st);
            log::trace!(
                target: "pipeline",
                "deflate cx={} cy={} cz={} bytes_before={} bytes_after={}",
                position.cx, position.cy, position.cz, st.bytes_before, st.bytes_after
            );
        }
        self.update_state_snapshot(position, target);
        log::debug!(
            target: "pipeline",
            "commit cx={} cy={} cz={} state={}",
            position.cx, position.cy, position.cz, target.as_str()
        );
        for dep in deps {
            if target >= ChunkState::InternallyLit {
                if let Some(df) = self.flights.get_mut(&dep) {
                    df.blocked_on.remove(&position);
                }
            }
            self.plan_queue.push_back(dep);
        }
        self.plan_queue.push_back(position);
    }

    fn handle_failure(&mut self, position: ChunkCoord, target: ChunkState, fail: StageFailure) {
        let StageFailure { cause, chunk } = fail;
        if cause.is_cancelled() {
            // abort from a raced per-position cancel: nothing was committed;
            // restart from Raw if the input chunk was consumed
            let Some(flight) = self.flights.get_mut(&position) else {
                return;
            };
            flight.running = false;
            if let Some(c) = chunk {
                flight.chunk = Some(c);
            }
            if flight.chunk.is_none() && flight.state > ChunkState::Raw {
                flight.state = ChunkState::Raw;
            }
            self.plan_queue.push_back(position);
            return;
        }
        let attempts = {
            let Some(flight) = self.flights.get_mut(&position) else {
                return;
            };
            flight.running = false;
            if let Some(c) = chunk {
                flight.chunk = Some(c);
            }
            flight.attempts += 1;
            flight.attempts
        };
        if !cause.retryable() || attempts > self.cfg.max_retries {
            self.fail_flight(position, target, cause);
        } else {
            self.stats.record_retry(target);
            let delay = self.cfg.backoff(attempts - 1);
            log::warn!(
                target: "pipeline",
                "stage {} failed cx={} cy={} cz={} attempt={} retry_in_ms={} cause={}",
                target.as_str(), position.cx, position.cy, position.cz,
                attempts, delay.as_millis(), cause
            );
            if let Some(flight) = self.flights.get_mut(&position) {
                flight.retry_at = Some(Instant::now() + delay);
            }
        }
    }

    /// Evict a flight and reject everything attached to it, cascading into
    /// dependents that were gated on this position.
    fn fail_flight(&mut self, position: ChunkCoord, stage: ChunkState, cause: FailureCause) {
        let Some(mut flight) = self.flights.remove(&position) else {
            return;
        };
        self.stats.record_flight_failure(stage);
        self.states.lock().unwrap().remove(&position);
        let failure = PipelineFailure {
            position,
            stage,
            cause: cause.clone(),
        };
        log::warn!(
            target: "pipeline",
            "flight failed cx={} cy={} cz={} stage={} cause={}",
            position.cx, position.cy, position.cz, stage.as_str(), failure.cause
        );
        for tx in flight.waiters.drain(..) {
            let _ = tx.send(Err(failure.clone()));
        }
        for dep in std::mem::take(&mut flight.dependents) {
            self.fail_dependent(dep, position, &cause);
        }
    }

    fn fail_dependent(&mut self, dep: ChunkCoord, requirement: ChunkCoord, cause: &FailureCause) {
        let stage = match self.flights.get(&dep) {
            Some(f) if f.blocked_on.contains(&requirement) => f.state.next().unwrap_or(f.state),
            _ => return,
        };
        self.fail_flight(
            dep,
            stage,
            FailureCause::Requirement {
                position: requirement,
                cause: Box::new(cause.clone()),
            },
        );
    }

    fn check_timers(&mut self) {
        let now = Instant::now();
        let due: Vec<ChunkCoord> = self
            .flights
            .iter()
            .filter(|(_, f)| f.retry_at.is_some_and(|t| t <= now))
            .map(|(p, _)| *p)
            .collect();
        for position in due {
            if let Some(f) = self.flights.get_mut(&position) {
                f.retry_at = None;
            }
            self.plan_queue.push_back(position);
        }
        let deadline = self.cfg.requirement_deadline();
        let stuck: Vec<(ChunkCoord, Vec<ChunkCoord>)> = self
            .flights
            .iter()
            .filter(|(_, f)| {
                !f.running
                    && !f.blocked_on.is_empty()
                    && f.blocked_since
                        .is_some_and(|t| now.duration_since(t) >= deadline)
            })
            .map(|(p, f)| {
                let mut waited_on: Vec<ChunkCoord> = f.blocked_on.iter().copied().collect();
                waited_on.sort_by_key(|c| c.morton_key());
                (*p, waited_on)
            })
            .collect();
        for (position, waited_on) in stuck {
            let stage = self
                .flights
                .get(&position)
                .and_then(|f| f.state.next())
                .unwrap_or(ChunkState::Ready);
            self.fail_flight(position, stage, FailureCause::Timeout { waited_on });
        }
    }

    fn run_plan_queue(&mut self) {
        while let Some(position) = self.plan_queue.pop_front() {
            self.plan_one(position);
        }
    }

    /// Work out the next move for one position: park at its goal, hand it
    /// to the ready heap, or record unmet requirements (spawning their
    /// flights). Recomputes requirement satisfaction from scratch, so it is
    /// safe to call at any point.
    fn plan_one(&mut self, position: ChunkCoord) {
        let (state, goal, busy, priority) = match self.flights.get(&position) {
            Some(f) => (
                f.state,
                f.goal,
                f.queued || f.running || f.retry_at.is_some(),
                f.priority,
            ),
            None => return,
        };
        if busy || state >= goal {
            return;
        }
        if state == ChunkState::Deflated {
            self.commit_ready(position);
            return;
        }
        let Some(spec) = stage_after(state, self.cfg.merge_topology) else {
            return;
        };
        let mut unmet: Vec<ChunkCoord> = Vec::new();
        if matches!(spec.kind, StageKind::Neighbors(_)) {
            for req in requirements_of(&spec, position, self.world.chunks_y) {
                if req == position {
                    continue;
                }
                let met = match self.flights.get(&req) {
                    Some(rf) => rf.state >= spec.prerequisite,
                    // processed and evicted; its planes stay published
                    None => self.lighting.contains(req),
                };
                if !met {
                    unmet.push(req);
                }
            }
        }
        if unmet.is_empty() {
            if let Some(f) = self.flights.get_mut(&position) {
                f.blocked_on.clear();
                f.blocked_since = None;
                f.queued = true;
                self.ready.push(ReadyItem {
                    priority: f.priority,
                    morton: position.morton_key(),
                    position,
                });
            }
            return;
        }
        for req in &unmet {
            self.ensure_requirement(*req, priority, spec.prerequisite, position);
        }
        if let Some(f) = self.flights.get_mut(&position) {
            f.blocked_on = unmet.into_iter().collect();
            if f.blocked_since.is_none() {
                f.blocked_since = Some(Instant::now());
            }
        }
    }

    /// Make sure a requirement position has a flight running to at least
    /// `prereq`, inheriting the dependent's priority.
    fn ensure_requirement(
        &mut self,
        req: ChunkCoord,
        priority: u32,
        prereq: ChunkState,
        dependent: ChunkCoord,
    ) {
        match self.flights.entry(req) {
            Entry::Occupied(mut e) => {
                let f = e.get_mut();
                if priority < f.priority {
                    f.priority = priority;
                }
                if !f.dependents.contains(&dependent) {
                    f.dependents.push(dependent);
                }
                if f.goal < prereq {
                    f.goal = prereq;
                    self.plan_queue.push_back(req);
                }
            }
            Entry::Vacant(v) => {
                let mut f = Flight::new(priority, prereq);
                f.dependents.push(dependent);
                v.insert(f);
                self.plan_queue.push_back(req);
            }
        }
    }

    fn dispatch_ready(&mut self) {
        while self.pool.queue_depth() + self.pool.inflight() < self.pool.worker_count() {
            let Some(item) = self.ready.pop() else {
                break;
            };
            let (queued, running, priority) = match self.flights.get(&item.position) {
                Some(f) => (f.queued, f.running, f.priority),
                None => continue,
            };
            if !queued || running {
                continue;
            }
            if item.priority != priority {
                // stale entry from before a priority change; requeue at the
                // flight's current slot
                self.ready.push(ReadyItem { priority, ..item });
                continue;
            }
            self.dispatch_one(item.position);
        }
    }

    fn dispatch_one(&mut self, position: ChunkCoord) {
        let chunks_y = self.world.chunks_y;
        let topology = self.cfg.merge_topology;
        let Some(flight) = self.flights.get_mut(&position) else {
            return;
        };
        flight.queued = false;
        let Some(spec) = stage_after(flight.state, topology) else {
            return;
        };
        let task = match spec.result {
            ChunkState::Generated => StageTask::Generate,
            ChunkState::InternallyLit => {
                let Some(chunk) = flight.chunk.take() else {
                    return;
                };
                StageTask::Light(chunk)
            }
            ChunkState::LightMerged => {
                let Some(chunk) = flight.chunk.take() else {
                    return;
                };
                let neighbors = self.lighting.get_neighbor_borders(position);
                let required = merge_required_faces(position, chunks_y);
                StageTask::Merge {
                    chunk,
                    neighbors,
                    required,
                }
            }
            ChunkState::Deflated => {
                let Some(chunk) = flight.chunk.take() else {
                    return;
                };
                StageTask::Deflate(chunk)
            }
            ChunkState::Raw | ChunkState::Ready => return,
        };
        flight.running = true;
        flight.blocked_since = None;
        let job = StageJob {
            position,
            task,
            cancel: flight.cancel.clone(),
        };
        log::debug!(
            target: "pipeline",
            "dispatch stage={} cx={} cy={} cz={}",
            spec.name, position.cx, position.cy, position.cz
        );
        self.pool.submit(job);
    }

    /// Terminal commit: the Deflated chunk becomes Ready, every waiter gets
    /// the shared Arc, the sink fans it out, and the flight is evicted.
    fn commit_ready(&mut self, position: ChunkCoord) {
        let Some(mut flight) = self.flights.remove(&position) else {
            return;
        };
        let Some(mut chunk) = flight.chunk.take() else {
            return;
        };
        chunk.state = ChunkState::Ready;
        let chunk = Arc::new(chunk);
        self.update_state_snapshot(position, ChunkState::Ready);
        self.stats.record_publish();
        for tx in flight.waiters.drain(..) {
            let _ = tx.send(Ok(Arc::clone(&chunk)));
        }
        self.sink.publish(&chunk);
        log::debug!(
            target: "pipeline",
            "ready cx={} cy={} cz={}",
            position.cx, position.cy, position.cz
        );
        for dep in flight.dependents {
            if let Some(df) = self.flights.get_mut(&dep) {
                df.blocked_on.remove(&position);
            }
            self.plan_queue.push_back(dep);
        }
    }

    fn update_state_snapshot(&self, position: ChunkCoord, state: ChunkState) {
        let mut map = self.states.lock().unwrap();
        map.entry(position)
            .and_modify(|s| {
                if state > *s {
                    *s = state;
                }
            })
            .or_insert(state);
    }

    /// Shutdown: flag every flight so in-flight floods abort, then reject
    /// all pending work. Nothing commits after this point.
    fn drain(&mut self) {
        for f in self.flights.values() {
            f.cancel.store(true, Ordering::Relaxed);
        }
        self.ready.clear();
        self.plan_queue.clear();
        let mut rejected = 0usize;
        // requests that raced the shutdown message still get an answer
        while let Ok(msg) = self.msg_rx.try_recv() {
            if let PipelineMessage::Request {
                position, reply, ..
            } = msg
            {
                let _ = reply.send(Err(PipelineFailure {
                    position,
                    stage: ChunkState::Raw,
                    cause: FailureCause::Cancelled,
                }));
                rejected += 1;
            }
        }
        for (position, mut flight) in self.flights.drain() {
            let stage = flight.state.next().unwrap_or(ChunkState::Ready);
            let failure = PipelineFailure {
                position,
                stage,
                cause: FailureCause::Cancelled,
            };
            for tx in flight.waiters.drain(..) {
                let _ = tx.send(Err(failure.clone()));
                rejected += 1;
            }
        }
        log::info!(target: "pipeline", "reactor drained rejected_waiters={}", rejected);
    }
}
