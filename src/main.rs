use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use loam_blocks::BlockRegistry;
use loam_pipeline::{ChunkTicket, Pipeline, PipelineConfig, StageStats};
use loam_world::{ChunkCoord, World, WorldGenMode, WorldGenParams, load_params_from_path};

/// Drive the chunk pipeline over a square of positions around the origin
/// and report per-stage timings.
#[derive(Parser, Debug)]
#[command(name = "loam", version, about = "voxel chunk processing pipeline")]
struct Args {
    /// World seed.
    #[arg(long, default_value_t = 1337)]
    seed: i32,

    /// Chunk radius around the origin; requests a (2r+1)^2 column square.
    #[arg(long, default_value_t = 4)]
    radius: i32,

    /// Worker threads, overriding the config (0 = all cores).
    #[arg(long)]
    workers: Option<usize>,

    /// World height in stacked chunks, overriding the config.
    #[arg(long)]
    chunks_y: Option<usize>,

    /// Flat stone slab instead of noise terrain.
    #[arg(long)]
    flat: bool,

    /// Pipeline config TOML; absent fields fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Block palette TOML; defaults to the built-in palette.
    #[arg(long)]
    blocks: Option<PathBuf>,

    /// Terrain params TOML; absent fields keep their defaults.
    #[arg(long)]
    worldgen: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => match PipelineConfig::load_from_path(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!("failed to load config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(chunks_y) = args.chunks_y {
        cfg.chunks_y = chunks_y;
    }

    let reg = match &args.blocks {
        Some(path) => match BlockRegistry::load_from_path(path) {
            Ok(reg) => reg,
            Err(e) => {
                log::error!("failed to load blocks {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => BlockRegistry::with_defaults(),
    };

    let params = match &args.worldgen {
        Some(path) => match load_params_from_path(path) {
            Ok(params) => params,
            Err(e) => {
                log::error!("failed to load worldgen params {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => WorldGenParams::default(),
    };

    let mode = if args.flat {
        WorldGenMode::Flat { thickness: 8 }
    } else {
        WorldGenMode::Normal
    };
    let world = Arc::new(World::new(
        cfg.chunk_size(),
        cfg.chunks_y,
        args.seed,
        mode,
        params,
    ));
    log::info!(
        "world seed={} chunk={}x{}x{} chunks_y={} workers={}",
        args.seed,
        cfg.chunk_size_x,
        cfg.chunk_size_y,
        cfg.chunk_size_z,
        cfg.chunks_y,
        cfg.worker_count()
    );

    let chunks_y = cfg.chunks_y as i32;
    let mut pipeline = Pipeline::new(cfg, world, Arc::new(reg));

    let updates = pipeline.subscribe();
    let sink_thread = std::thread::spawn(move || {
        let mut seen = 0usize;
        while let Ok(chunk) = updates.recv() {
            seen += 1;
            log::debug!(
                target: "sink",
                "ready cx={} cy={} cz={} occupancy={:?}",
                chunk.coord.cx, chunk.coord.cy, chunk.coord.cz, chunk.occupancy
            );
        }
        seen
    });

    let t0 = Instant::now();
    let mut tickets: Vec<ChunkTicket> = Vec::new();
    for cy in 0..chunks_y {
        for cz in -args.radius..=args.radius {
            for cx in -args.radius..=args.radius {
                let ring = cx.abs().max(cz.abs()) as u32;
                tickets.push(pipeline.request(ChunkCoord::new(cx, cy, cz), Some(ring)));
            }
        }
    }
    let total = tickets.len();
    log::info!("requested {} chunks (radius {})", total, args.radius);

    let mut ready = 0usize;
    let mut failed = 0usize;
    for ticket in tickets {
        match ticket.wait() {
            Ok(_) => ready += 1,
            Err(err) => {
                failed += 1;
                log::error!("request failed: {err}");
            }
        }
        let resolved = ready + failed;
        if resolved % 64 == 0 && resolved < total {
            let s = pipeline.stats();
            log::info!(
                "progress {}/{} published={} queue={} inflight={}",
                resolved, total, s.published, s.queue_depth, s.inflight
            );
        }
    }
    let elapsed = t0.elapsed();

    let stats = pipeline.stats();
    let stage_line = |name: &str, s: StageStats| {
        let avg = if s.runs > 0 {
            s.total_ms as f64 / s.runs as f64
        } else {
            0.0
        };
        log::info!(
            target: "perf",
            "stage={} runs={} retries={} failures={} avg_ms={:.2}",
            name, s.runs, s.retries, s.failures, avg
        );
    };
    stage_line("generate", stats.generate);
    stage_line("light", stats.light);
    stage_line("merge", stats.merge);
    stage_line("deflate", stats.deflate);
    log::info!(
        target: "perf",
        "deflate_ratio={:.3} bytes_in={} bytes_out={}",
        stats.deflate_ratio(), stats.deflate_bytes_in, stats.deflate_bytes_out
    );
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        stats.published as f64 / secs
    } else {
        0.0
    };
    log::info!(
        "done ready={} failed={} published={} elapsed_ms={} chunks_per_s={:.1}",
        ready, failed, stats.published, elapsed.as_millis(), rate
    );

    pipeline.shutdown();
    drop(pipeline);
    let seen = sink_thread.join().expect("sink listener");
    log::debug!(target: "sink", "listener saw {} chunks", seen);

    if failed > 0 {
        std::process::exit(1);
    }
}
