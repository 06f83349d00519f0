//! The workload driver: populates a set, spams it from many worker
//! threads with a configurable contains/add/remove mix, then checks the
//! post-join size law.
//!
//! Built on whichever backend is named on the command line, through the
//! shared `CuckooSet` trait, so the same driver logic exercises all three.

#[macro_use]
extern crate slog;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use slog::Drain;

use ccset::{CuckooSet, Error, LockedSet, SequentialSet, TransactionalSet};

/// Which backend to run the workload against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Sequential,
    Locked,
    Transactional,
}

impl Backend {
    fn name(self) -> &'static str {
        match self {
            Backend::Sequential => "sequential",
            Backend::Locked => "locked",
            Backend::Transactional => "transactional",
        }
    }

    fn parse(s: &str) -> Option<Backend> {
        match s {
            "sequential" => Some(Backend::Sequential),
            "locked" => Some(Backend::Locked),
            "transactional" => Some(Backend::Transactional),
            _ => None,
        }
    }

    fn all() -> [Backend; 3] {
        [Backend::Sequential, Backend::Locked, Backend::Transactional]
    }
}

/// Three non-negative weights over {contains, add, remove}, summing to 1.
#[derive(Clone, Copy, Debug)]
struct OpMix {
    contains: f64,
    add: f64,
    remove: f64,
}

impl Default for OpMix {
    fn default() -> OpMix {
        OpMix {
            contains: 0.8,
            add: 0.1,
            remove: 0.1,
        }
    }
}

#[derive(Clone, Debug)]
struct Config {
    num_threads: usize,
    num_initial_keys: u64,
    total_ops: u64,
    value_range: (u64, u64),
    populate_range: (u64, u64),
    op_mix: OpMix,
    backends: Vec<Backend>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            num_threads: 4,
            num_initial_keys: 1_000,
            total_ops: 40_000,
            value_range: (1, 10_000),
            populate_range: (1, 1_000),
            op_mix: OpMix::default(),
            backends: Backend::all().to_vec(),
        }
    }
}

impl Config {
    /// A tiny hand-rolled `--key=value` scanner over `std::env::args()`,
    /// deliberately dependency-light rather than pulling in a full
    /// argument-parsing framework for six knobs.
    fn from_args() -> Config {
        let mut config = Config::default();

        for arg in std::env::args().skip(1) {
            let mut parts = arg.splitn(2, '=');
            let (flag, value) = match (parts.next(), parts.next()) {
                (Some(flag), Some(value)) => (flag, value),
                _ => continue,
            };

            match flag {
                "--threads" => {
                    if let Ok(n) = value.parse() {
                        config.num_threads = n;
                    }
                }
                "--initial-keys" => {
                    if let Ok(n) = value.parse() {
                        config.num_initial_keys = n;
                    }
                }
                "--total-ops" => {
                    if let Ok(n) = value.parse() {
                        config.total_ops = n;
                    }
                }
                "--backend" => {
                    if let Some(b) = Backend::parse(value) {
                        config.backends = vec![b];
                    }
                }
                _ => {}
            }
        }

        config
    }
}

/// Per-run counters, updated by worker threads during the run and read
/// only by the driver thread after `join`.
#[derive(Default)]
struct Stats {
    contains_hits: AtomicU64,
    contains_misses: AtomicU64,
    adds_ok: AtomicU64,
    adds_failed: AtomicU64,
    removes_ok: AtomicU64,
    removes_failed: AtomicU64,
}

impl Stats {
    fn adds_ok(&self) -> u64 {
        self.adds_ok.load(Ordering::Relaxed)
    }

    fn removes_ok(&self) -> u64 {
        self.removes_ok.load(Ordering::Relaxed)
    }
}

/// A minimal linear-congruential generator: fast, deterministic per
/// thread, and avoids pulling a second `rand`-style dependency into the
/// hot per-op loop on top of the one `hashing` already uses for salts.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Rng {
        Rng(seed ^ 0x5DEE_CE66)
    }

    fn next_u64(&mut self) -> u64 {
        // Constants from Numerical Recipes' LCG.
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        self.0
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next_u64() % (hi - lo + 1)
    }
}

enum Op {
    Contains,
    Add,
    Remove,
}

fn pick_op(rng: &mut Rng, mix: OpMix) -> Op {
    let draw = rng.next_f64();
    if draw < mix.contains {
        Op::Contains
    } else if draw < mix.contains + mix.add {
        Op::Add
    } else {
        Op::Remove
    }
}

/// Runs `count` mixed ops against `set`, folding outcomes into `stats`.
/// Shared by both the single-threaded and the multi-threaded drivers below
/// so the op-dispatch logic lives in exactly one place.
fn run_ops<S: CuckooSet<u64>>(
    set: &S,
    stats: &Stats,
    rng: &mut Rng,
    count: u64,
    mix: OpMix,
    range: (u64, u64),
) {
    let (vlo, vhi) = range;
    for _ in 0..count {
        let key = rng.range(vlo, vhi);
        match pick_op(rng, mix) {
            Op::Contains => {
                if set.contains(&key) {
                    stats.contains_hits.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.contains_misses.fetch_add(1, Ordering::Relaxed);
                }
            }
            Op::Add => {
                if set.add(key) {
                    stats.adds_ok.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.adds_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Op::Remove => {
                if set.remove(&key) {
                    stats.removes_ok.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.removes_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn report_and_check(
    log: &slog::Logger,
    populated: usize,
    stats: &Stats,
    elapsed: std::time::Duration,
    observed_size: usize,
) -> Result<(), Error> {
    info!(log, "workload complete";
        "elapsed_ms" => elapsed.as_millis() as u64,
        "contains_hits" => stats.contains_hits.load(Ordering::Relaxed),
        "contains_misses" => stats.contains_misses.load(Ordering::Relaxed),
        "adds_ok" => stats.adds_ok(),
        "adds_failed" => stats.adds_failed.load(Ordering::Relaxed),
        "removes_ok" => stats.removes_ok(),
        "removes_failed" => stats.removes_failed.load(Ordering::Relaxed),
    );

    let expected_size = (populated as u64 + stats.adds_ok() - stats.removes_ok()) as usize;
    if expected_size != observed_size {
        return Err(Error::SizeInvariantViolated(expected_size, observed_size));
    }

    Ok(())
}

/// Multi-threaded driver for the concurrent backends. Requires
/// `S: Send + Sync` because the set is shared via `Arc` across worker
/// threads spawned below.
fn run_workload<S: CuckooSet<u64> + Send + Sync + 'static>(
    log: &slog::Logger,
    config: &Config,
) -> Result<(), Error> {
    let set = Arc::new(S::new(config.num_initial_keys.max(1) as usize));

    let (lo, hi) = config.populate_range;
    let initial: Vec<u64> = (0..config.num_initial_keys)
        .map(|i| lo + (i % (hi - lo + 1)))
        .collect();
    let populated = set.populate(&initial);
    debug!(log, "populated initial keys"; "requested" => initial.len(), "inserted" => populated);

    let stats = Arc::new(Stats::default());
    let per_thread = config.total_ops / config.num_threads as u64;
    let started = Instant::now();

    let mut handles = Vec::with_capacity(config.num_threads);
    for t in 0..config.num_threads {
        let set = set.clone();
        let stats = stats.clone();
        let mix = config.op_mix;
        let range = config.value_range;
        handles.push(thread::spawn(move || {
            let mut rng = Rng::new(t as u64);
            run_ops(&*set, &stats, &mut rng, per_thread, mix, range);
        }));
    }

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    let elapsed = started.elapsed();
    let observed_size = set.size();
    report_and_check(log, populated, &stats, elapsed, observed_size)
}

/// Single-threaded driver for the sequential backend. `SequentialSet`
/// wraps its state in a `RefCell`, which is never `Sync`, so it cannot be
/// shared across threads behind an `Arc` the way `run_workload` requires —
/// this runs the whole op stream directly on the calling thread instead,
/// matching the sequential backend's single-caller contract.
fn run_workload_sequential(log: &slog::Logger, config: &Config) -> Result<(), Error> {
    let set = SequentialSet::<u64>::new(config.num_initial_keys.max(1) as usize);

    let (lo, hi) = config.populate_range;
    let initial: Vec<u64> = (0..config.num_initial_keys)
        .map(|i| lo + (i % (hi - lo + 1)))
        .collect();
    let populated = set.populate(&initial);
    debug!(log, "populated initial keys"; "requested" => initial.len(), "inserted" => populated);

    let stats = Stats::default();
    let started = Instant::now();

    let mut rng = Rng::new(0);
    run_ops(
        &set,
        &stats,
        &mut rng,
        config.total_ops,
        config.op_mix,
        config.value_range,
    );

    let elapsed = started.elapsed();
    let observed_size = set.size();
    report_and_check(log, populated, &stats, elapsed, observed_size)
}

fn run_backend(log: &slog::Logger, config: &Config, backend: Backend) -> Result<(), Error> {
    let log = log.new(o!("backend" => backend.name()));
    match backend {
        Backend::Sequential => run_workload_sequential(&log, config),
        Backend::Locked => run_workload::<LockedSet<u64>>(&log, config),
        Backend::Transactional => run_workload::<TransactionalSet<u64>>(&log, config),
    }
}

fn main() {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    let log = slog::Logger::root(drain, o!());

    let config = Config::from_args();
    info!(log, "starting benchmark"; "threads" => config.num_threads, "total_ops" => config.total_ops);

    let mut failed = false;
    for backend in &config.backends {
        match run_backend(&log, &config, *backend) {
            Ok(()) => info!(log, "backend passed"; "backend" => backend.name()),
            Err(e) => {
                error!(log, "backend failed"; "backend" => backend.name(), "error" => %e);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
