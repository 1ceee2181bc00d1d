//! Search driver: the worker pool, its barriers and the public
//! engine surface. The per-worker search itself lives in [`worker`].

mod worker;

use crate::handler::SearchHandler;
use crate::limits::Limiter;
use crate::nnue::Network;
use crate::score::MAX_DEPTH;
use crate::shogi::{generate_all, Move, MoveList, Position};
use crate::tt::{TranspositionTable, DEFAULT_TT_SIZE_MIB};
use parking_lot::{Condvar, Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::Instant;

pub use worker::ThreadData;

pub const DEFAULT_THREAD_COUNT: u32 = 1;
pub const THREAD_COUNT_RANGE: (u32, u32) = (1, 2048);
pub const DEFAULT_MULTI_PV: u32 = 1;

/// State shared for the whole engine lifetime.
pub(crate) struct EngineShared {
    pub(crate) tt: RwLock<TranspositionTable>,
    pub(crate) network: Mutex<Option<Arc<Network>>>,
    pub(crate) handler: Arc<dyn SearchHandler>,
    pub(crate) searching: Mutex<bool>,
}

/// Per-worker counters, padded so workers do not share lines.
#[repr(align(64))]
pub(crate) struct WorkerStats {
    pub(crate) nodes: AtomicU64,
    pub(crate) seldepth: AtomicI32,
}

impl WorkerStats {
    fn new() -> WorkerStats {
        WorkerStats {
            nodes: AtomicU64::new(0),
            seldepth: AtomicI32::new(0),
        }
    }
}

/// Everything a search hands to its workers.
pub(crate) struct SearchJob {
    pub(crate) root_pos: Position,
    pub(crate) key_history: Vec<u64>,
    pub(crate) root_moves: Vec<Move>,
    pub(crate) multi_pv: u32,
    pub(crate) max_depth: i32,
    pub(crate) infinite: bool,
    pub(crate) cute_chess: bool,
    pub(crate) silent: bool,
    pub(crate) start_time: Instant,
    pub(crate) network: Option<Arc<Network>>,
    pub(crate) newgame_gen: u64,
}

impl SearchJob {
    fn empty() -> SearchJob {
        SearchJob {
            root_pos: Position::startpos(),
            key_history: Vec::new(),
            root_moves: Vec::new(),
            multi_pv: 1,
            max_depth: MAX_DEPTH,
            infinite: false,
            cute_chess: false,
            silent: false,
            start_time: Instant::now(),
            network: None,
            newgame_gen: 0,
        }
    }
}

/// Pool-lifetime synchronisation; rebuilt whenever the thread count
/// changes so the barrier arities stay right.
pub(crate) struct PoolSync {
    pub(crate) reset_barrier: Barrier,
    pub(crate) idle_barrier: Barrier,
    pub(crate) search_end_barrier: Barrier,

    pub(crate) quit: AtomicBool,
    pub(crate) stop: AtomicBool,

    pub(crate) running: Mutex<u32>,
    pub(crate) stop_signal: Condvar,

    pub(crate) job: Mutex<SearchJob>,
    pub(crate) limiter: Mutex<Option<Limiter>>,

    pub(crate) stats: Vec<WorkerStats>,
}

struct Pool {
    sync: Arc<PoolSync>,
    handles: Vec<JoinHandle<()>>,
}

/// The parallel search driver.
pub struct Searcher {
    engine: Arc<EngineShared>,
    pool: Option<Pool>,
    target_multi_pv: u32,
    cute_chess: bool,
    newgame_gen: u64,
}

impl Searcher {
    pub fn new(tt_size_mib: usize, handler: Arc<dyn SearchHandler>) -> Searcher {
        let engine = Arc::new(EngineShared {
            tt: RwLock::new(TranspositionTable::new(tt_size_mib)),
            network: Mutex::new(None),
            handler,
            searching: Mutex::new(false),
        });
        let mut searcher = Searcher {
            engine,
            pool: None,
            target_multi_pv: DEFAULT_MULTI_PV,
            cute_chess: false,
            newgame_gen: 0,
        };
        searcher.set_thread_count(DEFAULT_THREAD_COUNT);
        searcher
    }

    pub fn with_default_tt(handler: Arc<dyn SearchHandler>) -> Searcher {
        Searcher::new(DEFAULT_TT_SIZE_MIB, handler)
    }

    /// Clear the TT and every worker's heuristic state.
    pub fn new_game(&mut self) {
        debug_assert!(!self.is_searching());
        {
            let mut tt = self.engine.tt.write();
            // finalisation zeroes the table anyway, don't clear twice
            if !tt.finalize() {
                tt.clear();
            }
        }
        // workers clear their tables when they see the new generation
        self.newgame_gen += 1;
    }

    /// Perform any deferred TT allocation now.
    pub fn ensure_ready(&mut self) {
        self.engine.tt.write().finalize();
    }

    pub fn set_thread_count(&mut self, thread_count: u32) {
        assert!(!self.is_searching());
        let thread_count = thread_count.max(1) as usize;

        self.stop_threads();

        let sync = Arc::new(PoolSync {
            reset_barrier: Barrier::new(thread_count + 1),
            idle_barrier: Barrier::new(thread_count + 1),
            search_end_barrier: Barrier::new(thread_count),
            quit: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            running: Mutex::new(0),
            stop_signal: Condvar::new(),
            job: Mutex::new(SearchJob::empty()),
            limiter: Mutex::new(None),
            stats: (0..thread_count).map(|_| WorkerStats::new()).collect(),
        });

        let handles = (0..thread_count)
            .map(|id| {
                let engine = Arc::clone(&self.engine);
                let sync = Arc::clone(&sync);
                std::thread::Builder::new()
                    .name(format!("kawasemi-worker-{id}"))
                    // deep lines keep a PV buffer per frame
                    .stack_size(8 * 1024 * 1024)
                    .spawn(move || worker::worker_main(engine, sync, id))
                    .expect("failed to spawn search worker")
            })
            .collect();

        self.pool = Some(Pool { sync, handles });
    }

    pub fn set_tt_size(&mut self, mib: usize) {
        assert!(!self.is_searching());
        self.engine.tt.write().resize(mib);
    }

    pub fn set_multi_pv(&mut self, multi_pv: u32) {
        assert!(!self.is_searching());
        self.target_multi_pv = multi_pv.max(1);
    }

    pub fn set_cute_chess_workaround(&mut self, enabled: bool) {
        assert!(!self.is_searching());
        self.cute_chess = enabled;
    }

    /// Load (or unload) the evaluation network.
    pub fn set_eval_file(&mut self, path: Option<&Path>) -> anyhow::Result<()> {
        assert!(!self.is_searching());
        let network = match path {
            Some(path) => Some(Arc::new(Network::load(path)?)),
            None => None,
        };
        *self.engine.network.lock() = network;
        Ok(())
    }

    /// Kick off a search. Returns once the workers are running; the
    /// best move is delivered through the handler.
    pub fn start_search(
        &mut self,
        pos: &Position,
        key_history: &[u64],
        start_time: Instant,
        infinite: bool,
        max_depth: i32,
        limiter: Option<Limiter>,
    ) {
        let Some(limiter) = limiter else {
            log::error!("missing limiter");
            return;
        };
        if self.is_searching() {
            log::error!("search started while already searching");
            return;
        }

        let mut root_moves = Vec::new();
        {
            let mut generated = MoveList::new();
            generate_all(&mut generated, pos);
            for &mv in &generated {
                if pos.is_legal(mv) {
                    root_moves.push(mv);
                }
            }
        }

        if root_moves.is_empty() {
            self.engine.handler.handle_no_legal_moves();
            return;
        }

        if pos.is_entering_kings_win() && self.engine.handler.handle_entering_kings_win() {
            return;
        }

        let pool = self.pool.as_ref().expect("worker pool exists");

        pool.sync.reset_barrier.wait();

        let mut searching = self.engine.searching.lock();

        let init_start = Instant::now();
        if self.engine.tt.write().finalize() {
            let ms = (init_start.elapsed().as_secs_f64() * 1000.0) as u64;
            self.engine.handler.print_info_string(&format!(
                "No newgame or isready before go, lost {ms} ms to TT initialization"
            ));
        }

        {
            let mut job = pool.sync.job.lock();
            job.multi_pv = self.target_multi_pv.min(root_moves.len() as u32);
            job.root_pos = pos.clone();
            job.key_history = key_history.to_vec();
            job.root_moves = root_moves;
            job.max_depth = max_depth.clamp(1, MAX_DEPTH);
            job.infinite = infinite;
            job.cute_chess = self.cute_chess;
            job.silent = false;
            job.start_time = start_time;
            job.network = self.engine.network.lock().clone();
            job.newgame_gen = self.newgame_gen;
        }
        *pool.sync.limiter.lock() = Some(limiter);

        for stats in &pool.sync.stats {
            stats.nodes.store(0, Ordering::Relaxed);
            stats.seldepth.store(0, Ordering::Relaxed);
        }

        pool.sync.stop.store(false, Ordering::Relaxed);
        *pool.sync.running.lock() = pool.sync.stats.len() as u32;

        *searching = true;
        drop(searching);

        pool.sync.idle_barrier.wait();
    }

    /// Request a stop and block until every worker has wound down.
    pub fn stop(&self) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        pool.sync.stop.store(true, Ordering::Relaxed);

        let mut running = pool.sync.running.lock();
        while *running > 0 {
            pool.sync.stop_signal.wait(&mut running);
        }
    }

    pub fn is_searching(&self) -> bool {
        *self.engine.searching.lock()
    }

    fn stop_threads(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.sync.quit.store(true, Ordering::Relaxed);
            pool.sync.reset_barrier.wait();
            pool.sync.idle_barrier.wait();
            for handle in pool.handles {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Searcher {
    fn drop(&mut self) {
        self.stop();
        self.stop_threads();
    }
}
