//! Per-worker search: iterative deepening with aspiration windows
//! around a PVS negamax, and the quiescence search underneath it.

use super::{EngineShared, PoolSync, SearchJob};
use crate::correction::CorrectionHistoryTable;
use crate::eval;
use crate::handler::{DisplayScore, ScoreBound, SearchInfo};
use crate::history::{history_bonus, ContHandle, HistoryTables};
use crate::movepick::{MovePicker, Stage};
use crate::nnue::{NnueState, NnueUpdates};
use crate::pv::PvList;
use crate::score::{
    Score, MAX_DEPTH, SCORE_INF, SCORE_MATE, SCORE_MAX_MATE, SCORE_NONE, SCORE_WIN,
};
use crate::shogi::{see, Move, Position, SennichiteStatus, Square};
use crate::tt::{Flag, ProbedEntry, TranspositionTable};
use once_cell::sync::Lazy;
use smallvec::SmallVec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Seconds before aspiration-window retries get reported.
const WIDENING_REPORT_DELAY: f64 = 1.5;

const LMP_TABLE_SIZE: usize = 32;

const LMP_TABLE: [[i32; LMP_TABLE_SIZE]; 2] = {
    let mut table = [[0; LMP_TABLE_SIZE]; 2];
    let mut improving = 0;
    while improving < 2 {
        let mut depth = 0;
        while depth < LMP_TABLE_SIZE {
            table[improving][depth] = (4 + 2 * (depth * depth) as i32) / (2 - improving as i32);
            depth += 1;
        }
        improving += 1;
    }
    table
};

const LMR_TABLE_MOVES: usize = 64;

// [depth][move index]
static LMR_TABLE: Lazy<Box<[[i32; LMR_TABLE_MOVES]; MAX_DEPTH as usize + 1]>> = Lazy::new(|| {
    const BASE: f64 = 0.5;
    const DIVISOR: f64 = 2.5;

    let mut table = Box::new([[0; LMR_TABLE_MOVES]; MAX_DEPTH as usize + 1]);
    for depth in 1..=MAX_DEPTH as usize {
        for move_number in 1..LMR_TABLE_MOVES {
            let ln_depth = (depth as f64).ln();
            let ln_move_number = (move_number as f64).ln();
            table[depth][move_number] = (BASE + ln_depth * ln_move_number / DIVISOR) as i32;
        }
    }
    table
});

#[inline]
fn draw_score(nodes: u64) -> Score {
    2 - (nodes % 4) as Score
}

#[inline]
fn is_win(score: Score) -> bool {
    score.abs() > SCORE_WIN
}

#[derive(Clone)]
pub(crate) struct RootMove {
    pub(crate) display_score: Score,
    pub(crate) score: Score,
    pub(crate) upperbound: bool,
    pub(crate) lowerbound: bool,
    pub(crate) seldepth: i32,
    pub(crate) pv: PvList,
}

impl RootMove {
    fn new(mv: Move) -> RootMove {
        let mut pv = PvList::new();
        pv.moves[0] = mv;
        pv.len = 1;
        RootMove {
            display_score: -SCORE_INF,
            score: -SCORE_INF,
            upperbound: false,
            lowerbound: false,
            seldepth: 0,
            pv,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct StackFrame {
    pub(crate) mv: Move,
    pub(crate) static_eval: Score,
    pub(crate) excluded: Move,
    pub(crate) reduction: i32,
}

impl Default for StackFrame {
    fn default() -> Self {
        StackFrame {
            mv: Move::NULL,
            static_eval: SCORE_NONE,
            excluded: Move::NULL,
            reduction: 0,
        }
    }
}

/// Everything a worker owns across searches.
pub struct ThreadData {
    id: usize,

    max_depth: i32,
    root_pos: Position,
    key_history: Vec<u64>,

    root_depth: i32,
    depth_completed: i32,
    pv_idx: u32,
    multi_pv: u32,
    infinite: bool,
    cute_chess: bool,
    silent: bool,
    start_time: Instant,
    newgame_gen: u64,

    root_moves: Vec<RootMove>,
    stack: Vec<StackFrame>,
    conthist: Vec<Option<ContHandle>>,

    history: HistoryTables,
    corrhist: CorrectionHistoryTable,
    nnue: NnueState,
}

impl ThreadData {
    fn new(id: usize) -> ThreadData {
        ThreadData {
            id,
            max_depth: MAX_DEPTH,
            root_pos: Position::startpos(),
            key_history: Vec::with_capacity(1024),
            root_depth: 0,
            depth_completed: 0,
            pv_idx: 0,
            multi_pv: 1,
            infinite: false,
            cute_chess: false,
            silent: false,
            start_time: Instant::now(),
            newgame_gen: 0,
            root_moves: Vec::new(),
            stack: vec![StackFrame::default(); MAX_DEPTH as usize + 1],
            conthist: vec![None; MAX_DEPTH as usize + 1],
            history: HistoryTables::new(),
            corrhist: CorrectionHistoryTable::new(),
            nnue: NnueState::new(),
        }
    }

    fn prepare(&mut self, job: &SearchJob) {
        if self.newgame_gen != job.newgame_gen {
            self.newgame_gen = job.newgame_gen;
            self.history.clear();
            self.corrhist.clear();
        }

        self.root_pos = job.root_pos.clone();
        self.key_history.clear();
        self.key_history.extend_from_slice(&job.key_history);

        self.max_depth = job.max_depth;
        self.multi_pv = job.multi_pv;
        self.infinite = job.infinite;
        self.cute_chess = job.cute_chess;
        self.silent = job.silent;
        self.start_time = job.start_time;

        self.root_depth = 0;
        self.depth_completed = 0;
        self.pv_idx = 0;

        self.root_moves = job.root_moves.iter().map(|&mv| RootMove::new(mv)).collect();

        self.stack.fill(StackFrame::default());
        self.conthist.fill(None);

        self.nnue.reset(&job.root_pos, job.network.clone());
    }

    #[inline]
    fn is_main(&self) -> bool {
        self.id == 0
    }

    fn find_root_move(&self, mv: Move) -> Option<usize> {
        (self.pv_idx as usize..self.root_moves.len())
            .find(|&idx| self.root_moves[idx].pv.moves[0] == mv)
    }
}

pub(crate) fn worker_main(engine: Arc<EngineShared>, sync: Arc<PoolSync>, id: usize) {
    let mut td = ThreadData::new(id);

    loop {
        sync.reset_barrier.wait();
        sync.idle_barrier.wait();

        if sync.quit.load(Ordering::Relaxed) {
            return;
        }

        {
            let job = sync.job.lock();
            td.prepare(&job);
        }

        let tt = engine.tt.read();
        let mut ctx = SearchContext {
            engine: &engine,
            sync: &sync,
            tt: &tt,
            td: &mut td,
        };
        ctx.run_search();
    }
}

struct SearchContext<'a> {
    engine: &'a EngineShared,
    sync: &'a PoolSync,
    tt: &'a TranspositionTable,
    td: &'a mut ThreadData,
}

impl SearchContext<'_> {
    #[inline]
    fn has_stopped(&self) -> bool {
        self.sync.stop.load(Ordering::Relaxed)
    }

    #[inline]
    fn nodes(&self) -> u64 {
        self.sync.stats[self.td.id].nodes.load(Ordering::Relaxed)
    }

    #[inline]
    fn inc_nodes(&self) {
        self.sync.stats[self.td.id]
            .nodes
            .fetch_add(1, Ordering::Relaxed);
    }

    fn total_nodes(&self) -> u64 {
        self.sync
            .stats
            .iter()
            .map(|stats| stats.nodes.load(Ordering::Relaxed))
            .sum()
    }

    #[inline]
    fn seldepth(&self) -> i32 {
        self.sync.stats[self.td.id].seldepth.load(Ordering::Relaxed)
    }

    #[inline]
    fn update_seldepth(&self, value: i32) {
        let stats = &self.sync.stats[self.td.id];
        if value > stats.seldepth.load(Ordering::Relaxed) {
            stats.seldepth.store(value, Ordering::Relaxed);
        }
    }

    fn limiter_stop_hard(&self) -> bool {
        let nodes = self.nodes();
        self.sync
            .limiter
            .lock()
            .as_ref()
            .is_some_and(|limiter| limiter.stop_hard(nodes))
    }

    fn limiter_stop_soft(&self) -> bool {
        let nodes = self.nodes();
        self.sync
            .limiter
            .lock()
            .as_ref()
            .is_some_and(|limiter| limiter.stop_soft(nodes))
    }

    fn limiter_update(&self, depth: i32, best_move: Move) {
        if let Some(limiter) = self.sync.limiter.lock().as_mut() {
            limiter.update(depth, best_move);
        }
    }

    fn limiter_add_move_nodes(&self, mv: Move, nodes: u64) {
        if let Some(limiter) = self.sync.limiter.lock().as_mut() {
            limiter.add_move_nodes(mv, nodes);
        }
    }

    fn apply_move(&mut self, ply: i32, pos: &Position, mv: Move) -> Position {
        let td = &mut *self.td;
        td.stack[ply as usize].mv = mv;
        td.conthist[ply as usize] = Some(td.history.cont_handle(pos, mv));
        td.key_history.push(pos.key());

        let next = pos.apply_move(mv);
        let updates = NnueUpdates::for_move(pos, &next, mv);
        td.nnue.push(&next, &updates);
        next
    }

    fn undo_move(&mut self) {
        self.td.key_history.pop();
        self.td.nnue.pop();
    }

    fn apply_null_move(&mut self, ply: i32, pos: &Position) -> Position {
        let td = &mut *self.td;
        td.stack[ply as usize].mv = Move::NULL;
        td.conthist[ply as usize] = None;
        td.key_history.push(pos.key());
        pos.apply_null_move()
    }

    fn undo_null_move(&mut self) {
        self.td.key_history.pop();
    }

    /// Iterative deepening driver, one call per `go` per worker.
    fn run_search(&mut self) {
        debug_assert!(!self.td.root_moves.is_empty());

        let root_pos = self.td.root_pos.clone();
        let mut root_pv = PvList::new();

        let mut depth = 1;
        loop {
            self.td.root_depth = depth;

            let mut pv_idx = 0;
            while pv_idx < self.td.multi_pv {
                self.td.pv_idx = pv_idx;
                self.sync.stats[self.td.id]
                    .seldepth
                    .store(0, Ordering::Relaxed);

                let mut window = 20;

                let mut alpha = -SCORE_INF;
                let mut beta = SCORE_INF;

                if depth >= 3 {
                    alpha = (self.td.root_moves[0].score - window).max(-SCORE_INF);
                    beta = (self.td.root_moves[0].score + window).min(SCORE_INF);
                }

                let mut reduction = 0;

                loop {
                    let root_depth = (depth - reduction).max(1);

                    let score = self.search::<true, true>(
                        &root_pos,
                        &mut root_pv,
                        root_depth,
                        0,
                        alpha,
                        beta,
                        false,
                    );

                    self.td.root_moves[pv_idx as usize..]
                        .sort_by(|a, b| b.score.cmp(&a.score));

                    if self.has_stopped() {
                        break;
                    }

                    if score > alpha && score < beta {
                        break;
                    }

                    if self.td.is_main() {
                        let time = self.td.start_time.elapsed().as_secs_f64();
                        if time >= WIDENING_REPORT_DELAY {
                            self.report_single(pv_idx as usize, depth, time);
                        }
                    }

                    if score <= alpha {
                        reduction = 0;
                        alpha = (score - window).max(-SCORE_INF);
                    } else {
                        // score >= beta
                        reduction = (reduction + 1).min(3);
                        beta = (score + window).min(SCORE_INF);
                    }

                    window += window;
                }

                self.td.root_moves.sort_by(|a, b| b.score.cmp(&a.score));

                if self.has_stopped() {
                    break;
                }

                pv_idx += 1;
            }

            if self.has_stopped() {
                break;
            }

            self.td.depth_completed = depth;

            if depth >= self.td.max_depth {
                break;
            }

            if self.td.is_main() {
                self.limiter_update(depth, self.td.root_moves[0].pv.first());

                if self.limiter_stop_soft() {
                    break;
                }

                self.report(depth, self.td.start_time.elapsed().as_secs_f64());
            }

            depth += 1;
        }

        // an infinite go only concludes on an explicit stop
        if self.td.is_main() && self.td.infinite {
            while !self.has_stopped() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }

        if self.td.is_main() {
            let mut searching = self.engine.searching.lock();

            self.sync.stop.store(true, Ordering::Relaxed);
            self.arrive_search_end();

            self.final_report(self.td.start_time.elapsed().as_secs_f64());
            self.tt.age();

            *searching = false;
        } else {
            self.arrive_search_end();
        }
    }

    fn arrive_search_end(&self) {
        {
            let mut running = self.sync.running.lock();
            *running -= 1;
            self.sync.stop_signal.notify_all();
        }
        self.sync.search_end_barrier.wait();
    }

    fn search<const PV: bool, const ROOT: bool>(
        &mut self,
        pos: &Position,
        pv: &mut PvList,
        depth: i32,
        ply: i32,
        alpha: Score,
        beta: Score,
        expected_cutnode: bool,
    ) -> Score {
        debug_assert!((0..=MAX_DEPTH).contains(&ply));
        debug_assert!(ROOT || ply > 0);
        debug_assert!(!ROOT || ply == 0);
        debug_assert!(PV || alpha == beta - 1);
        debug_assert!(!PV || !expected_cutnode);
        debug_assert!(PV || !ROOT);

        if self.has_stopped() {
            return 0;
        }

        if !ROOT && self.td.is_main() && self.td.root_depth > 1 && self.limiter_stop_hard() {
            self.sync.stop.store(true, Ordering::Relaxed);
            return 0;
        }

        let mut alpha = alpha;
        let mut beta = beta;
        let mut depth = depth;

        if !ROOT {
            // mate-distance pruning
            alpha = alpha.max(-SCORE_MATE + ply);
            beta = beta.min(SCORE_MATE - ply - 1);

            if alpha >= beta {
                return alpha;
            }
        }

        if depth <= 0 {
            return self.qsearch::<PV>(pos, ply, alpha, beta);
        }

        self.inc_nodes();

        if PV {
            self.update_seldepth(ply + 1);
        }

        if ply >= MAX_DEPTH {
            return if pos.is_in_check() {
                0
            } else {
                let td = &*self.td;
                eval::corrected_static_eval(pos, &td.nnue, &td.corrhist, ply)
            };
        }

        let excluded = self.td.stack[ply as usize].excluded;

        let mut tt_entry = ProbedEntry::default();

        if excluded.is_null() {
            self.tt.probe(&mut tt_entry, pos.key(), ply);

            if !PV
                && tt_entry.depth >= depth
                && (tt_entry.flag == Flag::Exact
                    || tt_entry.flag == Flag::UpperBound && tt_entry.score <= alpha
                    || tt_entry.flag == Flag::LowerBound && tt_entry.score >= beta)
            {
                return tt_entry.score;
            }

            // internal iterative reduction
            if depth >= 3 && tt_entry.mv.is_null() {
                depth -= 1;
            }

            self.td.stack[ply as usize].static_eval = if pos.is_in_check() {
                SCORE_NONE
            } else {
                let td = &*self.td;
                eval::corrected_static_eval(pos, &td.nnue, &td.corrhist, ply)
            };
        }

        let static_eval = self.td.stack[ply as usize].static_eval;
        let tt_pv = tt_entry.pv || PV;

        let complexity = if tt_entry.flag == Flag::Exact
            || tt_entry.flag == Flag::UpperBound && tt_entry.score <= static_eval
            || tt_entry.flag == Flag::LowerBound && tt_entry.score >= static_eval
        {
            (static_eval - tt_entry.score).abs()
        } else {
            0
        };

        let tt_move = if ROOT && self.td.root_depth > 1 {
            self.td.root_moves[self.td.pv_idx as usize].pv.moves[0]
        } else {
            tt_entry.mv
        };

        let improving = if pos.is_in_check() {
            false
        } else if ply > 1 && self.td.stack[ply as usize - 2].static_eval != SCORE_NONE {
            static_eval > self.td.stack[ply as usize - 2].static_eval
        } else if ply > 3 && self.td.stack[ply as usize - 4].static_eval != SCORE_NONE {
            static_eval > self.td.stack[ply as usize - 4].static_eval
        } else {
            true
        };

        if !tt_pv && !pos.is_in_check() && excluded.is_null() && complexity <= 20 {
            // a heavily reduced parent with healthy evals on both
            // sides of the move is worth less depth here too
            if !ROOT
                && depth >= 2
                && self.td.stack[ply as usize - 1].reduction >= 1
                && static_eval + self.td.stack[ply as usize - 1].static_eval >= 200
            {
                depth -= 1;
            }

            // reverse futility
            if depth <= 10 && static_eval - 80 * (depth - improving as i32) >= beta {
                return static_eval;
            }

            // razoring
            if depth <= 4 && alpha.abs() < 2000 && static_eval + 300 * depth <= alpha {
                let score = self.qsearch::<false>(pos, ply, alpha, alpha + 1);
                if score <= alpha {
                    return score;
                }
            }

            // null move
            if depth >= 4
                && static_eval >= beta
                && !self.td.stack[ply as usize - 1].mv.is_null()
            {
                let r = 3 + depth / 5;

                let mut null_pv = PvList::new();
                let new_pos = self.apply_null_move(ply, pos);
                let score = -self.search::<false, false>(
                    &new_pos,
                    &mut null_pv,
                    depth - r,
                    ply + 1,
                    -beta,
                    -beta + 1,
                    !expected_cutnode,
                );
                self.undo_null_move();

                if score >= beta {
                    return if score > SCORE_WIN { beta } else { score };
                }
            }
        }

        let mut best_move = Move::NULL;
        let mut best_score = -SCORE_INF;

        let mut tt_flag = Flag::UpperBound;

        let mut picker = MovePicker::main(pos, tt_move, ply);

        let mut captures_tried: SmallVec<[Move; 64]> = SmallVec::new();
        let mut non_captures_tried: SmallVec<[Move; 64]> = SmallVec::new();

        let mut legal_moves: u32 = 0;
        let mut child_pv = PvList::new();

        loop {
            let mv = picker.next(&self.td.history, &self.td.conthist);
            if mv.is_null() {
                break;
            }
            debug_assert!(pos.is_pseudolegal(mv));

            if mv == excluded {
                continue;
            }

            if ROOT {
                if self.td.find_root_move(mv).is_none() {
                    continue;
                }
                debug_assert!(pos.is_legal(mv));
            } else if !pos.is_legal(mv) {
                continue;
            }

            let base_lmr = LMR_TABLE[depth as usize]
                [(legal_moves as usize).min(LMR_TABLE_MOVES - 1)];
            let history_score = if pos.is_capture(mv) {
                0
            } else {
                self.td.history.main_non_capture_score(mv)
            };

            if !ROOT && best_score > -SCORE_WIN {
                // late move pruning
                if legal_moves as i32
                    >= LMP_TABLE[improving as usize][(depth as usize).min(LMP_TABLE_SIZE - 1)]
                {
                    picker.skip_non_captures();
                }

                let see_threshold = if pos.is_capture(mv) {
                    -100 * depth * depth
                } else {
                    -20 * depth * depth
                };
                if !see::see(pos, mv, see_threshold) {
                    continue;
                }

                // quiet futility
                if depth <= 4
                    && !pos.is_in_check()
                    && alpha < 2000
                    && !pos.is_capture(mv)
                    && static_eval + 150 + 100 * depth <= alpha
                {
                    continue;
                }
            }

            if PV {
                child_pv.clear();
            }

            let prev_nodes = self.nodes();

            legal_moves += 1;

            let mut extension: i32 = 0;

            if !ROOT && ply < self.td.root_depth * 2 && mv == tt_move && excluded.is_null() {
                if depth >= 7 && tt_entry.depth >= depth - 3 && tt_entry.flag != Flag::UpperBound
                {
                    // singular verification with the TT move excluded
                    let s_beta = (tt_entry.score - depth * 4 / 3).max(-SCORE_INF + 1);
                    let s_depth = (depth - 1) / 2;

                    self.td.stack[ply as usize].excluded = mv;
                    let score = self.search::<false, false>(
                        pos,
                        &mut child_pv,
                        s_depth,
                        ply,
                        s_beta - 1,
                        s_beta,
                        expected_cutnode,
                    );
                    self.td.stack[ply as usize].excluded = Move::NULL;

                    if score < s_beta {
                        extension = 1;
                    } else if s_beta >= beta {
                        // multicut
                        return s_beta;
                    } else if tt_entry.score >= beta {
                        extension = -1;
                    } else if expected_cutnode {
                        extension = -1;
                    }
                } else if depth <= 7
                    && !pos.is_in_check()
                    && static_eval <= alpha - 26
                    && tt_entry.flag == Flag::LowerBound
                {
                    extension = 1;
                }
            }

            self.tt.prefetch(pos.key_after(mv));

            let new_pos = self.apply_move(ply, pos, mv);
            let sennichite = new_pos.test_sennichite(self.td.cute_chess, &self.td.key_history);

            let gives_check = new_pos.is_in_check();

            let mut new_depth = depth - 1;

            let mut score: Score = 0;
            let mut skip_search = false;

            match sennichite {
                SennichiteStatus::Win => {
                    // illegal perpetual
                    self.undo_move();
                    legal_moves -= 1;
                    continue;
                }
                SennichiteStatus::Draw => {
                    score = draw_score(self.nodes());
                    skip_search = true;
                }
                SennichiteStatus::None => {
                    if pos.is_entering_kings_win() {
                        score = SCORE_MATE - ply - 1;
                        skip_search = true;
                    }
                }
            }

            if !skip_search {
                if extension == 0 && gives_check {
                    extension = 1;
                }

                new_depth += extension;

                let mut searched = false;

                if depth >= 2
                    && legal_moves >= 3 + 2 * u32::from(ROOT)
                    && !gives_check
                    && picker.stage() >= Stage::NonCaptures
                {
                    let mut r = base_lmr;

                    r += i32::from(!PV);
                    r -= i32::from(pos.is_in_check());
                    r -= i32::from(
                        mv.is_drop()
                            && Square::chebyshev(mv.to(), pos.king_sq(pos.stm().flip())) < 3,
                    );
                    r += i32::from(!improving);
                    r -= history_score / 8192;

                    let reduced = (new_depth - r).max(1).min(new_depth - 1);
                    self.td.stack[ply as usize].reduction = new_depth - reduced;
                    score = -self.search::<false, false>(
                        &new_pos,
                        &mut child_pv,
                        reduced,
                        ply + 1,
                        -alpha - 1,
                        -alpha,
                        true,
                    );
                    self.td.stack[ply as usize].reduction = 0;

                    if score > alpha && reduced < new_depth {
                        score = -self.search::<false, false>(
                            &new_pos,
                            &mut child_pv,
                            new_depth,
                            ply + 1,
                            -alpha - 1,
                            -alpha,
                            !expected_cutnode,
                        );
                    }
                    searched = true;
                } else if !PV || legal_moves > 1 {
                    score = -self.search::<false, false>(
                        &new_pos,
                        &mut child_pv,
                        new_depth,
                        ply + 1,
                        -alpha - 1,
                        -alpha,
                        !expected_cutnode,
                    );
                    searched = true;
                }

                if PV && (legal_moves == 1 || score > alpha) {
                    score = -self.search::<true, false>(
                        &new_pos,
                        &mut child_pv,
                        new_depth,
                        ply + 1,
                        -beta,
                        -alpha,
                        false,
                    );
                    searched = true;
                }

                debug_assert!(searched);
            }

            self.undo_move();

            if self.has_stopped() {
                return 0;
            }

            if ROOT {
                if self.td.is_main() {
                    self.limiter_add_move_nodes(mv, self.nodes() - prev_nodes);
                }

                let Some(idx) = self.td.find_root_move(mv) else {
                    panic!("failed to find root move for {mv}");
                };

                if legal_moves == 1 || score > alpha {
                    let seldepth = self.seldepth();
                    let root_move = &mut self.td.root_moves[idx];

                    root_move.seldepth = seldepth;

                    root_move.display_score = score;
                    root_move.score = score;

                    root_move.upperbound = false;
                    root_move.lowerbound = false;

                    if score <= alpha {
                        root_move.score = alpha;
                        root_move.upperbound = true;
                    } else if score >= beta {
                        root_move.score = beta;
                        root_move.lowerbound = true;
                    }

                    root_move.pv.update(mv, &child_pv);
                } else {
                    self.td.root_moves[idx].score = -SCORE_INF;
                }
            }

            if score > best_score {
                best_score = score;
            }

            if score > alpha {
                alpha = score;
                best_move = mv;

                if PV {
                    pv.update(mv, &child_pv);
                }

                tt_flag = Flag::Exact;
            }

            if score >= beta {
                tt_flag = Flag::LowerBound;
                break;
            }

            if mv != best_move {
                if pos.is_capture(mv) {
                    if captures_tried.len() < captures_tried.inline_size() {
                        captures_tried.push(mv);
                    }
                } else if non_captures_tried.len() < non_captures_tried.inline_size() {
                    non_captures_tried.push(mv);
                }
            }
        }

        if legal_moves == 0 {
            debug_assert!(!ROOT);
            return -SCORE_MATE + ply;
        }

        if !best_move.is_null() {
            let bonus = history_bonus(depth);
            let td = &mut *self.td;

            if !pos.is_capture(best_move) {
                td.history
                    .update_non_capture(&td.conthist, ply, pos, best_move, bonus);

                for &prev in &non_captures_tried {
                    td.history
                        .update_non_capture(&td.conthist, ply, pos, prev, -bonus);
                }
            } else {
                let captured = pos
                    .piece_on(best_move.to())
                    .expect("capture target is occupied")
                    .ptype;
                td.history.update_capture(best_move, captured, bonus);
            }

            for &prev in &captures_tried {
                let captured = pos
                    .piece_on(prev.to())
                    .expect("capture target is occupied")
                    .ptype;
                td.history.update_capture(prev, captured, -bonus);
            }
        }

        // soften fail-highs that barely cleared the bound
        if best_score >= beta && !is_win(best_score) && !is_win(beta) {
            best_score = (best_score * depth + beta) / (depth + 1);
        }

        if excluded.is_null() {
            if !pos.is_in_check()
                && (best_move.is_null() || !pos.is_capture(best_move))
                && (tt_flag == Flag::Exact
                    || tt_flag == Flag::UpperBound && best_score < static_eval
                    || tt_flag == Flag::LowerBound && best_score > static_eval)
            {
                self.td.corrhist.update(pos, depth, best_score, static_eval);
            }

            if !ROOT || self.td.pv_idx == 0 {
                self.tt
                    .put(pos.key(), best_score, best_move, depth, ply, tt_flag, tt_pv);
            }
        }

        best_score
    }

    fn qsearch<const PV: bool>(
        &mut self,
        pos: &Position,
        ply: i32,
        alpha: Score,
        beta: Score,
    ) -> Score {
        debug_assert!((0..=MAX_DEPTH).contains(&ply));
        debug_assert!(PV || alpha == beta - 1);

        if self.has_stopped() {
            return 0;
        }

        if self.td.is_main() && self.td.root_depth > 1 && self.limiter_stop_hard() {
            self.sync.stop.store(true, Ordering::Relaxed);
            return 0;
        }

        self.inc_nodes();

        if PV {
            self.update_seldepth(ply + 1);
        }

        if ply >= MAX_DEPTH {
            return if pos.is_in_check() {
                0
            } else {
                let td = &*self.td;
                eval::corrected_static_eval(pos, &td.nnue, &td.corrhist, ply)
            };
        }

        let mut alpha = alpha;

        let static_eval;
        if pos.is_in_check() {
            static_eval = -SCORE_MATE + ply;
        } else {
            let td = &*self.td;
            static_eval = eval::corrected_static_eval(pos, &td.nnue, &td.corrhist, ply);

            if static_eval >= beta {
                return static_eval;
            }

            if static_eval > alpha {
                alpha = static_eval;
            }
        }

        let mut best_score = static_eval;

        let mut picker = MovePicker::qsearch(pos, ply);

        let mut legal_moves: u32 = 0;

        loop {
            let mv = picker.next(&self.td.history, &self.td.conthist);
            if mv.is_null() {
                break;
            }
            debug_assert!(pos.is_pseudolegal(mv));

            if !pos.is_legal(mv) {
                continue;
            }

            if best_score > -SCORE_WIN {
                if !see::see(pos, mv, -100) {
                    continue;
                }

                if static_eval + 150 <= alpha && !see::see(pos, mv, 1) {
                    best_score = best_score.max(static_eval + 150);
                    continue;
                }

                if legal_moves >= 3 {
                    break;
                }
            }

            legal_moves += 1;

            let new_pos = self.apply_move(ply, pos, mv);
            let sennichite = new_pos.test_sennichite(self.td.cute_chess, &self.td.key_history);

            let score;

            match sennichite {
                SennichiteStatus::Win => {
                    // illegal perpetual
                    self.undo_move();
                    continue;
                }
                SennichiteStatus::Draw => {
                    score = draw_score(self.nodes());
                }
                SennichiteStatus::None => {
                    score = -self.qsearch::<PV>(&new_pos, ply + 1, -beta, -alpha);
                }
            }

            self.undo_move();

            if self.has_stopped() {
                return 0;
            }

            if score > -SCORE_WIN {
                picker.skip_non_captures();
            }

            if score > best_score {
                best_score = score;
            }

            if score > alpha {
                alpha = score;
            }

            if score >= beta {
                break;
            }
        }

        best_score
    }

    fn report_single(&self, pv_idx: usize, depth: i32, time: f64) {
        if self.td.silent {
            return;
        }

        let root_move = &self.td.root_moves[pv_idx];

        let mut score = if root_move.score == -SCORE_INF {
            root_move.display_score
        } else {
            root_move.score
        };
        let depth = if root_move.score == -SCORE_INF {
            (depth - 1).max(1)
        } else {
            depth
        };

        let score_bound = if root_move.upperbound {
            ScoreBound::UpperBound
        } else if root_move.lowerbound {
            ScoreBound::LowerBound
        } else {
            ScoreBound::Exact
        };

        let display_score = if score.abs() >= SCORE_MAX_MATE {
            if score > 0 {
                DisplayScore::Mate(SCORE_MATE - score)
            } else {
                DisplayScore::Mate(-(SCORE_MATE + score))
            }
        } else {
            // clamp draw jitter for display
            if score.abs() <= 2 {
                score = 0;
            }
            DisplayScore::Cp(score)
        };

        let info = SearchInfo {
            pv_idx: pv_idx as u32,
            multi_pv: self.td.multi_pv,
            depth,
            seldepth: Some(root_move.seldepth),
            time_sec: Some(time),
            nodes: self.total_nodes(),
            score: display_score,
            score_bound,
            pv: &root_move.pv,
            hashfull: Some(self.tt.full_permille()),
        };

        self.engine.handler.print_search_info(&info);
    }

    fn report(&self, depth: i32, time: f64) {
        for pv_idx in 0..self.td.multi_pv as usize {
            self.report_single(pv_idx, depth, time);
        }
    }

    fn final_report(&self, time: f64) {
        if self.td.silent {
            return;
        }

        self.report(self.td.depth_completed.max(1), time);
        self.engine
            .handler
            .print_best_move(self.td.root_moves[0].pv.first());
    }
}
