//! End-to-end search scenarios driven through a capturing handler.

use kawasemi_core::handler::{DisplayScore, SearchHandler, SearchInfo};
use kawasemi_core::limits::Limiter;
use kawasemi_core::search::Searcher;
use kawasemi_core::shogi::{Move, Position};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Capture {
    infos: Mutex<Vec<(i32, DisplayScore)>>,
    best_moves: Mutex<Vec<Move>>,
    info_strings: Mutex<Vec<String>>,
    no_legal_moves: AtomicBool,
    entering_kings_win: AtomicBool,
}

impl SearchHandler for Capture {
    fn print_search_info(&self, info: &SearchInfo) {
        self.infos.lock().unwrap().push((info.depth, info.score));
    }

    fn print_info_string(&self, s: &str) {
        self.info_strings.lock().unwrap().push(s.to_string());
    }

    fn print_best_move(&self, mv: Move) {
        self.best_moves.lock().unwrap().push(mv);
    }

    fn handle_no_legal_moves(&self) {
        self.no_legal_moves.store(true, Ordering::Relaxed);
    }

    fn handle_entering_kings_win(&self) -> bool {
        self.entering_kings_win.store(true, Ordering::Relaxed);
        true
    }
}

fn searcher_with_capture() -> (Searcher, Arc<Capture>) {
    let capture = Arc::new(Capture::default());
    (Searcher::new(16, capture.clone()), capture)
}

fn go_and_wait(
    searcher: &mut Searcher,
    pos: &Position,
    key_history: &[u64],
    max_depth: i32,
) {
    searcher.start_search(
        pos,
        key_history,
        Instant::now(),
        false,
        max_depth,
        Some(Limiter::Compound(Vec::new())),
    );
    wait_idle(searcher);
}

fn wait_idle(searcher: &Searcher) {
    let deadline = Instant::now() + Duration::from_secs(60);
    while searcher.is_searching() {
        assert!(Instant::now() < deadline, "search did not finish in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_root_mate_in_one() {
    // gold drop on 5b mates the bare king
    let pos = Position::from_sfen("4k4/9/4P4/9/9/9/9/9/4K4 b G 1").unwrap();
    let (mut searcher, capture) = searcher_with_capture();

    go_and_wait(&mut searcher, &pos, &[], 2);

    let best_moves = capture.best_moves.lock().unwrap();
    assert_eq!(best_moves.len(), 1);
    assert_eq!(best_moves[0], Move::parse("G*5b").unwrap());

    let infos = capture.infos.lock().unwrap();
    let (_, score) = infos.last().expect("at least one info line");
    assert_eq!(*score, DisplayScore::Mate(1));
}

#[test]
fn test_no_legal_moves_reports_to_handler() {
    // white to move, checkmated: gold on 5b backed by the pawn
    let pos = Position::from_sfen("4k4/4G4/4P4/9/9/9/9/9/4K4 w - 1").unwrap();
    let (mut searcher, capture) = searcher_with_capture();

    go_and_wait(&mut searcher, &pos, &[], 4);

    assert!(capture.no_legal_moves.load(Ordering::Relaxed));
    assert!(capture.best_moves.lock().unwrap().is_empty());
    assert!(!searcher.is_searching());
}

#[test]
fn test_sennichite_draw_scores_near_zero() {
    // the only legal move repeats a position already seen three times
    let pos = Position::from_sfen("4k3r/9/9/9/9/9/9/6s2/8K b - 1").unwrap();
    let only = Move::parse("1i2h").unwrap();
    assert!(pos.is_legal(only));
    let repeated = pos.apply_move(only);
    let key_history = vec![repeated.key(); 3];

    let (mut searcher, capture) = searcher_with_capture();
    go_and_wait(&mut searcher, &pos, &key_history, 6);

    let best_moves = capture.best_moves.lock().unwrap();
    assert_eq!(best_moves.as_slice(), &[only]);

    // draw jitter is clamped to zero for display
    let infos = capture.infos.lock().unwrap();
    let (_, score) = infos.last().unwrap();
    assert_eq!(*score, DisplayScore::Cp(0));
}

#[test]
fn test_tt_survives_resize() {
    let (mut searcher, capture) = searcher_with_capture();

    searcher.set_tt_size(1);
    searcher.set_tt_size(16);
    searcher.ensure_ready();

    go_and_wait(&mut searcher, &Position::startpos(), &[], 3);
    assert_eq!(capture.best_moves.lock().unwrap().len(), 1);

    // allocation was finalised up front, so no complaint about it
    assert!(capture
        .info_strings
        .lock()
        .unwrap()
        .iter()
        .all(|s| !s.contains("TT initialization")));
}

#[test]
fn test_deferred_tt_allocation_is_reported() {
    // going without isready/usinewgame costs the allocation at go time
    let (mut searcher, capture) = searcher_with_capture();
    go_and_wait(&mut searcher, &Position::startpos(), &[], 2);

    assert!(capture
        .info_strings
        .lock()
        .unwrap()
        .iter()
        .any(|s| s.contains("TT initialization")));
}

#[test]
fn test_stop_is_honoured_on_infinite_search() {
    let (mut searcher, capture) = searcher_with_capture();

    searcher.start_search(
        &Position::startpos(),
        &[],
        Instant::now(),
        true,
        255,
        Some(Limiter::Compound(Vec::new())),
    );
    std::thread::sleep(Duration::from_millis(500));
    assert!(searcher.is_searching());

    searcher.stop();
    wait_idle(&searcher);

    assert!(!searcher.is_searching());
    assert_eq!(capture.best_moves.lock().unwrap().len(), 1, "exactly one bestmove");

    // the driver must be reusable after a stop
    go_and_wait(&mut searcher, &Position::startpos(), &[], 2);
    assert_eq!(capture.best_moves.lock().unwrap().len(), 2);
}

#[test]
fn test_single_thread_search_is_deterministic() {
    let pos = Position::startpos();

    let (mut first, first_capture) = searcher_with_capture();
    go_and_wait(&mut first, &pos, &[], 5);

    let (mut second, second_capture) = searcher_with_capture();
    go_and_wait(&mut second, &pos, &[], 5);

    assert_eq!(
        first_capture.best_moves.lock().unwrap().as_slice(),
        second_capture.best_moves.lock().unwrap().as_slice()
    );
    assert_eq!(
        first_capture.infos.lock().unwrap().last(),
        second_capture.infos.lock().unwrap().last()
    );
}

#[test]
fn test_multi_thread_best_move_is_legal() {
    let pos = Position::startpos();
    let pos = pos.apply_move(Move::parse("7g7f").unwrap());
    let history = vec![Position::startpos().key()];

    for _ in 0..2 {
        let (mut searcher, capture) = searcher_with_capture();
        searcher.set_thread_count(8);
        go_and_wait(&mut searcher, &pos, &history, 4);

        let best_moves = capture.best_moves.lock().unwrap();
        assert_eq!(best_moves.len(), 1);
        let best = best_moves[0];
        assert!(!best.is_null());
        assert!(pos.is_legal(best), "{best} is not legal");
    }
}

#[test]
fn test_multi_pv_reports_distinct_lines() {
    let (mut searcher, capture) = searcher_with_capture();
    searcher.set_multi_pv(3);
    go_and_wait(&mut searcher, &Position::startpos(), &[], 3);

    assert_eq!(capture.best_moves.lock().unwrap().len(), 1);
    // three lines are reported for the final depth
    let infos = capture.infos.lock().unwrap();
    let last_depth = infos.last().unwrap().0;
    let lines = infos.iter().filter(|(d, _)| *d == last_depth).count();
    assert!(lines >= 3, "expected 3 multipv lines, saw {lines}");
}

#[test]
fn test_entering_kings_win_short_circuits() {
    let pos =
        Position::from_sfen("K8/RBRBGSGS1/PPPPPPPPP/9/9/9/9/9/4k4 b - 1").unwrap();
    assert!(pos.is_entering_kings_win());

    let (mut searcher, capture) = searcher_with_capture();
    searcher.start_search(
        &pos,
        &[],
        Instant::now(),
        false,
        4,
        Some(Limiter::Compound(Vec::new())),
    );
    wait_idle(&searcher);

    assert!(capture.entering_kings_win.load(Ordering::Relaxed));
    assert!(capture.best_moves.lock().unwrap().is_empty());
}

#[test]
fn test_node_limited_search_terminates() {
    let (mut searcher, capture) = searcher_with_capture();
    searcher.start_search(
        &Position::startpos(),
        &[],
        Instant::now(),
        false,
        255,
        Some(Limiter::SoftNodes {
            opt_nodes: 5_000,
            max_nodes: 50_000,
        }),
    );
    wait_idle(&searcher);
    assert_eq!(capture.best_moves.lock().unwrap().len(), 1);
}
