//! Search limiters.
//!
//! A tagged enum rather than trait objects: the variants are known and
//! compound composition is just a vector. The main worker is the only
//! caller of any of the four hooks.

use crate::shogi::{Move, Square};
use std::time::Instant;

/// Per-`go` time allotment in seconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeLimits {
    pub remaining: f64,
    pub increment: f64,
    pub byoyomi: f64,
}

pub enum Limiter {
    /// Any-of composition.
    Compound(Vec<Limiter>),
    /// Hard node cap, checked inside the tree.
    Nodes { max_nodes: u64 },
    /// Separate soft (between iterations) and hard caps.
    SoftNodes { opt_nodes: u64, max_nodes: u64 },
    /// Fixed wall-clock budget.
    MoveTime { start: Instant, max_time: f64 },
    TimeManager(TimeManager),
}

impl Limiter {
    /// Per-move node accounting, fed by the root loop.
    pub fn add_move_nodes(&mut self, mv: Move, nodes: u64) {
        match self {
            Limiter::Compound(limiters) => {
                for limiter in limiters {
                    limiter.add_move_nodes(mv, nodes);
                }
            }
            Limiter::TimeManager(tm) => tm.add_move_nodes(mv, nodes),
            _ => {}
        }
    }

    /// Called after each completed root iteration.
    pub fn update(&mut self, depth: i32, best_move: Move) {
        match self {
            Limiter::Compound(limiters) => {
                for limiter in limiters {
                    limiter.update(depth, best_move);
                }
            }
            Limiter::TimeManager(tm) => tm.update(depth, best_move),
            _ => {}
        }
    }

    /// Checked between root iterations.
    pub fn stop_soft(&self, nodes: u64) -> bool {
        match self {
            Limiter::Compound(limiters) => limiters.iter().any(|l| l.stop_soft(nodes)),
            Limiter::Nodes { .. } => false,
            Limiter::SoftNodes { opt_nodes, .. } => nodes >= *opt_nodes,
            Limiter::MoveTime { start, max_time } => start.elapsed().as_secs_f64() >= *max_time,
            Limiter::TimeManager(tm) => tm.stop_soft(),
        }
    }

    /// Checked inside the tree, every node on the main worker.
    pub fn stop_hard(&self, nodes: u64) -> bool {
        match self {
            Limiter::Compound(limiters) => limiters.iter().any(|l| l.stop_hard(nodes)),
            Limiter::Nodes { max_nodes } => nodes >= *max_nodes,
            Limiter::SoftNodes { max_nodes, .. } => nodes >= *max_nodes,
            Limiter::MoveTime { start, max_time } => start.elapsed().as_secs_f64() >= *max_time,
            Limiter::TimeManager(tm) => tm.stop_hard(),
        }
    }
}

/// Byoyomi-aware time manager. Derives an optimal and a maximum budget
/// from the clock, then scales the soft budget by best-move stability
/// and by the fraction of nodes spent on the current best move.
pub struct TimeManager {
    start: Instant,
    opt_time: f64,
    max_time: f64,
    scale: f64,

    prev_best: Move,
    stability: u32,

    // [promo][from][to]
    non_drop: Box<[[[u64; Square::COUNT]; Square::COUNT]; 2]>,
    // [dropped type][to]
    drop: Box<[[u64; Square::COUNT]; 7]>,
    total_nodes: u64,
}

const STABILITY_MAX: u32 = 10;

impl TimeManager {
    pub fn new(start: Instant, limits: TimeLimits, move_overhead: f64) -> TimeManager {
        let remaining = (limits.remaining - move_overhead).max(0.0);
        let byoyomi = (limits.byoyomi - move_overhead).max(0.0);

        let opt = remaining / 20.0 + limits.increment * 0.75 + byoyomi * 0.8;
        let max = remaining / 4.0 + limits.increment * 0.75 + byoyomi * 0.95;

        // never commit more than what is actually on the clock this move
        let cap = (remaining * 0.9 + byoyomi).max(0.001);
        let opt_time = opt.min(cap);
        let max_time = max.clamp(opt_time, cap);

        TimeManager {
            start,
            opt_time,
            max_time,
            scale: 1.0,
            prev_best: Move::NULL,
            stability: 0,
            non_drop: Box::new([[[0; Square::COUNT]; Square::COUNT]; 2]),
            drop: Box::new([[0; Square::COUNT]; 7]),
            total_nodes: 0,
        }
    }

    fn move_nodes(&mut self, mv: Move) -> &mut u64 {
        if mv.is_drop() {
            &mut self.drop[mv.drop_piece().hand_index()][mv.to().index()]
        } else {
            &mut self.non_drop[usize::from(mv.is_promo())][mv.from().index()][mv.to().index()]
        }
    }

    fn add_move_nodes(&mut self, mv: Move, nodes: u64) {
        *self.move_nodes(mv) += nodes;
        self.total_nodes += nodes;
    }

    fn update(&mut self, _depth: i32, best_move: Move) {
        if best_move == self.prev_best {
            self.stability = (self.stability + 1).min(STABILITY_MAX);
        } else {
            self.stability = 0;
            self.prev_best = best_move;
        }

        let best_fraction = if self.total_nodes > 0 {
            *self.move_nodes(best_move) as f64 / self.total_nodes as f64
        } else {
            0.0
        };

        let stability_factor = 1.25 - 0.05 * self.stability as f64;
        let node_factor = (1.8 - 1.4 * best_fraction).max(0.5);

        self.scale = stability_factor * node_factor;
    }

    fn stop_soft(&self) -> bool {
        self.start.elapsed().as_secs_f64() >= self.opt_time * self.scale
    }

    fn stop_hard(&self) -> bool {
        self.start.elapsed().as_secs_f64() >= self.max_time
    }

    #[cfg(test)]
    fn budgets(&self) -> (f64, f64) {
        (self.opt_time, self.max_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_limiter_is_hard_only() {
        let limiter = Limiter::Nodes { max_nodes: 1000 };
        assert!(!limiter.stop_soft(5000));
        assert!(!limiter.stop_hard(999));
        assert!(limiter.stop_hard(1000));
    }

    #[test]
    fn test_soft_node_limiter_splits_budgets() {
        let limiter = Limiter::SoftNodes {
            opt_nodes: 100,
            max_nodes: 1000,
        };
        assert!(!limiter.stop_soft(99));
        assert!(limiter.stop_soft(100));
        assert!(!limiter.stop_hard(999));
        assert!(limiter.stop_hard(1000));
    }

    #[test]
    fn test_move_time_limiter() {
        let limiter = Limiter::MoveTime {
            start: Instant::now(),
            max_time: 3600.0,
        };
        assert!(!limiter.stop_soft(0));
        assert!(!limiter.stop_hard(0));

        let expired = Limiter::MoveTime {
            start: Instant::now(),
            max_time: 0.0,
        };
        assert!(expired.stop_soft(0));
        assert!(expired.stop_hard(0));
    }

    #[test]
    fn test_compound_is_any_of() {
        let limiter = Limiter::Compound(vec![
            Limiter::Nodes { max_nodes: 1000 },
            Limiter::SoftNodes {
                opt_nodes: 10,
                max_nodes: 20,
            },
        ]);
        assert!(limiter.stop_soft(10));
        assert!(limiter.stop_hard(20));
        assert!(!limiter.stop_hard(19));

        let empty = Limiter::Compound(Vec::new());
        assert!(!empty.stop_soft(u64::MAX));
        assert!(!empty.stop_hard(u64::MAX));
    }

    #[test]
    fn test_time_manager_budget_shape() {
        let tm = TimeManager::new(
            Instant::now(),
            TimeLimits {
                remaining: 60.0,
                increment: 1.0,
                byoyomi: 0.0,
            },
            0.01,
        );
        let (opt, max) = tm.budgets();
        assert!(opt > 0.0);
        assert!(max >= opt);
        assert!(max <= 60.0);
    }

    #[test]
    fn test_time_manager_pure_byoyomi() {
        let tm = TimeManager::new(
            Instant::now(),
            TimeLimits {
                remaining: 0.0,
                increment: 0.0,
                byoyomi: 10.0,
            },
            0.01,
        );
        let (opt, max) = tm.budgets();
        assert!(opt > 1.0, "byoyomi should be mostly usable, got {opt}");
        assert!(max <= 10.0);
    }

    #[test]
    fn test_time_manager_stability_shrinks_budget() {
        let mut tm = TimeManager::new(
            Instant::now(),
            TimeLimits {
                remaining: 60.0,
                increment: 0.0,
                byoyomi: 0.0,
            },
            0.0,
        );
        let best = Move::parse("7g7f").unwrap();
        tm.add_move_nodes(best, 900);
        tm.add_move_nodes(Move::parse("2g2f").unwrap(), 100);

        tm.update(1, best);
        let first = tm.scale;
        for depth in 2..8 {
            tm.update(depth, best);
        }
        assert!(tm.scale < first);

        // a best-move swap resets stability and grows the budget again
        tm.update(8, Move::parse("2g2f").unwrap());
        assert!(tm.scale > first * 0.9);
    }
}
