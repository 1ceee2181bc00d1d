//! Interface the search uses to talk back to the protocol layer.

use crate::pv::PvList;
use crate::score::Score;
use crate::shogi::Move;

/// Score as it should be displayed to the GUI.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DisplayScore {
    Cp(Score),
    /// Mate in this many plies; negative when getting mated.
    Mate(i32),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScoreBound {
    Exact,
    UpperBound,
    LowerBound,
}

/// One completed (or aspiration-widened) root iteration.
pub struct SearchInfo<'a> {
    pub pv_idx: u32,
    pub multi_pv: u32,
    pub depth: i32,
    pub seldepth: Option<i32>,
    pub time_sec: Option<f64>,
    pub nodes: u64,
    pub score: DisplayScore,
    pub score_bound: ScoreBound,
    pub pv: &'a PvList,
    pub hashfull: Option<u32>,
}

/// Callbacks from the search into the protocol front-end. Handed to
/// the searcher explicitly; the search owns no global handler state.
pub trait SearchHandler: Send + Sync {
    fn print_search_info(&self, info: &SearchInfo);
    fn print_info_string(&self, s: &str);
    fn print_best_move(&self, mv: Move);
    fn handle_no_legal_moves(&self);
    /// Return true to short-circuit the search on an entering-king
    /// position at the root.
    fn handle_entering_kings_win(&self) -> bool;
}
