//! Staged, lazily generated move ordering.
//!
//! Main-search track: TT move, good captures, non-captures, bad
//! captures. Quiescence track: captures only, plus non-captures when
//! evading check. Selection is a best-first scan over the remaining
//! window, one move per pull.

use crate::history::{ContHandle, HistoryTables};
use crate::shogi::{
    generate_captures, generate_non_captures, see, Move, MoveList, Position,
};
use smallvec::SmallVec;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Stage {
    TtMove,
    GenerateCaptures,
    GoodCaptures,
    GenerateNonCaptures,
    NonCaptures,
    BadCaptures,
    QsGenerateCaptures,
    QsCaptures,
    QsEvasionGenerateCaptures,
    QsEvasionCaptures,
    QsEvasionGenerateNonCaptures,
    QsEvasionNonCaptures,
    End,
}

pub struct MovePicker<'a> {
    stage: Stage,
    pos: &'a Position,
    tt_move: Move,
    ply: i32,

    moves: MoveList,
    scores: SmallVec<[i32; 128]>,

    skip_non_captures: bool,

    idx: usize,
    end: usize,
    bad_captures_end: usize,
}

impl<'a> MovePicker<'a> {
    pub fn main(pos: &'a Position, tt_move: Move, ply: i32) -> MovePicker<'a> {
        MovePicker::new(Stage::TtMove, pos, tt_move, ply)
    }

    pub fn qsearch(pos: &'a Position, ply: i32) -> MovePicker<'a> {
        let stage = if pos.is_in_check() {
            Stage::QsEvasionGenerateCaptures
        } else {
            Stage::QsGenerateCaptures
        };
        MovePicker::new(stage, pos, Move::NULL, ply)
    }

    fn new(stage: Stage, pos: &'a Position, tt_move: Move, ply: i32) -> MovePicker<'a> {
        MovePicker {
            stage,
            pos,
            tt_move,
            ply,
            moves: MoveList::new(),
            scores: SmallVec::new(),
            skip_non_captures: false,
            idx: 0,
            end: 0,
            bad_captures_end: 0,
        }
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Suppress the non-capture stages from here on.
    #[inline]
    pub fn skip_non_captures(&mut self) {
        self.skip_non_captures = true;
    }

    /// Pull the next move. History tables are passed per call so the
    /// caller may update them between pulls.
    pub fn next(
        &mut self,
        history: &HistoryTables,
        continuations: &[Option<ContHandle>],
    ) -> Move {
        loop {
            match self.stage {
                Stage::TtMove => {
                    self.stage = Stage::GenerateCaptures;
                    if !self.tt_move.is_null() && self.pos.is_pseudolegal(self.tt_move) {
                        return self.tt_move;
                    }
                }

                Stage::GenerateCaptures => {
                    generate_captures(&mut self.moves, self.pos);
                    self.end = self.moves.len();
                    self.score_captures(history);
                    self.stage = Stage::GoodCaptures;
                }

                Stage::GoodCaptures => {
                    while self.idx < self.end {
                        let idx = self.find_next();
                        let mv = self.moves[idx];
                        if mv == self.tt_move {
                            continue;
                        }
                        if see::see(self.pos, mv, 0) {
                            return mv;
                        }
                        // spilled into the already-consumed prefix
                        self.moves[self.bad_captures_end] = mv;
                        self.scores[self.bad_captures_end] = self.scores[idx];
                        self.bad_captures_end += 1;
                    }
                    self.stage = Stage::GenerateNonCaptures;
                }

                Stage::GenerateNonCaptures => {
                    if !self.skip_non_captures {
                        generate_non_captures(&mut self.moves, self.pos);
                        self.end = self.moves.len();
                        self.score_non_captures(history, continuations);
                    }
                    self.stage = Stage::NonCaptures;
                }

                Stage::NonCaptures => {
                    if !self.skip_non_captures {
                        let mv = self.select_next();
                        if !mv.is_null() {
                            return mv;
                        }
                    }
                    self.idx = 0;
                    self.end = self.bad_captures_end;
                    self.stage = Stage::BadCaptures;
                }

                Stage::BadCaptures => {
                    let mv = self.select_next();
                    if !mv.is_null() {
                        return mv;
                    }
                    self.stage = Stage::End;
                }

                Stage::QsGenerateCaptures => {
                    generate_captures(&mut self.moves, self.pos);
                    self.end = self.moves.len();
                    self.score_captures(history);
                    self.stage = Stage::QsCaptures;
                }

                Stage::QsCaptures => {
                    let mv = self.select_next();
                    if !mv.is_null() {
                        return mv;
                    }
                    self.stage = Stage::End;
                }

                Stage::QsEvasionGenerateCaptures => {
                    generate_captures(&mut self.moves, self.pos);
                    self.end = self.moves.len();
                    self.score_captures(history);
                    self.stage = Stage::QsEvasionCaptures;
                }

                Stage::QsEvasionCaptures => {
                    let mv = self.select_next();
                    if !mv.is_null() {
                        return mv;
                    }
                    self.stage = Stage::QsEvasionGenerateNonCaptures;
                }

                Stage::QsEvasionGenerateNonCaptures => {
                    if !self.skip_non_captures {
                        generate_non_captures(&mut self.moves, self.pos);
                        self.end = self.moves.len();
                        self.score_non_captures(history, continuations);
                    }
                    self.stage = Stage::QsEvasionNonCaptures;
                }

                Stage::QsEvasionNonCaptures => {
                    if !self.skip_non_captures {
                        let mv = self.select_next();
                        if !mv.is_null() {
                            return mv;
                        }
                    }
                    self.stage = Stage::End;
                }

                Stage::End => return Move::NULL,
            }
        }
    }

    fn score_captures(&mut self, history: &HistoryTables) {
        self.scores.resize(self.moves.len(), 0);
        for idx in self.idx..self.end {
            let mv = self.moves[idx];
            let captured = self
                .pos
                .piece_on(mv.to())
                .expect("capture target is occupied")
                .ptype;
            self.scores[idx] =
                see::piece_value(captured) + history.capture_score(mv, captured) / 8;
        }
    }

    fn score_non_captures(
        &mut self,
        history: &HistoryTables,
        continuations: &[Option<ContHandle>],
    ) {
        self.scores.resize(self.moves.len(), 0);
        for idx in self.idx..self.end {
            let mv = self.moves[idx];
            self.scores[idx] = history.non_capture_score(continuations, self.ply, self.pos, mv);
        }
    }

    /// Swap the best remaining move to the cursor and consume it.
    fn find_next(&mut self) -> usize {
        let mut best_idx = self.idx;
        let mut best_score = self.scores[self.idx];
        for idx in self.idx + 1..self.end {
            if self.scores[idx] > best_score {
                best_idx = idx;
                best_score = self.scores[idx];
            }
        }
        if best_idx != self.idx {
            self.moves.swap(self.idx, best_idx);
            self.scores.swap(self.idx, best_idx);
        }
        let idx = self.idx;
        self.idx += 1;
        idx
    }

    fn select_next(&mut self) -> Move {
        while self.idx < self.end {
            let idx = self.find_next();
            let mv = self.moves[idx];
            if mv == self.tt_move {
                continue;
            }
            return mv;
        }
        Move::NULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shogi::generate_all;
    use std::collections::HashSet;

    fn position_with_captures() -> Position {
        // open position: both bishops can trade, pawns can push
        let pos = Position::startpos();
        let pos = pos.apply_move(Move::parse("7g7f").unwrap());
        pos.apply_move(Move::parse("3c3d").unwrap())
    }

    #[test]
    fn test_main_track_yields_each_pseudolegal_move_once() {
        let pos = position_with_captures();
        let history = HistoryTables::new();
        let conts = vec![None; 4];

        let mut expected = MoveList::new();
        generate_all(&mut expected, &pos);
        let expected: HashSet<Move> = expected.into_iter().collect();

        let mut picker = MovePicker::main(&pos, Move::NULL, 0);
        let mut seen = HashSet::new();
        loop {
            let mv = picker.next(&history, &conts);
            if mv.is_null() {
                break;
            }
            assert!(seen.insert(mv), "{mv} yielded twice");
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_tt_move_comes_first_and_is_not_repeated() {
        let pos = position_with_captures();
        let history = HistoryTables::new();
        let conts = vec![None; 4];

        let tt_move = Move::parse("2g2f").unwrap();
        let mut picker = MovePicker::main(&pos, tt_move, 0);
        assert_eq!(picker.next(&history, &conts), tt_move);

        let mut count = 0;
        loop {
            let mv = picker.next(&history, &conts);
            if mv.is_null() {
                break;
            }
            assert_ne!(mv, tt_move);
            count += 1;
        }
        assert!(count > 0);
    }

    #[test]
    fn test_bogus_tt_move_is_skipped() {
        let pos = position_with_captures();
        let history = HistoryTables::new();
        let conts = vec![None; 4];

        // drop without the piece in hand is not pseudolegal
        let bogus = Move::parse("G*5e").unwrap();
        let mut picker = MovePicker::main(&pos, bogus, 0);
        let first = picker.next(&history, &conts);
        assert_ne!(first, bogus);
        assert!(!first.is_null());
    }

    #[test]
    fn test_skip_non_captures_suppresses_quiets() {
        let pos = position_with_captures();
        let history = HistoryTables::new();
        let conts = vec![None; 4];

        let mut picker = MovePicker::main(&pos, Move::NULL, 0);
        picker.skip_non_captures();
        loop {
            let mv = picker.next(&history, &conts);
            if mv.is_null() {
                break;
            }
            assert!(pos.is_capture(mv), "{mv} is not a capture");
        }
    }

    #[test]
    fn test_qsearch_track_is_captures_only_when_not_in_check() {
        let pos = position_with_captures();
        let history = HistoryTables::new();
        let conts = vec![None; 4];

        let mut picker = MovePicker::qsearch(&pos, 0);
        let mut any = false;
        loop {
            let mv = picker.next(&history, &conts);
            if mv.is_null() {
                break;
            }
            assert!(pos.is_capture(mv));
            any = true;
        }
        assert!(any, "bishop trade should be available");
    }

    #[test]
    fn test_qsearch_evasion_track_includes_quiets() {
        // black king in check from a rook; evasions are quiet moves
        let pos = Position::from_sfen("k8/9/9/9/9/9/9/4r4/4K4 b - 1").unwrap();
        assert!(pos.is_in_check());
        let history = HistoryTables::new();
        let conts = vec![None; 4];

        let mut picker = MovePicker::qsearch(&pos, 0);
        let mut quiets = 0;
        loop {
            let mv = picker.next(&history, &conts);
            if mv.is_null() {
                break;
            }
            if !pos.is_capture(mv) {
                quiets += 1;
            }
        }
        assert!(quiets > 0);
    }

    #[test]
    fn test_good_captures_precede_bad_captures() {
        // black rook can win a loose pawn on 2h (good) or grab the
        // gold-defended pawn on 7d (bad)
        let pos =
            Position::from_sfen("4k4/9/2g6/2p6/9/9/9/2R4p1/4K4 b - 1").unwrap();
        let history = HistoryTables::new();
        let conts = vec![None; 4];

        let mut picker = MovePicker::main(&pos, Move::NULL, 0);
        picker.skip_non_captures();

        let first = picker.next(&history, &conts);
        assert!(see::see(&pos, first, 0), "first capture should be good");

        let mut last = first;
        loop {
            let mv = picker.next(&history, &conts);
            if mv.is_null() {
                break;
            }
            last = mv;
        }
        assert!(!see::see(&pos, last, 0), "last capture should be bad");
    }
}
