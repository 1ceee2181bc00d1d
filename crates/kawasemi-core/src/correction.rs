//! Correction history: an EMA of the residual between static eval and
//! search score, indexed by the auxiliary position keys.

use crate::score::Score;
use crate::shogi::Position;

const ENTRIES: usize = 16384;
const LIMIT: i32 = 1024;
const MAX_BONUS: i32 = LIMIT / 4;

#[derive(Clone, Copy, Default)]
struct Entry {
    value: i16,
}

impl Entry {
    #[inline]
    fn update(&mut self, bonus: i32) {
        let value = self.value as i32;
        self.value = (value + bonus - value * bonus.abs() / LIMIT) as i16;
    }

    #[inline]
    fn get(self) -> i32 {
        self.value as i32
    }
}

pub struct CorrectionHistoryTable {
    castle: Vec<[Entry; ENTRIES]>,
    cavalry: Vec<[Entry; ENTRIES]>,
}

impl CorrectionHistoryTable {
    pub fn new() -> CorrectionHistoryTable {
        CorrectionHistoryTable {
            castle: vec![[Entry::default(); ENTRIES]; 2],
            cavalry: vec![[Entry::default(); ENTRIES]; 2],
        }
    }

    pub fn clear(&mut self) {
        for table in self.castle.iter_mut().chain(self.cavalry.iter_mut()) {
            table.fill(Entry::default());
        }
    }

    pub fn update(&mut self, pos: &Position, depth: i32, search_score: Score, static_eval: Score) {
        let bonus = ((search_score - static_eval) * depth / 8).clamp(-MAX_BONUS, MAX_BONUS);
        let stm = pos.stm().index();
        self.castle[stm][(pos.castle_key() % ENTRIES as u64) as usize].update(bonus);
        self.cavalry[stm][(pos.cavalry_key() % ENTRIES as u64) as usize].update(bonus);
    }

    pub fn correction(&self, pos: &Position) -> i32 {
        let stm = pos.stm().index();
        let castle = self.castle[stm][(pos.castle_key() % ENTRIES as u64) as usize].get();
        let cavalry = self.cavalry[stm][(pos.cavalry_key() % ENTRIES as u64) as usize].get();
        (castle + cavalry) / 16
    }
}

impl Default for CorrectionHistoryTable {
    fn default() -> Self {
        CorrectionHistoryTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residual_pulls_correction_towards_search_score() {
        let pos = Position::startpos();
        let mut table = CorrectionHistoryTable::new();
        assert_eq!(table.correction(&pos), 0);

        for _ in 0..32 {
            table.update(&pos, 8, 200, 0);
        }
        let correction = table.correction(&pos);
        assert!(correction > 0);
        assert!(correction <= 2 * LIMIT / 16);

        // the opposite side's slots are untouched
        assert_eq!(table.correction(&pos.apply_null_move()), 0);
    }

    #[test]
    fn test_entries_stay_within_limit() {
        let pos = Position::startpos();
        let mut table = CorrectionHistoryTable::new();
        for _ in 0..1000 {
            table.update(&pos, 64, 20000, 0);
        }
        let castle = table.castle[pos.stm().index()]
            [(pos.castle_key() % ENTRIES as u64) as usize]
            .get();
        assert!(castle.abs() <= LIMIT);

        table.clear();
        assert_eq!(table.correction(&pos), 0);
    }
}
