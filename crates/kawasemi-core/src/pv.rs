//! Principal variation lists.

use crate::score::MAX_DEPTH;
use crate::shogi::Move;

/// A fixed-capacity move sequence. One lives in every search frame, so
/// the array stays inline.
#[derive(Clone)]
pub struct PvList {
    pub moves: [Move; MAX_DEPTH as usize],
    pub len: usize,
}

impl PvList {
    pub const fn new() -> PvList {
        PvList {
            moves: [Move::NULL; MAX_DEPTH as usize],
            len: 0,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Become `head` followed by `child`.
    pub fn update(&mut self, head: Move, child: &PvList) {
        self.moves[0] = head;
        let tail = child.len.min(self.moves.len() - 1);
        self.moves[1..1 + tail].copy_from_slice(&child.moves[..tail]);
        self.len = tail + 1;
    }

    #[inline]
    pub fn first(&self) -> Move {
        debug_assert!(self.len > 0);
        self.moves[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = Move> + '_ {
        self.moves[..self.len].iter().copied()
    }
}

impl Default for PvList {
    fn default() -> Self {
        PvList::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_prepends_head() {
        let m1 = Move::parse("7g7f").unwrap();
        let m2 = Move::parse("3c3d").unwrap();
        let m3 = Move::parse("2g2f").unwrap();

        let mut child = PvList::new();
        child.update(m3, &PvList::new());
        assert_eq!(child.len, 1);

        let mut mid = PvList::new();
        mid.update(m2, &child);

        let mut root = PvList::new();
        root.update(m1, &mid);

        let line: Vec<Move> = root.iter().collect();
        assert_eq!(line, vec![m1, m2, m3]);
    }

    #[test]
    fn test_update_saturates_at_capacity() {
        let mv = Move::parse("7g7f").unwrap();
        let mut long = PvList::new();
        long.len = long.moves.len();
        let mut head = PvList::new();
        head.update(mv, &long);
        assert_eq!(head.len, head.moves.len());
        assert_eq!(head.first(), mv);
    }
}
