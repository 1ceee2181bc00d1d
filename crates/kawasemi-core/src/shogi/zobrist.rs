//! Zobrist keys.
//!
//! Besides the main position key there are two auxiliary keys used
//! only by the correction history: the castle key tracks kings and
//! gold-moving pieces (the defensive formation), the cavalry key
//! tracks lances and knights.

use super::piece::{Color, Piece, PieceType};
use super::square::Square;
use once_cell::sync::Lazy;

const MAX_HAND_COUNT: usize = 19;

struct Tables {
    piece_square: [[u64; Square::COUNT]; PieceType::COUNT * Color::COUNT],
    hand: [[[u64; MAX_HAND_COUNT]; 7]; Color::COUNT],
    white_to_move: u64,
}

/// SplitMix64; a fixed seed keeps keys stable across runs.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

static TABLES: Lazy<Tables> = Lazy::new(|| {
    let mut state = 0x6b61_7761_7365_6d69u64;

    let mut piece_square = [[0u64; Square::COUNT]; PieceType::COUNT * Color::COUNT];
    for row in piece_square.iter_mut() {
        for key in row.iter_mut() {
            *key = splitmix64(&mut state);
        }
    }

    let mut hand = [[[0u64; MAX_HAND_COUNT]; 7]; Color::COUNT];
    for color in hand.iter_mut() {
        for pt in color.iter_mut() {
            // count 0 hashes to nothing so empty hands are silent
            for key in pt.iter_mut().skip(1) {
                *key = splitmix64(&mut state);
            }
        }
    }

    Tables {
        piece_square,
        hand,
        white_to_move: splitmix64(&mut state),
    }
});

#[inline]
fn is_castle_piece(pt: PieceType) -> bool {
    matches!(
        pt,
        PieceType::King
            | PieceType::Gold
            | PieceType::Silver
            | PieceType::ProPawn
            | PieceType::ProLance
            | PieceType::ProKnight
            | PieceType::ProSilver
    )
}

#[inline]
fn is_cavalry_piece(pt: PieceType) -> bool {
    matches!(pt, PieceType::Lance | PieceType::Knight)
}

/// The main key plus the two correction-history keys, updated in
/// lockstep.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Keys {
    pub all: u64,
    pub castle: u64,
    pub cavalry: u64,
}

impl Keys {
    #[inline]
    pub fn flip_piece(&mut self, piece: Piece, sq: Square) {
        let key = TABLES.piece_square[piece.index()][sq.index()];
        self.all ^= key;
        if is_castle_piece(piece.ptype) {
            self.castle ^= key;
        }
        if is_cavalry_piece(piece.ptype) {
            self.cavalry ^= key;
        }
    }

    #[inline]
    pub fn move_piece(&mut self, piece: Piece, from: Square, to: Square) {
        self.flip_piece(piece, from);
        self.flip_piece(piece, to);
    }

    #[inline]
    pub fn flip_stm(&mut self) {
        self.all ^= TABLES.white_to_move;
    }

    #[inline]
    pub fn switch_hand_count(&mut self, color: Color, pt: PieceType, before: u32, after: u32) {
        let row = &TABLES.hand[color.index()][pt.hand_index()];
        self.all ^= row[before as usize];
        self.all ^= row[after as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_piece_is_involutive() {
        let mut keys = Keys::default();
        let piece = Piece::new(PieceType::Gold, Color::Black);
        let sq = Square::parse("5e").unwrap();
        keys.flip_piece(piece, sq);
        assert_ne!(keys.all, 0);
        assert_ne!(keys.castle, 0);
        assert_eq!(keys.cavalry, 0);
        keys.flip_piece(piece, sq);
        assert_eq!(keys, Keys::default());
    }

    #[test]
    fn test_aux_keys_track_their_pieces() {
        let mut keys = Keys::default();
        keys.flip_piece(
            Piece::new(PieceType::Knight, Color::White),
            Square::parse("3c").unwrap(),
        );
        assert_ne!(keys.cavalry, 0);
        assert_eq!(keys.castle, 0);

        let mut keys = Keys::default();
        keys.flip_piece(
            Piece::new(PieceType::Rook, Color::Black),
            Square::parse("2h").unwrap(),
        );
        assert_eq!(keys.castle, 0);
        assert_eq!(keys.cavalry, 0);
        assert_ne!(keys.all, 0);
    }

    #[test]
    fn test_hand_count_zero_is_silent() {
        let mut keys = Keys::default();
        keys.switch_hand_count(Color::Black, PieceType::Pawn, 0, 1);
        assert_ne!(keys.all, 0);
        keys.switch_hand_count(Color::Black, PieceType::Pawn, 1, 0);
        assert_eq!(keys.all, 0);
    }
}
