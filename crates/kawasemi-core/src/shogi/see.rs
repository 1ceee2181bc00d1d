//! Static exchange evaluation.
//!
//! Classic gain-array formulation: play out captures on the
//! destination square, always recapturing with the least valuable
//! attacker, then minimax the speculative gains backwards. Promotions
//! during the exchange and pins are ignored.

use super::movegen::Board;
use super::moves::Move;
use super::piece::{Color, PieceType};
use super::position::Position;
use super::square::Square;
use crate::score::Score;

/// Exchange value of a piece standing on the board.
pub const fn piece_value(pt: PieceType) -> Score {
    match pt {
        PieceType::Pawn => 100,
        PieceType::Lance => 300,
        PieceType::Knight => 350,
        PieceType::Silver => 500,
        PieceType::Gold => 550,
        PieceType::Bishop => 800,
        PieceType::Rook => 1000,
        PieceType::King => 30000,
        PieceType::ProPawn => 550,
        PieceType::ProLance => 550,
        PieceType::ProKnight => 550,
        PieceType::ProSilver => 550,
        PieceType::Horse => 1100,
        PieceType::Dragon => 1300,
    }
}

/// Least valuable piece of `side` attacking `sq`, if any.
fn least_valuable_attacker(board: &Board, sq: Square, side: Color) -> Option<Square> {
    let mut best: Option<(Score, Square)> = None;
    for from in Square::iter() {
        let Some(piece) = board[from.index()] else {
            continue;
        };
        if piece.color != side {
            continue;
        }
        if !super::movegen::piece_attacks(board, piece, from, sq) {
            continue;
        }
        let value = piece_value(piece.ptype);
        if best.map_or(true, |(v, _)| value < v) {
            best = Some((value, from));
        }
    }
    best.map(|(_, sq)| sq)
}

/// Whether the side to move comes out of the exchange on `mv.to()` at
/// least `threshold` ahead.
pub fn see(pos: &Position, mv: Move, threshold: Score) -> bool {
    let to = mv.to();

    let captured = pos
        .piece_on(to)
        .map(|p| piece_value(p.ptype))
        .unwrap_or(0);

    // value of the piece that ends up on the square
    let mut trophy = if mv.is_drop() {
        piece_value(mv.drop_piece())
    } else {
        let piece = pos.piece_on(mv.from()).expect("move source is occupied");
        let pt = if mv.is_promo() {
            piece.ptype.promoted()
        } else {
            piece.ptype
        };
        piece_value(pt)
    };

    let mut board = *pos.board();
    if !mv.is_drop() {
        board[mv.from().index()] = None;
    }
    let us = pos.stm();
    board[to.index()] = Some(super::piece::Piece::new(
        // type is irrelevant for occupancy; keep the mover's color so
        // attacker scans see the square as occupied by `us`
        if mv.is_drop() {
            mv.drop_piece()
        } else {
            pos.piece_on(mv.from()).unwrap().ptype
        },
        us,
    ));

    let mut gain = [0 as Score; 40];
    gain[0] = captured;
    let mut depth = 0usize;
    let mut side = us.flip();

    while depth + 1 < gain.len() {
        let Some(att_sq) = least_valuable_attacker(&board, to, side) else {
            break;
        };
        let attacker = board[att_sq.index()].expect("attacker exists");

        // a king may not recapture a defended piece
        if attacker.ptype == PieceType::King {
            let mut without_king = board;
            without_king[att_sq.index()] = None;
            if super::movegen::square_attacked(&without_king, to, side.flip()) {
                break;
            }
        }

        depth += 1;
        gain[depth] = trophy - gain[depth - 1];
        trophy = piece_value(attacker.ptype);

        board[att_sq.index()] = None;
        board[to.index()] = Some(attacker);
        side = side.flip();
    }

    while depth > 0 {
        gain[depth - 1] = -Score::max(-gain[depth - 1], gain[depth]);
        depth -= 1;
    }

    gain[0] >= threshold
}
