//! Static evaluation entry points.
//!
//! The search only ever sees clamped, correction-adjusted scores from
//! here; the raw network (or the material fallback when no eval file
//! is loaded) lives below.

use crate::correction::CorrectionHistoryTable;
use crate::nnue::NnueState;
use crate::score::{Score, SCORE_WIN};
use crate::shogi::{Color, PieceType, Position, Square};

/// Material values for the fallback evaluator.
const fn material_value(pt: PieceType) -> Score {
    match pt {
        PieceType::Pawn => 90,
        PieceType::Lance => 315,
        PieceType::Knight => 405,
        PieceType::Silver => 495,
        PieceType::Gold => 540,
        PieceType::Bishop => 855,
        PieceType::Rook => 990,
        PieceType::King => 0,
        PieceType::ProPawn | PieceType::ProLance | PieceType::ProKnight | PieceType::ProSilver => {
            540
        }
        PieceType::Horse => 945,
        PieceType::Dragon => 1395,
    }
}

/// Plain material count from the side to move's perspective. Used when
/// no network has been loaded.
pub fn material_eval(pos: &Position) -> Score {
    let mut score = 0;
    for sq in Square::iter() {
        if let Some(piece) = pos.piece_on(sq) {
            let value = material_value(piece.ptype);
            if piece.color == pos.stm() {
                score += value;
            } else {
                score -= value;
            }
        }
    }
    for color in [Color::Black, Color::White] {
        let hand = pos.hand(color);
        let sign = if color == pos.stm() { 1 } else { -1 };
        for pt in PieceType::HAND_TYPES {
            score += sign * hand.count(pt) as Score * material_value(pt);
        }
    }
    score
}

#[inline]
fn clamp_eval(score: Score) -> Score {
    score.clamp(-SCORE_WIN + 1, SCORE_WIN - 1)
}

/// Raw static eval from the accumulator stack top.
pub fn static_eval(pos: &Position, nnue: &NnueState) -> Score {
    clamp_eval(nnue.evaluate(pos))
}

/// Static eval with the correction-history residual mixed in. The
/// small ply scaling nudges long lines towards the tempo holder.
pub fn corrected_static_eval(
    pos: &Position,
    nnue: &NnueState,
    corrhist: &CorrectionHistoryTable,
    ply: i32,
) -> Score {
    let eval = static_eval(pos, nnue);
    let eval = eval * (1024 + ply) / 1024;
    clamp_eval(eval + corrhist.correction(pos))
}
