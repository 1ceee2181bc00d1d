//! Score scale and mate encoding.

/// Centipawn-ish score as used throughout the search.
pub type Score = i32;

/// Deepest ply the search will ever reach. TT depths are stored in a
/// byte, so this also bounds storable depths.
pub const MAX_DEPTH: i32 = 255;

/// Largest finite score.
pub const SCORE_INF: Score = 32767;
/// Mate at ply 0.
pub const SCORE_MATE: Score = 32766;
/// Scores above this magnitude denote a forced win/loss of some kind.
pub const SCORE_WIN: Score = 25000;
/// Scores at or above this magnitude decode to a mate distance.
pub const SCORE_MAX_MATE: Score = SCORE_MATE - MAX_DEPTH;
/// Sentinel for "no static eval available" (in-check nodes).
pub const SCORE_NONE: Score = -32768;

/// Mate score for the side to move mating in `ply` plies.
#[inline]
pub const fn mate_in(ply: i32) -> Score {
    SCORE_MATE - ply
}

/// Mate score for the side to move being mated in `ply` plies.
#[inline]
pub const fn mated_in(ply: i32) -> Score {
    -SCORE_MATE + ply
}

/// Whether `score` is a decisive (forced win/loss) score.
#[inline]
pub const fn is_win(score: Score) -> bool {
    score.abs() > SCORE_WIN
}

/// Whether `score` encodes a concrete mate distance.
#[inline]
pub const fn is_mate(score: Score) -> bool {
    score.abs() >= SCORE_MAX_MATE
}

/// Plies until mate for a mate score. Positive for the winning side.
#[inline]
pub const fn mate_distance(score: Score) -> i32 {
    if score > 0 {
        SCORE_MATE - score
    } else {
        -(SCORE_MATE + score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mate_roundtrip() {
        for ply in 0..MAX_DEPTH {
            let win = mate_in(ply);
            assert!(is_mate(win));
            assert!(is_win(win));
            assert_eq!(mate_distance(win), ply);

            let loss = mated_in(ply);
            assert!(is_mate(loss));
            assert!(is_win(loss));
            assert_eq!(mate_distance(loss), -ply);
        }
    }

    #[test]
    fn test_ordinary_scores_are_not_mates() {
        for s in [-SCORE_WIN, -2000, -1, 0, 1, 2000, SCORE_WIN] {
            assert!(!is_mate(s));
        }
        assert!(!is_win(SCORE_WIN));
        assert!(is_win(SCORE_WIN + 1));
    }

    #[test]
    fn test_mate_bounds_fit_in_range() {
        assert!(SCORE_MAX_MATE > SCORE_WIN);
        assert!(mate_in(MAX_DEPTH) >= SCORE_MAX_MATE);
        assert!(SCORE_MATE < SCORE_INF);
    }
}
