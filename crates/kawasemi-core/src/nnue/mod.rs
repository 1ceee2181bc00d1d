//! NNUE evaluator: feature indexing, accumulator stack and forward
//! pass.

mod accumulator;
pub mod features;
mod network;

pub use accumulator::{evaluate_once, Accumulator, NnueState, NnueUpdates};
pub use network::{Network, FT_Q, L1_Q, L1_SIZE, SCALE};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shogi::{generate_all, Move, MoveList, Position};
    use rand::Rng;
    use rand_xoshiro::rand_core::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use std::sync::Arc;

    /// A random quantised network; weights stay small so i16
    /// accumulators cannot saturate even with every feature active.
    fn random_network(seed: u64) -> Arc<Network> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let values = features::FT_SIZE * L1_SIZE + L1_SIZE + 2 * L1_SIZE + 1;
        let mut bytes = Vec::with_capacity(values * 2);
        for _ in 0..values {
            let w: i16 = rng.gen_range(-64..=64);
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        Arc::new(Network::from_bytes(&bytes).unwrap())
    }

    #[test]
    fn test_balanced_push_pop_restores_cursor_and_eval() {
        let net = random_network(17);
        let pos = Position::startpos();

        let mut state = NnueState::new();
        state.reset(&pos, Some(net.clone()));
        let baseline = state.evaluate(&pos);
        assert_eq!(baseline, evaluate_once(&pos, Some(&net)));

        let mut list = MoveList::new();
        generate_all(&mut list, &pos);
        for &mv in list.iter().filter(|m| pos.is_legal(**m)).take(8) {
            let next = pos.apply_move(mv);
            let updates = NnueUpdates::for_move(&pos, &next, mv);
            state.push(&next, &updates);
            assert_eq!(state.cursor(), 1);
            assert_eq!(
                state.evaluate(&next),
                evaluate_once(&next, Some(&net)),
                "incremental eval diverged after {mv}"
            );
            state.pop();
            assert_eq!(state.cursor(), 0);
            assert_eq!(state.evaluate(&pos), baseline);
        }
    }

    #[test]
    fn test_deep_line_stays_consistent() {
        let net = random_network(99);
        let mut state = NnueState::new();

        let mut pos = Position::startpos();
        state.reset(&pos, Some(net.clone()));

        // drive a line with captures, a promotion and a drop through
        // the incremental path
        for text in ["7g7f", "3c3d", "8h2b+", "3a2b", "B*4e", "2b3c", "4e3d"] {
            let mv = Move::parse(text).unwrap();
            let next = pos.apply_move(mv);
            let updates = NnueUpdates::for_move(&pos, &next, mv);
            state.push(&next, &updates);
            assert_eq!(
                state.evaluate(&next),
                evaluate_once(&next, Some(&net)),
                "diverged after {text}"
            );
            pos = next;
        }
    }

    #[test]
    fn test_king_mirror_crossing_refreshes_cleanly() {
        let net = random_network(3);
        // black king on 5e can cross the mirror boundary
        let pos = Position::from_sfen("4k4/9/9/9/4K4/9/9/9/9 b - 1").unwrap();
        let mut state = NnueState::new();
        state.reset(&pos, Some(net.clone()));

        for text in ["5e6e", "5a4a"] {
            let mv = Move::parse(text).unwrap();
            let prev = if state.cursor() == 0 {
                pos.clone()
            } else {
                pos.apply_move(Move::parse("5e6e").unwrap())
            };
            let next = prev.apply_move(mv);
            let updates = NnueUpdates::for_move(&prev, &next, mv);
            state.push(&next, &updates);
            assert_eq!(state.evaluate(&next), evaluate_once(&next, Some(&net)));
        }
    }

    #[test]
    fn test_apply_in_place_matches_push(){
        let net = random_network(5);
        let pos = Position::startpos();
        let mv = Move::parse("2g2f").unwrap();
        let next = pos.apply_move(mv);
        let updates = NnueUpdates::for_move(&pos, &next, mv);

        let mut pushed = NnueState::new();
        pushed.reset(&pos, Some(net.clone()));
        pushed.push(&next, &updates);

        let mut in_place = NnueState::new();
        in_place.reset(&pos, Some(net.clone()));
        in_place.apply_in_place(&next, &updates);

        assert_eq!(pushed.evaluate(&next), in_place.evaluate(&next));
        assert_eq!(in_place.cursor(), 0);
    }

    #[test]
    fn test_material_fallback_without_network() {
        let pos = Position::startpos();
        let mut state = NnueState::new();
        state.reset(&pos, None);
        assert_eq!(state.evaluate(&pos), 0);
        assert_eq!(evaluate_once(&pos, None), 0);
    }
}
