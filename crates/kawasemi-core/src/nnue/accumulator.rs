//! Incrementally maintained feature-transformer accumulators.

use super::features::{
    hand_feature_index, psqt_feature_index, requires_refresh, KingPair,
};
use super::network::{Network, L1_SIZE};
use crate::shogi::{Color, Move, Piece, PieceType, Position, Square};
use smallvec::SmallVec;

/// One pair of perspective accumulators.
#[derive(Clone)]
pub struct Accumulator {
    values: [[i16; L1_SIZE]; 2],
}

impl Accumulator {
    pub fn zeroed() -> Accumulator {
        Accumulator {
            values: [[0; L1_SIZE]; 2],
        }
    }

    #[inline]
    pub fn perspective(&self, c: Color) -> &[i16; L1_SIZE] {
        &self.values[c.index()]
    }

    #[inline]
    fn perspective_mut(&mut self, c: Color) -> &mut [i16; L1_SIZE] {
        &mut self.values[c.index()]
    }

    fn activate(&mut self, net: &Network, c: Color, feature: usize) {
        let weights = &net.ft_weights[feature];
        for (v, &w) in self.perspective_mut(c).iter_mut().zip(weights.iter()) {
            *v = v.wrapping_add(w);
        }
    }

    /// Rebuild one perspective from scratch.
    pub fn reset_perspective(&mut self, net: &Network, pos: &Position, c: Color) {
        let kings = KingPair::of(pos);

        *self.perspective_mut(c) = *net.ft_biases;

        for sq in Square::iter() {
            if let Some(piece) = pos.piece_on(sq) {
                let feature = psqt_feature_index(c, kings, piece, sq);
                self.activate(net, c, feature);
            }
        }

        for hand_color in [Color::Black, Color::White] {
            let hand = pos.hand(hand_color);
            if hand.is_empty() {
                continue;
            }
            for pt in PieceType::HAND_TYPES {
                for count in 0..hand.count(pt) {
                    let feature = hand_feature_index(c, pt, hand_color, count);
                    self.activate(net, c, feature);
                }
            }
        }
    }

    pub fn reset(&mut self, net: &Network, pos: &Position) {
        self.reset_perspective(net, pos, Color::Black);
        self.reset_perspective(net, pos, Color::White);
    }
}

/// Feature delta of one move: at most two additions and two removals
/// per perspective, or a refresh when the king crossed the mirror.
#[derive(Clone, Default)]
pub struct NnueUpdates {
    refresh: [bool; 2],
    adds: SmallVec<[[usize; 2]; 2]>,
    subs: SmallVec<[[usize; 2]; 2]>,
}

impl NnueUpdates {
    fn add(&mut self, kings: KingPair, piece: Piece, sq: Square) {
        self.adds.push([
            psqt_feature_index(Color::Black, kings, piece, sq),
            psqt_feature_index(Color::White, kings, piece, sq),
        ]);
    }

    fn sub(&mut self, kings: KingPair, piece: Piece, sq: Square) {
        self.subs.push([
            psqt_feature_index(Color::Black, kings, piece, sq),
            psqt_feature_index(Color::White, kings, piece, sq),
        ]);
    }

    fn add_hand(&mut self, pt: PieceType, owner: Color, count_minus_one: u32) {
        self.adds.push([
            hand_feature_index(Color::Black, pt, owner, count_minus_one),
            hand_feature_index(Color::White, pt, owner, count_minus_one),
        ]);
    }

    fn sub_hand(&mut self, pt: PieceType, owner: Color, count_minus_one: u32) {
        self.subs.push([
            hand_feature_index(Color::Black, pt, owner, count_minus_one),
            hand_feature_index(Color::White, pt, owner, count_minus_one),
        ]);
    }

    #[inline]
    pub fn requires_refresh(&self, c: Color) -> bool {
        self.refresh[c.index()]
    }

    /// The delta taking `prev` to `next` via `mv`.
    pub fn for_move(prev: &Position, next: &Position, mv: Move) -> NnueUpdates {
        let us = prev.stm();
        let kings = KingPair::of(next);
        let mut updates = NnueUpdates::default();

        if mv.is_drop() {
            let pt = mv.drop_piece();
            let count_before = prev.hand(us).count(pt);
            updates.add(kings, Piece::new(pt, us), mv.to());
            updates.sub_hand(pt, us, count_before - 1);
            return updates;
        }

        let piece = prev.piece_on(mv.from()).expect("move source is occupied");
        let landed = if mv.is_promo() {
            piece.promoted()
        } else {
            piece
        };

        if piece.ptype == PieceType::King
            && requires_refresh(us, next.king_sq(us), prev.king_sq(us))
        {
            updates.refresh[us.index()] = true;
        }

        updates.sub(kings, piece, mv.from());
        updates.add(kings, landed, mv.to());

        if let Some(captured) = prev.piece_on(mv.to()) {
            let hand_pt = captured.ptype.unpromoted();
            let count_before = prev.hand(us).count(hand_pt);
            updates.sub(kings, captured, mv.to());
            updates.add_hand(hand_pt, us, count_before);
        }

        updates
    }
}

fn apply_updates(
    net: &Network,
    pos: &Position,
    updates: &NnueUpdates,
    src: &Accumulator,
    dst: &mut Accumulator,
) {
    for c in [Color::Black, Color::White] {
        if updates.requires_refresh(c) {
            dst.reset_perspective(net, pos, c);
            continue;
        }

        let src_values = src.perspective(c);
        let dst_values = dst.perspective_mut(c);
        *dst_values = *src_values;

        for add in &updates.adds {
            let weights = &net.ft_weights[add[c.index()]];
            for (v, &w) in dst_values.iter_mut().zip(weights.iter()) {
                *v = v.wrapping_add(w);
            }
        }
        for sub in &updates.subs {
            let weights = &net.ft_weights[sub[c.index()]];
            for (v, &w) in dst_values.iter_mut().zip(weights.iter()) {
                *v = v.wrapping_sub(w);
            }
        }
    }
}

/// Accumulator stack owned by a worker. When no network is loaded the
/// stack only tracks its cursor and evaluation falls back to material.
pub struct NnueState {
    net: Option<std::sync::Arc<Network>>,
    stack: Vec<Accumulator>,
    cursor: usize,
}

impl NnueState {
    pub fn new() -> NnueState {
        NnueState {
            net: None,
            stack: Vec::new(),
            cursor: 0,
        }
    }

    pub fn reset(&mut self, pos: &Position, net: Option<std::sync::Arc<Network>>) {
        self.net = net;
        self.cursor = 0;
        if let Some(net) = self.net.clone() {
            if self.stack.is_empty() {
                self.stack = vec![Accumulator::zeroed(); crate::score::MAX_DEPTH as usize + 1];
            }
            self.stack[0].reset(&net, pos);
        }
    }

    pub fn push(&mut self, pos: &Position, updates: &NnueUpdates) {
        debug_assert!(self.cursor < crate::score::MAX_DEPTH as usize);
        if let Some(net) = self.net.clone() {
            let (head, tail) = self.stack.split_at_mut(self.cursor + 1);
            apply_updates(&net, pos, updates, &head[self.cursor], &mut tail[0]);
        }
        self.cursor += 1;
    }

    pub fn pop(&mut self) {
        debug_assert!(self.cursor > 0);
        self.cursor -= 1;
    }

    /// Overwrite the current frame instead of pushing.
    pub fn apply_in_place(&mut self, pos: &Position, updates: &NnueUpdates) {
        if let Some(net) = self.net.clone() {
            let src = self.stack[self.cursor].clone();
            apply_updates(&net, pos, updates, &src, &mut self.stack[self.cursor]);
        }
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn network(&self) -> Option<&Network> {
        self.net.as_deref()
    }

    /// Static score from the current stack top, side-to-move relative.
    pub fn evaluate(&self, pos: &Position) -> i32 {
        match &self.net {
            Some(net) => net.forward(&self.stack[self.cursor], pos.stm()),
            None => crate::eval::material_eval(pos),
        }
    }
}

impl Default for NnueState {
    fn default() -> Self {
        NnueState::new()
    }
}

/// One-shot evaluation from a freshly built accumulator.
pub fn evaluate_once(pos: &Position, net: Option<&Network>) -> i32 {
    match net {
        Some(net) => {
            let mut acc = Accumulator::zeroed();
            acc.reset(net, pos);
            net.forward(&acc, pos.stm())
        }
        None => crate::eval::material_eval(pos),
    }
}
