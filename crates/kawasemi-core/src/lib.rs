//! Kawasemi engine core.
//!
//! The crate is split into the board collaborator layer ([`shogi`]),
//! the evaluator ([`nnue`], [`eval`]), the search heuristics
//! ([`history`], [`correction`], [`tt`], [`movepick`], [`limits`]) and
//! the search itself ([`search`]). The USI front-end lives in the
//! `kawasemi-usi` crate and talks to the engine through
//! [`handler::SearchHandler`] and [`search::Searcher`].

pub mod correction;
pub mod eval;
pub mod handler;
pub mod history;
pub mod limits;
pub mod movepick;
pub mod nnue;
pub mod prefetch;
pub mod pv;
pub mod score;
pub mod search;
pub mod shogi;
pub mod tt;

pub use score::Score;
