//! Network weights and the forward pass.
//!
//! One feature transformer into two perspective accumulators of
//! [`L1_SIZE`] values, SCReLU activation, then a single output layer
//! with one weight row per perspective. Weights are quantised i16 and
//! loaded from a raw little-endian blob (`EvalFile` option).

use super::accumulator::Accumulator;
use crate::shogi::Color;
use anyhow::{bail, Context, Result};
use std::path::Path;

pub const L1_SIZE: usize = 1024;

pub const FT_Q: i32 = 255;
pub const L1_Q: i32 = 128;
pub const SCALE: i32 = 400;

pub struct Network {
    pub(crate) ft_weights: Vec<[i16; L1_SIZE]>,
    pub(crate) ft_biases: Box<[i16; L1_SIZE]>,
    pub(crate) l1_weights: Box<[[i16; L1_SIZE]; 2]>,
    pub(crate) l1_bias: i16,
}

impl Network {
    /// Total i16 count of the wire format.
    const WIRE_VALUES: usize = super::features::FT_SIZE * L1_SIZE + L1_SIZE + 2 * L1_SIZE + 1;

    pub fn from_bytes(bytes: &[u8]) -> Result<Network> {
        if bytes.len() != Self::WIRE_VALUES * 2 {
            bail!(
                "bad network size: expected {} bytes, got {}",
                Self::WIRE_VALUES * 2,
                bytes.len()
            );
        }

        let mut cursor = bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]]));
        let mut next = || cursor.next().expect("length checked above");

        let mut ft_weights = Vec::with_capacity(super::features::FT_SIZE);
        for _ in 0..super::features::FT_SIZE {
            let mut row = [0i16; L1_SIZE];
            for w in row.iter_mut() {
                *w = next();
            }
            ft_weights.push(row);
        }

        let mut ft_biases = Box::new([0i16; L1_SIZE]);
        for b in ft_biases.iter_mut() {
            *b = next();
        }

        let mut l1_weights = Box::new([[0i16; L1_SIZE]; 2]);
        for row in l1_weights.iter_mut() {
            for w in row.iter_mut() {
                *w = next();
            }
        }

        let l1_bias = next();

        Ok(Network {
            ft_weights,
            ft_biases,
            l1_weights,
            l1_bias,
        })
    }

    pub fn load(path: &Path) -> Result<Network> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read eval file {}", path.display()))?;
        Network::from_bytes(&bytes)
    }

    /// Forward pass over a finished accumulator pair.
    pub fn forward(&self, acc: &Accumulator, stm: Color) -> i32 {
        let screlu = |v: i16| {
            let clipped = (v as i64).clamp(0, FT_Q as i64);
            clipped * clipped
        };

        let mut out: i64 = 0;
        for (row, &perspective) in self.l1_weights.iter().zip(&[stm, stm.flip()]) {
            let values = acc.perspective(perspective);
            for (value, &weight) in values.iter().zip(row.iter()) {
                out += screlu(*value) * weight as i64;
            }
        }

        out /= FT_Q as i64;
        out += self.l1_bias as i64;

        (out * SCALE as i64 / (FT_Q * L1_Q) as i64) as i32
    }
}
