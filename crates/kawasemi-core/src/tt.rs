//! Transposition table.
//!
//! A flat array of 8-byte entries behind relaxed atomics; concurrent
//! probes and stores race freely and the low 16 key bits verify
//! whatever comes back. Entries are grouped into cache-line-aligned
//! blocks of eight. Resizes only mark the table dirty; the actual
//! allocation is deferred to [`TranspositionTable::finalize`] so a GUI
//! changing `USI_Hash` mid-session pays at the next `isready`.

use crate::score::{Score, MAX_DEPTH, SCORE_WIN};
use crate::shogi::Move;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

pub const DEFAULT_TT_SIZE_MIB: usize = 64;
pub const TT_SIZE_RANGE: (usize, usize) = (1, 131072);

const ENTRY_SIZE: usize = 8;
const BLOCK_ENTRIES: usize = 8;

/// Age is 5 bits wide; together with the pv bit and two bound bits it
/// fills the compound byte.
const AGE_BITS: u32 = 5;
pub const AGE_CYCLE: u8 = 1 << AGE_BITS;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Flag {
    None = 0,
    UpperBound = 1,
    LowerBound = 2,
    Exact = 3,
}

impl Flag {
    #[inline]
    fn from_bits(bits: u8) -> Flag {
        match bits & 0x3 {
            0 => Flag::None,
            1 => Flag::UpperBound,
            2 => Flag::LowerBound,
            _ => Flag::Exact,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ProbedEntry {
    pub score: Score,
    pub depth: i32,
    pub mv: Move,
    pub flag: Flag,
    pub pv: bool,
}

impl Default for ProbedEntry {
    fn default() -> Self {
        ProbedEntry {
            score: 0,
            depth: 0,
            mv: Move::NULL,
            flag: Flag::None,
            pv: false,
        }
    }
}

/// Mate scores are stored relative to the probing node so they stay
/// comparable across plies.
#[inline]
const fn score_to_tt(score: Score, ply: i32) -> Score {
    if score < -SCORE_WIN {
        score - ply
    } else if score > SCORE_WIN {
        score + ply
    } else {
        score
    }
}

#[inline]
const fn score_from_tt(score: Score, ply: i32) -> Score {
    if score < -SCORE_WIN {
        score + ply
    } else if score > SCORE_WIN {
        score - ply
    } else {
        score
    }
}

#[derive(Clone, Copy)]
struct Entry {
    key: u16,
    score: i16,
    mv: u16,
    depth: u8,
    compound: u8,
}

impl Entry {
    #[inline]
    fn pack(self) -> u64 {
        self.key as u64
            | (self.score as u16 as u64) << 16
            | (self.mv as u64) << 32
            | (self.depth as u64) << 48
            | (self.compound as u64) << 56
    }

    #[inline]
    fn unpack(raw: u64) -> Entry {
        Entry {
            key: raw as u16,
            score: (raw >> 16) as u16 as i16,
            mv: (raw >> 32) as u16,
            depth: (raw >> 48) as u8,
            compound: (raw >> 56) as u8,
        }
    }

    #[inline]
    fn age(self) -> u8 {
        self.compound >> 3
    }

    #[inline]
    fn pv(self) -> bool {
        self.compound & 0x4 != 0
    }

    #[inline]
    fn flag(self) -> Flag {
        Flag::from_bits(self.compound)
    }

    #[inline]
    fn compound_of(age: u8, pv: bool, flag: Flag) -> u8 {
        debug_assert!(age < AGE_CYCLE);
        (age << 3) | (u8::from(pv) << 2) | flag as u8
    }
}

#[repr(C, align(64))]
struct Block([AtomicU64; BLOCK_ENTRIES]);

impl Block {
    fn zeroed() -> Block {
        Block(std::array::from_fn(|_| AtomicU64::new(0)))
    }
}

pub struct TranspositionTable {
    blocks: Vec<Block>,
    entry_count: usize,
    pending_init: bool,
    age: AtomicU8,
}

impl TranspositionTable {
    pub fn new(mib: usize) -> TranspositionTable {
        let mut tt = TranspositionTable {
            blocks: Vec::new(),
            entry_count: 0,
            pending_init: false,
            age: AtomicU8::new(0),
        };
        tt.resize(mib);
        tt
    }

    /// Mark the table for reallocation; memory moves at `finalize`.
    pub fn resize(&mut self, mib: usize) {
        let entries = mib * 1024 * 1024 / ENTRY_SIZE;
        if entries != self.entry_count {
            self.blocks = Vec::new();
            self.entry_count = entries;
        }
        self.pending_init = true;
    }

    /// Perform a pending allocation. Returns whether any work was done.
    pub fn finalize(&mut self) -> bool {
        if !self.pending_init {
            return false;
        }
        self.pending_init = false;

        let block_count = self.entry_count / BLOCK_ENTRIES;
        let mut blocks = Vec::new();
        if blocks.try_reserve_exact(block_count).is_err() {
            log::error!("failed to allocate transposition table - out of memory?");
            std::process::abort();
        }
        blocks.resize_with(block_count, Block::zeroed);
        self.blocks = blocks;

        true
    }

    #[inline]
    fn index(&self, key: u64) -> usize {
        ((key as u128 * self.entry_count as u128) >> 64) as usize
    }

    #[inline]
    fn slot(&self, idx: usize) -> &AtomicU64 {
        &self.blocks[idx / BLOCK_ENTRIES].0[idx % BLOCK_ENTRIES]
    }

    pub fn probe(&self, dst: &mut ProbedEntry, key: u64, ply: i32) -> bool {
        debug_assert!(!self.pending_init);

        let entry = Entry::unpack(self.slot(self.index(key)).load(Ordering::Relaxed));

        if entry.key == key as u16 {
            dst.score = score_from_tt(entry.score as Score, ply);
            dst.depth = entry.depth as i32;
            dst.mv = Move::from_raw(entry.mv);
            dst.flag = entry.flag();
            dst.pv = entry.pv();
            return true;
        }

        false
    }

    pub fn put(
        &self,
        key: u64,
        score: Score,
        mv: Move,
        depth: i32,
        ply: i32,
        flag: Flag,
        pv: bool,
    ) {
        debug_assert!(!self.pending_init);
        debug_assert!((0..=MAX_DEPTH).contains(&depth));

        let packed_key = key as u16;
        let slot = self.slot(self.index(key));
        let mut entry = Entry::unpack(slot.load(Ordering::Relaxed));
        let age = self.age.load(Ordering::Relaxed);

        let replace = flag == Flag::Exact
            || packed_key != entry.key
            || entry.age() != age
            || depth + 4 > entry.depth as i32;
        if !replace {
            return;
        }

        // keep the old move when refreshing the same position without
        // a new one
        if !mv.is_null() || entry.key != packed_key {
            entry.mv = mv.raw();
        }

        entry.key = packed_key;
        entry.score = score_to_tt(score, ply) as i16;
        entry.depth = depth as u8;
        entry.compound = Entry::compound_of(age, pv, flag);

        slot.store(entry.pack(), Ordering::Relaxed);
    }

    pub fn age(&self) {
        let next = (self.age.load(Ordering::Relaxed) + 1) % AGE_CYCLE;
        self.age.store(next, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        debug_assert!(!self.pending_init);
        self.age.store(0, Ordering::Relaxed);
        for block in &self.blocks {
            for slot in &block.0 {
                slot.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Occupancy of the first thousand entries, in permille.
    pub fn full_permille(&self) -> u32 {
        debug_assert!(!self.pending_init);

        let age = self.age.load(Ordering::Relaxed);
        let sample = 1000.min(self.entry_count);
        let mut filled = 0;
        for idx in 0..sample {
            let entry = Entry::unpack(self.slot(idx).load(Ordering::Relaxed));
            if entry.flag() != Flag::None && entry.age() == age {
                filled += 1;
            }
        }
        filled
    }

    #[inline]
    pub fn prefetch(&self, key: u64) {
        if !self.blocks.is_empty() {
            crate::prefetch::prefetch(self.slot(self.index(key)));
        }
    }
}
