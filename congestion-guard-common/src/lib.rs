// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(not(target_arch = "bpf"))]
mod local;

use core::{
    error::Error,
    fmt::{self, Display},
};

#[cfg(not(target_arch = "bpf"))]
pub use local::LocalTable;

/// Name of the array map in both hook objects.
pub const CONGESTION_MAP: &str = "CONGESTION_REG";
pub const VERDICT_STATS_MAP: &str = "VERDICT_STATS";
pub const TABLE_CAPACITY: u32 = 2;

pub const COUNTER_KEY: u32 = 0;
pub const THRESHOLD_KEY: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Slot {
    Counter = COUNTER_KEY,
    Threshold = THRESHOLD_KEY,
}

impl Slot {
    #[inline(always)]
    pub const fn key(self) -> u32 {
        self as u32
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u32> for Slot {
    type Error = TableError;

    fn try_from(key: u32) -> Result<Self, Self::Error> {
        match key {
            COUNTER_KEY => Ok(Slot::Counter),
            THRESHOLD_KEY => Ok(Slot::Threshold),
            other => Err(TableError::UnknownKey(other)),
        }
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Counter => write!(f, "counter"),
            Slot::Threshold => write!(f, "threshold"),
        }
    }
}

/// Write mode for control-plane updates. Values match `BPF_ANY`,
/// `BPF_NOEXIST` and `BPF_EXIST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u64)]
pub enum UpdateFlags {
    #[default]
    Any = 0,
    NoExist = 1,
    Exist = 2,
}

impl UpdateFlags {
    pub const fn bits(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    UnknownKey(u32),
    SlotExists(Slot),
    SlotMissing(Slot),
}

impl Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::UnknownKey(key) => write!(f, "Unknown congestion table key {key}"),
            TableError::SlotExists(slot) => write!(f, "Slot {slot} is already initialized"),
            TableError::SlotMissing(slot) => write!(f, "Slot {slot} is not initialized"),
        }
    }
}

impl Error for TableError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Drop,
}

impl Verdict {
    #[inline(always)]
    pub const fn is_drop(self) -> bool {
        matches!(self, Verdict::Drop)
    }
}

/// Per-CPU decision totals kept next to the congestion table.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictStats {
    pub admitted: u64,
    pub dropped: u64,
}

impl VerdictStats {
    #[inline(always)]
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Admit => self.admitted = self.admitted.wrapping_add(1),
            Verdict::Drop => self.dropped = self.dropped.wrapping_add(1),
        }
    }

    pub fn merge(self, other: VerdictStats) -> VerdictStats {
        VerdictStats {
            admitted: self.admitted.wrapping_add(other.admitted),
            dropped: self.dropped.wrapping_add(other.dropped),
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for VerdictStats {}

/// Fast-path view of the counter table.
///
/// `increment` must be one atomic fetch-and-add; a load followed by a store
/// loses updates when several CPUs run the hook at once.
pub trait CounterStore {
    fn get(&self, slot: Slot) -> Option<u32>;
    fn increment(&self, slot: Slot);
}

/// Privileged view of the counter table, used to configure the threshold and
/// reset the counter.
pub trait ControlPlane {
    type Error;

    fn read(&self, slot: Slot) -> Result<u32, Self::Error>;
    fn update(&mut self, slot: Slot, value: u32, flags: UpdateFlags) -> Result<(), Self::Error>;

    /// Replaces the threshold of an initialized table; never creates the slot.
    fn set_threshold(&mut self, limit: u32) -> Result<(), Self::Error> {
        self.update(Slot::Threshold, limit, UpdateFlags::Exist)
    }

    fn reset_counter(&mut self) -> Result<(), Self::Error> {
        self.update(Slot::Counter, 0, UpdateFlags::Any)
    }
}

/// Counts the current packet and decides whether it must be dropped.
///
/// Both slots are read before the increment and the drop test uses that
/// pre-increment counter, so with `THRESHOLD = L` the packet that observes
/// `L` is still admitted and the next one is dropped. A missing slot admits
/// without counting.
#[inline(always)]
pub fn check_congestion<S: CounterStore + ?Sized>(table: &S) -> Verdict {
    let (count, limit) = match (table.get(Slot::Counter), table.get(Slot::Threshold)) {
        (Some(count), Some(limit)) => (count, limit),
        _ => return Verdict::Admit,
    };

    table.increment(Slot::Counter);

    if count > limit {
        Verdict::Drop
    } else {
        Verdict::Admit
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;

    #[test]
    fn slot_keys_round_trip_and_reject_unknown() {
        assert_eq!(Slot::try_from(0), Ok(Slot::Counter));
        assert_eq!(Slot::try_from(1), Ok(Slot::Threshold));
        assert_eq!(Slot::try_from(2), Err(TableError::UnknownKey(2)));
        assert_eq!(Slot::Threshold.key(), THRESHOLD_KEY);
    }

    #[test]
    fn update_flags_match_bpf_values() {
        assert_eq!(UpdateFlags::Any.bits(), 0);
        assert_eq!(UpdateFlags::NoExist.bits(), 1);
        assert_eq!(UpdateFlags::Exist.bits(), 2);
    }

    #[test]
    fn uninitialized_table_always_admits() {
        let table = LocalTable::new();
        for _ in 0..1000 {
            assert_eq!(check_congestion(&table), Verdict::Admit);
        }
        assert_eq!(table.get(Slot::Counter), None);
    }

    #[test]
    fn missing_threshold_admits_without_counting() {
        let mut table = LocalTable::new();
        table.update(Slot::Counter, 10, UpdateFlags::Any).unwrap();

        assert_eq!(check_congestion(&table), Verdict::Admit);
        assert_eq!(table.get(Slot::Counter), Some(10));
    }

    #[test]
    fn every_call_counts_once_whatever_the_verdict() {
        let table = LocalTable::with_values(0, 5);
        let verdicts: Vec<Verdict> = (0..20).map(|_| check_congestion(&table)).collect();

        assert_eq!(table.get(Slot::Counter), Some(20));
        assert_eq!(verdicts.iter().filter(|v| v.is_drop()).count(), 14);
    }

    #[test]
    fn threshold_boundary_admits_at_limit() {
        let limit = 100;
        for (start, expected) in [
            (limit - 1, Verdict::Admit),
            (limit, Verdict::Admit),
            (limit + 1, Verdict::Drop),
        ] {
            let table = LocalTable::with_values(start, limit);
            assert_eq!(check_congestion(&table), expected, "counter {start}");
            assert_eq!(table.get(Slot::Counter), Some(start + 1));
        }
    }

    #[test]
    fn threshold_of_three_drops_fifth_packet() {
        let table = LocalTable::with_values(0, 3);
        let verdicts: Vec<Verdict> = (0..5).map(|_| check_congestion(&table)).collect();

        assert_eq!(
            verdicts,
            [
                Verdict::Admit,
                Verdict::Admit,
                Verdict::Admit,
                Verdict::Admit,
                Verdict::Drop
            ]
        );
        assert_eq!(table.get(Slot::Counter), Some(5));
    }

    #[test]
    fn parallel_checks_never_lose_increments() {
        const THREADS: u32 = 8;
        const PER_THREAD: u32 = 10_000;

        let table = LocalTable::with_values(7, 1_000);
        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..PER_THREAD {
                        check_congestion(&table);
                    }
                });
            }
        });

        assert_eq!(table.get(Slot::Counter), Some(7 + THREADS * PER_THREAD));
    }

    #[test]
    fn new_threshold_applies_to_following_checks() {
        let mut table = LocalTable::with_values(0, 2);
        for _ in 0..4 {
            check_congestion(&table);
        }
        assert_eq!(check_congestion(&table), Verdict::Drop);

        table.set_threshold(50).unwrap();
        assert_eq!(check_congestion(&table), Verdict::Admit);
    }

    #[test]
    fn reset_reopens_the_window() {
        let mut table = LocalTable::with_values(10, 3);
        assert_eq!(check_congestion(&table), Verdict::Drop);

        table.reset_counter().unwrap();
        assert_eq!(check_congestion(&table), Verdict::Admit);
        assert_eq!(table.get(Slot::Counter), Some(1));
    }

    #[test]
    fn counter_wraps_at_u32_max() {
        let table = LocalTable::with_values(u32::MAX, 3);
        assert_eq!(check_congestion(&table), Verdict::Drop);
        assert_eq!(table.get(Slot::Counter), Some(0));
        assert_eq!(check_congestion(&table), Verdict::Admit);
    }

    #[test]
    fn verdict_stats_record_and_merge() {
        let mut a = VerdictStats::default();
        a.record(Verdict::Admit);
        a.record(Verdict::Drop);
        a.record(Verdict::Admit);
        let b = VerdictStats {
            admitted: 1,
            dropped: 4,
        };

        assert_eq!(
            a.merge(b),
            VerdictStats {
                admitted: 3,
                dropped: 5
            }
        );
    }
}
