// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::{ControlPlane, CounterStore, Slot, TABLE_CAPACITY, TableError, UpdateFlags};

/// In-process congestion table backed by plain atomics.
///
/// Serves data paths that run the admission check in userspace and mirrors
/// the kernel array semantics: a slot is absent until the control plane
/// writes it.
#[derive(Debug, Default)]
pub struct LocalTable {
    values: [AtomicU32; TABLE_CAPACITY as usize],
    present: [AtomicBool; TABLE_CAPACITY as usize],
}

impl LocalTable {
    pub const fn new() -> Self {
        Self {
            values: [AtomicU32::new(0), AtomicU32::new(0)],
            present: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    pub const fn with_values(counter: u32, threshold: u32) -> Self {
        Self {
            values: [AtomicU32::new(counter), AtomicU32::new(threshold)],
            present: [AtomicBool::new(true), AtomicBool::new(true)],
        }
    }

    fn is_present(&self, slot: Slot) -> bool {
        self.present[slot.index()].load(Ordering::Acquire)
    }
}

impl CounterStore for LocalTable {
    fn get(&self, slot: Slot) -> Option<u32> {
        self.is_present(slot)
            .then(|| self.values[slot.index()].load(Ordering::Relaxed))
    }

    fn increment(&self, slot: Slot) {
        if self.is_present(slot) {
            self.values[slot.index()].fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl ControlPlane for LocalTable {
    type Error = TableError;

    fn read(&self, slot: Slot) -> Result<u32, TableError> {
        self.get(slot).ok_or(TableError::SlotMissing(slot))
    }

    fn update(&mut self, slot: Slot, value: u32, flags: UpdateFlags) -> Result<(), TableError> {
        match (flags, self.is_present(slot)) {
            (UpdateFlags::NoExist, true) => return Err(TableError::SlotExists(slot)),
            (UpdateFlags::Exist, false) => return Err(TableError::SlotMissing(slot)),
            _ => {}
        }

        self.values[slot.index()].store(value, Ordering::Relaxed);
        self.present[slot.index()].store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_start_absent() {
        let table = LocalTable::new();
        assert_eq!(table.get(Slot::Counter), None);
        assert_eq!(table.get(Slot::Threshold), None);
        assert_eq!(
            table.read(Slot::Threshold),
            Err(TableError::SlotMissing(Slot::Threshold))
        );
    }

    #[test]
    fn increment_on_absent_slot_is_ignored() {
        let table = LocalTable::new();
        table.increment(Slot::Counter);
        assert_eq!(table.get(Slot::Counter), None);
    }

    #[test]
    fn create_only_refuses_existing_slot() {
        let mut table = LocalTable::new();
        table.update(Slot::Threshold, 3, UpdateFlags::NoExist).unwrap();

        assert_eq!(
            table.update(Slot::Threshold, 4, UpdateFlags::NoExist),
            Err(TableError::SlotExists(Slot::Threshold))
        );
        assert_eq!(table.read(Slot::Threshold), Ok(3));
    }

    #[test]
    fn update_only_refuses_missing_slot() {
        let mut table = LocalTable::new();
        assert_eq!(
            table.update(Slot::Counter, 0, UpdateFlags::Exist),
            Err(TableError::SlotMissing(Slot::Counter))
        );

        table.update(Slot::Counter, 9, UpdateFlags::Any).unwrap();
        table.update(Slot::Counter, 0, UpdateFlags::Exist).unwrap();
        assert_eq!(table.read(Slot::Counter), Ok(0));
    }

    #[test]
    fn set_threshold_requires_initialized_slot() {
        let mut table = LocalTable::new();
        assert_eq!(
            table.set_threshold(12),
            Err(TableError::SlotMissing(Slot::Threshold))
        );
        assert_eq!(table.get(Slot::Threshold), None);

        table.update(Slot::Threshold, 3, UpdateFlags::NoExist).unwrap();
        table.set_threshold(12).unwrap();
        assert_eq!(table.read(Slot::Threshold), Ok(12));
    }

    #[test]
    fn slots_are_independent() {
        let mut table = LocalTable::new();
        table.update(Slot::Threshold, 12, UpdateFlags::Any).unwrap();

        assert_eq!(table.get(Slot::Threshold), Some(12));
        assert_eq!(table.get(Slot::Counter), None);
    }
}
