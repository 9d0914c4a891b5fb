// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

use core::sync::atomic::{AtomicU32, Ordering};

use aya_ebpf::maps::{Array, PerCpuArray};
use congestion_guard_common::{CounterStore, Slot, Verdict, VerdictStats};

/// Kernel-side handle on the `CONGESTION_REG` array.
pub struct KernelTable<'a> {
    map: &'a Array<u32>,
}

impl<'a> KernelTable<'a> {
    #[inline(always)]
    pub const fn new(map: &'a Array<u32>) -> Self {
        Self { map }
    }

    #[inline(always)]
    fn slot(&self, slot: Slot) -> Option<&'a AtomicU32> {
        let value = self.map.get_ptr_mut(slot.key())?;
        // Array values are u32-aligned and live as long as the map.
        Some(unsafe { AtomicU32::from_ptr(value) })
    }
}

impl CounterStore for KernelTable<'_> {
    #[inline(always)]
    fn get(&self, slot: Slot) -> Option<u32> {
        self.slot(slot).map(|value| value.load(Ordering::Relaxed))
    }

    #[inline(always)]
    fn increment(&self, slot: Slot) {
        if let Some(value) = self.slot(slot) {
            value.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[inline(always)]
pub fn record_verdict(stats: &PerCpuArray<VerdictStats>, verdict: Verdict) {
    if let Some(entry) = stats.get_ptr_mut(0) {
        unsafe { (*entry).record(verdict) };
    }
}
