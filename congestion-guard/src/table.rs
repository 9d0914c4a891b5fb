// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    borrow::{Borrow, BorrowMut},
    fmt::{self, Display},
    path::Path,
};

use anyhow::{Context, anyhow};
use aya::maps::{Array, Map, MapData};
use congestion_guard_common::{ControlPlane, Slot, UpdateFlags};

/// Control-plane handle on the kernel `CONGESTION_REG` array.
///
/// Owns the map when opened from bpffs, borrows it while the loader is still
/// holding the object.
pub struct PinnedTable<T = MapData> {
    array: Array<T, u32>,
}

impl PinnedTable<MapData> {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        if !path.exists() {
            anyhow::bail!("pinned map not found at {}", path.display());
        }
        let map_data = MapData::from_pin(path)
            .map_err(|e| anyhow!("failed to open pinned map {}: {e}", path.display()))?;
        let map = Map::from_map_data(map_data).map_err(|e| anyhow!("invalid map type: {e}"))?;
        Self::from_map(map)
    }

    pub fn from_map(map: Map) -> Result<Self, anyhow::Error> {
        let array = Array::try_from(map).context("congestion table has unexpected type")?;
        Ok(Self { array })
    }
}

impl<'a> PinnedTable<&'a mut MapData> {
    pub fn from_map_mut(map: &'a mut Map) -> Result<Self, anyhow::Error> {
        let array = Array::try_from(map).context("congestion table has unexpected type")?;
        Ok(Self { array })
    }
}

impl<T: Borrow<MapData>> PinnedTable<T> {
    pub fn snapshot(&self) -> Result<Snapshot, anyhow::Error> {
        Ok(Snapshot {
            counter: self.get(Slot::Counter)?,
            threshold: self.get(Slot::Threshold)?,
        })
    }

    fn get(&self, slot: Slot) -> Result<u32, anyhow::Error> {
        self.array
            .get(&slot.key(), 0)
            .with_context(|| format!("failed to read {slot} slot"))
    }
}

impl<T: BorrowMut<MapData>> ControlPlane for PinnedTable<T> {
    type Error = anyhow::Error;

    fn read(&self, slot: Slot) -> Result<u32, anyhow::Error> {
        self.get(slot)
    }

    fn update(&mut self, slot: Slot, value: u32, flags: UpdateFlags) -> Result<(), anyhow::Error> {
        self.array
            .set(slot.key(), value, flags.bits())
            .with_context(|| format!("failed to write {value} to {slot} slot"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub counter: u32,
    pub threshold: u32,
}

impl Snapshot {
    /// Whether the next packet would be dropped.
    pub fn congested(&self) -> bool {
        self.counter > self.threshold
    }
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "counter={} threshold={}", self.counter, self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_renders_like_controller_output() {
        let snapshot = Snapshot {
            counter: 17,
            threshold: 3,
        };
        assert_eq!(snapshot.to_string(), "counter=17 threshold=3");
        assert!(snapshot.congested());
    }

    #[test]
    fn snapshot_at_limit_is_not_congested() {
        let snapshot = Snapshot {
            counter: 3,
            threshold: 3,
        };
        assert!(!snapshot.congested());
    }

    #[test]
    fn open_reports_missing_pin() {
        let err = PinnedTable::open(Path::new("/nonexistent/congestion_reg"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("pinned map not found"));
    }
}
