// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use aya::{
    Ebpf,
    maps::{MapData, PerCpuArray},
    programs::{SchedClassifier, TcAttachType, Xdp, XdpFlags, tc},
};
use congestion_guard_common::{
    CONGESTION_MAP, ControlPlane, Slot, UpdateFlags, VERDICT_STATS_MAP, VerdictStats,
};
use log::{debug, info, warn};
use pnet::datalink;

use crate::{config::Hook, table::PinnedTable};

const TC_PROGRAM: &str = "congestion_tc";
const XDP_PROGRAM: &str = "congestion_xdp";

pub fn ebpf_load(hook: Hook) -> Result<Ebpf, anyhow::Error> {
    let bytes: &[u8] = match hook {
        Hook::Tc => aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/tc_ebpf")),
        Hook::Xdp => aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/xdp_ebpf")),
    };
    Ok(Ebpf::load(bytes)?)
}

/// Writes both slots before any packet can reach the hook.
pub fn table_init(bpf: &mut Ebpf, threshold: u32) -> Result<(), anyhow::Error> {
    let map = bpf
        .map_mut(CONGESTION_MAP)
        .with_context(|| format!("map {CONGESTION_MAP} not found"))?;
    let mut table = PinnedTable::from_map_mut(map)?;

    info!("pass threshold:{threshold} to congestion table");
    table.update(Slot::Counter, 0, UpdateFlags::Any)?;
    table.update(Slot::Threshold, threshold, UpdateFlags::Any)?;
    Ok(())
}

/// Removes the pin when dropped, so an early return or a signal-driven exit
/// never leaves a pinned table without a program behind it.
#[must_use]
pub struct PinGuard {
    path: PathBuf,
}

impl PinGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        table_unpin(&self.path);
    }
}

/// Pins the table so `get`, `set-threshold` and `monitor` can reach it from
/// another process. A pin left over from an earlier run is replaced.
pub fn table_pin(bpf: &mut Ebpf, path: &Path) -> Result<PinGuard, anyhow::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match fs::remove_file(path) {
        Ok(()) => warn!("replaced stale pin at {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(anyhow!("failed to remove stale pin {}: {e}", path.display())),
    }

    let map = bpf
        .map_mut(CONGESTION_MAP)
        .with_context(|| format!("map {CONGESTION_MAP} not found"))?;
    map.pin(path)
        .map_err(|e| anyhow!("failed to pin map {CONGESTION_MAP} at {}: {e}", path.display()))?;
    info!("pinned {CONGESTION_MAP} at {}", path.display());
    Ok(PinGuard {
        path: path.to_path_buf(),
    })
}

fn table_unpin(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!("unpinned {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove pin {}: {}", path.display(), e),
    }
}

pub fn ebpf_up(bpf: &mut Ebpf, hook: Hook, attach_iface: &str) -> Result<(), anyhow::Error> {
    match hook {
        Hook::Tc => {
            // clsact may already exist on the interface
            let _ = tc::qdisc_add_clsact(attach_iface);
            let program: &mut SchedClassifier = bpf
                .program_mut(TC_PROGRAM)
                .with_context(|| format!("program {TC_PROGRAM} not found"))?
                .try_into()?;
            program.load()?;
            info!("TC: Attach to {attach_iface}");
            program.attach(attach_iface, TcAttachType::Ingress)?;
            info!("TC: start!");
        }
        Hook::Xdp => {
            info!("XDP: Load");
            let program: &mut Xdp = bpf
                .program_mut(XDP_PROGRAM)
                .with_context(|| format!("program {XDP_PROGRAM} not found"))?
                .try_into()?;
            program.load()?;
            info!("XDP: Start");
            program.attach(attach_iface, XdpFlags::default())
            .context("failed to attach the XDP program with default flags - try changing XdpFlags::default() to XdpFlags::SKB_MODE")?;
        }
    }

    Ok(())
}

pub fn verdict_stats(bpf: &mut Ebpf) -> Result<PerCpuArray<MapData, VerdictStats>, anyhow::Error> {
    let map = bpf
        .take_map(VERDICT_STATS_MAP)
        .with_context(|| format!("map {VERDICT_STATS_MAP} not found"))?;
    Ok(PerCpuArray::try_from(map)?)
}

pub fn get_ifindex(ifname: &str) -> Result<u32, anyhow::Error> {
    Ok(datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == ifname)
        .ok_or(anyhow!("Unable find {}", ifname))?
        .index)
}

/// Older kernels charge map memory to RLIMIT_MEMLOCK instead of memcg.
pub fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }
}
