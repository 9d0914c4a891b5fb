// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only
#![no_std]
#![no_main]
#[path = "../table.rs"]
mod table;

use aya_ebpf::{
    bindings::xdp_action::{XDP_DROP, XDP_PASS},
    macros::{map, xdp},
    maps::{Array, PerCpuArray},
    programs::XdpContext,
};
use aya_log_ebpf::debug;
use congestion_guard_common::{TABLE_CAPACITY, Verdict, VerdictStats, check_congestion};
use table::{KernelTable, record_verdict};

#[map]
static CONGESTION_REG: Array<u32> = Array::with_max_entries(TABLE_CAPACITY, 0);
#[map]
static VERDICT_STATS: PerCpuArray<VerdictStats> = PerCpuArray::with_max_entries(1, 0);

#[xdp]
pub fn congestion_xdp(ctx: XdpContext) -> u32 {
    let verdict = check_congestion(&KernelTable::new(&CONGESTION_REG));
    record_verdict(&VERDICT_STATS, verdict);

    if verdict.is_drop() {
        debug!(&ctx, "XDP: counter above threshold, dropping");
        return XDP_DROP;
    }
    XDP_PASS
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
