// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only
#![no_std]
#![no_main]
#[path = "../table.rs"]
mod table;

use aya_ebpf::{
    bindings::{TC_ACT_OK, TC_ACT_SHOT},
    macros::{classifier, map},
    maps::{Array, PerCpuArray},
    programs::TcContext,
};
use aya_log_ebpf::debug;
use congestion_guard_common::{TABLE_CAPACITY, Verdict, VerdictStats, check_congestion};
use table::{KernelTable, record_verdict};

#[map]
static CONGESTION_REG: Array<u32> = Array::with_max_entries(TABLE_CAPACITY, 0);
#[map]
static VERDICT_STATS: PerCpuArray<VerdictStats> = PerCpuArray::with_max_entries(1, 0);

#[classifier]
pub fn congestion_tc(ctx: TcContext) -> i32 {
    let verdict = check_congestion(&KernelTable::new(&CONGESTION_REG));
    record_verdict(&VERDICT_STATS, verdict);

    match verdict {
        Verdict::Admit => TC_ACT_OK,
        Verdict::Drop => {
            debug!(&ctx, "TC: counter above threshold, dropping");
            TC_ACT_SHOT
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
