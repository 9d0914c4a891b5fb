// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    borrow::{Borrow, BorrowMut},
    io::{self, Write},
    time::Duration,
};

use aya::maps::{MapData, PerCpuArray};
use congestion_guard_common::{ControlPlane, VerdictStats};
use log::{Level, info, log, warn};
use tokio::{
    signal::{
        self,
        unix::{SignalKind, signal as unix_signal},
    },
    time::{Interval, MissedTickBehavior, interval},
};

use crate::table::{PinnedTable, Snapshot};

pub fn sum_verdicts<'a, I>(values: I) -> VerdictStats
where
    I: IntoIterator<Item = &'a VerdictStats>,
{
    values
        .into_iter()
        .fold(VerdictStats::default(), |total, cpu| total.merge(*cpu))
}

/// Drops counted between two samples of the summed per-CPU stats.
pub fn dropped_since(previous: VerdictStats, current: VerdictStats) -> u64 {
    current.dropped.wrapping_sub(previous.dropped)
}

pub fn reset_period(reset_interval_ms: u64) -> Option<Duration> {
    (reset_interval_ms > 0).then(|| Duration::from_millis(reset_interval_ms))
}

/// A report is raised to a warning once packets were dropped since the last
/// one or the next packet would be.
pub fn report_level(snapshot: &Snapshot, dropped: u64) -> Level {
    if dropped > 0 || snapshot.congested() {
        Level::Warn
    } else {
        Level::Info
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Runs until Ctrl-C or SIGTERM: logs the table and verdict totals every
/// `stats_every` and, when a period is given, zeroes the counter to open a
/// new window.
pub async fn supervise<T>(
    table: &mut PinnedTable<T>,
    stats: &PerCpuArray<MapData, VerdictStats>,
    reset_every: Option<Duration>,
    stats_every: Duration,
) -> Result<(), anyhow::Error>
where
    T: BorrowMut<MapData>,
{
    let mut stats_timer = interval(stats_every);
    let mut reset_timer = reset_every.map(|period| {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });
    let mut terminate = unix_signal(SignalKind::terminate())?;
    let mut last = VerdictStats::default();

    if let Some(period) = reset_every {
        info!("counter window: {}ms", period.as_millis());
    }

    loop {
        tokio::select! {
            _ = stats_timer.tick() => {
                let snapshot = table.snapshot()?;
                let totals = match stats.get(&0, 0) {
                    Ok(values) => sum_verdicts(values.iter()),
                    Err(e) => {
                        warn!("failed to read verdict stats: {}", e);
                        continue;
                    }
                };

                let dropped = dropped_since(last, totals);
                log!(
                    report_level(&snapshot, dropped),
                    "{}{} | dropped {} since last report ({} admitted, {} dropped in total)",
                    if snapshot.congested() { "congested: " } else { "" },
                    snapshot, dropped, totals.admitted, totals.dropped
                );
                last = totals;
            }
            _ = tick(&mut reset_timer) => {
                if let Err(e) = table.reset_counter() {
                    warn!("failed to reset counter: {}", e);
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, Exiting...");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, Exiting...");
                return Ok(());
            }
        }
    }
}

/// Redraws counter and threshold on one line until Ctrl-C or a read error.
pub async fn monitor<T: Borrow<MapData>>(
    table: &PinnedTable<T>,
    every: Duration,
) -> Result<(), anyhow::Error> {
    println!("--- Monitor mode (Ctrl+C to quit) ---");
    let mut timer = interval(every);
    let mut stdout = io::stdout();

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let snapshot = match table.snapshot() {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        println!();
                        return Err(e.context("failed to read map values"));
                    }
                };
                print!("\r[counter={}] [threshold={}] ", snapshot.counter, snapshot.threshold);
                stdout.flush()?;
            }
            _ = signal::ctrl_c() => {
                println!("\nMonitoring stopped.");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_verdicts_accumulates_multiple_cpus() {
        let cpus = vec![
            VerdictStats {
                admitted: 100,
                dropped: 2,
            },
            VerdictStats {
                admitted: 50,
                dropped: 1,
            },
        ];
        let total = sum_verdicts(cpus.iter());
        assert_eq!(total.admitted, 150);
        assert_eq!(total.dropped, 3);
    }

    #[test]
    fn sum_verdicts_of_no_cpus_is_zero() {
        assert_eq!(sum_verdicts(std::iter::empty()), VerdictStats::default());
    }

    #[test]
    fn dropped_since_survives_wraparound() {
        let previous = VerdictStats {
            admitted: 0,
            dropped: u64::MAX,
        };
        let current = VerdictStats {
            admitted: 0,
            dropped: 4,
        };
        assert_eq!(dropped_since(previous, current), 5);
    }

    #[test]
    fn quiet_report_stays_at_info() {
        let snapshot = Snapshot {
            counter: 3,
            threshold: 3,
        };
        assert_eq!(report_level(&snapshot, 0), Level::Info);
    }

    #[test]
    fn congested_table_warns_before_any_drop() {
        let snapshot = Snapshot {
            counter: 4,
            threshold: 3,
        };
        assert_eq!(report_level(&snapshot, 0), Level::Warn);
    }

    #[test]
    fn drops_since_last_report_warn_after_window_reset() {
        let snapshot = Snapshot {
            counter: 0,
            threshold: 3,
        };
        assert_eq!(report_level(&snapshot, 12), Level::Warn);
    }

    #[test]
    fn zero_reset_interval_disables_windowing() {
        assert_eq!(reset_period(0), None);
        assert_eq!(reset_period(250), Some(Duration::from_millis(250)));
    }
}
