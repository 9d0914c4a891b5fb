// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use aya_log::EbpfLogger;
use clap::{Parser, Subcommand};
use congestion_guard::{
    MAP_PATH_ENV,
    config::{Config, Hook, create_or_read_config},
    control_map_path,
    ebpf::*,
    map_path_override,
    monitor::{monitor, reset_period, supervise},
    table::PinnedTable,
};
use congestion_guard_common::{CONGESTION_MAP, ControlPlane, Slot};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "congestion-guard")]
#[command(author, version, about)]
struct Opt {
    #[clap(short, long)]
    config: Option<String>,
    /// Pinned congestion table, overrides $CONGESTION_MAP_PATH and the config file
    #[clap(long, global = true)]
    map_path: Option<String>,
    #[clap(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Load and attach the hook, then keep the table supervised until Ctrl-C
    Run {
        #[clap(short, long)]
        iface: Option<String>,
        #[clap(long, value_enum)]
        hook: Option<Hook>,
        #[clap(long)]
        threshold: Option<u32>,
        /// Zero the counter every N milliseconds, 0 disables
        #[clap(long)]
        reset_interval_ms: Option<u64>,
        /// Seconds between stats reports
        #[clap(long)]
        stats_interval: Option<u64>,
    },
    /// Print counter and threshold
    Get,
    GetCounter,
    GetThreshold,
    SetThreshold {
        limit: u32,
    },
    /// Zero the packet counter
    Reset,
    /// Continuously print counter and threshold
    Monitor {
        /// Seconds between refreshes
        #[clap(long, default_value_t = 0.5)]
        interval: f64,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let opt = Opt::parse();
    if opt.verbose {
        unsafe { std::env::set_var("RUST_LOG", "info") };
    }
    env_logger::init();

    let map_override =
        map_path_override(opt.map_path.as_deref(), std::env::var(MAP_PATH_ENV).ok());
    let config_path = opt.config.as_deref().map(Path::new);
    let open_table = || -> Result<PinnedTable, anyhow::Error> {
        PinnedTable::open(&control_map_path(map_override.clone(), config_path)?)
    };

    match opt.command {
        Cmd::Run {
            iface,
            hook,
            threshold,
            reset_interval_ms,
            stats_interval,
        } => {
            let file_config = create_or_read_config(config_path)?;
            let map_path = map_override
                .clone()
                .unwrap_or_else(|| PathBuf::from(&file_config.map_path));
            let config = Config {
                attach_iface: iface.unwrap_or(file_config.attach_iface),
                hook: hook.unwrap_or(file_config.hook),
                threshold: threshold.unwrap_or(file_config.threshold),
                reset_interval_ms: reset_interval_ms.unwrap_or(file_config.reset_interval_ms),
                stats_interval: stats_interval.unwrap_or(file_config.stats_interval),
                map_path: file_config.map_path,
            };
            run(config, &map_path).await
        }
        Cmd::Get => {
            let table = open_table()?;
            println!("{}", table.snapshot()?);
            Ok(())
        }
        Cmd::GetCounter => {
            let table = open_table()?;
            println!("{}", table.read(Slot::Counter)?);
            Ok(())
        }
        Cmd::GetThreshold => {
            let table = open_table()?;
            println!("{}", table.read(Slot::Threshold)?);
            Ok(())
        }
        Cmd::SetThreshold { limit } => {
            let mut table = open_table()?;
            info!("Setting threshold to: {limit}");
            table.set_threshold(limit)?;
            println!("Threshold updated.");
            Ok(())
        }
        Cmd::Reset => {
            let mut table = open_table()?;
            table.reset_counter()?;
            println!("Counter reset.");
            Ok(())
        }
        Cmd::Monitor { interval } => {
            let every = Duration::try_from_secs_f64(interval)
                .ok()
                .filter(|every| !every.is_zero())
                .context("monitor interval must be a positive number of seconds")?;
            let table = open_table()?;
            monitor(&table, every).await
        }
    }
}

async fn run(config: Config, map_path: &Path) -> Result<(), anyhow::Error> {
    if !unsafe { libc::getuid() == 0 || libc::geteuid() == 0 } {
        anyhow::bail!("This program must be run as root");
    }
    bump_memlock_rlimit();

    let attach_ifindex = get_ifindex(&config.attach_iface)?;
    info!(
        "attach iface:{} (ifindex {attach_ifindex}) hook:{:?}",
        config.attach_iface, config.hook
    );

    let mut bpf = ebpf_load(config.hook)?;
    if let Err(e) = EbpfLogger::init(&mut bpf) {
        warn!("failed to initialize eBPF logger: {}", e);
    }

    table_init(&mut bpf, config.threshold)?;
    let stats = verdict_stats(&mut bpf)?;
    let pin = table_pin(&mut bpf, map_path)?;
    ebpf_up(&mut bpf, config.hook, &config.attach_iface)?;

    println!(
        "Initialization Complete! Table pinned at {}, running...",
        pin.path().display()
    );

    let map = bpf
        .map_mut(CONGESTION_MAP)
        .with_context(|| format!("map {CONGESTION_MAP} not found"))?;
    let mut table = PinnedTable::from_map_mut(map)?;

    supervise(
        &mut table,
        &stats,
        reset_period(config.reset_interval_ms),
        Duration::from_secs(config.stats_interval.max(1)),
    )
    .await
}
