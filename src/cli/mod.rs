use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tabled::{Table, Tabled};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::guard::{OperationGuard, SingletonLock};
use crate::poller::{self, ConcurrencyController};
use crate::query;
use crate::store::Store;
use crate::{flows, resolver, topology};

#[derive(Parser)]
#[command(name = "netloom")]
#[command(author = "Netloom Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Adaptive SNMP topology discovery and NetFlow curation engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, default_value = "netloom.conf")]
    pub config: PathBuf,

    #[arg(long, global = true, default_value = "netloom.db")]
    pub store: PathBuf,

    #[arg(long, global = true, help = "Emit JSON instead of a table")]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the discovery/topology/netflow daemon loop")]
    Run {
        #[arg(long, help = "Run a single cycle and exit instead of looping")]
        once: bool,
    },

    #[command(about = "Show per-switch online/offline status")]
    Status {
        #[arg(help = "Restrict to a single switch")]
        switch_ip: Option<String>,
    },

    #[command(about = "Show one port's classification and MAC history")]
    Switchport {
        switch_ip: String,
        port_num: i64,
    },

    #[command(about = "Find the switch port an IP was last seen on")]
    IpSearch {
        ip: String,
    },

    #[command(about = "Find every ACCESS port a MAC was seen on (exact match)")]
    MacSearch {
        mac: String,
    },

    #[command(about = "Find ACCESS ports whose MAC contains a partial match")]
    MacSearchPartial {
        partial: String,
    },

    #[command(about = "Walk a switch's uplink chain to the root")]
    Topology {
        switch_ip: String,
    },

    #[command(about = "Per-port report for one switch: ACCESS hosts, parent/child links")]
    Report {
        switch_ip: String,
    },

    #[command(about = "Aggregate NetFlow statistics across all curated tables")]
    NetflowGlobal {
        #[arg(long, default_value_t = 5.0, help = "Lookback window in minutes, clamped to [0.33, 5.0]")]
        minutes: f64,
    },

    #[command(about = "Aggregate NetFlow statistics for one host")]
    NetflowHost {
        host_ip: String,
        #[arg(long, default_value_t = 5.0, help = "Lookback window in minutes, clamped to [0.33, 5.0]")]
        minutes: f64,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { once } => run_daemon(&cli, *once).await,
        Commands::Status { switch_ip } => {
            let store = Store::open(&cli.store).context("opening store")?;
            render(&cli, query::status(&store, switch_ip.as_deref())?)
        }
        Commands::Switchport { switch_ip, port_num } => {
            let store = Store::open(&cli.store).context("opening store")?;
            print_switchport(&cli, &store, switch_ip, *port_num)
        }
        Commands::IpSearch { ip } => {
            let store = Store::open(&cli.store).context("opening store")?;
            render(&cli, query::ip_search(&store, ip)?)
        }
        Commands::MacSearch { mac } => {
            let store = Store::open(&cli.store).context("opening store")?;
            render(&cli, query::mac_search(&store, mac)?)
        }
        Commands::MacSearchPartial { partial } => {
            let store = Store::open(&cli.store).context("opening store")?;
            render(&cli, query::mac_search_partial(&store, partial)?)
        }
        Commands::Topology { switch_ip } => {
            let store = Store::open(&cli.store).context("opening store")?;
            render(&cli, query::topology(&store, switch_ip)?)
        }
        Commands::Report { switch_ip } => {
            let store = Store::open(&cli.store).context("opening store")?;
            print_report(&cli, &store, switch_ip)
        }
        Commands::NetflowGlobal { minutes } => {
            let store = Store::open(&cli.store).context("opening store")?;
            print_netflow(&cli, query::netflow_global_stats(&store, *minutes)?)
        }
        Commands::NetflowHost { host_ip, minutes } => {
            let store = Store::open(&cli.store).context("opening store")?;
            print_netflow(&cli, query::netflow_host_stats(&store, host_ip, *minutes)?)
        }
    }
}

fn render<T>(cli: &Cli, rows: Vec<T>) -> Result<()>
where
    T: serde::Serialize + Tabled,
{
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("{}", "(no rows)".dimmed());
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

fn print_switchport(cli: &Cli, store: &Store, switch_ip: &str, port_num: i64) -> Result<()> {
    let (info, history) = query::switchport(store, switch_ip, port_num)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&(&info, &history))?);
        return Ok(());
    }
    println!(
        "{} port {} [{}]{}",
        switch_ip.bold(),
        info.port_num,
        info.port_type,
        if info.is_root { " ROOT".yellow().to_string() } else { String::new() }
    );
    if history.is_empty() {
        println!("  {}", "(no MAC history)".dimmed());
    } else {
        println!("{}", Table::new(history));
    }
    Ok(())
}

fn print_report(cli: &Cli, store: &Store, switch_ip: &str) -> Result<()> {
    let entries = query::report(store, switch_ip)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{} {}", "Report for".bold(), switch_ip.bold());
    for entry in &entries {
        let root_flag = if entry.is_root { " ROOT".yellow().to_string() } else { String::new() };
        println!("  port {:<5} {:<8} {}{}", entry.port_num, entry.port_type, entry.port_desc, root_flag);

        if let Some((parent_ip, parent_port)) = &entry.parent_link {
            println!("    uplink -> {parent_ip} port {parent_port}");
        }
        if let Some(child) = &entry.child_switch {
            println!("    downlink -> switch {child}");
        }
        for host in &entry.access_hosts {
            let ip = host.ip.as_deref().unwrap_or("?");
            let hostname = host.hostname.as_deref().unwrap_or("");
            let vendor = host.vendor.as_deref().unwrap_or("");
            println!("    host {} vlan {} {} {} {}", host.mac, host.vlan, ip, hostname, vendor);
        }
    }
    Ok(())
}

fn print_netflow(cli: &Cli, stats: query::NetflowStats) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!(
        "rows={} packets={} bytes={} avg_speed={}",
        stats.rows, stats.total_packets, stats.total_bytes, stats.avg_speed
    );
    if stats.top_remote.is_empty() {
        println!("{}", "(no remote endpoints)".dimmed());
    } else {
        println!("{}", Table::new(&stats.top_remote));
    }
    Ok(())
}

async fn run_daemon(cli: &Cli, once: bool) -> Result<()> {
    let config = Config::load(&cli.config).context("loading configuration")?;
    let mut store = Store::open(&cli.store).context("opening store")?;
    store.set_param("NETWORK", &config.network)?;
    store.set_param("MASKBITS", &config.maskbits.to_string())?;

    let lock_dir = cli.store.parent().unwrap_or_else(|| std::path::Path::new("."));
    let _lock = SingletonLock::acquire(lock_dir)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown requested, finishing current cycle");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let controller = ConcurrencyController::new(config.threads_seed);
    let mut curation = flows::CurationLoop::new();

    loop {
        let cycle_start = Instant::now();
        let guard = OperationGuard::begin(lock_dir, "cycle")?;
        let stamp = store.max_curated_stamp().unwrap_or(0.0).max(cycle_start.elapsed().as_secs_f64());

        if let Err(e) = poller::harvest_arp(&mut store, &config, stamp).await {
            warn!(error = %e, "ARP harvest failed, switch/gateway MAC resolution may be stale this cycle");
        }

        let mut online_count = 0;
        for switch in &config.switches {
            match poller::poll_one_switch(&mut store, &config, &switch.ip, stamp).await {
                Ok(true) => online_count += 1,
                Ok(false) => {}
                Err(e) => error!(switch_ip = switch.ip, error = %e, "poll cycle failed"),
            }
        }

        if let Err(e) = topology::infer_and_persist(&mut store, stamp) {
            warn!(error = %e, "topology inference skipped this cycle");
        }

        if !curation.should_stop() {
            if let Err(e) = curation.tick(&mut store, &config, stamp) {
                error!(error = %e, "flow curation tick failed");
            }
        } else {
            error!("flow curation circuit breaker open, skipping curation");
        }

        if let Ok(resolutions) =
            resolver::resolve_batch("resolve-hostnames", &config.switches.iter().map(|s| s.ip.clone()).collect::<Vec<_>>())
                .await
        {
            for r in resolutions {
                let _ = store.upsert_hostname(&r.ip, &r.hostname, stamp);
            }
        }

        guard.finish()?;

        let cycle_secs = cycle_start.elapsed().as_secs_f64();
        controller.record_cycle(cycle_secs, online_count.max(1));
        info!(
            cycle_secs,
            online = online_count,
            workers = controller.workers(),
            "cycle complete"
        );

        if once || shutdown.load(Ordering::SeqCst) {
            break;
        }

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
    }

    Ok(())
}

impl Tabled for query::SwitchStatus {
    const LENGTH: usize = 7;
    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        vec![
            self.switch_ip.clone().into(),
            self.switch_desc.clone().into(),
            (if self.online { "online".green().to_string() } else { "offline".red().to_string() }).into(),
            self.trunk_count.to_string().into(),
            self.access_count.to_string().into(),
            self.switch_mac.clone().unwrap_or_default().into(),
            self.vendor.clone().unwrap_or_default().into(),
        ]
    }
    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec![
            "switch".into(),
            "description".into(),
            "status".into(),
            "trunk".into(),
            "access".into(),
            "mgmt mac".into(),
            "vendor".into(),
        ]
    }
}

impl Tabled for query::MacHistoryEntry {
    const LENGTH: usize = 5;
    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        vec![
            self.stamp.to_string().into(),
            self.mac.clone().into(),
            self.vlan.to_string().into(),
            self.ip.clone().unwrap_or_default().into(),
            self.hostname.clone().unwrap_or_default().into(),
        ]
    }
    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec!["stamp".into(), "mac".into(), "vlan".into(), "ip".into(), "hostname".into()]
    }
}

impl Tabled for query::MacSearchHit {
    const LENGTH: usize = 7;
    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        vec![
            self.switch_ip.clone().into(),
            self.port.to_string().into(),
            self.mac.clone().into(),
            self.vlan.to_string().into(),
            self.ip.clone().unwrap_or_default().into(),
            self.hostname.clone().unwrap_or_default().into(),
            self.access_point_name.clone().unwrap_or_default().into(),
        ]
    }
    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec!["switch".into(), "port".into(), "mac".into(), "vlan".into(), "ip".into(), "hostname".into(), "AP".into()]
    }
}

impl Tabled for query::TopologyHop {
    const LENGTH: usize = 3;
    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        vec![self.switch_ip.clone().into(), self.parent_port.to_string().into(), self.parent_ip.clone().into()]
    }
    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec!["switch".into(), "parent_port".into(), "parent".into()]
    }
}

impl Tabled for query::RemoteEndpoint {
    const LENGTH: usize = 5;
    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        vec![
            self.ip.clone().into(),
            self.port.to_string().into(),
            self.proto.clone().into(),
            self.formatted.clone().into(),
            self.service_label.clone().unwrap_or_default().into(),
        ]
    }
    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec!["ip".into(), "port".into(), "proto".into(), "bytes".into(), "service".into()]
    }
}
