//! Traffic Refinery - on-path traffic classification and per-flow
//! counter collection.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use refinery_capture::{AfPacketCapture, DirectionContext, InterfaceMode, MacAddr};
use traffic_refinery::config::{Config, ParserConfig};
use traffic_refinery::servicemap::{Filter, Service, ServiceMap};
use traffic_refinery::stats::{self, CacheDumpWriter, Metrics};
use traffic_refinery::FlowCache;

#[derive(Parser, Debug)]
#[command(name = "traffic-refinery")]
#[command(author = "SecuAAS")]
#[command(version)]
#[command(about = "Classifies on-path traffic by Internet service and collects per-flow counters")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "/etc/traffic-refinery/config.toml")]
    config: PathBuf,

    /// Override sys.out_folder
    #[arg(long)]
    out: Option<String>,

    /// Override the gateway MAC address used by replay-mode parsers,
    /// as colon separated hex (e.g. aa:bb:cc:dd:ee:ff)
    #[arg(long)]
    hw: Option<String>,

    #[arg(long, group = "verbosity")]
    debug: bool,
    #[arg(long, group = "verbosity")]
    info: bool,
    #[arg(long, group = "verbosity")]
    warn: bool,
    #[arg(long, group = "verbosity")]
    error: bool,
}

fn parse_mac(s: &str) -> Result<MacAddr> {
    let mut bytes = [0u8; 6];
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        bail!("MAC address '{}' must have 6 colon separated octets", s);
    }
    for (i, part) in parts.iter().enumerate() {
        bytes[i] = u8::from_str_radix(part, 16).with_context(|| format!("invalid MAC octet '{part}'"))?;
    }
    Ok(MacAddr::new(bytes))
}

fn parser_mode(conf: &ParserConfig) -> InterfaceMode {
    match conf.mode.as_str() {
        "host" => InterfaceMode::Host,
        _ => InterfaceMode::RouterOrMirror,
    }
}

fn direction_context(conf: &ParserConfig, hw_override: &Option<MacAddr>) -> Result<DirectionContext> {
    let mode = parser_mode(conf);

    if let Some(mac) = hw_override {
        if !conf.replay {
            warn!("--hw given but parser for '{}' is not in replay mode; using it anyway", conf.ifname);
        }
        return Ok(DirectionContext::new(*mac, mode));
    }

    if conf.replay && !conf.replay_mac.is_empty() {
        return Ok(DirectionContext::new(parse_mac(&conf.replay_mac)?, mode));
    }

    let iface = refinery_capture::NetworkInterface::by_name(&conf.ifname)
        .with_context(|| format!("failed to look up interface '{}'", conf.ifname))?;
    let mac = iface
        .mac
        .map(MacAddr::new)
        .with_context(|| format!("interface '{}' has no MAC address", conf.ifname))?;
    Ok(DirectionContext::new(mac, mode))
}

fn build_service_map(conf: &Config) -> Result<ServiceMap> {
    let evict_time = Duration::from_secs(conf.dns_cache.evict_time_secs);
    let mut smap = ServiceMap::new(evict_time);

    let services: Vec<Service> = conf
        .services
        .iter()
        .enumerate()
        .map(|(i, s)| Service {
            name: s.name.clone(),
            code: i as u16,
            filter: Filter {
                domains_string: s.filter.domains_string.clone(),
                domains_regex: s.filter.domains_regex.clone(),
                prefixes: s.filter.prefixes.clone(),
            },
        })
        .collect();

    smap.config_service_map(services)?;
    Ok(smap)
}

fn setup_logging(level: Level) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("traffic_refinery={level}").parse().unwrap())
        .add_directive(format!("refinery_capture={level}").parse().unwrap());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        Level::DEBUG
    } else if args.warn {
        Level::WARN
    } else if args.error {
        Level::ERROR
    } else if args.info {
        Level::INFO
    } else {
        Level::INFO
    };
    setup_logging(level)?;

    let mut conf = Config::from_file(&args.config)
        .with_context(|| format!("failed to load config from {:?}", args.config))?;

    if let Some(out) = &args.out {
        conf.sys.out_folder = out.clone();
    }
    conf.validate()?;

    if conf.sys.cpu_profile {
        info!("sys.cpu_profile is set but CPU profiling is not implemented in this build");
    }
    if conf.sys.mem_profile {
        info!("sys.mem_profile is set but heap profiling is not implemented in this build");
    }

    info!("Traffic Refinery starting");

    let hw_override = args.hw.as_deref().map(parse_mac).transpose()?;

    let smap = Arc::new(build_service_map(&conf)?);

    let anonymize_key = if conf.flow_cache.anonymize {
        conf.flow_cache
            .anonymize_key
            .as_ref()
            .map(|k| hex::decode(k))
            .transpose()
            .context("flow_cache.anonymize_key must be hex encoded")?
    } else {
        None
    };

    let mut flow_cache = FlowCache::new(
        Arc::clone(&smap),
        Duration::from_secs(conf.flow_cache.evict_time_secs),
        conf.flow_cache.shards_count,
        anonymize_key.as_deref(),
    )?;
    flow_cache.add_services(&conf.services)?;
    let flow_cache = Arc::new(flow_cache);

    let metrics = Arc::new(Metrics::new());

    stats::ensure_out_dir(std::path::Path::new(&conf.sys.out_folder))?;

    let metrics_addr: std::net::SocketAddr = conf
        .sys
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid sys.metrics_addr '{}'", conf.sys.metrics_addr))?;
    let metrics_for_server = Arc::clone(&metrics);
    tokio::spawn(async move {
        if let Err(e) = metrics_for_server.serve(metrics_addr).await {
            error!("metrics endpoint stopped: {}", e);
        }
    });

    // DNS parser: resolves domains to IPs so traffic parsers can
    // classify by prefix once an address has been seen in a DNS answer.
    let dns_ctx = direction_context(&conf.parsers.dns_parser, &hw_override)?;
    let dns_capture = Arc::new(AfPacketCapture::new(&conf.parsers.dns_parser.ifname, true, dns_ctx)?);
    let dns_capture_stats = dns_capture.stats();
    let (_dns_handle, dns_rx) = dns_capture.start_dns_threaded(1024)?;

    let smap_for_dns = Arc::clone(&smap);
    let metrics_for_dns = Arc::clone(&metrics);
    tokio::task::spawn_blocking(move || {
        while let Ok(answer) = dns_rx.recv() {
            smap_for_dns.parse_dns_response(&answer);
            metrics_for_dns.dns_answers_observed.inc();
        }
    });

    // One traffic parser task per configured replica of each interface.
    let mut ifstats_sources = vec![("dns".to_string(), dns_capture_stats)];
    for parser_conf in &conf.parsers.traffic_parsers {
        let ctx = direction_context(parser_conf, &hw_override)?;
        for replica in 0..parser_conf.replicas.max(1) {
            let capture = Arc::new(AfPacketCapture::new(&parser_conf.ifname, true, ctx.clone())?);
            ifstats_sources.push((format!("{}-{}", parser_conf.ifname, replica), capture.stats()));
            let (_handle, rx) = capture.start_threaded(4096)?;

            let flow_cache_for_parser = Arc::clone(&flow_cache);
            let metrics_for_parser = Arc::clone(&metrics);
            let ifname = parser_conf.ifname.clone();
            tokio::task::spawn_blocking(move || {
                while let Ok(pkt) = rx.recv() {
                    flow_cache_for_parser.process_packet(pkt);
                    metrics_for_parser.packets_processed.inc();
                }
                info!("Traffic parser for '{}' (replica {}) stopped", ifname, replica);
            });
        }
    }

    if conf.sys.interface_stats {
        let writer = stats::IfStatsWriter::new(ifstats_sources, &conf.sys.out_folder, "tr");
        stats::spawn_ifstats(writer, Duration::from_secs(10));
    }

    // Periodic eviction of flows and DNS cache entries that have gone quiet.
    {
        let flow_cache = Arc::clone(&flow_cache);
        let smap = Arc::clone(&smap);
        let flow_cleanup = Duration::from_secs(conf.flow_cache.cleanup_time_secs.max(1));
        let dns_cleanup = Duration::from_secs(conf.dns_cache.cleanup_time_secs.max(1));
        tokio::spawn(async move {
            let mut flow_ticker = tokio::time::interval(flow_cleanup);
            let mut dns_ticker = tokio::time::interval(dns_cleanup);
            loop {
                tokio::select! {
                    _ = flow_ticker.tick() => flow_cache.clear_expired(),
                    _ = dns_ticker.tick() => smap.clear_expired(),
                }
            }
        });
    }

    if conf.stats.run {
        let period_ms = conf.services.iter().map(|s| s.emit_ms).min().unwrap_or(10_000);
        let writer = CacheDumpWriter::new(Arc::clone(&flow_cache), &conf.sys.out_folder, "tr", conf.stats.append);
        stats::spawn_cache_dump(writer, Duration::from_millis(period_ms));
    }

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    })
    .context("failed to set Ctrl+C handler")?;

    let _ = shutdown_rx.recv().await;
    info!("Traffic Refinery stopped");
    Ok(())
}
