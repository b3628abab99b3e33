//! Configuration module for Traffic Refinery

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Top level configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sys: SysConfig,

    #[serde(default)]
    pub parsers: ParsersConfig,

    #[serde(default)]
    pub dns_cache: DnsCacheConfig,

    #[serde(default)]
    pub flow_cache: FlowCacheConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// General system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SysConfig {
    #[serde(default)]
    pub cpu_profile: bool,

    #[serde(default)]
    pub mem_profile: bool,

    #[serde(default)]
    pub interface_stats: bool,

    #[serde(default = "default_out_folder")]
    pub out_folder: String,

    /// Address the Prometheus metrics endpoint listens on.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            cpu_profile: false,
            mem_profile: false,
            interface_stats: false,
            out_folder: default_out_folder(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

/// Configuration for a single capture driver instance
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParserConfig {
    /// Capture driver. Only "afpacket" is supported.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Name of the interface to capture on
    #[serde(default)]
    pub ifname: String,

    /// Interface mode. Supports "host"|"router"|"mirror".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Whether this is a replay session against a pcap
    #[serde(default)]
    pub replay: bool,

    /// Gateway MAC address used when in replay mode
    #[serde(default)]
    pub replay_mac: String,

    /// Whether to use PF_RING style clustering. Unused by the afpacket driver,
    /// kept for config compatibility.
    #[serde(default)]
    pub clustered: bool,

    #[serde(default)]
    pub cluster_id: i32,

    /// Whether to use zero copy mode. Unused by the afpacket driver.
    #[serde(default)]
    pub zero_copy: bool,

    /// Whether to use AF_PACKET fanout across replicas
    #[serde(default)]
    pub fan_out: bool,

    /// Number of parser replicas to run for this interface
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

/// Parser configuration: one DNS parser plus N traffic parsers
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParsersConfig {
    #[serde(default)]
    pub dns_parser: ParserConfig,

    #[serde(default)]
    pub traffic_parsers: Vec<ParserConfig>,
}

/// DNS cache eviction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DnsCacheConfig {
    #[serde(default = "default_dns_evict_time")]
    pub evict_time_secs: u64,

    #[serde(default = "default_dns_cleanup_time")]
    pub cleanup_time_secs: u64,
}

impl Default for DnsCacheConfig {
    fn default() -> Self {
        Self {
            evict_time_secs: default_dns_evict_time(),
            cleanup_time_secs: default_dns_cleanup_time(),
        }
    }
}

/// Flow cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FlowCacheConfig {
    /// Cache implementation. Only "sharded" is supported.
    #[serde(default = "default_cache_type")]
    pub cache_type: String,

    #[serde(default = "default_flow_evict_time")]
    pub evict_time_secs: u64,

    #[serde(default = "default_flow_cleanup_time")]
    pub cleanup_time_secs: u64,

    #[serde(default = "default_shards_count")]
    pub shards_count: u32,

    /// Whether to anonymize remote/local IPs with Crypto-PAn before emitting
    #[serde(default = "default_true")]
    pub anonymize: bool,

    /// 32 byte Crypto-PAn key, hex encoded. Required when anonymize is true.
    #[serde(default)]
    pub anonymize_key: Option<String>,
}

impl Default for FlowCacheConfig {
    fn default() -> Self {
        Self {
            cache_type: default_cache_type(),
            evict_time_secs: default_flow_evict_time(),
            cleanup_time_secs: default_flow_cleanup_time(),
            shards_count: default_shards_count(),
            anonymize: default_true(),
            anonymize_key: None,
        }
    }
}

/// Statistics output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    #[serde(default)]
    pub run: bool,

    #[serde(default = "default_stats_mode")]
    pub mode: String,

    #[serde(default)]
    pub append: bool,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            run: false,
            mode: default_stats_mode(),
            append: false,
        }
    }
}

/// Filters used to match traffic to a service
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceFilterConfig {
    #[serde(default)]
    pub domains_string: Vec<String>,

    #[serde(default)]
    pub domains_regex: Vec<String>,

    #[serde(default)]
    pub prefixes: Vec<String>,
}

/// A single service to classify and collect counters for
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    #[serde(default)]
    pub filter: ServiceFilterConfig,

    #[serde(default)]
    pub collect: Vec<String>,

    /// Emit cycle length in milliseconds
    #[serde(default = "default_emit_ms")]
    pub emit_ms: u64,
}

fn default_out_folder() -> String {
    "/tmp/".to_string()
}
fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_driver() -> String {
    "afpacket".to_string()
}
fn default_mode() -> String {
    "host".to_string()
}
fn default_replicas() -> u32 {
    1
}
fn default_dns_evict_time() -> u64 {
    600
}
fn default_dns_cleanup_time() -> u64 {
    300
}
fn default_cache_type() -> String {
    "sharded".to_string()
}
fn default_flow_evict_time() -> u64 {
    600
}
fn default_flow_cleanup_time() -> u64 {
    300
}
fn default_shards_count() -> u32 {
    32
}
fn default_stats_mode() -> String {
    "dump".to_string()
}
fn default_emit_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file, then layer `REFINERY__`
    /// prefixed environment variables over it (e.g.
    /// `REFINERY__FLOW_CACHE__SHARDS_COUNT=64`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let built = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix("REFINERY").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {path:?}"))?;

        built
            .try_deserialize()
            .with_context(|| "Failed to parse configuration")
    }

    /// Validate the configuration, checking cross-field invariants that
    /// serde defaults alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.flow_cache.shards_count < 1 {
            anyhow::bail!("flow_cache.shards_count must be at least 1");
        }

        if self.flow_cache.anonymize && self.flow_cache.anonymize_key.is_none() {
            anyhow::bail!("flow_cache.anonymize_key is required when flow_cache.anonymize is true");
        }

        if let Some(key) = &self.flow_cache.anonymize_key {
            let decoded = hex::decode(key).context("flow_cache.anonymize_key must be hex encoded")?;
            if decoded.len() != 32 {
                anyhow::bail!(
                    "flow_cache.anonymize_key must decode to 32 bytes, got {}",
                    decoded.len()
                );
            }
        }

        for service in &self.services {
            if service.name.is_empty() {
                anyhow::bail!("service name must not be empty");
            }
        }

        if self.parsers.traffic_parsers.is_empty() {
            anyhow::bail!("at least one entry in parsers.traffic_parsers is required");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_minimal_config() {
        let toml_str = r#"
            [flow_cache]
            anonymize = false

            [[parsers.traffic_parsers]]
            ifname = "eth0"
        "#;
        let conf: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(conf.sys.out_folder, "/tmp/");
        assert_eq!(conf.flow_cache.shards_count, 32);
        assert_eq!(conf.parsers.traffic_parsers.len(), 1);
        assert_eq!(conf.parsers.traffic_parsers[0].mode, "host");
        assert_eq!(conf.parsers.traffic_parsers[0].replicas, 1);
    }

    #[test]
    fn test_validate_requires_anonymize_key() {
        let toml_str = r#"
            [flow_cache]
            anonymize = true

            [[parsers.traffic_parsers]]
            ifname = "eth0"
        "#;
        let conf: Config = toml::from_str(toml_str).unwrap();
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_anonymize_key() {
        let toml_str = r#"
            [flow_cache]
            anonymize = true
            anonymize_key = "deadbeef"

            [[parsers.traffic_parsers]]
            ifname = "eth0"
        "#;
        let conf: Config = toml::from_str(toml_str).unwrap();
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_full_config() {
        let key = "00".repeat(32);
        let toml_str = format!(
            r#"
            [flow_cache]
            anonymize = true
            anonymize_key = "{key}"

            [[parsers.traffic_parsers]]
            ifname = "eth0"

            [[services]]
            name = "test-service"
            collect = ["packet"]
            "#
        );
        let conf: Config = toml::from_str(&toml_str).unwrap();
        assert!(conf.validate().is_ok());
    }
}
