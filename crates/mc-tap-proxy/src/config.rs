use std::path::Path;

use mc_tap_injector::DispatchConfig;
use mc_tap_transport::PhaseLayout;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub proxy: ProxySection,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct ProxySection {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub upstream: String,
    /// Where relayed channels keep their protocol state.
    #[serde(default)]
    pub layout: PhaseLayout,
}

fn default_listen() -> String {
    "0.0.0.0:25565".into()
}

#[derive(Debug, Default, Deserialize)]
pub struct RegistrySection {
    /// JSON wire table replacing the built-in catalog.
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
    /// Log every intercepted message at info level.
    #[serde(default)]
    pub log_packets: bool,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_packets: false,
        }
    }
}

impl ProxyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_tap_injector::OverflowPolicy;

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
            [proxy]
            upstream = "127.0.0.1:25566"
        "#;
        let config: ProxyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.proxy.listen, "0.0.0.0:25565");
        assert_eq!(config.proxy.upstream, "127.0.0.1:25566");
        assert_eq!(config.proxy.layout, PhaseLayout::CodecEmbedded);
        // dispatch section defaults when absent
        assert_eq!(config.dispatch.worker_threads, 4);
        assert_eq!(config.dispatch.queue_capacity, 1024);
        assert_eq!(config.dispatch.overflow, OverflowPolicy::DropOldest);
        assert!(config.dispatch.async_timeout().is_none());
        assert!(config.registry.table.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.log_packets);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            [proxy]
            listen = "127.0.0.1:25565"
            upstream = "10.0.0.5:25565"
            layout = "split_attributes"

            [dispatch]
            worker_threads = 2
            overflow = "reject_new"
            async_timeout_ms = 500
            hold_open = ["CHAT", "CHAT_COMMAND"]

            [registry]
            table = "tables/767.json"

            [logging]
            level = "debug"
            log_packets = true
        "#;
        let config: ProxyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.proxy.layout, PhaseLayout::SplitAttributes);
        assert_eq!(config.dispatch.worker_threads, 2);
        assert_eq!(config.dispatch.queue_capacity, 1024); // default
        assert_eq!(config.dispatch.overflow, OverflowPolicy::RejectNew);
        assert_eq!(config.dispatch.async_timeout_ms, 500);
        assert_eq!(config.dispatch.hold_open, ["CHAT", "CHAT_COMMAND"]);
        assert_eq!(config.registry.table.as_deref(), Some("tables/767.json"));
        assert!(config.logging.log_packets);
    }

    #[test]
    fn unknown_layout_is_rejected() {
        let toml_str = r#"
            [proxy]
            upstream = "127.0.0.1:25566"
            layout = "sideways"
        "#;
        assert!(toml::from_str::<ProxyConfig>(toml_str).is_err());
    }
}
