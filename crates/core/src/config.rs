use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_DISPATCH__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub sendgrid: SendGridConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Outbound throttling knobs handed to the dispatch scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "default_transport_timeout_ms")]
    pub transport_timeout_ms: u64,
}

/// Envelope settings shared by every rendered message.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_unsubscribe_base_url")]
    pub unsubscribe_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_tracking")]
    pub open_tracking: bool,
    #[serde(default = "default_tracking")]
    pub click_tracking: bool,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_batch_size() -> usize {
    100
}
fn default_inter_batch_delay_ms() -> u64 {
    500
}
fn default_transport_timeout_ms() -> u64 {
    10_000
}
fn default_service_name() -> String {
    "Campaign Dispatch".to_string()
}
fn default_unsubscribe_base_url() -> String {
    "http://localhost:8080/unsubscribe".to_string()
}
fn default_reconcile_interval_secs() -> u64 {
    300
}
fn default_stuck_after_secs() -> u64 {
    3600
}
fn default_from_email() -> String {
    "news@example.com".to_string()
}
fn default_from_name() -> String {
    "Campaign Dispatch".to_string()
}
fn default_tracking() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            transport_timeout_ms: default_transport_timeout_ms(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            unsubscribe_base_url: default_unsubscribe_base_url(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
            stuck_after_secs: default_stuck_after_secs(),
        }
    }
}

impl Default for SendGridConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            from_name: default_from_name(),
            api_key: String::new(),
            open_tracking: default_tracking(),
            click_tracking: default_tracking(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            dispatch: DispatchConfig::default(),
            render: RenderConfig::default(),
            reconcile: ReconcileConfig::default(),
            sendgrid: SendGridConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CAMPAIGN_DISPATCH")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_throttle_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.dispatch.batch_size, 100);
        assert_eq!(config.dispatch.inter_batch_delay_ms, 500);
        assert_eq!(config.reconcile.stuck_after_secs, 3600);
    }

    #[test]
    fn test_empty_sections_fall_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"dispatch": {"batch_size": 10}}"#).unwrap();
        assert_eq!(config.dispatch.batch_size, 10);
        assert_eq!(config.dispatch.inter_batch_delay_ms, 500);
        assert_eq!(config.api.http_port, 8080);
    }
}
