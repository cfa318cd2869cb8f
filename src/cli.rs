use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "faas-control")]
#[command(about = "Control plane for functions and namespaces on tenant Kubernetes clusters")]
#[command(version)]
pub struct Args {
    /// Path to the configuration file (YAML)
    #[arg(short, long, env = "FAAS_CONTROL_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: validate config and show what would be served
    #[arg(long)]
    pub dry_run: bool,

    /// Override the configured bind address
    #[arg(long, value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// Override the configured port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Path to a .env file loaded before the configuration
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

impl Args {
    /// `bind_addr:port` after applying command-line overrides
    pub fn listen_addr(&self, config: &Config) -> String {
        let bind_addr = self
            .bind_addr
            .as_deref()
            .unwrap_or(config.server.bind_addr.as_str());
        let port = self.port.unwrap_or(config.server.port);
        format!("{}:{}", bind_addr, port)
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Format a dry-run summary of the loaded configuration.
/// Credentials are never printed.
pub fn format_dry_run(config: &Config, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "faas-control v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Listen: {}\n\n", args.listen_addr(config)));

    output.push_str(&format!("Clusters ({}):\n", config.clusters.len()));
    for cluster in &config.clusters {
        let source = if cluster.kubeconfig.is_some() {
            "inline kubeconfig".to_string()
        } else {
            cluster
                .kubeconfig_path
                .clone()
                .unwrap_or_else(|| "-".to_string())
        };
        let tenants = if cluster.tenants.is_empty() {
            "all tenants".to_string()
        } else {
            cluster.tenants.join(", ")
        };
        output.push_str(&format!(
            "  - {} [{}] {} ({})\n",
            cluster.id, cluster.name, source, tenants
        ));
    }
    output.push('\n');

    output.push_str(&format!("Deploy worker: {}\n", config.dispatcher.url));
    output.push_str(&format!(
        "Cluster retry: {} attempts, {}ms base delay\n",
        config.retry.max_attempts, config.retry.base_delay_ms
    ));
    output.push_str(&format!(
        "Metrics: {}://<host>{} ({} attempts, default range {}s)\n",
        config.metrics.scheme,
        config.metrics.query_path,
        config.metrics.max_attempts,
        config.metrics.default_range_secs
    ));

    output
}
