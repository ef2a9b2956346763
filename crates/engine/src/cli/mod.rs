pub mod config;
pub mod graph;
pub mod history;
pub mod run;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sy_domain::config::Config;

/// switchyard: run multi-agent graphs from the command line.
#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about)]
pub struct Cli {
    /// Path to the graph config (TOML or YAML). Falls back to `SY_CONFIG`,
    /// then `switchyard.toml`.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one message through the agent graph and stream the reply.
    Run {
        /// The message to send.
        message: String,
        /// Continue an existing thread instead of starting a new one.
        #[arg(long)]
        thread: Option<String>,
        /// Start at these agents instead of the graph's entry nodes.
        #[arg(long = "start", value_delimiter = ',')]
        start: Vec<String>,
        /// Print the run outcome as JSON instead of streaming text.
        #[arg(long)]
        json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the compiled graph: entry nodes, edges and handoff tools.
    Graph,
    /// List threads, or print the runs of one thread.
    History {
        /// Thread to print.
        #[arg(long)]
        thread: Option<String>,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file, compile the graph and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `explicit`, `SY_CONFIG` or
/// `switchyard.toml`, in that order. Returns the parsed [`Config`] and the
/// path that was used.
///
/// A missing file yields the default config, which has no agents.
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<(Config, String)> {
    let config_path = match explicit {
        Some(path) => path.to_owned(),
        None => std::env::var("SY_CONFIG").unwrap_or_else(|_| "switchyard.toml".into()),
    };

    let config = if Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {config_path}"))?;
        parse_config(&raw, &config_path)?
    } else {
        tracing::warn!(path = %config_path, "config file not found, using defaults");
        Config::default()
    };

    Ok((config, config_path))
}

/// Parse `raw` as YAML when the path says so, TOML otherwise.
pub fn parse_config(raw: &str, config_path: &str) -> anyhow::Result<Config> {
    let is_yaml = Path::new(config_path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml::from_str(raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
    } else {
        toml::from_str(raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
[[agents]]
agent_id = "agent_a"
provider = "echo"

[[agents]]
agent_id = "agent_b"
provider = "echo"

[[edges]]
from = "agent_a"
to = "agent_b"
"#;

    const YAML: &str = r#"
agents:
  - agent_id: agent_a
    provider: echo
  - agent_id: agent_b
    provider: echo
edges:
  - from: agent_a
    to: agent_b
"#;

    #[test]
    fn parses_toml_and_yaml_alike() {
        let from_toml = parse_config(TOML, "switchyard.toml").unwrap();
        let from_yaml = parse_config(YAML, "graph.yml").unwrap();
        assert_eq!(from_toml.agents.len(), 2);
        assert_eq!(from_yaml.agents.len(), 2);
        assert_eq!(from_toml.edges.len(), from_yaml.edges.len());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let err = parse_config("agents = 3", "bad.toml").unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let (config, used) = load_config(path.to_str()).unwrap();
        assert!(config.agents.is_empty());
        assert!(used.ends_with("absent.toml"));
    }
}
