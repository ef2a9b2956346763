use sy_domain::config::{Config, ConfigSeverity};
use sy_providers::AdapterRegistry;
use sy_tools::ToolRegistry;

use crate::runtime::graph::ExecutableGraph;

/// Parse and validate the config, printing any issues.
///
/// Static checks come first; when they pass, the graph is also compiled
/// against the built-in backends and tools so unknown names surface here
/// rather than at run time. Returns `false` when errors are found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    let mut error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    if error_count == 0 {
        let compiled = ExecutableGraph::from_config(
            config,
            &AdapterRegistry::with_builtins(),
            &ToolRegistry::with_builtins(),
        );
        if let Err(e) = compiled {
            println!("[ERROR] graph: {e}");
            error_count += 1;
        }
    }

    if error_count == 0 && warning_count == 0 {
        println!("Config OK ({config_path})");
        return true;
    }

    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count, warning_count,
    );

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sy_domain::config::{AgentConfig, EdgeConfig};

    #[test]
    fn valid_graph_passes() {
        let config = Config {
            agents: vec![AgentConfig::new("a", "echo"), AgentConfig::new("b", "echo")],
            edges: vec![EdgeConfig::direct("a", "b")],
            ..Default::default()
        };
        assert!(validate(&config, "test.toml"));
    }

    #[test]
    fn unknown_backend_fails_compilation() {
        let config = Config {
            agents: vec![AgentConfig::new("a", "no-such-backend")],
            ..Default::default()
        };
        assert!(!validate(&config, "test.toml"));
    }
}
