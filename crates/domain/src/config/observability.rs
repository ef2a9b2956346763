use serde::{Deserialize, Serialize};

/// Trace export settings.
///
/// With no `otlp_endpoint` only local log output is produced. Setting one
/// forwards every `tracing` span (run, branch, llm.call, tool.call) to an
/// OTLP/gRPC collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// `service.name` resource attribute.
    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Ratio-based trace sampling, `0.0..=1.0`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

impl ObservabilityConfig {
    pub fn export_enabled(&self) -> bool {
        self.otlp_endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    /// Sample rate clamped into the valid range.
    pub fn effective_sample_rate(&self) -> f64 {
        if self.sample_rate.is_nan() {
            return 1.0;
        }
        self.sample_rate.clamp(0.0, 1.0)
    }
}

fn d_service_name() -> String {
    "switchyard".into()
}

fn d_sample_rate() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section_uses_defaults() {
        let cfg: ObservabilityConfig = toml::from_str("").unwrap();
        assert!(!cfg.export_enabled());
        assert_eq!(cfg.service_name, "switchyard");
        assert!((cfg.sample_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn endpoint_enables_export() {
        let cfg: ObservabilityConfig = toml::from_str(
            r#"
            otlp_endpoint = "http://localhost:4317"
            sample_rate = 0.5
            "#,
        )
        .unwrap();
        assert!(cfg.export_enabled());
        assert!((cfg.effective_sample_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn blank_endpoint_does_not_enable_export() {
        let cfg = ObservabilityConfig {
            otlp_endpoint: Some("  ".into()),
            ..Default::default()
        };
        assert!(!cfg.export_enabled());
    }

    #[test]
    fn out_of_range_rate_is_clamped() {
        let cfg = ObservabilityConfig { sample_rate: 4.0, ..Default::default() };
        assert!((cfg.effective_sample_rate() - 1.0).abs() < f64::EPSILON);
        let cfg = ObservabilityConfig { sample_rate: -1.0, ..Default::default() };
        assert_eq!(cfg.effective_sample_rate(), 0.0);
    }
}
