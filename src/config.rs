use clap::Parser;

/// Controller-wide settings. Per-volume policy lives on each VolumeAutoscaler.
#[derive(Parser, Debug, Clone)]
#[command(name = "volume-autoscaler", about = "Grows PersistentVolumeClaims before they fill up")]
pub struct ControllerConfig {
    /// Address for the /metrics and /healthz endpoints.
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind_address: String,

    /// Only watch this namespace (default: all namespaces).
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Metrics backend used when a VolumeAutoscaler leaves metricsEndpoint empty.
    #[arg(long, env = "METRICS_ENDPOINT")]
    pub metrics_endpoint: Option<String>,

    /// Share of the poll interval one cycle may take before it is abandoned.
    #[arg(long, env = "CYCLE_DEADLINE_RATIO", default_value_t = 0.8, value_parser = parse_ratio)]
    pub cycle_deadline_ratio: f64,

    /// Field manager and event reporter name.
    #[arg(long, env = "FIELD_MANAGER", default_value = "volume-autoscaler")]
    pub field_manager: String,

    /// Print the CustomResourceDefinition as JSON and exit.
    #[arg(long)]
    pub print_crd: bool,
}

fn parse_ratio(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(format!("{} is not in (0, 1]", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ControllerConfig::try_parse_from(["volume-autoscaler"]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.cycle_deadline_ratio, 0.8);
        assert_eq!(config.field_manager, "volume-autoscaler");
        assert!(!config.print_crd);
    }

    #[test]
    fn flags_override_defaults() {
        let config = ControllerConfig::try_parse_from([
            "volume-autoscaler",
            "--namespace",
            "db",
            "--metrics-endpoint",
            "http://prometheus:9090",
            "--cycle-deadline-ratio",
            "0.5",
        ])
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("db"));
        assert_eq!(config.metrics_endpoint.as_deref(), Some("http://prometheus:9090"));
        assert_eq!(config.cycle_deadline_ratio, 0.5);
    }

    #[test]
    fn rejects_bad_ratio() {
        assert!(ControllerConfig::try_parse_from(["volume-autoscaler", "--cycle-deadline-ratio", "1.5"]).is_err());
        assert!(ControllerConfig::try_parse_from(["volume-autoscaler", "--cycle-deadline-ratio", "0"]).is_err());
        let config =
            ControllerConfig::try_parse_from(["volume-autoscaler", "--cycle-deadline-ratio", "0.05"]).unwrap();
        assert_eq!(config.cycle_deadline_ratio, 0.05);
    }
}
