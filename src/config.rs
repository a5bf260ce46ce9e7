use std::path::PathBuf;

pub const LOG_ENV: &str = "SABED_LOG";
pub const WORKSPACE_ENV: &str = "SABED_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings read once at startup. Workspace settings live in
/// the database instead (`setup.*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_filter = lookup(LOG_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let workspace = lookup(WORKSPACE_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            log_filter,
            workspace,
        }
    }
}

/// Logs go to stderr; stdout carries the protocol.
pub fn init_tracing(config: &DaemonConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> DaemonConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.workspace, None);
    }

    #[test]
    fn reads_filter_and_workspace() {
        let cfg = config_from(&[(LOG_ENV, "sabed=debug"), (WORKSPACE_ENV, " /tmp/ws ")]);
        assert_eq!(cfg.log_filter, "sabed=debug");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
    }

    #[test]
    fn blank_values_fall_back() {
        let cfg = config_from(&[(LOG_ENV, "  "), (WORKSPACE_ENV, "")]);
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.workspace, None);
    }
}
