//! Start-up configuration read from the environment (and `.env`, when present).

use std::env;
use std::path::PathBuf;

pub const LOG_ENV: &str = "ATTENDANCED_LOG";
pub const WORKSPACE_ENV: &str = "ATTENDANCED_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "attendanced=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `tracing_subscriber::EnvFilter` directives.
    pub log_filter: String,
    /// Workspace opened before the first request; `workspace.select` can still switch it.
    pub workspace: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            log_filter: non_blank(LOG_ENV).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            workspace: non_blank(WORKSPACE_ENV).map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset_or_blank() {
        let cfg = AppConfig::from_lookup(|_| None);
        assert_eq!(cfg.log_filter, "attendanced=info");
        assert_eq!(cfg.workspace, None);

        let blank: HashMap<&str, &str> = [(WORKSPACE_ENV, "  ")].into_iter().collect();
        let cfg = AppConfig::from_lookup(|k| blank.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workspace, None);
    }

    #[test]
    fn reads_overrides() {
        let vars: HashMap<&str, &str> = [(LOG_ENV, "attendanced=debug"), (WORKSPACE_ENV, "/tmp/ws")]
            .into_iter()
            .collect();
        let cfg = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.log_filter, "attendanced=debug");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
    }
}
