use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Process configuration loaded from environment variables.
///
/// | Env Var                | Default |
/// |------------------------|---------|
/// | `PLANBOOKD_WORKSPACE`  | unset   |
/// | `PLANBOOKD_LOG_FORMAT` | `text`  |
///
/// Log filtering itself follows `RUST_LOG`.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Workspace opened at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let workspace = std::env::var("PLANBOOKD_WORKSPACE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let log_format = std::env::var("PLANBOOKD_LOG_FORMAT")
            .map(|s| parse_log_format(&s))
            .unwrap_or(LogFormat::Text);
        Self {
            workspace,
            log_format,
        }
    }
}

fn parse_log_format(raw: &str) -> LogFormat {
    if raw.trim().eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_defaults_to_text() {
        assert_eq!(parse_log_format("JSON"), LogFormat::Json);
        assert_eq!(parse_log_format(" json "), LogFormat::Json);
        assert_eq!(parse_log_format("pretty"), LogFormat::Text);
        assert_eq!(parse_log_format(""), LogFormat::Text);
    }
}
