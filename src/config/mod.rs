use std::path::PathBuf;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8888;
const DEFAULT_DATABASE_PATH: &str = "chat_server.db";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Server configuration, assembled from CLI flags (each backed by an env
/// var via `clap`'s `env = "..."`) layered over built-in defaults.
///
/// Priority (highest to lowest):
///   1. CLI flag / environment variable
///   2. Built-in default
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub log_level: String,
}

impl ServerConfig {
    pub fn new(
        host: Option<String>,
        port: Option<u16>,
        database_path: Option<PathBuf>,
        log_level: Option<String>,
    ) -> Self {
        Self {
            host: host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port.unwrap_or(DEFAULT_PORT),
            database_path: database_path.unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            log_level: log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(None, None, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8888);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8888");
    }

    #[test]
    fn overrides_take_precedence() {
        let cfg = ServerConfig::new(Some("0.0.0.0".into()), Some(9000), None, None);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
    }
}
