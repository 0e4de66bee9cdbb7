use super::RequestsLoggingLevel;

pub const DEFAULT_PORT: u16 = 5545;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// When set, every route but `/info` requires HTTP Basic auth with this
    /// password. The user name is ignored.
    pub auth_password: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: DEFAULT_PORT,
            auth_password: None,
        }
    }
}
