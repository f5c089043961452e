use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("MATINEE_LOBBY_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("MATINEE_LOBBY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4400),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 4400,
        }
    }
}
