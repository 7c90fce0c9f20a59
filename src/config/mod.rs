use std::env;
use std::net::{IpAddr, Ipv4Addr};

use crate::agent::AgentConfig;
use crate::error::{Result, SessionError};

pub const DEFAULT_JWT_SECRET: &str = "change_this_secret";

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub generation: GenerationConfig,
    pub agent: AgentConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

pub struct AuthConfig {
    pub jwt_secret: String,
}

pub struct GenerationConfig {
    pub queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| SessionError::InvalidConfiguration(format!("SERVER_PORT: {}", e)))?;

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET is not set, falling back to the development secret");
            DEFAULT_JWT_SECRET.to_string()
        });

        let queue_capacity = env::var("GENERATION_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|capacity: &usize| *capacity > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port,
            },
            auth: AuthConfig { jwt_secret },
            generation: GenerationConfig { queue_capacity },
            agent: AgentConfig::from_env(),
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_host(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
            },
            auth: AuthConfig {
                jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            },
            generation: GenerationConfig {
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
            },
            agent: AgentConfig::default(),
        }
    }

    #[test]
    fn test_parse_localhost() {
        let config = config_with_host("localhost", 3000);
        assert_eq!(config.bind_address(), ([127, 0, 0, 1], 3000));
    }

    #[test]
    fn test_parse_ipv4_address() {
        let config = config_with_host("192.168.1.1", 3001);
        assert_eq!(config.bind_address(), ([192, 168, 1, 1], 3001));
    }

    #[test]
    fn test_parse_empty_host() {
        let config = config_with_host("", 3000);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 3000));
    }

    #[test]
    fn test_parse_ipv6_falls_back_to_all_interfaces() {
        let config = config_with_host("::1", 3000);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 3000));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        let config = config_with_host("invalid-hostname", 9000);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 9000));
    }
}
