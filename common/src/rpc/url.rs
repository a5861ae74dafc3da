use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::config::DEFAULT_RPC_PORT;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlError {
    #[error("malformed endpoint URL '{0}'")]
    Malformed(String),
    #[error("missing credentials in endpoint URL")]
    MissingCredentials,
}

/// An RPC endpoint for the getwork probe, parsed from
/// `user:pass@proto://host:port`. Only the credentials are mandatory;
/// protocol, address and port fall back to http / 127.0.0.1 / 11048.
/// Ports outside 1025..65535 are replaced by the default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub username: String,
    pub password: String,
    pub protocol: String,
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let (credentials, location) = match url.split_once('@') {
            Some((credentials, location)) => (credentials, Some(location)),
            None => (url, None),
        };

        let (username, password) = credentials
            .split_once(':')
            .ok_or(UrlError::MissingCredentials)?;
        if username.is_empty() {
            return Err(UrlError::MissingCredentials);
        }

        let mut endpoint = Self {
            username: username.to_string(),
            password: password.to_string(),
            protocol: "http".to_string(),
            address: "127.0.0.1".to_string(),
            port: DEFAULT_RPC_PORT,
        };

        let Some(location) = location else {
            return Ok(endpoint);
        };

        let host_port = match location.split_once("://") {
            Some((protocol, rest)) => {
                if protocol.is_empty() || rest.contains("://") {
                    return Err(UrlError::Malformed(url.to_string()));
                }
                endpoint.protocol = protocol.to_string();
                rest
            }
            None => location,
        };

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        };
        if !host.is_empty() {
            endpoint.address = host.to_string();
        }
        if let Some(port) = port {
            if !port.is_empty() {
                match port.parse::<u32>() {
                    Ok(p) if p > 1024 && p < 65536 => endpoint.port = p as u16,
                    Ok(_) => {}
                    Err(_) => return Err(UrlError::Malformed(url.to_string())),
                }
            }
        }

        Ok(endpoint)
    }

    /// The probe scans a window of consecutive ports on the same host:
    /// this endpoint plus `count` successors starting one port above.
    pub fn expand_range(&self, count: u16) -> Vec<Endpoint> {
        let mut endpoints = vec![self.clone()];
        for offset in 1..=count {
            let Some(port) = self.port.checked_add(offset) else {
                break;
            };
            let mut next = self.clone();
            next.port = port;
            endpoints.push(next);
        }
        endpoints
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}@{}://{}:{}",
            self.username, self.password, self.protocol, self.address, self.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_url() {
        let endpoint = Endpoint::parse("user:pa55word@https://10.0.0.5:11348").unwrap();
        assert_eq!(endpoint.username, "user");
        assert_eq!(endpoint.password, "pa55word");
        assert_eq!(endpoint.protocol, "https");
        assert_eq!(endpoint.address, "10.0.0.5");
        assert_eq!(endpoint.port, 11348);
    }

    #[test]
    fn test_credentials_only_defaults() {
        let endpoint = Endpoint::parse("user:pw").unwrap();
        assert_eq!(endpoint.protocol, "http");
        assert_eq!(endpoint.address, "127.0.0.1");
        assert_eq!(endpoint.port, DEFAULT_RPC_PORT);
    }

    #[test]
    fn test_out_of_range_port_falls_back() {
        let endpoint = Endpoint::parse("u:p@host:80").unwrap();
        assert_eq!(endpoint.port, DEFAULT_RPC_PORT);
        let endpoint = Endpoint::parse("u:p@host:70000").unwrap();
        assert_eq!(endpoint.port, DEFAULT_RPC_PORT);
    }

    #[test]
    fn test_missing_credentials() {
        assert_eq!(Endpoint::parse("nocolon"), Err(UrlError::MissingCredentials));
        assert_eq!(
            Endpoint::parse(":pw@host:11048"),
            Err(UrlError::MissingCredentials)
        );
    }

    #[test]
    fn test_garbage_port() {
        assert!(matches!(
            Endpoint::parse("u:p@host:notaport"),
            Err(UrlError::Malformed(_))
        ));
    }

    #[test]
    fn test_expand_range() {
        let endpoint = Endpoint::parse("u:p@host:11048").unwrap();
        let range = endpoint.expand_range(8);
        assert_eq!(range.len(), 9);
        assert_eq!(range[0].port, 11048);
        assert_eq!(range[8].port, 11056);
        assert!(range.iter().all(|e| e.address == "host"));
    }

    #[test]
    fn test_display_round_trip() {
        let endpoint = Endpoint::parse("u:p@https://host:11111").unwrap();
        assert_eq!(Endpoint::parse(&endpoint.to_string()).unwrap(), endpoint);
    }
}
