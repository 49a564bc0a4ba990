//! Endpoint records supplied by the configuration loader.
//!
//! The core never reads configuration files. Binaries deserialize these records and hand
//! them over verbatim: the CLI turns them into connection targets, the test server into
//! listen addresses.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// The `host:port` string used both as a connection target and as a listen address.
    pub fn target(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            // bare IPv6 literal
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::Endpoint;

    #[test]
    fn formats_targets() {
        assert_eq!(Endpoint::new("localhost", 50051).target(), "localhost:50051");
        assert_eq!(Endpoint::new("::1", 8080).target(), "[::1]:8080");
        assert_eq!(Endpoint::new("[::1]", 8080).target(), "[::1]:8080");
    }

    #[test]
    fn deserializes_config_records() {
        let endpoints: Vec<Endpoint> =
            serde_json::from_str(r#"[{"address": "0.0.0.0", "port": 9000}]"#).unwrap();

        assert_eq!(endpoints, vec![Endpoint::new("0.0.0.0", 9000)]);
    }
}
