//! Target URI validation.
//!
//! Only `ws` and `wss` are accepted. Ports default to 80 / 443.

use std::fmt;
use std::str::FromStr;

use url::Url;

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid uri `{uri}`: {reason}")]
pub struct InvalidUri {
    pub uri: String,
    pub reason: String,
}

/// A validated WebSocket endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    secure: bool,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn parse(uri: &str) -> Result<Self, InvalidUri> {
        let invalid = |reason: String| InvalidUri {
            uri: uri.to_owned(),
            reason,
        };

        let url = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(invalid(format!("unsupported scheme `{other}`"))),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".into()))?
            .to_owned();
        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        Ok(Self {
            url,
            secure,
            host,
            port,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl FromStr for Endpoint {
    type Err = InvalidUri;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
