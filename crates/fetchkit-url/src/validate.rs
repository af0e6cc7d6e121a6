//! Scheme, host, port, and path screening.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use fetchkit_core::FetchError;
use url::{Host, Url};

/// Ports the validator refuses by default: remote shells, mail, RPC,
/// and the usual database/management listeners an SSRF probe goes for.
pub const DEFAULT_BLOCKED_PORTS: &[u16] = &[
    22, 23, 25, 135, 139, 445, 1433, 1521, 3306, 3389, 5432, 5900, 6379, 9200, 11211, 27017,
];

const MAX_URL_LENGTH: usize = 2048;

/// Configuration for [`UrlValidator`].
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Schemes the engine will fetch. Defaults to http/https/ftp/ftps.
    pub allowed_schemes: HashSet<String>,
    /// Ports rejected outright. Ignored when `allowed_ports` is set.
    pub blocked_ports: HashSet<u16>,
    /// When set, only these ports are admitted.
    pub allowed_ports: Option<HashSet<u16>>,
    /// Admit loopback/private hosts. Off in production; test harnesses
    /// pointing at 127.0.0.1 turn it on.
    pub allow_private_hosts: bool,
    /// Maximum URL length accepted.
    pub max_url_length: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: ["http", "https", "ftp", "ftps"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            blocked_ports: DEFAULT_BLOCKED_PORTS.iter().copied().collect(),
            allowed_ports: None,
            allow_private_hosts: false,
            max_url_length: MAX_URL_LENGTH,
        }
    }
}

impl ValidatorConfig {
    /// Config admitting loopback and private hosts, for test targets.
    pub fn permissive() -> Self {
        Self {
            allow_private_hosts: true,
            ..Self::default()
        }
    }
}

/// Returns `true` when the address belongs to a range the engine must
/// never fetch from: loopback, link-local (including 169.254.169.254),
/// RFC1918, v6 unique-local, or the unspecified address.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || is_v6_unique_local(&v6)
                || is_v6_link_local(&v6)
                || v6.to_ipv4_mapped().map(Ipv4Addr::from).is_some_and(|v4| {
                    v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
                })
        }
    }
}

fn is_v6_unique_local(v6: &Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn is_v6_link_local(v6: &Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

/// Hostnames that resolve to the local machine without going through
/// DNS at all.
fn is_local_hostname(host: &str) -> bool {
    let h = host.to_ascii_lowercase();
    h == "localhost" || h.ends_with(".localhost") || h == "localhost.localdomain"
}

/// The URL validator. Cheap to clone; all state is configuration.
#[derive(Debug, Clone, Default)]
pub struct UrlValidator {
    config: ValidatorConfig,
}

impl UrlValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Parses and screens a URL, returning the parsed form on success.
    pub fn validate(&self, raw: &str) -> Result<Url, FetchError> {
        if raw.len() > self.config.max_url_length {
            return Err(FetchError::InvalidUrl {
                reason: format!("URL exceeds {} bytes", self.config.max_url_length),
            });
        }

        let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl {
            reason: e.to_string(),
        })?;

        let scheme = url.scheme();
        if !self.config.allowed_schemes.contains(scheme) {
            return Err(FetchError::InvalidUrl {
                reason: format!("scheme '{scheme}' is not allowed"),
            });
        }

        self.screen_host(&url)?;
        self.screen_port(&url)?;
        screen_path(url.path())?;

        Ok(url)
    }

    fn screen_host(&self, url: &Url) -> Result<(), FetchError> {
        let host = match url.host() {
            Some(h) => h,
            None => {
                return Err(FetchError::InvalidUrl {
                    reason: "URL has no host".to_string(),
                })
            }
        };

        if self.config.allow_private_hosts {
            return Ok(());
        }

        let blocked = match &host {
            Host::Ipv4(v4) => is_blocked_ip(IpAddr::V4(*v4)),
            Host::Ipv6(v6) => is_blocked_ip(IpAddr::V6(*v6)),
            Host::Domain(name) => {
                if name.is_empty() {
                    return Err(FetchError::InvalidUrl {
                        reason: "empty hostname".to_string(),
                    });
                }
                is_local_hostname(name)
            }
        };

        if blocked {
            return Err(FetchError::InvalidUrl {
                reason: format!("host '{host}' is in a blocked address range"),
            });
        }
        Ok(())
    }

    fn screen_port(&self, url: &Url) -> Result<(), FetchError> {
        let port = match effective_port(url) {
            Some(p) => p,
            None => return Ok(()),
        };

        if let Some(allowed) = &self.config.allowed_ports {
            if !allowed.contains(&port) {
                return Err(FetchError::InvalidUrl {
                    reason: format!("port {port} is not in the allowed set"),
                });
            }
            return Ok(());
        }

        if self.config.blocked_ports.contains(&port) {
            return Err(FetchError::InvalidUrl {
                reason: format!("port {port} is blocked"),
            });
        }
        Ok(())
    }
}

fn effective_port(url: &Url) -> Option<u16> {
    url.port().or_else(|| match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        "ftp" | "ftps" => Some(21),
        _ => None,
    })
}

/// Rejects traversal sequences (plain and percent-encoded), NUL bytes,
/// and ASCII control characters in the path.
fn screen_path(path: &str) -> Result<(), FetchError> {
    let lower = path.to_ascii_lowercase();
    let traversal = ["../", "..\\", "%2e%2e%2f", "%2e%2e%5c", "..%2f", "..%5c"];
    if traversal.iter().any(|pat| lower.contains(pat)) || lower.ends_with("/..") {
        return Err(FetchError::InvalidUrl {
            reason: "path contains traversal sequence".to_string(),
        });
    }
    if lower.contains("%00") || path.bytes().any(|b| b == 0 || b < 0x20) {
        return Err(FetchError::InvalidUrl {
            reason: "path contains control characters".to_string(),
        });
    }
    Ok(())
}
