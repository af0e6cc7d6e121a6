//! URL validation, normalization, and analysis.
//!
//! The validator is the first gate of every fetch: it parses the URL,
//! enforces the allowed scheme set, screens hosts against the SSRF
//! blocklist (loopback, link-local, private ranges, the cloud metadata
//! address), screens ports, and rejects traversal or control-character
//! games in the path. Hostname-based targets are screened a second time
//! at DNS-resolution time by the connection pool, so rebinding between
//! validation and connect does not bypass the list.

mod analyze;
mod validate;

pub use analyze::{analyze_url, host_key, normalize_url, UrlAnalysis};
pub use validate::{is_blocked_ip, UrlValidator, ValidatorConfig};
