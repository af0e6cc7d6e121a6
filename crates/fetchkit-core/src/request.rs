//! Request model: methods, bodies, priorities, and the builder.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP method. A small owned enum keeps the core crate off the
/// transport library; the pool maps it onto the wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Method> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "HEAD" => Some(Method::Head),
            "PATCH" => Some(Method::Patch),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation requested against an FTP URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FtpOperation {
    /// Retrieve the file (streamed to `output_path` or into memory).
    Download,
    /// Directory listing.
    List,
    /// SIZE/MDTM metadata without transferring the body.
    Info,
}

impl std::fmt::Display for FtpOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FtpOperation::Download => "download",
            FtpOperation::List => "list",
            FtpOperation::Info => "info",
        };
        f.write_str(s)
    }
}

/// Scheduling priority for the batch scheduler. Lower rank admits first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Admission rank; `High` is 0 so it sorts ahead in a min-ordering.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// Content kind as seen by the detector and the parser registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Text,
    Html,
    Json,
    Xml,
    Rss,
    Csv,
    Markdown,
    Pdf,
    Image,
    Raw,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Html => "html",
            ContentKind::Json => "json",
            ContentKind::Xml => "xml",
            ContentKind::Rss => "rss",
            ContentKind::Csv => "csv",
            ContentKind::Markdown => "markdown",
            ContentKind::Pdf => "pdf",
            ContentKind::Image => "image",
            ContentKind::Raw => "raw",
        }
    }

    pub fn parse(s: &str) -> Option<ContentKind> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Some(ContentKind::Text),
            "html" => Some(ContentKind::Html),
            "json" => Some(ContentKind::Json),
            "xml" => Some(ContentKind::Xml),
            "rss" => Some(ContentKind::Rss),
            "csv" => Some(ContentKind::Csv),
            "markdown" | "md" => Some(ContentKind::Markdown),
            "pdf" => Some(ContentKind::Pdf),
            "image" => Some(ContentKind::Image),
            "raw" => Some(ContentKind::Raw),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Bytes(Bytes),
    Text(String),
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

impl RequestBody {
    /// Canonical byte rendering, used for key hashing.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            RequestBody::Bytes(b) => b.to_vec(),
            RequestBody::Text(s) => s.as_bytes().to_vec(),
            RequestBody::Json(v) => v.to_string().into_bytes(),
            RequestBody::Form(pairs) => {
                let mut sorted: Vec<_> = pairs.clone();
                sorted.sort();
                let mut out = Vec::new();
                for (k, v) in sorted {
                    out.extend_from_slice(k.as_bytes());
                    out.push(b'=');
                    out.extend_from_slice(v.as_bytes());
                    out.push(b'&');
                }
                out
            }
        }
    }
}

/// An immutable fetch request.
///
/// Construct through [`FetchRequest::builder`]; the URL must already
/// have passed validation (scheme is checked again here as a guard).
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: Method,
    pub operation: FtpOperation,
    pub headers: BTreeMap<String, String>,
    pub params: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub content_type: Option<ContentKind>,
    pub timeout: Option<Duration>,
    pub priority: Priority,
    pub output_path: Option<PathBuf>,
}

impl FetchRequest {
    pub fn builder(url: Url) -> FetchRequestBuilder {
        FetchRequestBuilder::new(url)
    }

    /// GET request with defaults everywhere else.
    pub fn get(url: Url) -> FetchRequest {
        FetchRequestBuilder::new(url).build()
    }

    pub fn is_ftp(&self) -> bool {
        matches!(self.url.scheme(), "ftp" | "ftps")
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.url.scheme(), "https" | "ftps")
    }
}

/// Builder for [`FetchRequest`].
#[derive(Debug, Clone)]
pub struct FetchRequestBuilder {
    url: Url,
    method: Method,
    operation: FtpOperation,
    headers: BTreeMap<String, String>,
    params: Vec<(String, String)>,
    body: Option<RequestBody>,
    content_type: Option<ContentKind>,
    timeout: Option<Duration>,
    priority: Priority,
    output_path: Option<PathBuf>,
}

impl FetchRequestBuilder {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::Get,
            operation: FtpOperation::Download,
            headers: BTreeMap::new(),
            params: Vec::new(),
            body: None,
            content_type: None,
            timeout: None,
            priority: Priority::Normal,
            output_path: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn operation(mut self, operation: FtpOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Adds one header; later calls with the same (case-insensitive)
    /// name overwrite.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        for (k, v) in headers {
            self.headers.insert(k.to_ascii_lowercase(), v);
        }
        self
    }

    /// Appends one query parameter, preserving insertion order.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn content_type(mut self, kind: ContentKind) -> Self {
        self.content_type = Some(kind);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn build(self) -> FetchRequest {
        FetchRequest {
            url: self.url,
            method: self.method,
            operation: self.operation,
            headers: self.headers,
            params: self.params,
            body: self.body,
            content_type: self.content_type,
            timeout: self.timeout,
            priority: self.priority,
            output_path: self.output_path,
        }
    }
}
