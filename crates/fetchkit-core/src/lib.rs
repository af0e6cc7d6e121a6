//! Core data model shared by every fetchkit crate.
//!
//! This crate defines the vocabulary of the engine: [`FetchRequest`] and
//! [`FetchResult`], the [`FetchError`] sum type with its retryability
//! classification, the deterministic [`RequestKey`] used by the
//! deduplicator and the cache, and the event-listener machinery that
//! every component uses for observability.
//!
//! Nothing in here touches the network; transport concerns live in
//! `fetchkit-pool`, `fetchkit-ftp`, and the engine crate.

pub mod error;
pub mod events;
pub mod key;
pub mod request;
pub mod response;

pub use error::{ErrorCategory, FetchError, NetworkErrorKind};
pub use events::{EngineEvent, EventListener, EventListeners, FnListener};
pub use key::RequestKey;
pub use request::{ContentKind, FetchRequest, FetchRequestBuilder, FtpOperation, Method, Priority, RequestBody};
pub use response::{FetchResult, ParsedContent};
