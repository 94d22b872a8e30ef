//! rampart-probe: health probing for Rampart deployment targets.
//!
//! Provides a single, fast, timeout-bounded HTTP health probe and the
//! minimal HTTP/1 client it is built on. The client is shared with the
//! HTTP capability implementations in `rampart-rollout` (metrics fetch,
//! deploy and traffic webhooks).
//!
//! # Architecture
//!
//! ```text
//! HealthProbe::check(url, path, timeout)
//!   └── http::get() ── TcpStream + hyper http1 handshake
//!         └── tokio::time::timeout() around the whole exchange
//! ```
//!
//! # Failure model
//!
//! A probe never returns an error and never panics: transport errors,
//! non-2xx statuses and deadline expiry all produce a `HealthResult`
//! with `healthy == false` and `error` populated. There are no retries;
//! retry policy belongs to the caller.

pub mod http;
pub mod probe;

pub use http::{HttpResponse, ProbeError};
pub use probe::{HealthProbe, HealthResult};
