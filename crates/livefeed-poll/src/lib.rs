//! HTTP polling fallback for livefeed channels.
//!
//! One timer per configured endpoint; every tick GETs the endpoint and
//! forwards the JSON body as an `UpdateEvent`. Used when no push endpoint
//! is configured, or after the push transport has given up.

pub mod error;
pub mod fetcher;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use error::{PollError, PollResult};
pub use fetcher::{HttpFetcher, PollFetcher};
pub use transport::{PollTarget, PollingTransport};
