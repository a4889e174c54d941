//! Live data channel.
//!
//! Keeps consumers fed with `UpdateEvent`s from a backend. A WebSocket push
//! transport is preferred; after bounded reconnect attempts the channel
//! falls back to HTTP polling, and can optionally re-probe push later.
//!
//! ```ignore
//! let channel = Arc::new(LiveDataChannel::new()?);
//! let sub = channel.subscribe(|event| println!("{} {}", event.kind, event.payload));
//! channel.start(ChannelConfig::from_file("livefeed.toml")?)?;
//! ```

pub mod channel;
pub mod error;
pub mod selector;
pub mod subscribers;
pub mod throttle;

pub use channel::LiveDataChannel;
pub use error::{ChannelError, ChannelResult};
pub use selector::{select_initial, TransportChoice};
pub use subscribers::{SubscriberId, SubscriberRegistry, Unsubscribe};
pub use throttle::Throttle;

pub use livefeed_core::{
    ChannelConfig, ConnectionState, EventKind, EventSource, PollEndpoint, UpdateEvent,
};
