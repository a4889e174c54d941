//! Channel error types.
//!
//! Only configuration problems surface here. Transport failures are never
//! returned to the caller; they show up as `ConnectionState` transitions.

use livefeed_core::CoreError;
use livefeed_poll::PollError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel already started")]
    AlreadyStarted,

    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    #[error("Polling setup error: {0}")]
    Poll(#[from] PollError),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
