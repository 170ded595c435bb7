//! Concrete content-source backends for fansearch.
//!
//! This crate provides the broadcast-channel preview client and the
//! built-in plugins, plus shared HTTP client construction.

pub mod channel;
pub mod http;
pub mod plugins;

pub use channel::{ChannelClient, ChannelConfig, ChannelError};
pub use http::HttpConfig;
pub use plugins::DiscourseBackend;
