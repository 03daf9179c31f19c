//! Channel delivery layer for the message relay.
//!
//! Turns a unified message into a provider API call: format negotiation and
//! target resolution, a shared access-token cache, proxy-aware HTTP transport,
//! and one client plus dispatcher per provider. Dispatchers are looked up by
//! channel kind through the [`dispatcher::ChannelRegistry`].

pub mod credential;
pub mod dingtalk;
pub mod dispatcher;
mod reply;
pub mod transport;
pub mod validate;
pub mod webhook;
pub mod wechat_corp;
