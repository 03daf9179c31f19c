//! Core types for the message relay.
//!
//! This crate defines the shared data structures used by the channel
//! dispatchers and the CLI: unified message content, channel capabilities,
//! channel/instance configuration and the error taxonomy. It performs no I/O
//! beyond reading the configuration file.

pub mod capability;
pub mod config;
pub mod error;
pub mod message;
