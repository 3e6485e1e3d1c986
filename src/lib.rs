//! # fxchat
//!
//! A small messaging and file exchange service over TCP.
//!
//! Clients register a unique handle, send unicast and broadcast messages, list
//! the server's files and upload or download them. Control traffic is
//! line-oriented text; file payloads are raw bytes framed by a declared length.

pub mod client;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transfer;

pub use client::Client;
pub use command::{Command, Verb};
pub use config::Config;
pub use error::{Error, ErrorCategory, Result};
pub use protocol::Frame;
pub use server::{Phase, Server, ShutdownHandle};
