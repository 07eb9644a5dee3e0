//! Write-session gateway library crate.
//!
//! # Purpose
//! Drives producer write sessions against partitioned topics: handshake, topic
//! lookup, authorization, source-id to partition binding, batched and
//! backpressured writes, acknowledgments and teardown.
//!
//! # How it fits
//! [`session::Session`] is a synchronous state machine. [`driver::run_session`]
//! runs it on tokio against the collaborator traits ([`directory`], [`binding`],
//! [`owner`], [`partition`], [`auth`]), and [`transport::serve`] hands it one TCP
//! connection per session. The in-memory collaborators back the binary and the
//! integration tests.
pub mod auth;
pub mod binding;
pub mod config;
pub mod directory;
pub mod driver;
pub mod observability;
pub mod owner;
pub mod partition;
pub mod registry;
pub mod session;
pub mod transport;
