//! # lobby-hub
//!
//! In-process fan-out engine for long-lived duplex streams.
//!
//! - [`hub::ConnectionHub`]: single-task actor that owns the registry of
//!   connected peers and delivers broadcasts without ever touching I/O
//! - [`connection::Connection`]: bridges one transport to a hub with an
//!   inbound and an outbound loop that terminate together
//! - [`processor::MessageProcessor`]: the domain plug-in a hub calls into
//! - [`scheduler::PeriodicTask`]: runs an action on an adjustable interval
//!
//! Transports are abstracted as a `Sink<Frame>` plus a
//! `Stream<Item = Result<Frame, E>>`, so the crate has no HTTP dependency.
//!
//! ## Crate Position
//!
//! Depends on: lobby-core.
//! Depended on by: lobby-session, lobby-server.

#![deny(unsafe_code)]

pub mod connection;
pub mod frame;
pub mod hub;
pub mod metrics;
pub mod processor;
pub mod scheduler;

pub use connection::{Connection, ConnectionOptions, Disconnect};
pub use frame::Frame;
pub use hub::{ConnectionHub, HubHandle, Peer, WeakHubHandle};
pub use processor::MessageProcessor;
pub use scheduler::PeriodicTask;
