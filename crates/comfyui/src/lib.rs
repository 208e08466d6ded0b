//! ComfyUI generation-job client.
//!
//! Submits job graphs over HTTP, listens to the server's WebSocket push
//! channel, correlates lifecycle messages with pending jobs and hands the
//! finished image back to the caller.
//!
//! [`manager::PortraitClient`] wires the pieces together; each piece is
//! usable on its own so tests can inject push messages without a socket.

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod manager;
pub mod messages;
pub mod registry;
pub mod submitter;
pub mod waiter;
