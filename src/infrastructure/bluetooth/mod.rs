//! Bluetooth Module
//!
//! Keeps a BLE link to the keyboard receiver and turns typing, pointer and
//! editing actions into the receiver's text protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       LinkService                        │
//! │   (link thread - drains requests and transport events)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    LinkStateMachine                      │
//! │  (state, filtering, GATT setup, reconnect, encoding)     │
//! └──────┬──────────────┬──────────────┬────────────────────┘
//!        │              │              │
//!        ▼              ▼              ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │ Transport  │ │  Protocol  │ │ Reconnect  │
//! │            │ │            │ │            │
//! │ - Scanner  │ │ - Payloads │ │ - Tickets  │
//! │ - GATT     │ │ - Chunking │ │ - Delay    │
//! └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Capability traits and the events a transport reports
//! - [`link`] - Connection lifecycle and command dispatch
//! - [`protocol`] - Wire encoding and MTU chunking
//! - [`reconnect`] - Single-shot delayed reconnect
//! - [`service`] - Link thread and the handle used to drive it
//! - [`scanner`] / [`connection`] - WinRT transport (Windows only)

pub mod error;
pub mod link;
pub mod protocol;
pub mod reconnect;
pub mod service;
pub mod transport;

#[cfg(windows)]
pub mod connection;
#[cfg(windows)]
pub mod scanner;

#[cfg(test)]
mod testing;

pub use error::LinkError;
pub use link::{LinkConfig, LinkStateMachine};
pub use service::{spawn_link_thread, LinkHandle, TransportEventSink};
pub use transport::{BleTransport, TransportEvent};

#[cfg(windows)]
pub use connection::WinRtTransport;
