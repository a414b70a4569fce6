//! Userspace gQUIC (Q039) transport: wire codec, flow control, stream multiplexing,
//! session state machine, and the client/server endpoint actors that drive them.
//!
//! Layered bottom-up, each module only depends on the ones above it in this list:
//! `wire` (codec) → `flow`/`sequencer`/`rtt`/`ack` (per-connection bookkeeping) →
//! `stream` (one multiplexed channel) → `session` (the state machine tying a connection
//! together) → `socket` (the UDP transport) → `endpoint` (the `stakker` actors an
//! application actually constructs).

pub mod ack;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod rtt;
pub mod sequencer;
pub mod session;
pub mod socket;
pub mod stream;
pub mod wire;

pub use config::Config;
pub use endpoint::{Client, ClientEvent, Server, ServerEvent};
pub use error::{ErrorCode, Kind, QuicError, Result, StreamErrorCode};
pub use session::{Role, SessionState};
pub use wire::ids::{ConnectionId, Offset, PacketNumber, StreamId};
