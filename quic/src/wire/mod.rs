//! The wire codec (spec §3, §4.1, §6): typed fields, frames, and packet variants for
//! gQUIC Q039, plus the byte cursor they're built on.

pub mod addr;
pub mod cursor;
pub mod frame;
pub mod ids;
pub mod packet;
pub mod tag;
pub mod ufloat;

pub use addr::SocketAddress;
pub use frame::Frame;
pub use ids::{ConnectionId, Offset, PacketNumber, StreamId};
pub use packet::Packet;
