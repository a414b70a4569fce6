//! Packet variants and the public-header flag byte (spec §3, §4.1, §6).

use crate::error::{proto_warn, ErrorCode, Result};
use crate::wire::cursor::{Reader, Writer};
use crate::wire::frame::Frame;
use crate::wire::ids::{ConnectionId, PacketNumber};
use crate::wire::tag::{well_known, QuicTag};

const FLAG_VERSION: u8 = 0x01;
const FLAG_RESET: u8 = 0x02;
const FLAG_NONCE: u8 = 0x04;
const FLAG_CONNECTION_ID: u8 = 0x08;
const FLAG_PACKET_NUMBER_MASK: u8 = 0x30;
const FLAG_PACKET_NUMBER_SHIFT: u8 = 4;

pub const VERSION: [u8; 4] = *b"Q039";

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResetPacket {
	pub connection_id: ConnectionId,
	pub nonce_proof: u64,
	pub rejected_packet_number: Option<u64>,
	pub client_address: Option<crate::wire::addr::SocketAddress>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NegotiationPacket {
	pub connection_id: ConnectionId,
	pub versions: Vec<[u8; 4]>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RegularPacket {
	pub connection_id: ConnectionId,
	pub version: Option<[u8; 4]>,
	pub nonce: Option<[u8; 32]>,
	pub packet_number: PacketNumber,
	pub frames: Vec<Frame>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Packet {
	Reset(ResetPacket),
	Negotiation(NegotiationPacket),
	Regular(RegularPacket),
}

impl Packet {
	/// Parses the public header and body. Negotiation packets are sent by servers only
	/// (spec §4.1), so callers on the client side pass `expect_negotiation = true` to
	/// recognize one; server-side callers pass `false` and never see this variant.
	pub fn decode(r: &mut Reader, expect_negotiation: bool) -> Result<Self> {
		let flags = r.u8()?;

		if flags & 0x80 != 0 {
			return Err(proto_warn!(ErrorCode::InvalidPacketHeader, "reserved bit 0x80 set in public flags 0x{flags:02x}"));
		}
		if flags & FLAG_CONNECTION_ID == 0 {
			return Err(proto_warn!(ErrorCode::InvalidPacketHeader, "public header missing mandatory connection-id bit"));
		}

		let connection_id = ConnectionId::decode(r)?;

		if flags & FLAG_RESET != 0 {
			return Self::decode_reset(r, connection_id);
		}

		if flags & FLAG_VERSION != 0 && expect_negotiation {
			return Self::decode_negotiation(r, connection_id);
		}

		let version = if flags & FLAG_VERSION != 0 {
			let bytes = r.walk(4)?;
			let mut v = [0u8; 4];
			v.copy_from_slice(bytes);
			Some(v)
		} else {
			None
		};

		let nonce = if flags & FLAG_NONCE != 0 {
			let bytes = r.walk(32)?;
			let mut n = [0u8; 32];
			n.copy_from_slice(bytes);
			Some(n)
		} else {
			None
		};

		let pn_flag = (flags & FLAG_PACKET_NUMBER_MASK) >> FLAG_PACKET_NUMBER_SHIFT;
		let pn_len = PacketNumber::flag_to_byte_len(pn_flag);
		let packet_number = PacketNumber::decode(r, pn_len)?;

		let mut frames = Vec::new();
		while !r.is_empty() {
			frames.push(Frame::decode(r, pn_len)?);
		}

		Ok(Packet::Regular(RegularPacket { connection_id, version, nonce, packet_number, frames }))
	}

	fn decode_reset(r: &mut Reader, connection_id: ConnectionId) -> Result<Self> {
		let tag = QuicTag::decode(r)?;

		let nonce_bytes = tag.require(well_known::RNON)?;
		if nonce_bytes.len() != 8 {
			return Err(proto_warn!(ErrorCode::InvalidPacketHeader, "RNON must be 8 bytes, got {}", nonce_bytes.len()));
		}
		let mut nonce_arr = [0u8; 8];
		nonce_arr.copy_from_slice(nonce_bytes);
		let nonce_proof = u64::from_be_bytes(nonce_arr);

		let rejected_packet_number = tag.get(well_known::RSEQ).map(|bytes| {
			let mut buf = [0u8; 8];
			let n = bytes.len().min(8);
			buf[8 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
			u64::from_be_bytes(buf)
		});

		let client_address = tag
			.get(well_known::CADR)
			.map(|bytes| {
				let mut inner = Reader::new(bytes);
				crate::wire::addr::SocketAddress::decode(&mut inner)
			})
			.transpose()?;

		Ok(Packet::Reset(ResetPacket { connection_id, nonce_proof, rejected_packet_number, client_address }))
	}

	fn decode_negotiation(r: &mut Reader, connection_id: ConnectionId) -> Result<Self> {
		let mut versions = Vec::new();
		while !r.is_empty() {
			let bytes = r.walk(4)?;
			let mut v = [0u8; 4];
			v.copy_from_slice(bytes);
			versions.push(v);
		}
		Ok(Packet::Negotiation(NegotiationPacket { connection_id, versions }))
	}

	pub fn encode(&self, w: &mut Writer) {
		match self {
			Packet::Reset(reset) => {
				w.u8(FLAG_RESET | FLAG_CONNECTION_ID);
				reset.connection_id.encode(w);

				let mut tag = QuicTag::new(*well_known::PRST);
				tag.insert(*well_known::RNON, reset.nonce_proof.to_be_bytes().to_vec());
				if let Some(rseq) = reset.rejected_packet_number {
					tag.insert(*well_known::RSEQ, rseq.to_be_bytes().to_vec());
				}
				if let Some(addr) = &reset.client_address {
					let mut inner = Writer::new();
					addr.encode(&mut inner);
					tag.insert(*well_known::CADR, inner.into_vec());
				}
				tag.encode(w);
			}
			Packet::Negotiation(neg) => {
				w.u8(FLAG_VERSION | FLAG_CONNECTION_ID);
				neg.connection_id.encode(w);
				for v in &neg.versions {
					w.push_bytes(v);
				}
			}
			Packet::Regular(reg) => {
				let mut flags = FLAG_CONNECTION_ID;
				if reg.version.is_some() {
					flags |= FLAG_VERSION;
				}
				if reg.nonce.is_some() {
					flags |= FLAG_NONCE;
				}
				flags |= (reg.packet_number.flag_bits()) << FLAG_PACKET_NUMBER_SHIFT;

				w.u8(flags);
				reg.connection_id.encode(w);

				if let Some(version) = reg.version {
					w.push_bytes(&version);
				}
				if let Some(nonce) = reg.nonce {
					w.push_bytes(&nonce);
				}

				reg.packet_number.encode(w);

				for frame in &reg.frames {
					frame.encode(w);
				}
			}
		}
	}
}

/// Picks the first peer-offered version present in our supported set, matching the
/// negotiation rule in spec §6 (`chooseVersion`). Only "Q039" is ever supported.
pub fn choose_version(peer_versions: &[[u8; 4]]) -> Option<[u8; 4]> {
	peer_versions.iter().find(|&&v| v == VERSION).copied()
}

/// Reads just enough of the public header to demultiplex a datagram by connection id,
/// without parsing the rest of the packet (spec §9: endpoint routes "ConnectionID →
/// Session" before any session-specific decoding happens).
pub fn peek_connection_id(buf: &[u8]) -> Result<ConnectionId> {
	let mut r = Reader::new(buf);
	let flags = r.u8()?;
	if flags & FLAG_CONNECTION_ID == 0 {
		return Err(proto_warn!(ErrorCode::InvalidPacketHeader, "public header missing mandatory connection-id bit"));
	}
	ConnectionId::decode(&mut r)
}

/// Reads just the public-flag byte to check the reset bit, for the endpoint's "unknown
/// connection id" branch (spec §4.7: "For an unknown id: if packet is a reset, drop").
pub fn peek_is_reset(buf: &[u8]) -> Result<bool> {
	let mut r = Reader::new(buf);
	let flags = r.u8()?;
	Ok(flags & FLAG_RESET != 0)
}
