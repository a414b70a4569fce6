//! Connection id, packet number, stream id, and offset: the four variable-width
//! integers that key gQUIC's wire format (spec §3).

use core::fmt;

use rand::RngCore;

use crate::error::{proto_warn, ErrorCode, Result};
use crate::wire::cursor::{Reader, Writer};

/// An opaque 8-byte connection identifier. Equality is on the raw bytes; the hex form
/// (spec §3) is purely presentational.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub [u8; 8]);

impl ConnectionId {
	pub const LEN: usize = 8;

	/// Generates a random connection id, as a client does on construction (spec §4.7).
	pub fn random() -> Self {
		let mut bytes = [0u8; 8];
		rand::thread_rng().fill_bytes(&mut bytes);
		Self(bytes)
	}

	pub fn decode(r: &mut Reader) -> Result<Self> {
		let bytes = r.walk(Self::LEN)?;
		let mut out = [0u8; 8];
		out.copy_from_slice(bytes);
		Ok(Self(out))
	}

	pub fn encode(&self, w: &mut Writer) {
		w.push_bytes(&self.0);
	}
}

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0 {
			write!(f, "{b:02x}")?;
		}
		Ok(())
	}
}

impl fmt::Debug for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ConnectionId({self})")
	}
}

/// Maps a 2-bit wire flag to a byte width, shared by PacketNumber and (with different
/// tables) StreamId/Offset (spec §3).
#[inline]
fn flag_to_len(flag: u8, table: &[usize]) -> usize {
	table[(flag & 0b11) as usize]
}

/// A per-session monotonically increasing packet number in `[1, 2^48 - 1]` (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct PacketNumber(pub u64);

impl PacketNumber {
	pub const MAX: u64 = (1u64 << 48) - 1;
	const WIDTHS: [usize; 4] = [1, 2, 4, 6];

	pub fn first() -> Self {
		Self(1)
	}

	/// True once no further packet numbers can be assigned (spec §3, §8: "PacketNumber at
	/// 2^48-1 reports isLimitReached and refuses to advance").
	pub fn is_limit_reached(self) -> bool {
		self.0 >= Self::MAX
	}

	pub fn next(self) -> Result<Self> {
		if self.is_limit_reached() {
			return Err(proto_warn!(ErrorCode::NoError, "packet number space exhausted"));
		}
		Ok(Self(self.0 + 1))
	}

	/// Width in bytes needed to serialize this value (1/2/4/6, spec §8).
	pub fn byte_len(self) -> usize {
		match self.0 {
			v if v <= 0xff => 1,
			v if v <= 0xffff => 2,
			v if v <= 0xffff_ffff => 4,
			_ => 6,
		}
	}

	pub fn flag_bits(self) -> u8 {
		match self.byte_len() {
			1 => 0b00,
			2 => 0b01,
			4 => 0b10,
			_ => 0b11,
		}
	}

	pub fn flag_to_byte_len(flag: u8) -> usize {
		flag_to_len(flag, &Self::WIDTHS)
	}

	pub fn decode(r: &mut Reader, len: usize) -> Result<Self> {
		Ok(Self(r.uint_be(len)?))
	}

	pub fn encode(self, w: &mut Writer) {
		w.uint_be(self.0, self.byte_len());
	}

	/// Always serializes at the maximum width; used for the very first outbound packet
	/// to establish framing width (spec §4.6).
	pub fn encode_full_width(self, w: &mut Writer) {
		w.uint_be(self.0, 6);
	}
}

/// A stream identifier in `[0, 2^32 - 1]` (spec §3). Id 0 is reserved for connection-level
/// WINDOW_UPDATE; id 1 is reserved for the (out-of-scope) crypto handshake stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StreamId(pub u32);

impl StreamId {
	pub const CONNECTION: Self = Self(0);
	pub const CRYPTO: Self = Self(1);
	const WIDTHS: [usize; 4] = [1, 2, 3, 4];

	pub fn is_client_initiated(self) -> bool {
		self.0 % 2 == 1
	}

	pub fn is_server_initiated(self) -> bool {
		self.0 != 0 && self.0 % 2 == 0
	}

	pub fn byte_len(self) -> usize {
		match self.0 {
			v if v <= 0xff => 1,
			v if v <= 0xffff => 2,
			v if v <= 0xff_ffff => 3,
			_ => 4,
		}
	}

	pub fn flag_bits(self) -> u8 {
		(self.byte_len() - 1) as u8
	}

	pub fn flag_to_byte_len(flag: u8) -> usize {
		flag_to_len(flag, &Self::WIDTHS)
	}

	pub fn decode(r: &mut Reader, len: usize) -> Result<Self> {
		Ok(Self(r.uint_be(len)? as u32))
	}

	pub fn encode(self, w: &mut Writer) {
		w.uint_be(self.0 as u64, self.byte_len());
	}

	/// Advances to the next id on the local side, stepping by 2 and wrapping modulo
	/// 2^32 while skipping 0 (spec §3).
	pub fn advance(self) -> Self {
		let next = self.0.wrapping_add(2);
		Self(if next == 0 { 1 } else { next })
	}
}

/// A byte offset within a stream, in `[0, 2^53 - 1]` (spec §3's safe-integer bound, kept
/// here even though Rust's u64 has no such ceiling, so cross-checks against a
/// JS-originated peer stay meaningful).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Offset(pub u64);

impl Offset {
	pub const MAX: u64 = (1u64 << 53) - 1;
	const WIDTHS: [usize; 8] = [0, 2, 3, 4, 5, 6, 7, 8];

	pub fn zero() -> Self {
		Self(0)
	}

	/// Width in bytes: 0 for the value 0, else 2..=8 (spec §3, §8).
	pub fn byte_len(self) -> usize {
		match self.0 {
			0 => 0,
			v if v <= 0xffff => 2,
			v if v <= 0xff_ffff => 3,
			v if v <= 0xffff_ffff => 4,
			v if v <= 0xff_ffff_ffff => 5,
			v if v <= 0xffff_ffff_ffff => 6,
			v if v <= 0xff_ffff_ffff_ffff => 7,
			_ => 8,
		}
	}

	pub fn flag_bits(self) -> u8 {
		Self::WIDTHS.iter().position(|&w| w == self.byte_len()).expect("byte_len always in WIDTHS") as u8
	}

	pub fn byte_len_for_flag(flag: u8) -> usize {
		Self::WIDTHS[(flag & 0b111) as usize]
	}

	pub fn decode(r: &mut Reader, len: usize) -> Result<Self> {
		Ok(Self(r.uint_be(len)?))
	}

	pub fn encode(self, w: &mut Writer) {
		w.uint_be(self.0, self.byte_len());
	}

	pub fn checked_add(self, n: usize) -> Option<Self> {
		self.0.checked_add(n as u64).map(Self)
	}
}

impl core::ops::Add<u64> for Offset {
	type Output = Offset;

	fn add(self, rhs: u64) -> Offset {
		Offset(self.0 + rhs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn packet_number_width_selection() {
		assert_eq!(PacketNumber(0xff).byte_len(), 1);
		assert_eq!(PacketNumber(0x100).byte_len(), 2);
		assert_eq!(PacketNumber(0xffff_ffff).byte_len(), 4);
		assert_eq!(PacketNumber(0x1_0000_0000).byte_len(), 6);
	}

	#[test]
	fn packet_number_limit() {
		let max = PacketNumber(PacketNumber::MAX);
		assert!(max.is_limit_reached());
		assert!(max.next().is_err());
		assert!(PacketNumber(1).next().is_ok());
	}

	#[test]
	fn stream_id_advance_skips_zero() {
		let near_wrap = StreamId(u32::MAX - 1);
		assert_eq!(near_wrap.advance(), StreamId(1));
	}

	#[test]
	fn stream_id_parity() {
		assert!(StreamId(1).is_client_initiated());
		assert!(StreamId(2).is_server_initiated());
		assert!(!StreamId(0).is_server_initiated());
	}

	#[test]
	fn offset_width_selection() {
		assert_eq!(Offset(0).byte_len(), 0);
		assert_eq!(Offset(1).byte_len(), 2);
		assert_eq!(Offset(0xffff_ffff_ffff).byte_len(), 6);
		assert_eq!(Offset(u64::MAX >> 8).byte_len(), 8);
	}

	#[test]
	fn connection_id_roundtrip() {
		let id = ConnectionId([1, 2, 3, 4, 5, 6, 7, 8]);
		let mut w = Writer::new();
		id.encode(&mut w);
		let bytes = w.into_vec();
		let mut r = Reader::new(&bytes);
		assert_eq!(ConnectionId::decode(&mut r).unwrap(), id);
		assert_eq!(format!("{id}"), "0102030405060708");
	}
}
