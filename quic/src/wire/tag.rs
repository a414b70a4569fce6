//! QuicTag: gQUIC's name-value serialization used by the Public Reset message (spec §3,
//! §4.1, §6). Four-byte ASCII message tag plus an ordered map of four-byte tag keys to
//! opaque values.

use crate::error::{proto_warn, ErrorCode, Result};
use crate::wire::cursor::{Reader, Writer};

/// Packs a 4-character ASCII tag name into its big-endian numeric form (spec §6: "Every
/// known four-character tag is encoded as a 32-bit integer by big-endian ASCII packing").
pub fn tag_value(name: &[u8; 4]) -> u32 {
	u32::from_be_bytes(*name)
}

pub mod well_known {
	//! Named constants for the well-known gQUIC tags (§3, §8).
	pub const PRST: &[u8; 4] = b"PRST";
	pub const RNON: &[u8; 4] = b"RNON";
	pub const RSEQ: &[u8; 4] = b"RSEQ";
	pub const CADR: &[u8; 4] = b"CADR";
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuicTag {
	pub name: [u8; 4],
	entries: Vec<([u8; 4], Vec<u8>)>,
}

impl QuicTag {
	pub fn new(name: [u8; 4]) -> Self {
		Self { name, entries: Vec::new() }
	}

	/// Inserts or replaces an entry, keeping `entries` sorted by the tag's big-endian
	/// numeric value (spec §3: "Tags are ordered in an encoded tag-map in ascending
	/// numeric order").
	pub fn insert(&mut self, key: [u8; 4], value: Vec<u8>) -> &mut Self {
		let v = tag_value(&key);
		match self.entries.binary_search_by_key(&v, |(k, _)| tag_value(k)) {
			Ok(idx) => self.entries[idx].1 = value,
			Err(idx) => self.entries.insert(idx, (key, value)),
		}
		self
	}

	pub fn get(&self, key: &[u8; 4]) -> Option<&[u8]> {
		let v = tag_value(key);
		self.entries.binary_search_by_key(&v, |(k, _)| tag_value(k)).ok().map(|idx| self.entries[idx].1.as_slice())
	}

	pub fn require(&self, key: &[u8; 4]) -> Result<&[u8]> {
		self.get(key).ok_or_else(|| proto_warn!(ErrorCode::InvalidFrameData, "QuicTag {:?} missing required key {:?}", self.name, key))
	}

	pub fn decode(r: &mut Reader) -> Result<Self> {
		let name_bytes = r.walk(4)?;
		let mut name = [0u8; 4];
		name.copy_from_slice(name_bytes);

		let count = r.u16_be()? as usize;
		r.walk(2)?; // 2 bytes of padding after the entry count

		let mut headers = Vec::with_capacity(count);
		let mut last_key: Option<u32> = None;

		for _ in 0..count {
			let key_bytes = r.walk(4)?;
			let mut key = [0u8; 4];
			key.copy_from_slice(key_bytes);

			let end_offset = r.u32_le()? as usize;

			let numeric = tag_value(&key);
			if let Some(prev) = last_key {
				if numeric <= prev {
					return Err(proto_warn!(ErrorCode::InvalidFrameData, "QuicTag keys out of ascending order"));
				}
			}
			last_key = Some(numeric);

			headers.push((key, end_offset));
		}

		let values_start = r.position();
		let mut entries = Vec::with_capacity(count);
		let mut prev_end = 0usize;

		for (key, end_offset) in headers {
			if end_offset < prev_end {
				return Err(proto_warn!(ErrorCode::InvalidFrameData, "QuicTag value end-offsets not monotonic"));
			}
			let len = end_offset - prev_end;
			let value = r.walk(len)?.to_vec();
			entries.push((key, value));
			prev_end = end_offset;
		}

		debug_assert_eq!(r.position(), values_start + prev_end);

		Ok(Self { name, entries })
	}

	pub fn encode(&self, w: &mut Writer) {
		w.push_bytes(&self.name);
		w.u16_be(self.entries.len() as u16);
		w.push_bytes(&[0, 0]);

		let mut cumulative = 0u32;
		for (key, value) in &self.entries {
			w.push_bytes(key);
			cumulative += value.len() as u32;
			w.u32_le(cumulative);
		}

		for (_, value) in &self.entries {
			w.push_bytes(value);
		}
	}
}
