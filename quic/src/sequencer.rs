//! Per-stream reassembly buffer (spec §4.3): accepts STREAM frames in arbitrary offset
//! order and exposes the contiguous byte prefix as it becomes available.

use std::collections::BTreeMap;

use crate::error::{proto_err, ErrorCode, Result};

struct Pending {
	offset: u64,
	data: Vec<u8>,
}

/// Buffers out-of-order STREAM frame payloads and releases them in offset order.
pub struct Sequencer {
	pending: BTreeMap<u64, Pending>,
	consumed_offset: u64,
	final_offset: Option<u64>,
	byte_len: u64,
}

impl Default for Sequencer {
	fn default() -> Self {
		Self::new()
	}
}

impl Sequencer {
	pub fn new() -> Self {
		Self { pending: BTreeMap::new(), consumed_offset: 0, final_offset: None, byte_len: 0 }
	}

	pub fn consumed_offset(&self) -> u64 {
		self.consumed_offset
	}

	pub fn byte_len(&self) -> u64 {
		self.byte_len
	}

	/// Already delivered, or already buffered — a peer resending the same bytes is not an
	/// error on its own, but an *overlapping* resend is (spec §4.3: "the peer MUST NOT
	/// overlap").
	pub fn has_offset(&self, offset: u64) -> bool {
		offset < self.consumed_offset || self.pending.contains_key(&offset)
	}

	/// Inserts a frame's payload at `offset`. Rejects a payload that overlaps an already
	/// buffered or already delivered range (spec §4.3, §8).
	pub fn push(&mut self, offset: u64, data: Vec<u8>) -> Result<()> {
		if data.is_empty() {
			return Ok(());
		}

		let end = offset + data.len() as u64;

		if offset < self.consumed_offset {
			if end <= self.consumed_offset {
				return Ok(()); // fully-delivered duplicate, harmless
			}
			return Err(proto_err!(ErrorCode::OverlappingStreamData, "frame at {offset}..{end} overlaps already-consumed prefix at {}", self.consumed_offset));
		}

		if let Some((&prev_offset, prev)) = self.pending.range(..=offset).next_back() {
			let prev_end = prev_offset + prev.data.len() as u64;
			if prev_end > offset && prev_offset != offset {
				return Err(proto_err!(ErrorCode::OverlappingStreamData, "frame at {offset}..{end} overlaps pending range at {prev_offset}..{prev_end}"));
			}
		}
		if let Some((&next_offset, _)) = self.pending.range(offset + 1..).next() {
			if next_offset < end {
				return Err(proto_err!(ErrorCode::OverlappingStreamData, "frame at {offset}..{end} overlaps pending range starting at {next_offset}"));
			}
		}

		if self.pending.contains_key(&offset) {
			return Ok(()); // exact duplicate
		}

		self.byte_len += data.len() as u64;
		self.pending.insert(offset, Pending { offset, data });
		Ok(())
	}

	/// Pops the next contiguous chunk, if the lowest-offset pending frame starts exactly
	/// at `consumedOffset`. Returns `None` when there's a gap.
	pub fn read(&mut self) -> Option<Vec<u8>> {
		let (&offset, _) = self.pending.iter().next()?;
		if offset != self.consumed_offset {
			return None;
		}
		let entry = self.pending.remove(&offset).expect("just matched");
		self.consumed_offset += entry.data.len() as u64;
		self.byte_len -= entry.data.len() as u64;
		Some(entry.data)
	}

	pub fn set_final_offset(&mut self, offset: u64) {
		self.final_offset = Some(offset);
	}

	pub fn final_offset(&self) -> Option<u64> {
		self.final_offset
	}

	/// True once every byte up to the FIN's offset has been delivered (spec §4.3).
	pub fn is_fin(&self) -> bool {
		self.final_offset == Some(self.consumed_offset)
	}

	pub fn reset(&mut self) {
		self.pending.clear();
		self.consumed_offset = 0;
		self.final_offset = None;
		self.byte_len = 0;
	}
}
