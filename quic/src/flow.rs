//! Flow control (spec §4.2): one controller per connection and one per active stream,
//! the stream controller mirroring every update into its connection controller so the
//! invariant in spec §8 holds — "sum over streams of (written, consumed, highestReceived)
//! equals the connection controller's values" — at every point in time.
//!
//! Ownership follows the session/stream arena decision in spec §9: there is no stored
//! parent pointer here. Callers (`Session`) hold both controllers and pass the connection
//! controller in by `&mut` wherever a stream-level update needs to mirror upward.

use std::time::{Duration, Instant};

use crate::config::FlowControlLimits;
use crate::error::{proto_err, ErrorCode, Result};

#[derive(Debug)]
pub struct FlowController {
	max_send_offset: u64,
	max_receive_offset: u64,
	max_receive_window_size: u64,
	max_receive_window_size_limit: u64,
	written_offset: u64,
	consumed_offset: u64,
	highest_received_offset: u64,
	last_window_update_at: Option<Instant>,
}

impl FlowController {
	pub fn new(limits: FlowControlLimits) -> Self {
		Self {
			max_send_offset: limits.initial_window,
			max_receive_offset: limits.initial_window,
			max_receive_window_size: limits.initial_window,
			max_receive_window_size_limit: limits.window_limit,
			written_offset: 0,
			consumed_offset: 0,
			highest_received_offset: 0,
			last_window_update_at: None,
		}
	}

	pub fn max_receive_offset(&self) -> u64 {
		self.max_receive_offset
	}

	pub fn max_send_offset(&self) -> u64 {
		self.max_send_offset
	}

	pub fn written_offset(&self) -> u64 {
		self.written_offset
	}

	pub fn consumed_offset(&self) -> u64 {
		self.consumed_offset
	}

	pub fn highest_received_offset(&self) -> u64 {
		self.highest_received_offset
	}

	pub fn max_receive_window_size(&self) -> u64 {
		self.max_receive_window_size
	}

	/// Grows send credit on receipt of WINDOW_UPDATE. Returns true on actual growth, which
	/// the caller uses to decide whether a blocked write can now resume (spec §4.2).
	pub fn update_max_send_offset(&mut self, offset: u64) -> bool {
		if offset > self.max_send_offset {
			self.max_send_offset = offset;
			true
		} else {
			false
		}
	}

	/// True once less than half the receive window remains before `maxReceiveOffset`
	/// (spec §4.2).
	pub fn should_update_window(&self) -> bool {
		self.max_receive_offset - self.consumed_offset < self.max_receive_window_size / 2
	}

	/// Auto-tunes the receive window: doubles it (bounded by the configured limit) when
	/// updates are arriving faster than `2 * rtt` apart, then recomputes
	/// `maxReceiveOffset` from the (possibly new) window size (spec §4.2, §8).
	pub fn update_window_offset(&mut self, now: Instant, rtt: Duration) {
		let grows = match self.last_window_update_at {
			Some(last) => now.saturating_duration_since(last) <= rtt * 2,
			None => false,
		};

		if grows && self.max_receive_window_size < self.max_receive_window_size_limit {
			self.max_receive_window_size = (self.max_receive_window_size * 2).min(self.max_receive_window_size_limit);
		}

		self.max_receive_offset = self.consumed_offset + self.max_receive_window_size;
		self.last_window_update_at = Some(now);
	}

	/// Updates the highest offset+length ever observed from the peer, mirroring the delta
	/// into `parent` if this is a stream-scoped controller.
	pub fn update_highest_received(&mut self, offset: u64, parent: Option<&mut FlowController>) {
		if offset <= self.highest_received_offset {
			return;
		}
		let delta = offset - self.highest_received_offset;
		self.highest_received_offset = offset;
		if let Some(parent) = parent {
			parent.highest_received_offset += delta;
		}
	}

	pub fn update_consumed_offset(&mut self, offset: u64, parent: Option<&mut FlowController>) {
		if offset <= self.consumed_offset {
			return;
		}
		let delta = offset - self.consumed_offset;
		self.consumed_offset = offset;
		if let Some(parent) = parent {
			parent.consumed_offset += delta;
		}
	}

	pub fn update_written_offset(&mut self, offset: u64, parent: Option<&mut FlowController>) {
		if offset <= self.written_offset {
			return;
		}
		let delta = offset - self.written_offset;
		self.written_offset = offset;
		if let Some(parent) = parent {
			parent.written_offset += delta;
		}
	}

	/// The peer has sent more than it was credited for: a fatal protocol error
	/// (spec §4.2: QUIC_FLOW_CONTROL_RECEIVED_TOO_MUCH_DATA).
	pub fn check_blocked(&self) -> Result<()> {
		if self.highest_received_offset > self.max_receive_offset {
			return Err(proto_err!(
				ErrorCode::FlowControlReceivedTooMuchData,
				"peer sent {} bytes, credited {}",
				self.highest_received_offset,
				self.max_receive_offset
			));
		}
		Ok(())
	}

	/// True if writing `n` more bytes would exceed the peer-granted send credit.
	pub fn would_block(&self, n: u64) -> bool {
		self.written_offset + n > self.max_send_offset
	}
}
