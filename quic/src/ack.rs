//! ACK aggregation and retransmission bookkeeping (spec §4.6, §9). The source's
//! `ACKHandler.ack()` is a stub (spec §9's "ACK aggregation placeholder"); this module is
//! the full range-merge and timestamp-adjacent logic the design note calls for.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::wire::frame::{AckFrame, AckRange};
use crate::wire::ids::PacketNumber;

/// Tracks packet numbers received from the peer as a merged, descending range set, ready
/// to be serialized into an ACK frame (spec §4.6: "accumulate an ack-range set by
/// inserting the new packet number and merging with adjacent ranges").
#[derive(Default)]
pub struct AckHandler {
	ranges: Vec<AckRange>,
	largest_received: Option<u64>,
	pending: bool,
}

impl AckHandler {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn largest_received(&self) -> Option<u64> {
		self.largest_received
	}

	pub fn has_pending_ack(&self) -> bool {
		self.pending
	}

	/// Inserts `pn`, merging with an adjacent range on either side (spec §4.6). Ranges are
	/// kept descending by `last`; `idx` is the index of the first range at or below `pn`,
	/// so `ranges[idx - 1]` (if any) is the nearest range above `pn` and `ranges[idx]` (if
	/// any) is the nearest range below it.
	pub fn record(&mut self, pn: u64) {
		self.largest_received = Some(self.largest_received.map_or(pn, |l| l.max(pn)));
		self.pending = true;

		let idx = self.ranges.partition_point(|r| r.last > pn);

		if idx < self.ranges.len() && self.ranges[idx].first <= pn && pn <= self.ranges[idx].last {
			return; // already covered
		}

		let merges_above = idx > 0 && self.ranges[idx - 1].first == pn + 1;
		let merges_below = idx < self.ranges.len() && self.ranges[idx].last + 1 == pn;

		match (merges_above, merges_below) {
			(true, true) => {
				let below = self.ranges.remove(idx);
				self.ranges[idx - 1].first = below.first;
			}
			(true, false) => {
				self.ranges[idx - 1].first = pn;
			}
			(false, true) => {
				self.ranges[idx].last = pn;
			}
			(false, false) => {
				self.ranges.insert(idx, AckRange { first: pn, last: pn });
			}
		}
	}

	/// Builds the outbound ACK frame and clears the pending flag (spec §4.6: "on a timer,
	/// emit an ACK frame encoding the range set largest-first").
	pub fn build_frame(&mut self, delay_us: u64) -> Option<AckFrame> {
		let largest = self.largest_received?;
		self.pending = false;
		Some(AckFrame { largest_acked: PacketNumber(largest), delay_us, ranges: self.ranges.clone(), num_timestamps: 0 })
	}
}

pub struct SentPacket {
	pub sent_at: Instant,
	pub frames: Vec<crate::wire::frame::Frame>,
}

/// Packets sent but not yet acked, keyed by packet number (spec §4.6, §3: "unacked
/// packets queue").
#[derive(Default)]
pub struct UnackedQueue {
	packets: BTreeMap<u64, SentPacket>,
}

impl UnackedQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, pn: u64, frames: Vec<crate::wire::frame::Frame>, now: Instant) {
		self.packets.insert(pn, SentPacket { sent_at: now, frames });
	}

	pub fn is_empty(&self) -> bool {
		self.packets.is_empty()
	}

	pub fn clear(&mut self) {
		self.packets.clear();
	}

	fn is_covered(ranges: &[AckRange], pn: u64) -> bool {
		ranges.iter().any(|r| r.first <= pn && pn <= r.last)
	}

	/// Applies an incoming ACK: removes every acked packet number (returning its send time
	/// for the RTT estimator) and collects the frames of unacked packets older than the
	/// ACK's largest-acked but not covered by any of its ranges, for retransmission
	/// (spec §4.6).
	pub fn process_ack(&mut self, ack: &AckFrame) -> (Vec<Instant>, Vec<crate::wire::frame::Frame>) {
		let mut acked_send_times = Vec::new();
		let mut to_retransmit = Vec::new();

		let largest = ack.largest_acked.0;
		let lowest = ack.lowest_acked();

		let below_largest: Vec<u64> = self.packets.range(..=largest).map(|(&pn, _)| pn).collect();

		for pn in below_largest {
			let covered = Self::is_covered(&ack.ranges, pn);
			if covered {
				if let Some(sent) = self.packets.remove(&pn) {
					acked_send_times.push(sent.sent_at);
				}
			} else if pn < lowest {
				if let Some(sent) = self.packets.remove(&pn) {
					to_retransmit.extend(sent.frames);
				}
			}
		}

		(acked_send_times, to_retransmit)
	}
}
