//! Smoothed RTT estimator (spec §4.4): a single EWMA with outlier dampening, used by
//! flow-control auto-tuning (spec §4.2) and retransmission scheduling (spec §4.6).

use std::time::Duration;

use crate::config::{RTT_ALPHA, RTT_INITIAL_US, RTT_OUTLIER_DAMPING};

pub struct RttEstimator {
	smoothed_us: f64,
	latest_us: u64,
	min_us: Option<u64>,
}

impl Default for RttEstimator {
	fn default() -> Self {
		Self::new()
	}
}

impl RttEstimator {
	pub fn new() -> Self {
		Self { smoothed_us: RTT_INITIAL_US as f64, latest_us: RTT_INITIAL_US, min_us: None }
	}

	/// Feeds one (sendTime, receiveTime, ackDelay) sample (spec §4.4). `ack_delay` is in
	/// microseconds, already decoded from UFloat16.
	pub fn update(&mut self, send_to_recv: Duration, ack_delay_us: u64) {
		let raw_us = send_to_recv.as_micros() as i128 - ack_delay_us as i128;
		let raw_us = raw_us.max(0) as u64;

		let sample_us = if raw_us as f64 > 2.0 * self.latest_us as f64 {
			(RTT_OUTLIER_DAMPING * raw_us as f64).ceil() as u64
		} else {
			raw_us
		};

		self.latest_us = sample_us;
		self.min_us = Some(self.min_us.map_or(sample_us, |m| m.min(sample_us)));

		self.smoothed_us = (RTT_ALPHA * sample_us as f64 + (1.0 - RTT_ALPHA) * self.smoothed_us).ceil();
	}

	pub fn smoothed(&self) -> Duration {
		Duration::from_micros(self.smoothed_us as u64)
	}

	pub fn min(&self) -> Duration {
		Duration::from_micros(self.min_us.unwrap_or(RTT_INITIAL_US))
	}

	/// Millisecond-granularity smoothed RTT, used by flow-control auto-tuning (spec §4.4).
	pub fn smoothed_ms(&self) -> u64 {
		self.smoothed_us as u64 / 1000
	}
}
