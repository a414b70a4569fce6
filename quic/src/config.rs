//! Tunable constants (spec §4.2, §4.6, §6): named consts for the protocol-fixed values,
//! a `Config` struct for the handful an embedder might reasonably override.

use std::time::Duration;

/// Default stream-level receive window (spec §4.2: "Initial send and receive offsets
/// both = 16 KiB").
pub const INITIAL_STREAM_WINDOW: u64 = 16 * 1024;
/// Default connection-level receive window, same initial value as a stream's.
pub const INITIAL_CONNECTION_WINDOW: u64 = 16 * 1024;

pub const SERVER_STREAM_WINDOW_LIMIT: u64 = 1024 * 1024;
pub const SERVER_CONNECTION_WINDOW_LIMIT: u64 = 1024 * 1024 + 512 * 1024;
pub const CLIENT_STREAM_WINDOW_LIMIT: u64 = 6 * 1024 * 1024;
pub const CLIENT_CONNECTION_WINDOW_LIMIT: u64 = 15 * 1024 * 1024;

/// Connection window limit is this multiple of the stream window limit when growing.
pub const CONNECTION_WINDOW_MULTIPLIER: f64 = 1.5;
/// Fraction of the window remaining below which a WINDOW_UPDATE is due (spec §4.2).
pub const WINDOW_UPDATE_THRESHOLD: f64 = 0.25;

/// Outbound packet size ceilings (spec §6).
pub const MAX_PACKET_SIZE_IPV4: usize = 1252;
pub const MAX_PACKET_SIZE_IPV6: usize = 1232;
/// Inbound datagrams past this size are logged and dropped without parsing (spec §6).
pub const MAX_RECEIVE_PACKET_SIZE: usize = 1452;
/// Minimum size a connection's first outbound packet is padded up to when
/// `Config::pad_first_packet` is set, matching gQUIC's amplification-limiting convention.
pub const MIN_FIRST_PACKET_SIZE: usize = 1024;

/// Default cap on concurrently open streams per session (spec §7: "too many open
/// streams" is a protocol violation that closes the session/stream with
/// `QUIC_TOO_MANY_OPEN_STREAMS").
pub const MAX_CONCURRENT_STREAMS: usize = 100;

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const PING_IDLE_THRESHOLD: Duration = Duration::from_secs(15);
pub const INTERVAL_CHECK_MIN: Duration = Duration::from_millis(500);
pub const INTERVAL_CHECK_MAX: Duration = Duration::from_secs(1);
pub const SERVER_INTERVAL_CHECK: Duration = Duration::from_secs(1);

/// EWMA smoothing factor for the RTT estimator (spec §4.4).
pub const RTT_ALPHA: f64 = 0.25;
pub const RTT_INITIAL_US: u64 = 1000;
/// Outlier dampening factor applied when a sample exceeds twice the latest RTT.
pub const RTT_OUTLIER_DAMPING: f64 = 0.618;

/// Per-role, per-scope window defaults and limits, bundled for construction (spec §4.2:
/// "Defaults"). An embedder who wants different limits builds one of these directly
/// rather than threading overrides through every flow controller constructor.
#[derive(Clone, Copy, Debug)]
pub struct FlowControlLimits {
	pub initial_window: u64,
	pub window_limit: u64,
}

impl FlowControlLimits {
	pub const fn server_stream() -> Self {
		Self { initial_window: INITIAL_STREAM_WINDOW, window_limit: SERVER_STREAM_WINDOW_LIMIT }
	}

	pub const fn server_connection() -> Self {
		Self { initial_window: INITIAL_CONNECTION_WINDOW, window_limit: SERVER_CONNECTION_WINDOW_LIMIT }
	}

	pub const fn client_stream() -> Self {
		Self { initial_window: INITIAL_STREAM_WINDOW, window_limit: CLIENT_STREAM_WINDOW_LIMIT }
	}

	pub const fn client_connection() -> Self {
		Self { initial_window: INITIAL_CONNECTION_WINDOW, window_limit: CLIENT_CONNECTION_WINDOW_LIMIT }
	}
}

/// Session-wide timing configuration, with protocol-standard defaults (§4.6, §6).
#[derive(Clone, Copy, Debug)]
pub struct Config {
	pub idle_timeout: Duration,
	pub handshake_timeout: Duration,
	pub ping_idle_threshold: Duration,
	pub interval_check_min: Duration,
	pub interval_check_max: Duration,
	/// Pads a connection's first outbound packet up to `MIN_FIRST_PACKET_SIZE` (see spec
	/// §9 REDESIGN FLAGS). Off by default since spec.md does not require it.
	pub pad_first_packet: bool,
	/// Cap on concurrently open streams, local and remote combined (spec §7).
	pub max_concurrent_streams: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			idle_timeout: IDLE_TIMEOUT,
			handshake_timeout: HANDSHAKE_TIMEOUT,
			ping_idle_threshold: PING_IDLE_THRESHOLD,
			interval_check_min: INTERVAL_CHECK_MIN,
			interval_check_max: INTERVAL_CHECK_MAX,
			pad_first_packet: false,
			max_concurrent_streams: MAX_CONCURRENT_STREAMS,
		}
	}
}
