//! Error taxonomy for the engine (spec §7) plus the two numeric error-code
//! registries (connection-level and stream-level) referenced throughout §3/§4/§6.

use core::fmt;

/// Connection-level error codes. Unknown wire values decode to `Other`, preserving the
/// raw number (spec §6: "decoding an unknown code yields an INVALID_ERROR_CODE sentinel
/// with the numeric value preserved").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorCode {
	NoError,
	InvalidPacketHeader,
	InvalidFrameData,
	InvalidStreamData,
	InvalidAckData,
	InvalidVersion,
	VersionNegotiationMismatch,
	OverlappingStreamData,
	FlowControlReceivedTooMuchData,
	NetworkIdleTimeout,
	HandshakeTimeout,
	PublicReset,
	RstAcknowledgement,
	TooManyOpenStreams,
	LastError,
	Other(u32),
}

impl ErrorCode {
	pub const LAST_ERROR_VALUE: u32 = 98;

	pub fn to_wire(self) -> u32 {
		match self {
			ErrorCode::NoError => 0,
			ErrorCode::InvalidPacketHeader => 3,
			ErrorCode::InvalidFrameData => 4,
			ErrorCode::InvalidStreamData => 46,
			ErrorCode::InvalidAckData => 7,
			ErrorCode::InvalidVersion => 20,
			ErrorCode::VersionNegotiationMismatch => 55,
			ErrorCode::OverlappingStreamData => 87,
			ErrorCode::FlowControlReceivedTooMuchData => 41,
			ErrorCode::NetworkIdleTimeout => 25,
			ErrorCode::HandshakeTimeout => 67,
			ErrorCode::PublicReset => 19,
			ErrorCode::RstAcknowledgement => 35,
			ErrorCode::TooManyOpenStreams => 68,
			ErrorCode::LastError => Self::LAST_ERROR_VALUE,
			ErrorCode::Other(v) => v,
		}
	}

	pub fn from_wire(v: u32) -> Self {
		match v {
			0 => ErrorCode::NoError,
			3 => ErrorCode::InvalidPacketHeader,
			4 => ErrorCode::InvalidFrameData,
			46 => ErrorCode::InvalidStreamData,
			7 => ErrorCode::InvalidAckData,
			20 => ErrorCode::InvalidVersion,
			55 => ErrorCode::VersionNegotiationMismatch,
			87 => ErrorCode::OverlappingStreamData,
			41 => ErrorCode::FlowControlReceivedTooMuchData,
			25 => ErrorCode::NetworkIdleTimeout,
			67 => ErrorCode::HandshakeTimeout,
			19 => ErrorCode::PublicReset,
			35 => ErrorCode::RstAcknowledgement,
			68 => ErrorCode::TooManyOpenStreams,
			Self::LAST_ERROR_VALUE => ErrorCode::LastError,
			other => ErrorCode::Other(other),
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?} ({})", self, self.to_wire())
	}
}

/// Stream-level error codes (spec §6: QUIC_STREAM_NO_ERROR=0 .. QUIC_STREAM_LAST_ERROR=16).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StreamErrorCode {
	NoError,
	Cancelled,
	FlowControlError,
	RstAcknowledgement,
	LastError,
	Other(u32),
}

impl StreamErrorCode {
	pub const LAST_ERROR_VALUE: u32 = 16;

	pub fn to_wire(self) -> u32 {
		match self {
			StreamErrorCode::NoError => 0,
			StreamErrorCode::Cancelled => 6,
			StreamErrorCode::FlowControlError => 9,
			StreamErrorCode::RstAcknowledgement => 12,
			StreamErrorCode::LastError => Self::LAST_ERROR_VALUE,
			StreamErrorCode::Other(v) => v,
		}
	}

	pub fn from_wire(v: u32) -> Self {
		match v {
			0 => StreamErrorCode::NoError,
			6 => StreamErrorCode::Cancelled,
			9 => StreamErrorCode::FlowControlError,
			12 => StreamErrorCode::RstAcknowledgement,
			Self::LAST_ERROR_VALUE => StreamErrorCode::LastError,
			other => StreamErrorCode::Other(other),
		}
	}
}

/// What stage of the pipeline raised the error; distinguishes framing failures (drop the
/// datagram, spec §7) from protocol violations (close with a specific code).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Kind {
	/// Malformed public header, frame, or length overflow encountered while decoding.
	Codec,
	/// A protocol-level violation once the packet was successfully decoded.
	Protocol,
	/// The underlying transport failed (send/receive/bind).
	Transport,
}

#[derive(Clone, Debug)]
pub struct QuicError {
	pub kind: Kind,
	pub code: ErrorCode,
	pub reason: Option<String>,
}

impl QuicError {
	pub fn new(kind: Kind, code: ErrorCode) -> Self {
		Self { kind, code, reason: None }
	}

	pub fn with_reason(kind: Kind, code: ErrorCode, reason: impl Into<String>) -> Self {
		Self { kind, code, reason: Some(reason.into()) }
	}
}

impl fmt::Display for QuicError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.reason {
			Some(r) => write!(f, "{:?}: {} ({r})", self.kind, self.code),
			None => write!(f, "{:?}: {}", self.kind, self.code),
		}
	}
}

pub type Result<T = ()> = core::result::Result<T, QuicError>;

/// Logs at `warn` and produces a `Codec`-kind error: a `warn!(...)`-evaluates-to-the-error
/// idiom that carries a real error code instead of `()`.
macro_rules! proto_warn {
	($code:expr, $($arg:tt)*) => {{
		log::warn!($($arg)*);
		$crate::error::QuicError::new($crate::error::Kind::Codec, $code)
	}};
}

/// Logs at `error` and produces a `Protocol`-kind error.
macro_rules! proto_err {
	($code:expr, $($arg:tt)*) => {{
		log::error!($($arg)*);
		$crate::error::QuicError::new($crate::error::Kind::Protocol, $code)
	}};
}

pub(crate) use proto_err;
pub(crate) use proto_warn;
