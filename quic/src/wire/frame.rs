//! The fourteen frame types (spec §3, §4.1). Each variant owns its own `byte_len` (where
//! fixed), `encode`, and `decode`; `Frame::decode` dispatches on the first byte, which is a
//! bit-packed discriminant for ACK and STREAM rather than a flat enum tag.

use crate::error::{proto_err, proto_warn, ErrorCode, Result, StreamErrorCode};
use crate::wire::cursor::{Reader, Writer};
use crate::wire::ids::{Offset, PacketNumber, StreamId};

const TYPE_PADDING: u8 = 0x00;
const TYPE_RST_STREAM: u8 = 0x01;
const TYPE_CONNECTION_CLOSE: u8 = 0x02;
const TYPE_GOAWAY: u8 = 0x03;
const TYPE_WINDOW_UPDATE: u8 = 0x04;
const TYPE_BLOCKED: u8 = 0x05;
const TYPE_STOP_WAITING: u8 = 0x06;
const TYPE_PING: u8 = 0x07;

/// A single ACK range, inclusive on both ends, as reconstructed from the wire's
/// largest-first gap encoding (spec §4.1).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AckRange {
	pub first: u64,
	pub last: u64,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AckFrame {
	pub largest_acked: PacketNumber,
	/// Ack delay, already decoded from UFloat16 into microseconds.
	pub delay_us: u64,
	/// Descending by `first`, non-overlapping (spec §8: "ACK range validity").
	pub ranges: Vec<AckRange>,
	/// Parsed but semantically uninterpreted (spec §4.1: "OPTIONAL").
	pub num_timestamps: u8,
}

impl AckFrame {
	pub fn lowest_acked(&self) -> u64 {
		self.ranges.last().map(|r| r.first).unwrap_or(self.largest_acked.0)
	}
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StreamFrame {
	pub stream_id: StreamId,
	pub offset: Offset,
	pub fin: bool,
	pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Frame {
	Padding(usize),
	RstStream { stream_id: StreamId, final_offset: Offset, error_code: StreamErrorCode },
	ConnectionClose { error_code: ErrorCode, reason: String },
	GoAway { error_code: ErrorCode, last_good_stream_id: StreamId, reason: String },
	WindowUpdate { stream_id: StreamId, byte_offset: Offset },
	Blocked { stream_id: StreamId },
	/// The raw wire delta (header packet number − least-unacked). Resolving this to an
	/// actual watermark requires the enclosing packet's number, which the decoder doesn't
	/// have in scope (spec §4.1) — callers subtract it from the header packet number.
	StopWaiting { delta: u64, delta_len: usize },
	Ping,
	CongestionFeedback,
	Ack(AckFrame),
	Stream(StreamFrame),
}

impl Frame {
	/// Decodes one frame from `r`. `packet_number_len` is the enclosing packet's packet
	/// number width in bytes, needed to size STOP_WAITING's delta (spec §4.1).
	pub fn decode(r: &mut Reader, packet_number_len: usize) -> Result<Self> {
		let ty = r.peek_u8()?;

		if ty & 0x80 != 0 {
			return Self::decode_stream(r);
		}
		if ty & 0x40 != 0 {
			return Self::decode_ack(r);
		}
		if ty & 0x20 != 0 {
			r.u8()?;
			return Ok(Frame::CongestionFeedback);
		}

		r.u8()?;
		match ty {
			TYPE_PADDING => {
				let n = r.remaining();
				r.walk(n)?;
				Ok(Frame::Padding(n + 1))
			}
			TYPE_RST_STREAM => {
				let stream_id = StreamId::decode(r, 4)?;
				let final_offset = Offset::decode(r, 8)?;
				let error_code = StreamErrorCode::from_wire(r.u32_le()?);
				Ok(Frame::RstStream { stream_id, final_offset, error_code })
			}
			TYPE_CONNECTION_CLOSE => {
				let error_code = ErrorCode::from_wire(r.u32_le()?);
				let reason = decode_reason(r)?;
				Ok(Frame::ConnectionClose { error_code, reason })
			}
			TYPE_GOAWAY => {
				let error_code = ErrorCode::from_wire(r.u32_le()?);
				let last_good_stream_id = StreamId::decode(r, 4)?;
				let reason = decode_reason(r)?;
				Ok(Frame::GoAway { error_code, last_good_stream_id, reason })
			}
			TYPE_WINDOW_UPDATE => {
				let stream_id = StreamId::decode(r, 4)?;
				let byte_offset = Offset::decode(r, 8)?;
				Ok(Frame::WindowUpdate { stream_id, byte_offset })
			}
			TYPE_BLOCKED => {
				let stream_id = StreamId::decode(r, 4)?;
				Ok(Frame::Blocked { stream_id })
			}
			TYPE_STOP_WAITING => {
				let delta = r.uint_be(packet_number_len)?;
				Ok(Frame::StopWaiting { delta, delta_len: packet_number_len })
			}
			TYPE_PING => Ok(Frame::Ping),
			other => Err(proto_warn!(ErrorCode::InvalidFrameData, "unknown frame type byte 0x{other:02x}")),
		}
	}

	fn decode_ack(r: &mut Reader) -> Result<Self> {
		let ty = r.u8()?;
		let has_ranges = ty & 0x20 != 0;
		let largest_acked_len = PacketNumber::flag_to_byte_len((ty >> 2) & 0b11);
		let missing_delta_len = PacketNumber::flag_to_byte_len(ty & 0b11);

		let largest_acked = PacketNumber::decode(r, largest_acked_len)?;
		let delay_raw = r.u16_be()?;
		let delay_us = crate::wire::ufloat::read(delay_raw);

		let mut ranges = Vec::new();

		if has_ranges {
			let num_blocks = r.u8()? as usize + 1;
			let first_block_len = r.uint_be(missing_delta_len)?;

			let mut last = largest_acked.0;
			let first = last
				.checked_sub(first_block_len.saturating_sub(1))
				.ok_or_else(|| proto_warn!(ErrorCode::InvalidAckData, "ACK first block underflows largest-acked"))?;
			ranges.push(AckRange { first, last });
			last = first;

			for _ in 1..num_blocks {
				let gap = r.u8()? as u64;
				let block_len = r.uint_be(missing_delta_len)?;

				last = last
					.checked_sub(gap + 1)
					.ok_or_else(|| proto_warn!(ErrorCode::InvalidAckData, "ACK gap underflows packet number space"))?;

				if block_len == 0 {
					// A synthetic full-gap block (spec §4.1: "emitted as a run of full-gap
					// synthetic blocks with block-length=0"); no range, just consumes the gap.
					continue;
				}

				let first = last
					.checked_sub(block_len - 1)
					.ok_or_else(|| proto_warn!(ErrorCode::InvalidAckData, "ACK block underflows packet number space"))?;
				ranges.push(AckRange { first, last });
				last = first;
			}
		} else {
			ranges.push(AckRange { first: largest_acked.0, last: largest_acked.0 });
		}

		for w in ranges.windows(2) {
			if w[0].first <= w[1].last {
				return Err(proto_warn!(ErrorCode::InvalidAckData, "ACK ranges not strictly descending/non-overlapping"));
			}
		}

		let num_timestamps = r.u8()?;
		if num_timestamps > 0 {
			// Each timestamp entry is (delta-from-largest:1, time:4 LE); first entry has no
			// preceding gap byte. Interpretation is optional (spec §4.1) — skip the bytes.
			r.walk(1 + 4)?;
			for _ in 1..num_timestamps {
				r.walk(1 + 2)?;
			}
		}

		Ok(Frame::Ack(AckFrame { largest_acked, delay_us, ranges, num_timestamps }))
	}

	fn decode_stream(r: &mut Reader) -> Result<Self> {
		let ty = r.u8()?;
		let fin = ty & 0x40 != 0;
		let data_len_present = ty & 0x20 != 0;
		let offset_len = Offset::byte_len_for_flag((ty >> 2) & 0b111);
		let stream_id_len = StreamId::flag_to_byte_len(ty & 0b11);

		let stream_id = StreamId::decode(r, stream_id_len)?;
		let offset = Offset::decode(r, offset_len)?;

		let data = if data_len_present {
			let len = r.u16_be()? as usize;
			if len > r.remaining() {
				return Err(proto_warn!(ErrorCode::InvalidStreamData, "STREAM frame declares {len} bytes but only {} remain", r.remaining()));
			}
			r.walk(len)?.to_vec()
		} else {
			r.walk(r.remaining())?.to_vec()
		};

		if data.is_empty() && !fin {
			return Err(proto_err!(ErrorCode::InvalidStreamData, "STREAM frame carries neither data nor FIN"));
		}

		Ok(Frame::Stream(StreamFrame { stream_id, offset, fin, data }))
	}

	pub fn encode(&self, w: &mut Writer) {
		match self {
			Frame::Padding(len) => {
				w.u8(TYPE_PADDING);
				w.push_bytes(&vec![0u8; len.saturating_sub(1)]);
			}
			Frame::RstStream { stream_id, final_offset, error_code } => {
				w.u8(TYPE_RST_STREAM);
				stream_id.encode(w);
				final_offset.encode(w);
				w.u32_le(error_code.to_wire());
			}
			Frame::ConnectionClose { error_code, reason } => {
				w.u8(TYPE_CONNECTION_CLOSE);
				w.u32_le(error_code.to_wire());
				encode_reason(w, reason);
			}
			Frame::GoAway { error_code, last_good_stream_id, reason } => {
				w.u8(TYPE_GOAWAY);
				w.u32_le(error_code.to_wire());
				last_good_stream_id.encode(w);
				encode_reason(w, reason);
			}
			Frame::WindowUpdate { stream_id, byte_offset } => {
				w.u8(TYPE_WINDOW_UPDATE);
				stream_id.encode(w);
				w.uint_be(byte_offset.0, 8);
			}
			Frame::Blocked { stream_id } => {
				w.u8(TYPE_BLOCKED);
				stream_id.encode(w);
			}
			Frame::StopWaiting { delta, delta_len } => {
				w.u8(TYPE_STOP_WAITING);
				w.uint_be(*delta, *delta_len);
			}
			Frame::Ping => {
				w.u8(TYPE_PING);
			}
			Frame::CongestionFeedback => {
				w.u8(0b0010_0000);
			}
			Frame::Ack(ack) => encode_ack(w, ack),
			Frame::Stream(frame) => encode_stream(w, frame, true),
		}
	}
}

fn decode_reason(r: &mut Reader) -> Result<String> {
	let len = r.u16_be()? as usize;
	let bytes = r.walk(len)?;
	String::from_utf8(bytes.to_vec()).map_err(|_| proto_warn!(ErrorCode::InvalidFrameData, "reason phrase is not valid UTF-8"))
}

fn encode_reason(w: &mut Writer, reason: &str) {
	let bytes = reason.as_bytes();
	w.u16_be(bytes.len() as u16);
	w.push_bytes(bytes);
}

fn encode_ack(w: &mut Writer, ack: &AckFrame) {
	let largest_len = ack.largest_acked.byte_len();
	let missing_len = ack
		.ranges
		.iter()
		.map(|r| PacketNumber(r.last - r.first + 1).byte_len())
		.chain(std::iter::once(1usize))
		.max()
		.unwrap();

	let largest_flag = ack.largest_acked.flag_bits();
	let missing_flag = PacketNumber(missing_len as u64).flag_bits();
	let has_ranges = ack.ranges.len() > 1;

	let ty = 0b0100_0000 | if has_ranges { 0b0010_0000 } else { 0 } | (largest_flag << 2) | missing_flag;
	w.u8(ty);

	w.uint_be(ack.largest_acked.0, largest_len);
	w.u16_be(crate::wire::ufloat::write(ack.delay_us));

	if has_ranges {
		let first = &ack.ranges[0];

		// Expand any gap of >=256 unacked packets into a run of full-gap synthetic blocks
		// (gap=255, length=0) before the final block carrying the residual gap and the
		// real block length (spec §4.1), mirroring decode_ack's synthetic-block loop.
		let mut blocks: Vec<(u8, u64)> = Vec::new();
		let mut prev_first = first.first;
		for range in &ack.ranges[1..] {
			let mut gap = prev_first - range.last - 1;
			while gap >= 256 {
				blocks.push((255, 0));
				gap -= 256;
			}
			blocks.push((gap as u8, range.last - range.first + 1));
			prev_first = range.first;
		}

		w.u8(blocks.len() as u8);
		w.uint_be(first.last - first.first + 1, missing_len);

		for (gap, block_len) in blocks {
			w.u8(gap);
			w.uint_be(block_len, missing_len);
		}
	}

	w.u8(ack.num_timestamps);
}

fn encode_stream(w: &mut Writer, frame: &StreamFrame, with_length: bool) {
	let offset_flag = frame.offset.flag_bits();
	let stream_flag = frame.stream_id.flag_bits();

	let ty = 0b1000_0000
		| if frame.fin { 0b0100_0000 } else { 0 }
		| if with_length { 0b0010_0000 } else { 0 }
		| (offset_flag << 2)
		| stream_flag;
	w.u8(ty);

	frame.stream_id.encode(w);
	frame.offset.encode(w);

	if with_length {
		w.u16_be(frame.data.len() as u16);
	}
	w.push_bytes(&frame.data);
}

#[cfg(test)]
mod tests {
	use super::*;

	fn roundtrip(frame: Frame, packet_number_len: usize) -> Frame {
		let mut w = Writer::new();
		frame.encode(&mut w);
		let bytes = w.into_vec();
		let mut r = Reader::new(&bytes);
		Frame::decode(&mut r, packet_number_len).unwrap()
	}

	#[test]
	fn padding_fills_to_end() {
		let frame = Frame::Padding(5);
		let decoded = roundtrip(frame, 1);
		assert!(matches!(decoded, Frame::Padding(5)));
	}

	#[test]
	fn rst_stream_roundtrip() {
		let frame = Frame::RstStream { stream_id: StreamId(3), final_offset: Offset(9000), error_code: StreamErrorCode::Cancelled };
		assert_eq!(roundtrip(frame.clone(), 1), frame);
	}

	#[test]
	fn connection_close_roundtrip() {
		let frame = Frame::ConnectionClose { error_code: ErrorCode::NetworkIdleTimeout, reason: "idle".to_string() };
		assert_eq!(roundtrip(frame.clone(), 1), frame);
	}

	#[test]
	fn goaway_roundtrip() {
		let frame = Frame::GoAway { error_code: ErrorCode::NoError, last_good_stream_id: StreamId(7), reason: String::new() };
		assert_eq!(roundtrip(frame.clone(), 1), frame);
	}

	#[test]
	fn window_update_and_blocked_roundtrip() {
		let wu = Frame::WindowUpdate { stream_id: StreamId::CONNECTION, byte_offset: Offset(1 << 20) };
		assert_eq!(roundtrip(wu.clone(), 1), wu);

		let blocked = Frame::Blocked { stream_id: StreamId(5) };
		assert_eq!(roundtrip(blocked.clone(), 1), blocked);
	}

	#[test]
	fn ping_and_congestion_feedback() {
		assert_eq!(roundtrip(Frame::Ping, 1), Frame::Ping);
		assert_eq!(roundtrip(Frame::CongestionFeedback, 1), Frame::CongestionFeedback);
	}

	#[test]
	fn stop_waiting_uses_packet_number_width() {
		let frame = Frame::StopWaiting { delta: 5, delta_len: 4 };
		assert_eq!(roundtrip(frame.clone(), 4), frame);
	}

	#[test]
	fn stream_frame_roundtrip_with_data_and_fin() {
		let frame = StreamFrame { stream_id: StreamId(9), offset: Offset(128), fin: true, data: b"hello".to_vec() };
		let decoded = roundtrip(Frame::Stream(frame.clone()), 1);
		assert_eq!(decoded, Frame::Stream(frame));
	}

	#[test]
	fn stream_frame_without_data_or_fin_is_rejected() {
		let frame = StreamFrame { stream_id: StreamId(1), offset: Offset::zero(), fin: false, data: Vec::new() };
		let mut w = Writer::new();
		encode_stream(&mut w, &frame, true);
		let bytes = w.into_vec();
		let mut r = Reader::new(&bytes);
		assert!(Frame::decode(&mut r, 1).is_err());
	}

	#[test]
	fn ack_frame_single_range_roundtrip() {
		let ack = AckFrame { largest_acked: PacketNumber(42), delay_us: 2500, ranges: vec![AckRange { first: 42, last: 42 }], num_timestamps: 0 };
		let decoded = roundtrip(Frame::Ack(ack.clone()), 1);
		match decoded {
			Frame::Ack(got) => {
				assert_eq!(got.largest_acked, ack.largest_acked);
				assert_eq!(got.ranges, ack.ranges);
			}
			other => panic!("expected Ack, got {other:?}"),
		}
	}

	#[test]
	fn ack_frame_multi_range_roundtrip() {
		let ack = AckFrame {
			largest_acked: PacketNumber(100),
			delay_us: 1000,
			ranges: vec![AckRange { first: 95, last: 100 }, AckRange { first: 80, last: 90 }, AckRange { first: 1, last: 10 }],
			num_timestamps: 0,
		};
		let decoded = roundtrip(Frame::Ack(ack.clone()), 1);
		match decoded {
			Frame::Ack(got) => {
				assert_eq!(got.ranges, ack.ranges);
				assert_eq!(got.lowest_acked(), 1);
			}
			other => panic!("expected Ack, got {other:?}"),
		}
	}

	#[test]
	fn unknown_frame_type_is_rejected() {
		let bytes = [0b0001_1000]; // reserved range, not padding/rst/etc, not high-bit frame
		let mut r = Reader::new(&bytes);
		assert!(Frame::decode(&mut r, 1).is_err());
	}
}
