//! Stream (spec §4.5): a bidirectional byte channel multiplexed within a session.
//!
//! `StreamState` is plain data manipulated by `Session` — there is no separate stakker
//! actor per stream and no stored back-reference to the session. This breaks the cyclic
//! Stream→Session→StreamMap→Stream reference the source has (spec §9): the session's
//! stream table arena-owns every `StreamState`, and an application addresses a stream by
//! the flat pair `(ConnectionId, StreamId)` through the owning `Client`/`Server` actor
//! (quic::endpoint) rather than through a handle that stores a pointer back in.

use std::collections::VecDeque;

use crate::config::FlowControlLimits;
use crate::error::{proto_err, ErrorCode, Result, StreamErrorCode};
use crate::flow::FlowController;
use crate::sequencer::Sequencer;
use crate::wire::frame::{Frame, StreamFrame};
use crate::wire::ids::{Offset, StreamId};

/// Events a stream surfaces upward to its application-facing handle (spec §6: "data",
/// "end", "finish", "error", "close").
#[derive(Debug)]
pub enum StreamEvent {
	Data(Vec<u8>),
	End,
	Finish,
	Error(crate::error::QuicError),
	Close,
}

#[derive(Default)]
struct Flags {
	local_fin: bool,
	fin_requested: bool,
	remote_fin: bool,
	aborted: bool,
	destroyed: bool,
	ended: bool,
}

pub struct StreamState {
	pub id: StreamId,
	flow: FlowController,
	sequencer: Sequencer,
	outgoing: VecDeque<Vec<u8>>,
	flags: Flags,
	bytes_read: u64,
	bytes_written: u64,
}

impl StreamState {
	pub fn new(id: StreamId, limits: FlowControlLimits) -> Self {
		Self { id, flow: FlowController::new(limits), sequencer: Sequencer::new(), outgoing: VecDeque::new(), flags: Flags::default(), bytes_read: 0, bytes_written: 0 }
	}

	pub fn is_destroyed(&self) -> bool {
		self.flags.destroyed
	}

	pub fn is_aborted(&self) -> bool {
		self.flags.aborted
	}

	pub fn bytes_read(&self) -> u64 {
		self.bytes_read
	}

	pub fn bytes_written(&self) -> u64 {
		self.bytes_written
	}

	pub fn flow_mut(&mut self) -> &mut FlowController {
		&mut self.flow
	}

	pub fn flow(&self) -> &FlowController {
		&self.flow
	}

	/// Queues application bytes for the next drain (spec §4.5: "Write path").
	pub fn write(&mut self, data: Vec<u8>) -> Result<()> {
		if self.flags.local_fin {
			return Err(proto_err!(ErrorCode::RstAcknowledgement, "write after local FIN on stream {}", self.id.0));
		}
		if !data.is_empty() {
			self.outgoing.push_back(data);
		}
		Ok(())
	}

	pub fn has_pending_write(&self) -> bool {
		!self.outgoing.is_empty() || self.wants_fin()
	}

	/// Requests that local writes be FIN-terminated on the next drain (spec §4.5: "End
	/// stream"). Idempotent, and a no-op once the FIN has actually gone out.
	pub fn request_end(&mut self) {
		self.flags.fin_requested = true;
	}

	/// Whether a local FIN is still owed to the peer.
	pub fn wants_fin(&self) -> bool {
		self.flags.fin_requested && !self.flags.local_fin
	}

	/// Packages queued bytes into STREAM frames honoring send credit (via `conn_flow`) and
	/// `max_payload` (MTU minus packet/frame header overhead), per spec §4.5. Returns the
	/// frames to emit and whether the caller should also emit a BLOCKED frame.
	pub fn drain(&mut self, conn_flow: &mut FlowController, max_payload: usize, fin_requested: bool) -> (Vec<Frame>, bool) {
		let mut frames = Vec::new();
		let mut blocked = false;

		while let Some(mut chunk) = self.outgoing.pop_front() {
			let credit = self.flow.max_send_offset().saturating_sub(self.flow.written_offset());
			if credit == 0 {
				self.outgoing.push_front(chunk);
				blocked = true;
				break;
			}

			let take = (chunk.len() as u64).min(credit).min(max_payload as u64) as usize;
			if take < chunk.len() {
				let rest = chunk.split_off(take);
				self.outgoing.push_front(rest);
			}

			let offset = Offset(self.flow.written_offset());
			self.flow.update_written_offset(offset.0 + take as u64, Some(conn_flow));
			self.bytes_written += take as u64;

			frames.push(Frame::Stream(StreamFrame { stream_id: self.id, offset, fin: false, data: chunk }));

			if self.outgoing.is_empty() {
				break;
			}
		}

		if fin_requested && self.outgoing.is_empty() && !self.flags.local_fin {
			self.flags.local_fin = true;
			let offset = Offset(self.flow.written_offset());
			frames.push(Frame::Stream(StreamFrame { stream_id: self.id, offset, fin: true, data: Vec::new() }));
		}

		(frames, blocked)
	}

	/// Handles an inbound STREAM frame (spec §4.5: "Read path"). Returns any events to
	/// surface (bytes as they become contiguous, End on FIN) and optionally a
	/// WINDOW_UPDATE frame to send in response.
	pub fn handle_stream_frame(&mut self, conn_flow: &mut FlowController, frame: StreamFrame) -> Result<(Vec<StreamEvent>, Option<Frame>)> {
		let end = frame.offset.0 + frame.data.len() as u64;
		self.flow.update_highest_received(end, Some(conn_flow));
		self.flow.check_blocked()?;

		if frame.fin {
			self.sequencer.set_final_offset(end);
		}

		if !frame.data.is_empty() {
			self.sequencer.push(frame.offset.0, frame.data)?;
		}

		let mut events = Vec::new();
		while let Some(chunk) = self.sequencer.read() {
			self.bytes_read += chunk.len() as u64;
			events.push(StreamEvent::Data(chunk));
		}

		self.flow.update_consumed_offset(self.sequencer.consumed_offset(), Some(conn_flow));

		if self.sequencer.is_fin() && !self.flags.ended {
			self.flags.remote_fin = true;
			self.flags.ended = true;
			events.push(StreamEvent::End);
		}

		let window_update = if self.flow.should_update_window() {
			Some(Frame::WindowUpdate { stream_id: self.id, byte_offset: Offset(self.flow.max_receive_offset()) })
		} else {
			None
		};

		Ok((events, window_update))
	}

	/// Handles an inbound RST_STREAM (spec §4.5: "RST handling"). Returns the events to
	/// surface and, if the peer should be told to stop (local side hadn't FINed yet), the
	/// RST_STREAM to send back.
	pub fn handle_rst_frame(&mut self, conn_flow: &mut FlowController, final_offset: Offset, error_code: StreamErrorCode) -> (Vec<StreamEvent>, Option<Frame>) {
		self.flow.update_highest_received(final_offset.0, Some(conn_flow));
		self.flags.remote_fin = true;
		self.sequencer.set_final_offset(final_offset.0);

		if self.flags.local_fin {
			self.destroy();
			return (vec![StreamEvent::Close], None);
		}

		let reply = Frame::RstStream { stream_id: self.id, final_offset: Offset(self.flow.written_offset()), error_code: StreamErrorCode::RstAcknowledgement };
		(vec![StreamEvent::Error(crate::error::QuicError::new(crate::error::Kind::Protocol, crate::error::ErrorCode::Other(error_code.to_wire())))], Some(reply))
	}

	pub fn destroy(&mut self) {
		self.flags.remote_fin = true;
		self.flags.local_fin = true;
		self.flags.aborted = true;
		self.flags.destroyed = true;
		self.sequencer.reset();
		self.outgoing.clear();
	}

	pub fn both_sides_fin(&self) -> bool {
		self.flags.local_fin && self.flags.remote_fin
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn limits() -> FlowControlLimits {
		FlowControlLimits { initial_window: 1 << 16, window_limit: 1 << 20 }
	}

	#[test]
	fn write_then_drain_produces_stream_frame() {
		let mut conn = FlowController::new(limits());
		let mut stream = StreamState::new(StreamId(1), limits());
		stream.write(b"hello".to_vec()).unwrap();

		let (frames, blocked) = stream.drain(&mut conn, 1000, false);
		assert!(!blocked);
		assert_eq!(frames.len(), 1);
		match &frames[0] {
			Frame::Stream(f) => {
				assert_eq!(f.data, b"hello");
				assert_eq!(f.offset.0, 0);
				assert!(!f.fin);
			}
			other => panic!("expected Stream frame, got {other:?}"),
		}
	}

	#[test]
	fn drain_with_fin_marks_local_fin() {
		let mut conn = FlowController::new(limits());
		let mut stream = StreamState::new(StreamId(1), limits());
		stream.write(b"bye".to_vec()).unwrap();

		let (frames, _) = stream.drain(&mut conn, 1000, true);
		assert_eq!(frames.len(), 2);
		assert!(matches!(&frames[1], Frame::Stream(f) if f.fin));

		assert!(stream.write(b"more".to_vec()).is_err());
	}

	#[test]
	fn inbound_frame_delivers_bytes_and_fin() {
		let mut conn = FlowController::new(limits());
		let mut stream = StreamState::new(StreamId(3), limits());

		let (events, _) = stream.handle_stream_frame(&mut conn, StreamFrame { stream_id: StreamId(3), offset: Offset(0), fin: true, data: b"done".to_vec() }).unwrap();

		assert!(matches!(&events[0], StreamEvent::Data(d) if d == b"done"));
		assert!(matches!(&events[1], StreamEvent::End));
	}

	#[test]
	fn overrun_credit_reports_blocked_error() {
		let mut conn = FlowController::new(limits());
		let mut stream = StreamState::new(StreamId(3), FlowControlLimits { initial_window: 4, window_limit: 4 });

		let result = stream.handle_stream_frame(&mut conn, StreamFrame { stream_id: StreamId(3), offset: Offset(0), fin: false, data: vec![0; 10] });
		assert!(result.is_err());
	}

	#[test]
	fn request_end_sends_fin_on_next_drain_even_with_no_data() {
		let mut conn = FlowController::new(limits());
		let mut stream = StreamState::new(StreamId(1), limits());
		assert!(!stream.has_pending_write());

		stream.request_end();
		assert!(stream.has_pending_write());
		assert!(stream.wants_fin());

		let (frames, _) = stream.drain(&mut conn, 1000, stream.wants_fin());
		assert_eq!(frames.len(), 1);
		assert!(matches!(&frames[0], Frame::Stream(f) if f.fin && f.data.is_empty()));
		assert!(!stream.wants_fin());
	}

	#[test]
	fn rst_before_local_fin_replies_with_ack_code() {
		let mut conn = FlowController::new(limits());
		let mut stream = StreamState::new(StreamId(5), limits());

		let (events, reply) = stream.handle_rst_frame(&mut conn, Offset(42), StreamErrorCode::Cancelled);
		assert!(matches!(events[0], StreamEvent::Error(_)));
		assert!(matches!(reply, Some(Frame::RstStream { error_code: StreamErrorCode::RstAcknowledgement, .. })));
		assert!(!stream.is_destroyed());
	}

	#[test]
	fn rst_after_local_fin_destroys_stream() {
		let mut conn = FlowController::new(limits());
		let mut stream = StreamState::new(StreamId(5), limits());
		stream.drain(&mut conn, 1000, true); // sends local FIN with no data

		let (events, reply) = stream.handle_rst_frame(&mut conn, Offset(0), StreamErrorCode::NoError);
		assert!(matches!(events[0], StreamEvent::Close));
		assert!(reply.is_none());
		assert!(stream.is_destroyed());
	}
}
