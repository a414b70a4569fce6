//! Session (spec §4.6): the per-connection state machine, frame dispatch table, and ACK
//! handling.
//!
//! `Session` is plain data, not a stakker actor: the `Endpoint` actor (quic::endpoint) owns
//! every `Session` in a `HashMap`, matching the arena-ownership resolution in spec §9 for
//! the Stream→Session cycle. A `Session` has no back-reference to its owner, and every
//! operation that needs the wall clock or produces I/O takes `now` and returns the
//! `Effect`s for the caller to apply.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::ack::{AckHandler, UnackedQueue};
use crate::config::{Config, FlowControlLimits};
use crate::error::{proto_err, ErrorCode, Kind, QuicError, Result, StreamErrorCode};
use crate::flow::FlowController;
use crate::rtt::RttEstimator;
use crate::stream::{StreamEvent, StreamState};
use crate::wire::cursor::Writer;
use crate::wire::frame::Frame;
use crate::wire::ids::{ConnectionId, PacketNumber, StreamId};
use crate::wire::packet::{self, NegotiationPacket, Packet, RegularPacket, ResetPacket};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
	Client,
	Server,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionState {
	Initial,
	VersionNegotiating,
	Open,
	ShuttingDown,
	Closed,
}

#[derive(Debug)]
pub enum SessionEvent {
	Stream(StreamId),
	StreamData(StreamId, Vec<u8>),
	StreamEnd(StreamId),
	StreamClosed(StreamId),
	Ping,
	Timeout,
	GoAway,
	Version([u8; 4]),
	Error(QuicError),
	Close,
}

/// Something a `Session` method produces for its caller to carry out: bytes to put on the
/// wire, or an event to surface to the application (spec §6).
pub enum Effect {
	Send(Vec<u8>),
	Event(SessionEvent),
}

#[derive(Default)]
struct Flags {
	destroyed: bool,
	shutting_down: bool,
	version_negotiated: bool,
	keep_alive_ping_sent: bool,
	keep_alive_enabled: bool,
}

pub struct Session {
	pub connection_id: ConnectionId,
	pub remote_addr: SocketAddr,
	role: Role,
	state: SessionState,
	version: Option<[u8; 4]>,
	next_packet_number: PacketNumber,
	next_stream_id: StreamId,
	streams: HashMap<StreamId, StreamState>,
	conn_flow: FlowController,
	rtt: RttEstimator,
	unacked: UnackedQueue,
	ack_handler: AckHandler,
	last_activity: Instant,
	last_received_at: Option<Instant>,
	handshake_deadline: Instant,
	flags: Flags,
	config: Config,
	stream_limits: FlowControlLimits,
	max_payload: usize,
}

impl Session {
	fn new(now: Instant, connection_id: ConnectionId, role: Role, remote_addr: SocketAddr, config: Config) -> Self {
		let (conn_limits, stream_limits, next_stream_id) = match role {
			Role::Client => (FlowControlLimits::client_connection(), FlowControlLimits::client_stream(), StreamId(1)),
			Role::Server => (FlowControlLimits::server_connection(), FlowControlLimits::server_stream(), StreamId(2)),
		};

		let max_payload = if remote_addr.is_ipv6() { crate::config::MAX_PACKET_SIZE_IPV6 } else { crate::config::MAX_PACKET_SIZE_IPV4 };

		Self {
			connection_id,
			remote_addr,
			role,
			state: SessionState::Initial,
			version: None,
			next_packet_number: PacketNumber::first(),
			next_stream_id,
			streams: HashMap::new(),
			conn_flow: FlowController::new(conn_limits),
			rtt: RttEstimator::new(),
			unacked: UnackedQueue::new(),
			ack_handler: AckHandler::new(),
			last_activity: now,
			last_received_at: None,
			handshake_deadline: now + config.handshake_timeout,
			flags: Flags::default(),
			config,
			stream_limits,
			max_payload,
		}
	}

	/// Builds a client session and its first Regular packet carrying the version flag
	/// (spec §4.6: "On client connect: enter Initial; send first Regular packet with
	/// version-flag").
	pub fn connect(now: Instant, remote_addr: SocketAddr, config: Config) -> (Self, Vec<u8>) {
		let mut session = Self::new(now, ConnectionId::random(), Role::Client, remote_addr, config);
		// Packet number 1 is never exhausted, so this always produces exactly a `Send`.
		let packet = session
			.build_packet(Vec::new(), true)
			.into_iter()
			.find_map(|e| match e {
				Effect::Send(bytes) => Some(bytes),
				Effect::Event(_) => None,
			})
			.expect("the first packet a session ever builds cannot exhaust the packet number space");
		(session, packet)
	}

	/// Builds a server-side session for a previously unseen connection id (spec §4.7).
	pub fn accept(now: Instant, connection_id: ConnectionId, remote_addr: SocketAddr, config: Config) -> Self {
		Self::new(now, connection_id, Role::Server, remote_addr, config)
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	/// Current receive window size for one stream, for diagnostics and testing the
	/// auto-tuning in `FlowController::update_window_offset` (spec §4.2, §8).
	pub fn stream_receive_window(&self, stream_id: StreamId) -> Option<u64> {
		self.streams.get(&stream_id).map(|s| s.flow().max_receive_window_size())
	}

	pub fn is_destroyed(&self) -> bool {
		self.flags.destroyed
	}

	/// Whether the idle timeout has elapsed (spec §4.6, §5). Exposed separately from
	/// `tick` so the server's interval check (spec §4.7) can destroy a timed-out session
	/// silently instead of sending CONNECTION_CLOSE.
	pub fn is_idle(&self, now: Instant) -> bool {
		self.state != SessionState::Closed && now.saturating_duration_since(self.last_activity) > self.config.idle_timeout
	}

	pub fn set_keep_alive(&mut self, enabled: bool) {
		self.flags.keep_alive_enabled = enabled;
	}

	/// Opens a new locally-initiated stream (spec §8: "Successive client request() yields
	/// StreamIDs {1, 3, 5, ...}").
	pub fn request(&mut self) -> Result<StreamId> {
		if self.flags.shutting_down {
			return Err(proto_err!(ErrorCode::NoError, "cannot open a stream while shutting down"));
		}
		if self.streams.len() >= self.config.max_concurrent_streams {
			return Err(proto_err!(ErrorCode::TooManyOpenStreams, "already have {} open streams, limit is {}", self.streams.len(), self.config.max_concurrent_streams));
		}
		let id = self.next_stream_id;
		self.next_stream_id = id.advance();
		self.streams.insert(id, StreamState::new(id, self.stream_limits));
		Ok(id)
	}

	pub fn write(&mut self, stream_id: StreamId, data: Vec<u8>) -> Result<()> {
		self.stream_mut(stream_id)?.write(data)
	}

	pub fn end_stream(&mut self, stream_id: StreamId) -> Result<()> {
		self.stream_mut(stream_id)?.request_end();
		Ok(())
	}

	pub fn close_stream(&mut self, stream_id: StreamId) -> Vec<Effect> {
		let Some(stream) = self.streams.get_mut(&stream_id) else { return Vec::new() };
		let frame = Frame::RstStream { stream_id, final_offset: crate::wire::ids::Offset(stream.bytes_written()), error_code: StreamErrorCode::Cancelled };
		self.build_packet(vec![frame], false)
	}

	fn stream_mut(&mut self, stream_id: StreamId) -> Result<&mut StreamState> {
		self.streams.get_mut(&stream_id).ok_or_else(|| proto_err!(ErrorCode::InvalidStreamData, "no such stream {}", stream_id.0))
	}

	/// Entry point for an inbound datagram already routed to this session by connection id
	/// (spec §4.7: Endpoint demux).
	pub fn receive(&mut self, now: Instant, datagram: &[u8], from: SocketAddr) -> Vec<Effect> {
		if self.flags.destroyed {
			return Vec::new();
		}

		let mut r = crate::wire::cursor::Reader::new(datagram);
		let expect_negotiation = self.role == Role::Client && !self.flags.version_negotiated;

		let packet = match Packet::decode(&mut r, expect_negotiation) {
			Ok(p) => p,
			Err(_) => return Vec::new(), // malformed datagrams are silently dropped (spec §7)
		};

		match packet {
			Packet::Reset(reset) => self.handle_reset(reset, from),
			Packet::Negotiation(neg) => self.handle_negotiation(neg),
			Packet::Regular(regular) => self.handle_regular(now, regular),
		}
	}

	fn handle_reset(&mut self, reset: ResetPacket, from: SocketAddr) -> Vec<Effect> {
		// A spoofed public reset from a different peer address MUST NOT destroy the
		// session (spec §8, scenario 6).
		if from != self.remote_addr {
			return Vec::new();
		}
		let _ = reset.nonce_proof;
		self.destroy(Some(QuicError::new(Kind::Protocol, ErrorCode::PublicReset)))
	}

	fn handle_negotiation(&mut self, neg: NegotiationPacket) -> Vec<Effect> {
		if self.role == Role::Server {
			return Vec::new(); // unexpected on the server, spec §4.7
		}

		match packet::choose_version(&neg.versions) {
			Some(version) => {
				self.version = Some(version);
				self.unacked.clear();
				self.next_packet_number = PacketNumber::first();
				self.state = SessionState::Open;
				vec![Effect::Event(SessionEvent::Version(version))]
			}
			None => self.destroy(Some(QuicError::new(Kind::Protocol, ErrorCode::InvalidVersion))),
		}
	}

	fn handle_regular(&mut self, now: Instant, packet: RegularPacket) -> Vec<Effect> {
		self.last_activity = now;
		self.last_received_at = Some(now);
		self.flags.keep_alive_ping_sent = false;

		let mut effects = Vec::new();

		if self.role == Role::Server && !self.flags.version_negotiated {
			match packet.version {
				Some(v) if v == packet::VERSION => {
					self.version = Some(v);
					self.flags.version_negotiated = true;
					self.state = SessionState::Open;
				}
				Some(_) => {
					let neg = Packet::Negotiation(NegotiationPacket { connection_id: self.connection_id, versions: vec![packet::VERSION] });
					let mut w = Writer::new();
					neg.encode(&mut w);
					return vec![Effect::Send(w.into_vec())];
				}
				None => {}
			}
		} else if self.role == Role::Client && !self.flags.version_negotiated {
			self.flags.version_negotiated = true;
			self.state = SessionState::Open;
		}

		self.ack_handler.record(packet.packet_number.0);

		for frame in packet.frames {
			match self.dispatch_frame(now, frame) {
				Ok(mut fx) => effects.append(&mut fx),
				Err(err) => {
					effects.extend(self.destroy(Some(err)));
					return effects;
				}
			}
			// A reply built while dispatching the frame above (e.g. a WINDOW_UPDATE or
			// RST_STREAM ack) can itself exhaust the packet number space and destroy the
			// session (spec §3); stop touching its state once that happens.
			if self.flags.destroyed {
				return effects;
			}
		}

		effects
	}

	fn dispatch_frame(&mut self, now: Instant, frame: Frame) -> Result<Vec<Effect>> {
		let mut effects = Vec::new();

		match frame {
			Frame::Padding(_) | Frame::CongestionFeedback => {}
			Frame::Ping => effects.push(Effect::Event(SessionEvent::Ping)),
			Frame::Stream(stream_frame) => {
				if !self.streams.contains_key(&stream_frame.stream_id) {
					if self.flags.shutting_down {
						return Ok(effects);
					}
					if self.streams.len() >= self.config.max_concurrent_streams {
						return Err(proto_err!(
							ErrorCode::TooManyOpenStreams,
							"peer opened stream {} with {} already open, limit is {}",
							stream_frame.stream_id.0,
							self.streams.len(),
							self.config.max_concurrent_streams
						));
					}
					self.streams.insert(stream_frame.stream_id, StreamState::new(stream_frame.stream_id, self.stream_limits));
					effects.push(Effect::Event(SessionEvent::Stream(stream_frame.stream_id)));
				}
				let stream_id = stream_frame.stream_id;
				let stream = self.streams.get_mut(&stream_id).expect("just inserted or present");
				let (events, window_update) = stream.handle_stream_frame(&mut self.conn_flow, stream_frame)?;
				effects.extend(Self::stream_events_to_effects(stream_id, events));

				// Auto-tune both windows together on every STREAM frame received, so a
				// busy stream doesn't starve the connection-level ceiling it shares with
				// its siblings (spec §4.2, §8).
				let rtt = self.rtt.smoothed();
				self.streams.get_mut(&stream_id).expect("present").flow_mut().update_window_offset(now, rtt);
				self.conn_flow.update_window_offset(now, rtt);

				if let Some(wu) = window_update {
					effects.extend(self.build_packet(vec![wu], false));
				}
				self.reap_stream_if_done(stream_id);
			}
			Frame::RstStream { stream_id, final_offset, error_code } => {
				if let Some(stream) = self.streams.get_mut(&stream_id) {
					let (events, reply) = stream.handle_rst_frame(&mut self.conn_flow, final_offset, error_code);
					effects.extend(Self::stream_events_to_effects(stream_id, events));
					if let Some(reply) = reply {
						effects.extend(self.build_packet(vec![reply], false));
					}
					self.reap_stream_if_done(stream_id);
				}
			}
			Frame::WindowUpdate { stream_id, byte_offset } => {
				if stream_id == StreamId::CONNECTION {
					self.conn_flow.update_max_send_offset(byte_offset.0);
				} else if let Some(stream) = self.streams.get_mut(&stream_id) {
					stream.flow_mut().update_max_send_offset(byte_offset.0);
				}
			}
			Frame::Blocked { .. } => {}
			Frame::StopWaiting { .. } => {}
			Frame::GoAway { .. } => {
				self.flags.shutting_down = true;
				self.state = SessionState::ShuttingDown;
				effects.push(Effect::Event(SessionEvent::GoAway));
			}
			Frame::ConnectionClose { error_code, reason } => {
				effects.extend(self.destroy(Some(QuicError::with_reason(Kind::Protocol, error_code, reason))));
			}
			Frame::Ack(ack) => {
				let (acked_at, retransmit) = self.unacked.process_ack(&ack);
				for sent_at in acked_at {
					self.rtt.update(now.saturating_duration_since(sent_at), ack.delay_us);
				}
				if !retransmit.is_empty() {
					effects.extend(self.build_packet(retransmit, false));
				}
			}
		}

		Ok(effects)
	}

	fn stream_events_to_effects(stream_id: StreamId, events: Vec<StreamEvent>) -> Vec<Effect> {
		events
			.into_iter()
			.map(|event| {
				Effect::Event(match event {
					StreamEvent::Data(data) => SessionEvent::StreamData(stream_id, data),
					StreamEvent::End | StreamEvent::Finish => SessionEvent::StreamEnd(stream_id),
					StreamEvent::Error(err) => SessionEvent::Error(err),
					StreamEvent::Close => SessionEvent::StreamClosed(stream_id),
				})
			})
			.collect()
	}

	fn reap_stream_if_done(&mut self, stream_id: StreamId) {
		if self.streams.get(&stream_id).is_some_and(|s| s.both_sides_fin() || s.is_aborted()) {
			self.streams.remove(&stream_id);
		}
	}

	/// Drains every stream's outgoing queue into as many packets as needed, plus a
	/// pending ACK if one is due (spec §4.5 "Write path", §4.6 "ACK handling").
	///
	/// Each stream's own `drain` call already caps individual STREAM frame payloads at
	/// `max_payload`, but a stream with a large backlog and ample send credit can still
	/// hand back far more frames than one datagram can carry. `batch_by_size` packs the
	/// combined set of frames from every stream back into as many MTU-sized packets as
	/// needed, instead of writing one oversized packet per `flush` call.
	pub fn flush(&mut self, now: Instant) -> Vec<Effect> {
		let mut frames = Vec::new();

		if self.ack_handler.has_pending_ack() {
			let delay_us = self.last_received_at.map_or(0, |at| now.saturating_duration_since(at).as_micros() as u64);
			if let Some(ack) = self.ack_handler.build_frame(delay_us) {
				frames.push(Frame::Ack(ack));
			}
		}

		let stream_ids: Vec<StreamId> = self.streams.keys().copied().collect();
		for stream_id in stream_ids {
			let stream = self.streams.get_mut(&stream_id).expect("collected from live map");
			if !stream.has_pending_write() {
				continue;
			}
			let fin_requested = stream.wants_fin();
			let (stream_frames, blocked) = stream.drain(&mut self.conn_flow, self.max_payload, fin_requested);
			frames.extend(stream_frames);
			if blocked {
				frames.push(Frame::Blocked { stream_id });
			}
		}

		Self::batch_by_size(frames, self.max_payload).into_iter().flat_map(|batch| self.build_packet(batch, false)).collect()
	}

	/// Greedily groups frames so each group's encoded length stays within `max_payload`,
	/// preserving frame order. `max_payload` is the per-address-family MTU ceiling
	/// (spec §6); it leaves the public-header bytes themselves unbudgeted, same as the
	/// per-frame cap each stream's own `drain` already applies.
	fn batch_by_size(frames: Vec<Frame>, max_payload: usize) -> Vec<Vec<Frame>> {
		let mut batches = Vec::new();
		let mut current = Vec::new();
		let mut current_len = 0usize;

		for frame in frames {
			let mut probe = Writer::new();
			frame.encode(&mut probe);
			let frame_len = probe.into_vec().len();

			if !current.is_empty() && current_len + frame_len > max_payload {
				batches.push(std::mem::take(&mut current));
				current_len = 0;
			}
			current_len += frame_len;
			current.push(frame);
		}

		if !current.is_empty() {
			batches.push(current);
		}

		batches
	}

	pub fn ping(&mut self) -> Vec<Effect> {
		self.build_packet(vec![Frame::Ping], false)
	}

	/// Periodic housekeeping driven by the endpoint's interval timer (spec §4.6 "Timers").
	pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
		let mut effects = Vec::new();

		if self.state != SessionState::Closed && now.saturating_duration_since(self.last_activity) > self.config.idle_timeout {
			effects.push(Effect::Event(SessionEvent::Timeout));
			effects.extend(self.close(ErrorCode::NetworkIdleTimeout));
			return effects;
		}

		if !self.flags.version_negotiated && now >= self.handshake_deadline {
			effects.extend(self.destroy(Some(QuicError::new(Kind::Transport, ErrorCode::HandshakeTimeout))));
			return effects;
		}

		if self.flags.keep_alive_enabled
			&& !self.flags.keep_alive_ping_sent
			&& !self.streams.is_empty()
			&& now.saturating_duration_since(self.last_activity) >= self.config.ping_idle_threshold
		{
			self.flags.keep_alive_ping_sent = true;
			effects.extend(self.ping());
		}

		effects.extend(self.flush(now));
		effects
	}

	/// `close(err)`: drains pending outbound frames, sends CONNECTION_CLOSE, destroys
	/// (spec §4.6, §5).
	pub fn close(&mut self, error_code: ErrorCode) -> Vec<Effect> {
		if self.flags.destroyed {
			return Vec::new();
		}
		let mut effects = self.flush(self.last_activity);
		// `flush` can itself exhaust the packet number space and destroy the session
		// (spec §3); once that happens there is no packet number left to send this
		// CONNECTION_CLOSE with, and `destroy` has already run.
		if self.flags.destroyed {
			return effects;
		}
		let frame = Frame::ConnectionClose { error_code, reason: String::new() };
		effects.extend(self.build_packet(vec![frame], false));
		effects.extend(self.destroy(None));
		effects
	}

	/// `reset()`: sends a PRST tag then destroys (spec §4.6).
	pub fn reset(&mut self) -> Vec<Effect> {
		if self.flags.destroyed {
			return Vec::new();
		}
		let reset = Packet::Reset(ResetPacket {
			connection_id: self.connection_id,
			nonce_proof: rand::random(),
			rejected_packet_number: Some(self.next_packet_number.0.saturating_sub(1)),
			client_address: None,
		});
		let mut w = Writer::new();
		reset.encode(&mut w);
		let mut effects = vec![Effect::Send(w.into_vec())];
		effects.extend(self.destroy(None));
		effects
	}

	/// Idempotent teardown: marks destroyed, clears every stream (spec §4.6).
	pub fn destroy(&mut self, err: Option<QuicError>) -> Vec<Effect> {
		if self.flags.destroyed {
			return Vec::new();
		}
		self.flags.destroyed = true;
		self.state = SessionState::Closed;
		for stream in self.streams.values_mut() {
			stream.destroy();
		}
		self.streams.clear();

		let mut effects = Vec::new();
		if let Some(err) = err {
			effects.push(Effect::Event(SessionEvent::Error(err)));
		}
		effects.push(Effect::Event(SessionEvent::Close));
		effects
	}

	/// Builds and sends one packet, returning the `Send` effect plus, if this exhausted
	/// the packet number space, the `destroy` effects that follow it (spec §3: "the session
	/// MUST close with a CONNECTION_CLOSE" once the packet number reaches `2^48 - 1` and
	/// can no longer advance). Returns nothing once the session is already destroyed.
	fn build_packet(&mut self, mut frames: Vec<Frame>, is_first: bool) -> Vec<Effect> {
		if self.flags.destroyed {
			return Vec::new();
		}

		let packet_number = self.next_packet_number;
		let exhausted = match packet_number.next() {
			Ok(next) => {
				self.next_packet_number = next;
				false
			}
			Err(_) => true,
		};

		if exhausted {
			// `packet_number` is the last one this session can ever assign — piggyback the
			// mandatory CONNECTION_CLOSE on it instead of silently reusing the same stale
			// number for every packet after this one.
			frames.push(Frame::ConnectionClose { error_code: ErrorCode::NoError, reason: String::new() });
		}

		let sent_at = self.last_activity;
		self.unacked.insert(packet_number.0, frames.clone(), sent_at);

		let version = if is_first { Some(self.version.unwrap_or(packet::VERSION)) } else { None };

		if is_first && self.config.pad_first_packet {
			let unpadded = RegularPacket { connection_id: self.connection_id, version, nonce: None, packet_number, frames: frames.clone() };
			let mut probe = Writer::new();
			Packet::Regular(unpadded).encode(&mut probe);
			let shortfall = crate::config::MIN_FIRST_PACKET_SIZE.saturating_sub(probe.into_vec().len());
			if shortfall > 0 {
				frames.push(Frame::Padding(shortfall));
			}
		}

		let regular = RegularPacket { connection_id: self.connection_id, version, nonce: None, packet_number, frames };

		let mut w = Writer::new();
		Packet::Regular(regular).encode(&mut w);

		let mut effects = vec![Effect::Send(w.into_vec())];
		if exhausted {
			let err = QuicError::with_reason(Kind::Protocol, ErrorCode::NoError, "packet number space exhausted");
			effects.extend(self.destroy(Some(err)));
		}
		effects
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::{IpAddr, Ipv4Addr};

	fn addr() -> SocketAddr {
		SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4433)
	}

	#[test]
	fn client_connect_produces_version_flagged_packet() {
		let (_, packet) = Session::connect(Instant::now(), addr(), Config::default());
		assert_eq!(packet[0] & 0x01, 0x01);
		assert_eq!(packet[0] & 0x08, 0x08);
	}

	#[test]
	fn request_yields_odd_then_even_ids_by_role() {
		let (mut client, _) = Session::connect(Instant::now(), addr(), Config::default());
		assert_eq!(client.request().unwrap(), StreamId(1));
		assert_eq!(client.request().unwrap(), StreamId(3));

		let mut server = Session::accept(Instant::now(), ConnectionId::random(), addr(), Config::default());
		assert_eq!(server.request().unwrap(), StreamId(2));
		assert_eq!(server.request().unwrap(), StreamId(4));
	}

	#[test]
	fn request_past_the_concurrent_stream_limit_is_rejected() {
		let mut config = Config::default();
		config.max_concurrent_streams = 2;
		let (mut client, _) = Session::connect(Instant::now(), addr(), config);

		client.request().unwrap();
		client.request().unwrap();
		let err = client.request().unwrap_err();
		assert_eq!(err.code, ErrorCode::TooManyOpenStreams);
	}

	#[test]
	fn inbound_stream_past_the_concurrent_stream_limit_closes_the_session() {
		let mut config = Config::default();
		config.max_concurrent_streams = 1;
		let mut server = Session::accept(Instant::now(), ConnectionId::random(), addr(), config);

		let open = |id: StreamId, version: Option<[u8; 4]>| {
			let regular = RegularPacket {
				connection_id: server.connection_id,
				version,
				nonce: None,
				packet_number: PacketNumber(id.0 as u64),
				frames: vec![Frame::Stream(crate::wire::frame::StreamFrame { stream_id: id, offset: crate::wire::ids::Offset(0), fin: false, data: vec![1] })],
			};
			let mut w = Writer::new();
			Packet::Regular(regular).encode(&mut w);
			w.into_vec()
		};

		let datagram = open(StreamId(1), Some(packet::VERSION));
		server.receive(Instant::now(), &datagram, addr());
		assert!(!server.is_destroyed());

		let datagram = open(StreamId(3), None);
		let effects = server.receive(Instant::now(), &datagram, addr());
		assert!(server.is_destroyed());
		assert!(effects.iter().any(|e| matches!(e, Effect::Event(SessionEvent::Error(err)) if err.code == ErrorCode::TooManyOpenStreams)));
	}

	#[test]
	fn negotiation_without_overlap_destroys_session() {
		let (mut client, _) = Session::connect(Instant::now(), addr(), Config::default());
		let neg = Packet::Negotiation(NegotiationPacket { connection_id: client.connection_id, versions: vec![*b"Q040"] });
		let mut w = Writer::new();
		neg.encode(&mut w);

		let effects = client.receive(Instant::now(), &w.into_vec(), addr());
		assert!(client.is_destroyed());
		assert!(effects.iter().any(|e| matches!(e, Effect::Event(SessionEvent::Error(err)) if err.code == ErrorCode::InvalidVersion)));
	}

	#[test]
	fn negotiation_with_overlap_opens_session() {
		let (mut client, _) = Session::connect(Instant::now(), addr(), Config::default());
		let neg = Packet::Negotiation(NegotiationPacket { connection_id: client.connection_id, versions: vec![*b"Q040", packet::VERSION] });
		let mut w = Writer::new();
		neg.encode(&mut w);

		client.receive(Instant::now(), &w.into_vec(), addr());
		assert_eq!(client.state(), SessionState::Open);
	}

	#[test]
	fn spoofed_reset_is_ignored() {
		let (mut client, _) = Session::connect(Instant::now(), addr(), Config::default());
		let reset = Packet::Reset(ResetPacket { connection_id: client.connection_id, nonce_proof: 1, rejected_packet_number: None, client_address: None });
		let mut w = Writer::new();
		reset.encode(&mut w);

		let spoofed_from = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), 1);
		client.receive(Instant::now(), &w.into_vec(), spoofed_from);
		assert!(!client.is_destroyed());
	}

	#[test]
	fn genuine_reset_destroys_session() {
		let (mut client, _) = Session::connect(Instant::now(), addr(), Config::default());
		let reset = Packet::Reset(ResetPacket { connection_id: client.connection_id, nonce_proof: 1, rejected_packet_number: None, client_address: None });
		let mut w = Writer::new();
		reset.encode(&mut w);

		client.receive(Instant::now(), &w.into_vec(), addr());
		assert!(client.is_destroyed());
	}

	#[test]
	fn pad_first_packet_rounds_up_initial_send() {
		let mut config = Config::default();
		config.pad_first_packet = true;
		let (_, padded) = Session::connect(Instant::now(), addr(), config);

		let mut unpadded_config = Config::default();
		unpadded_config.pad_first_packet = false;
		let (_, unpadded) = Session::connect(Instant::now(), addr(), unpadded_config);

		assert_eq!(padded.len(), crate::config::MIN_FIRST_PACKET_SIZE);
		assert!(padded.len() > unpadded.len());
	}

	#[test]
	fn idle_timeout_closes_session() {
		let mut config = Config::default();
		config.idle_timeout = Duration::from_millis(1);
		let (mut client, _) = Session::connect(Instant::now(), addr(), config);

		let later = Instant::now() + Duration::from_millis(10);
		let effects = client.tick(later);
		assert!(effects.iter().any(|e| matches!(e, Effect::Event(SessionEvent::Timeout))));
		assert!(client.is_destroyed());
	}
}
