//! Endpoint (C7, spec §4.7): `Client` and `Server`, the stakker actors that bind a UDP
//! socket and demultiplex datagrams to `Session`s by connection id.
//!
//! Both endpoints own a `HashMap<ConnectionId, Session>` directly: a server accepts one
//! session per inbound connection id, and a client's `spawn` (spec §6) adds a second
//! session sharing the same socket rather than duplicating the file descriptor, so the
//! map is always the authoritative routing table regardless of role. `Session` stays
//! plain data (see `quic::session`); the actor is the only thing that talks to the
//! network or to stakker timers, matching the "single-threaded cooperative" model of
//! spec §5.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use rand::Rng;
use stakker::{Fwd, FixedTimerKey, CX};

use crate::config::{Config, SERVER_INTERVAL_CHECK};
use crate::error::{ErrorCode, Kind, QuicError, Result};
use crate::session::{Effect, Session, SessionEvent};
use crate::socket::UdpTransport;
use crate::wire::ids::{ConnectionId, StreamId};
use crate::wire::packet;

/// How often the actor drains the socket and pumps each touched session's outgoing
/// queue. Distinct from the slower housekeeping timer (spec §4.6/§4.7: idle/handshake/
/// ping checks), which runs at `Config::interval_check_{min,max}` on a client or
/// `SERVER_INTERVAL_CHECK` on a server.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Picks a jittered delay within `[min, max]` so many sessions on one client don't all
/// wake on the same tick.
fn jittered_interval(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return min;
	}
	let spread_ms = (max - min).as_millis() as u64;
	min + Duration::from_millis(rand::thread_rng().gen_range(0..=spread_ms))
}

fn unknown_connection(id: ConnectionId) -> QuicError {
	QuicError::with_reason(Kind::Protocol, ErrorCode::InvalidStreamData, format!("no session for connection {id}"))
}

/// Events a `Server` surfaces to its application (spec §6: "session", "error",
/// "listening", "close", plus the per-session events a `Session` already produces).
#[derive(Debug)]
pub enum ServerEvent {
	Listening(SocketAddr),
	Session(ConnectionId),
	Stream(ConnectionId, StreamId),
	StreamData(ConnectionId, StreamId, Vec<u8>),
	StreamEnd(ConnectionId, StreamId),
	StreamClosed(ConnectionId, StreamId),
	Ping(ConnectionId),
	Timeout(ConnectionId),
	GoAway(ConnectionId),
	Error(ConnectionId, QuicError),
	Close(ConnectionId),
}

fn translate(id: ConnectionId, event: SessionEvent) -> Option<ServerEvent> {
	Some(match event {
		SessionEvent::Stream(s) => ServerEvent::Stream(id, s),
		SessionEvent::StreamData(s, data) => ServerEvent::StreamData(id, s, data),
		SessionEvent::StreamEnd(s) => ServerEvent::StreamEnd(id, s),
		SessionEvent::StreamClosed(s) => ServerEvent::StreamClosed(id, s),
		SessionEvent::Ping => ServerEvent::Ping(id),
		SessionEvent::Timeout => ServerEvent::Timeout(id),
		SessionEvent::GoAway => ServerEvent::GoAway(id),
		SessionEvent::Version(_) => return None, // servers never re-negotiate after accept
		SessionEvent::Error(err) => ServerEvent::Error(id, err),
		SessionEvent::Close => ServerEvent::Close(id),
	})
}

pub struct Server {
	transport: UdpTransport,
	sessions: HashMap<ConnectionId, Session>,
	config: Config,
	events: Fwd<ServerEvent>,
	poll: FixedTimerKey,
	housekeeping: FixedTimerKey,
}

impl Server {
	/// `Server.listen(port, host)` (spec §6): binds UDP and starts the poll and
	/// housekeeping loops.
	pub fn init(cx: CX![], addr: impl ToSocketAddrs, config: Config, events: Fwd<ServerEvent>) -> Option<Self> {
		let transport = match UdpTransport::bind(addr) {
			Ok(t) => t,
			Err(err) => {
				error!("Failed to bind UDP socket: {err}");
				return None;
			}
		};

		let local = transport.local_addr().ok()?;
		info!("Listening on {local}");
		events.fwd(ServerEvent::Listening(local));

		let mut this = Self { transport, sessions: HashMap::new(), config, events, poll: FixedTimerKey::default(), housekeeping: FixedTimerKey::default() };
		this.schedule_poll(cx);
		this.schedule_housekeeping(cx);
		Some(this)
	}

	fn schedule_poll(&mut self, cx: CX![]) {
		let actor = cx.access_actor().clone();
		self.poll = cx.after(POLL_INTERVAL, move |s| actor.apply(s, |this, cx| this.poll(cx)));
	}

	fn schedule_housekeeping(&mut self, cx: CX![]) {
		let actor = cx.access_actor().clone();
		self.housekeeping = cx.after(SERVER_INTERVAL_CHECK, move |s| actor.apply(s, |this, cx| this.run_housekeeping(cx)));
	}

	fn poll(&mut self, cx: CX![]) {
		let now = cx.now();

		while let Ok(Some((buf, from))) = self.transport.try_recv() {
			self.on_datagram(now, &buf, from);
		}

		self.schedule_poll(cx);
	}

	fn run_housekeeping(&mut self, cx: CX![]) {
		self.housekeeping(cx.now());
		self.schedule_housekeeping(cx);
	}

	fn on_datagram(&mut self, now: Instant, buf: &[u8], from: SocketAddr) {
		let Ok(id) = packet::peek_connection_id(buf) else {
			return; // malformed public header; silently dropped (spec §7)
		};

		if !self.sessions.contains_key(&id) {
			match packet::peek_is_reset(buf) {
				Ok(true) => return, // a reset for an unknown connection id is dropped (spec §4.7)
				Ok(false) => {}
				Err(_) => return,
			}
			self.sessions.insert(id, Session::accept(now, id, from, self.config));
			self.events.fwd(ServerEvent::Session(id));
		}

		let Some(session) = self.sessions.get_mut(&id) else { return };
		let effects = session.receive(now, buf, from);
		let flushed = session.flush(now);
		self.apply_effects(id, effects);
		self.apply_effects(id, flushed);
		self.reap(id);
	}

	/// Server-side housekeeping (spec §4.7): runs every `SERVER_INTERVAL_CHECK`. Idle
	/// sessions are destroyed without sending CONNECTION_CLOSE, "to avoid waking mobile
	/// radios" — the one place server behavior differs from the generic session timer.
	fn housekeeping(&mut self, now: Instant) {
		let ids: Vec<ConnectionId> = self.sessions.keys().copied().collect();
		for id in ids {
			let Some(session) = self.sessions.get_mut(&id) else { continue };

			if session.is_idle(now) {
				let effects = session.destroy(Some(QuicError::new(Kind::Transport, ErrorCode::NetworkIdleTimeout)));
				self.apply_effects(id, effects);
			} else {
				let effects = session.tick(now);
				self.apply_effects(id, effects);
			}

			self.reap(id);
		}
	}

	fn reap(&mut self, id: ConnectionId) {
		if self.sessions.get(&id).is_some_and(Session::is_destroyed) {
			self.sessions.remove(&id);
		}
	}

	fn apply_effects(&mut self, id: ConnectionId, effects: Vec<Effect>) {
		for effect in effects {
			match effect {
				Effect::Send(bytes) => {
					let Some(remote) = self.sessions.get(&id).map(|s| s.remote_addr) else { continue };
					if let Err(err) = self.transport.send_to(&bytes, remote) {
						warn!("UDP send to {remote} failed: {err}");
					}
				}
				Effect::Event(event) => {
					if let Some(ev) = translate(id, event) {
						self.events.fwd(ev);
					}
				}
			}
		}
	}

	pub fn write(&mut self, _: CX![], id: ConnectionId, stream_id: StreamId, data: Vec<u8>) -> Result<()> {
		self.sessions.get_mut(&id).ok_or_else(|| unknown_connection(id))?.write(stream_id, data)
	}

	pub fn close(&mut self, _: CX![], id: ConnectionId, error_code: ErrorCode) {
		if let Some(session) = self.sessions.get_mut(&id) {
			let effects = session.close(error_code);
			self.apply_effects(id, effects);
			self.reap(id);
		}
	}

	/// `Server.close(err?)` (spec §6): drains every session and stops listening.
	pub fn close_all(&mut self, cx: CX![], error_code: ErrorCode) {
		let ids: Vec<ConnectionId> = self.sessions.keys().copied().collect();
		for id in ids {
			self.close(cx, id, error_code);
		}
	}
}

/// Events a `Client` surfaces to its application (spec §6).
#[derive(Debug)]
pub enum ClientEvent {
	Stream(ConnectionId, StreamId),
	StreamData(ConnectionId, StreamId, Vec<u8>),
	StreamEnd(ConnectionId, StreamId),
	StreamClosed(ConnectionId, StreamId),
	Ping(ConnectionId),
	Timeout(ConnectionId),
	GoAway(ConnectionId),
	Version(ConnectionId, [u8; 4]),
	Error(ConnectionId, QuicError),
	Close(ConnectionId),
}

fn translate_client(id: ConnectionId, event: SessionEvent) -> ClientEvent {
	match event {
		SessionEvent::Stream(s) => ClientEvent::Stream(id, s),
		SessionEvent::StreamData(s, data) => ClientEvent::StreamData(id, s, data),
		SessionEvent::StreamEnd(s) => ClientEvent::StreamEnd(id, s),
		SessionEvent::StreamClosed(s) => ClientEvent::StreamClosed(id, s),
		SessionEvent::Ping => ClientEvent::Ping(id),
		SessionEvent::Timeout => ClientEvent::Timeout(id),
		SessionEvent::GoAway => ClientEvent::GoAway(id),
		SessionEvent::Version(v) => ClientEvent::Version(id, v),
		SessionEvent::Error(err) => ClientEvent::Error(id, err),
		SessionEvent::Close => ClientEvent::Close(id),
	}
}

pub struct Client {
	transport: UdpTransport,
	sessions: HashMap<ConnectionId, Session>,
	config: Config,
	events: Fwd<ClientEvent>,
	poll: FixedTimerKey,
	housekeeping: FixedTimerKey,
}

impl Client {
	/// `Client.connect(port, host)` (spec §6): binds an ephemeral local socket and opens
	/// the first session.
	pub fn init(cx: CX![], remote: SocketAddr, config: Config, events: Fwd<ClientEvent>) -> Option<Self> {
		let local: SocketAddr = if remote.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };

		let transport = match UdpTransport::bind(local) {
			Ok(t) => t,
			Err(err) => {
				error!("Failed to bind UDP socket: {err}");
				return None;
			}
		};

		let mut this = Self { transport, sessions: HashMap::new(), config, events, poll: FixedTimerKey::default(), housekeeping: FixedTimerKey::default() };
		this.connect_inner(cx.now(), remote);
		this.schedule_poll(cx);
		this.schedule_housekeeping(cx);
		Some(this)
	}

	fn connect_inner(&mut self, now: Instant, remote: SocketAddr) -> ConnectionId {
		let (session, packet) = Session::connect(now, remote, self.config);
		let id = session.connection_id;
		if let Err(err) = self.transport.send_to(&packet, remote) {
			warn!("UDP send to {remote} failed: {err}");
		}
		self.sessions.insert(id, session);
		id
	}

	/// `Client.spawn(port, host)` (spec §6): an additional session sharing this client's
	/// socket, demultiplexed by connection id like any other session here.
	pub fn spawn(&mut self, cx: CX![], remote: SocketAddr) -> ConnectionId {
		self.connect_inner(cx.now(), remote)
	}

	fn schedule_poll(&mut self, cx: CX![]) {
		let actor = cx.access_actor().clone();
		self.poll = cx.after(POLL_INTERVAL, move |s| actor.apply(s, |this, cx| this.poll(cx)));
	}

	fn schedule_housekeeping(&mut self, cx: CX![]) {
		let actor = cx.access_actor().clone();
		let delay = jittered_interval(self.config.interval_check_min, self.config.interval_check_max);
		self.housekeeping = cx.after(delay, move |s| actor.apply(s, |this, cx| this.run_housekeeping(cx)));
	}

	fn poll(&mut self, cx: CX![]) {
		let now = cx.now();

		while let Ok(Some((buf, from))) = self.transport.try_recv() {
			self.on_datagram(now, &buf, from);
		}

		self.schedule_poll(cx);
	}

	fn run_housekeeping(&mut self, cx: CX![]) {
		let now = cx.now();
		let ids: Vec<ConnectionId> = self.sessions.keys().copied().collect();
		for id in ids {
			let Some(session) = self.sessions.get_mut(&id) else { continue };
			let effects = session.tick(now);
			self.apply_effects(id, effects);
			self.reap(id);
		}
		self.schedule_housekeeping(cx);
	}

	fn on_datagram(&mut self, now: Instant, buf: &[u8], from: SocketAddr) {
		let Ok(id) = packet::peek_connection_id(buf) else { return };
		let Some(session) = self.sessions.get_mut(&id) else { return };

		let effects = session.receive(now, buf, from);
		let flushed = session.flush(now);
		self.apply_effects(id, effects);
		self.apply_effects(id, flushed);
		self.reap(id);
	}

	fn reap(&mut self, id: ConnectionId) {
		if self.sessions.get(&id).is_some_and(Session::is_destroyed) {
			self.sessions.remove(&id);
		}
	}

	fn apply_effects(&mut self, id: ConnectionId, effects: Vec<Effect>) {
		for effect in effects {
			match effect {
				Effect::Send(bytes) => {
					let Some(remote) = self.sessions.get(&id).map(|s| s.remote_addr) else { continue };
					if let Err(err) = self.transport.send_to(&bytes, remote) {
						warn!("UDP send to {remote} failed: {err}");
					}
				}
				Effect::Event(event) => self.events.fwd(translate_client(id, event)),
			}
		}
	}

	/// `Client.request(options) -> Stream` (spec §6): opens a stream and returns its id;
	/// subsequent bytes/End/Close arrive as `ClientEvent`s.
	pub fn request(&mut self, _: CX![], id: ConnectionId) -> Result<StreamId> {
		self.sessions.get_mut(&id).ok_or_else(|| unknown_connection(id))?.request()
	}

	pub fn write(&mut self, cx: CX![], id: ConnectionId, stream_id: StreamId, data: Vec<u8>) -> Result<()> {
		let session = self.sessions.get_mut(&id).ok_or_else(|| unknown_connection(id))?;
		session.write(stream_id, data)?;
		let effects = session.flush(cx.now());
		self.apply_effects(id, effects);
		Ok(())
	}

	pub fn end_stream(&mut self, _: CX![], id: ConnectionId, stream_id: StreamId) -> Result<()> {
		self.sessions.get_mut(&id).ok_or_else(|| unknown_connection(id))?.end_stream(stream_id)
	}

	/// `Client.ping()` (spec §6).
	pub fn ping(&mut self, _: CX![], id: ConnectionId) {
		if let Some(session) = self.sessions.get_mut(&id) {
			let effects = session.ping();
			self.apply_effects(id, effects);
		}
	}

	/// `Client.close(err?)` (spec §6).
	pub fn close(&mut self, _: CX![], id: ConnectionId, error_code: ErrorCode) {
		if let Some(session) = self.sessions.get_mut(&id) {
			let effects = session.close(error_code);
			self.apply_effects(id, effects);
			self.reap(id);
		}
	}

	/// `Client.reset(err?)` (spec §6).
	pub fn reset(&mut self, _: CX![], id: ConnectionId) {
		if let Some(session) = self.sessions.get_mut(&id) {
			let effects = session.reset();
			self.apply_effects(id, effects);
			self.reap(id);
		}
	}
}
