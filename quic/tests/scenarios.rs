//! Cross-module scenarios (spec §8), driven directly against pairs of `Session`s rather
//! than through `Endpoint`/`UdpTransport`, so reordering and loss are just "feed the
//! encoded datagrams to the other side in a different order" instead of needing a real
//! network or sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use quic::session::{Effect, Session, SessionEvent};
use quic::wire::frame::Frame;
use quic::wire::ids::StreamId;
use quic::{Config, ErrorCode};

use sha2::{Digest, Sha256};

fn client_addr() -> SocketAddr {
	SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 4433)
}

fn server_addr() -> SocketAddr {
	SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 443)
}

/// Builds a client/server pair that have completed the version handshake: the client's
/// first packet (carrying the version flag, spec §4.6) is handed straight to a freshly
/// accepted server.
fn handshake(now: Instant, config: Config) -> (Session, Session) {
	let (mut client, first) = Session::connect(now, server_addr(), config);
	let mut server = Session::accept(now, client.connection_id, client_addr(), config);
	server.receive(now, &first, client_addr());
	client.flush(now); // drains whatever the session queued as part of connect, if anything
	(client, server)
}

fn sent_bytes(effects: Vec<Effect>) -> Vec<Vec<u8>> {
	effects
		.into_iter()
		.filter_map(|e| match e {
			Effect::Send(bytes) => Some(bytes),
			Effect::Event(_) => None,
		})
		.collect()
}

fn stream_data_events(effects: &[Effect]) -> Vec<Vec<u8>> {
	effects
		.iter()
		.filter_map(|e| match e {
			Effect::Event(SessionEvent::StreamData(_, data)) => Some(data.clone()),
			_ => None,
		})
		.collect()
}

#[test]
fn public_reset_round_trip_destroys_both_sides() {
	let now = Instant::now();
	let (mut client, mut server) = handshake(now, Config::default());

	let client_effects = client.reset();
	assert!(client.is_destroyed());

	let reset_bytes = sent_bytes(client_effects);
	assert_eq!(reset_bytes.len(), 1);

	let server_effects = server.receive(now, &reset_bytes[0], client_addr());
	assert!(server.is_destroyed());
	assert!(server_effects.iter().any(|e| matches!(e, Effect::Event(SessionEvent::Error(err)) if err.code == ErrorCode::PublicReset)));
}

#[test]
fn spoofed_public_reset_from_wrong_address_is_rejected() {
	let now = Instant::now();
	let (mut client, mut server) = handshake(now, Config::default());

	let client_effects = client.reset();
	let reset_bytes = sent_bytes(client_effects);

	let attacker = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(6, 6, 6, 6)), 1);
	server.receive(now, &reset_bytes[0], attacker);
	assert!(!server.is_destroyed(), "a reset from an address other than the session's peer must be ignored");
}

#[test]
fn version_negotiation_round_trip_opens_the_client_session() {
	use quic::wire::cursor::{Reader, Writer};
	use quic::wire::ids::{ConnectionId, PacketNumber};
	use quic::wire::packet::{NegotiationPacket, Packet, RegularPacket};
	use quic::SessionState;

	let now = Instant::now();
	let config = Config::default();

	let (mut client, _first) = Session::connect(now, server_addr(), config);
	let id: ConnectionId = client.connection_id;
	let mut server = Session::accept(now, id, client_addr(), config);

	// A packet claiming an unsupported version forces the server to reply with a
	// negotiation packet listing the versions it actually supports (spec §4.6).
	let bogus = RegularPacket { connection_id: id, version: Some(*b"Q040"), nonce: None, packet_number: PacketNumber::first(), frames: vec![] };
	let mut w = Writer::new();
	Packet::Regular(bogus).encode(&mut w);
	let server_effects = server.receive(now, &w.into_vec(), client_addr());

	let neg_bytes = sent_bytes(server_effects);
	assert_eq!(neg_bytes.len(), 1);

	let mut r = Reader::new(&neg_bytes[0]);
	let decoded = Packet::decode(&mut r, true).unwrap();
	assert!(matches!(decoded, Packet::Negotiation(NegotiationPacket { .. })));

	client.receive(now, &neg_bytes[0], server_addr());
	assert_eq!(client.state(), SessionState::Open);
}

#[test]
fn ordered_delivery_survives_reordering() {
	let now = Instant::now();
	let (mut client, mut server) = handshake(now, Config::default());

	let payload: Vec<u8> = (0..8000u32).map(|i| (i % 251) as u8).collect();
	let stream_id = client.request().unwrap();
	client.write(stream_id, payload.clone()).unwrap();

	let mut datagrams = sent_bytes(client.flush(now));
	assert!(datagrams.len() > 1, "8000 bytes at a ~1.2KB MTU must span more than one packet");

	// Reverse delivery order: the sequencer must still reassemble the original stream.
	datagrams.reverse();

	let mut received = Vec::new();
	for (i, datagram) in datagrams.into_iter().enumerate() {
		let at = now + Duration::from_millis(i as u64);
		let effects = server.receive(at, &datagram, client_addr());
		received.extend(stream_data_events(&effects));
	}

	let reassembled: Vec<u8> = received.into_iter().flatten().collect();
	assert_eq!(reassembled.len(), payload.len());
	assert_eq!(Sha256::digest(&reassembled).as_slice(), Sha256::digest(&payload).as_slice());
}

#[test]
fn a_lost_packet_blocks_delivery_until_the_ack_round_trip_retransmits_it() {
	let now = Instant::now();
	let (mut client, mut server) = handshake(now, Config::default());

	let payload: Vec<u8> = (0..8000u32).map(|i| (i % 199) as u8).collect();
	let stream_id = client.request().unwrap();
	client.write(stream_id, payload.clone()).unwrap();

	let mut datagrams = sent_bytes(client.flush(now));
	assert!(datagrams.len() >= 3);

	// Drop the first packet: everything after it arrives, but nothing can be delivered
	// past the gap it leaves at the front of the stream (spec §4.3: "Sequencer").
	datagrams.remove(0);

	let mut received = Vec::new();
	for (i, datagram) in datagrams.into_iter().enumerate() {
		let at = now + Duration::from_millis(i as u64);
		let effects = server.receive(at, &datagram, client_addr());
		received.extend(stream_data_events(&effects));
	}

	assert!(received.is_empty(), "no contiguous prefix exists once the first packet is lost, so nothing should be delivered");

	// The server's next flush carries an ACK whose lowest range starts after the gap;
	// feeding it back to the client drives `UnackedQueue::process_ack` to retransmit the
	// one packet number below that range (spec §4.6, §8 scenario 4).
	let ack_datagrams = sent_bytes(server.flush(now + Duration::from_millis(50)));
	assert!(!ack_datagrams.is_empty(), "server must have a pending ACK after receiving any data");

	let mut retransmitted = Vec::new();
	for ack_datagram in ack_datagrams {
		retransmitted.extend(sent_bytes(client.receive(now + Duration::from_millis(51), &ack_datagram, server_addr())));
	}
	assert!(!retransmitted.is_empty(), "the dropped packet's frames must be retransmitted once its loss is confirmed by the ACK");

	for (i, datagram) in retransmitted.into_iter().enumerate() {
		let at = now + Duration::from_millis(100 + i as u64);
		let effects = server.receive(at, &datagram, client_addr());
		received.extend(stream_data_events(&effects));
	}

	let reassembled: Vec<u8> = received.into_iter().flatten().collect();
	assert_eq!(reassembled.len(), payload.len());
	assert_eq!(Sha256::digest(&reassembled).as_slice(), Sha256::digest(&payload).as_slice());
}

#[test]
fn ack_ranges_separated_by_a_wide_packet_number_gap_round_trip_and_still_complete() {
	use quic::wire::cursor::{Reader, Writer};
	use quic::wire::frame::StreamFrame;
	use quic::wire::ids::{Offset, PacketNumber};
	use quic::wire::packet::{Packet, RegularPacket};

	let now = Instant::now();
	let (_client, mut server) = handshake(now, Config::default());

	// Two halves of one contiguous stream, carried on packet numbers 300 packets apart:
	// the resulting ACK must merge into two ranges with a gap of 298, well past the
	// 255-per-block limit a single gap/block-length pair can encode (spec §4.1).
	let first_half = vec![7u8; 512];
	let second_half = vec![9u8; 512];
	let stream_id = StreamId(1);

	let send = |pn: u64, offset: u64, data: Vec<u8>, fin: bool| {
		let frame = Frame::Stream(StreamFrame { stream_id, offset: Offset(offset), fin, data });
		let regular = RegularPacket { connection_id: server.connection_id, version: None, nonce: None, packet_number: PacketNumber(pn), frames: vec![frame] };
		let mut w = Writer::new();
		Packet::Regular(regular).encode(&mut w);
		w.into_vec()
	};

	let mut received = Vec::new();
	received.extend(stream_data_events(&server.receive(now, &send(1, 0, first_half.clone(), false), client_addr())));
	received.extend(stream_data_events(&server.receive(now, &send(300, first_half.len() as u64, second_half.clone(), true), client_addr())));

	let reassembled: Vec<u8> = received.into_iter().flatten().collect();
	let expected: Vec<u8> = first_half.iter().chain(second_half.iter()).copied().collect();
	assert_eq!(reassembled, expected, "both halves are contiguous on the stream, so delivery must complete despite the packet-number gap between them");

	let ack_datagrams = sent_bytes(server.flush(now));
	assert_eq!(ack_datagrams.len(), 1);

	let mut r = Reader::new(&ack_datagrams[0]);
	let decoded = Packet::decode(&mut r, false).unwrap();
	let frames = match decoded {
		Packet::Regular(regular) => regular.frames,
		other => panic!("expected a regular packet carrying the ACK, got {other:?}"),
	};
	let ack = frames.into_iter().find_map(|f| match f {
		Frame::Ack(ack) => Some(ack),
		_ => None,
	});
	let ack = ack.expect("server must have a pending ACK after receiving both packets");

	assert_eq!(ack.ranges, vec![quic::wire::frame::AckRange { first: 300, last: 300 }, quic::wire::frame::AckRange { first: 1, last: 1 }]);
}

#[test]
fn flow_control_window_grows_on_rapid_arrivals() {
	use quic::wire::cursor::Writer;
	use quic::wire::ids::{Offset, PacketNumber};
	use quic::wire::packet::{Packet, RegularPacket};

	let now = Instant::now();
	let config = Config::default();
	let (_client, mut server) = handshake(now, config);

	// Drive STREAM frames straight into the server at a sub-2ms cadence (within
	// `2 * RttEstimator::smoothed()`'s default ~1ms), which is what
	// `FlowController::update_window_offset` requires to double the window each round.
	let target = StreamId(1);
	let mut offset = 0u64;
	let mut windows = Vec::new();
	let chunk = vec![0u8; 4000];

	for round in 0..4u64 {
		let frame = Frame::Stream(quic::wire::frame::StreamFrame { stream_id: target, offset: Offset(offset), fin: false, data: chunk.clone() });
		let regular = RegularPacket { connection_id: server.connection_id, version: None, nonce: None, packet_number: PacketNumber(round + 1), frames: vec![frame] };
		let mut w = Writer::new();
		Packet::Regular(regular).encode(&mut w);

		let at = now + Duration::from_millis(round);
		server.receive(at, &w.into_vec(), client_addr());
		offset += chunk.len() as u64;

		if let Some(window) = server.stream_receive_window(target) {
			windows.push(window);
		}
	}

	assert!(windows.windows(2).any(|w| w[1] > w[0]), "receive window should grow at least once under rapid arrivals, saw {windows:?}");
}
