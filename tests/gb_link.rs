//! Wire-level tests of the Gb link: a plain UDP socket plays the BSS side
//! against a [`ProtocolStack`], and a TCP client exercises the control
//! interface.

use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use umcore::config::Config;
use umcore::ctrl::NodeKind;
use umcore::gb::bssgp::BssgpUser;
use umcore::gsm48::RaId;
use umcore::ipa::{self, FrameBuf, IPA_PROTO_EXT_CTRL};
use umcore::msgb::Msgb;
use umcore::stack::{ProtocolStack, StackUser};

#[derive(Default)]
struct Events {
	llc: Vec<(u32, Vec<u8>)>,
	blocked: Vec<(u16, u16)>,
}

impl BssgpUser for Events {
	fn llc_data(&mut self, msg: Msgb) {
		self.llc.push((msg.cb.tlli, msg.l4h().unwrap().to_vec()));
	}
}

impl StackUser for Events {
	fn nsvc_blocked(&mut self, nsvci: u16, nsei: u16) {
		self.blocked.push((nsvci, nsei));
	}
}

fn local_config() -> Config {
	Config {
		ns_bind: "127.0.0.1:0".parse().unwrap(),
		ctrl_bind: "127.0.0.1:0".parse().unwrap(),
		..Config::default()
	}
}

fn run_while(
	stack: &mut ProtocolStack,
	events: &mut Events,
	done: impl Fn(&ProtocolStack, &Events) -> bool,
) {
	let deadline = Instant::now() + Duration::from_secs(2);
	while !done(stack, events) && Instant::now() < deadline {
		stack.run_once(events, Duration::from_millis(20)).unwrap();
	}
}

/// NS-RESET with cause, NSVCI 5, NSEI 100.
const NS_RESET: [u8; 12] =
	[0x02, 0x00, 0x81, 0x01, 0x01, 0x82, 0x00, 0x05, 0x04, 0x82, 0x00, 0x64];

fn recv_datagram(socket: &UdpSocket) -> Vec<u8> {
	let mut buf = [0u8; 2048];
	let len = socket.recv(&mut buf).expect("expected a datagram");
	buf[..len].to_vec()
}

fn establish(stack: &mut ProtocolStack, events: &mut Events) -> UdpSocket {
	let bss = UdpSocket::bind("127.0.0.1:0").unwrap();
	bss.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
	bss.connect(stack.ns_local_addr().unwrap()).unwrap();

	bss.send(&NS_RESET).unwrap();
	run_while(stack, events, |stack, _| stack.ns.nsvc_by_nsei(100).is_some());

	// NS-RESET-ACK echoing NSVCI and NSEI.
	let ack = recv_datagram(&bss);
	assert_eq!(ack, vec![0x03, 0x01, 0x82, 0x00, 0x05, 0x04, 0x82, 0x00, 0x64]);
	bss
}

#[test]
fn bvc_reset_handshake() {
	let mut stack = ProtocolStack::new(local_config()).unwrap();
	let mut events = Events::default();
	let bss = establish(&mut stack, &mut events);

	// NS-UNITDATA on BVCI 0 carrying a BVC-RESET for BVCI 7 with the cell
	// identity 274-8, LAC 0x1022, RAC 0x11, CI 1.
	let mut pdu = vec![0x00, 0x00, 0x00, 0x00];
	pdu.extend_from_slice(&[
		0x22, 0x04, 0x82, 0x00, 0x07, 0x07, 0x81, 0x08, 0x08, 0x88, 0x72, 0xf4, 0x80, 0x10,
		0x22, 0x11, 0x00, 0x01,
	]);
	bss.send(&pdu).unwrap();
	run_while(&mut stack, &mut events, |stack, _| {
		stack.bssgp.ctx_by_bvci_nsei(7, 100).is_some()
	});

	let ctx = stack.bssgp.ctx_by_bvci_nsei(7, 100).expect("BTS context");
	assert_eq!(ctx.ra_id, RaId { mcc: 274, mnc: 8, lac: 0x1022, rac: 0x11 });
	assert_eq!(ctx.cell_id, 1);

	// The BVC-RESET-ACK comes back on the signalling BVCI.
	let ack = recv_datagram(&bss);
	assert_eq!(ack, vec![0x00, 0x00, 0x00, 0x00, 0x23, 0x04, 0x82, 0x00, 0x07]);
}

#[test]
fn uplink_unitdata_reaches_llc() {
	let mut stack = ProtocolStack::new(local_config()).unwrap();
	let mut events = Events::default();
	let bss = establish(&mut stack, &mut events);

	let mut pdu = vec![0x00, 0x00, 0x00, 0x07]; // NS UNITDATA, BVCI 7
	pdu.push(0x01); // BSSGP UL-UNITDATA
	pdu.extend_from_slice(&0xc0fe_1234u32.to_be_bytes());
	pdu.extend_from_slice(&[0x00, 0x00, 0x21]);
	pdu.extend_from_slice(&[0x08, 0x88, 0x72, 0xf4, 0x80, 0x10, 0x22, 0x11, 0x00, 0x01]);
	pdu.extend_from_slice(&[0x0e, 0x83, 0xaa, 0xbb, 0xcc]);

	bss.send(&pdu).unwrap();
	run_while(&mut stack, &mut events, |_, events| !events.llc.is_empty());

	assert_eq!(events.llc, vec![(0xc0fe_1234, vec![0xaa, 0xbb, 0xcc])]);
}

#[test]
fn downlink_unitdata_reaches_the_wire() {
	let mut stack = ProtocolStack::new(local_config()).unwrap();
	let mut events = Events::default();
	let bss = establish(&mut stack, &mut events);

	let mut msg = Msgb::alloc_headroom(1024, 128, "llc");
	msg.put_slice(&[0x11, 0x22, 0x33]);
	msg.cb.bvci = 7;
	msg.cb.nsei = 100;
	msg.cb.tlli = 0xdead_beef;
	stack.send_dl_ud(msg).unwrap();

	let wire = recv_datagram(&bss);
	assert_eq!(&wire[..4], &[0x00, 0x00, 0x00, 0x07]);
	assert_eq!(wire[4], 0x00); // DL-UNITDATA
	assert_eq!(&wire[5..9], &0xdead_beefu32.to_be_bytes());
	assert_eq!(&wire[16..], &[0x0e, 0x83, 0x11, 0x22, 0x33]);
}

/// Reads the next CTRL frame payload (without the extension octet) off a
/// client connection, reassembling through `fb`.
fn read_ctrl_frame(stream: &mut TcpStream, fb: &mut FrameBuf) -> Vec<u8> {
	let mut buf = [0u8; 512];
	let deadline = Instant::now() + Duration::from_secs(2);
	loop {
		if let Some((_, payload)) = fb.take_frame() {
			return payload[1..].to_vec();
		}
		assert!(Instant::now() < deadline, "timed out waiting for a CTRL frame");
		match stream.read(&mut buf) {
			Ok(0) => panic!("control connection closed"),
			Ok(n) => fb.feed(&buf[..n]),
			Err(ref e)
				if e.kind() == std::io::ErrorKind::WouldBlock
					|| e.kind() == std::io::ErrorKind::TimedOut => {}
			Err(e) => panic!("read failed: {e}"),
		}
	}
}

#[test]
fn ctrl_trap_skips_the_origin() {
	let mut stack = ProtocolStack::new(local_config()).unwrap();
	let mut events = Events::default();

	let mut first = TcpStream::connect(stack.ctrl_local_addr().unwrap()).unwrap();
	first.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
	run_while(&mut stack, &mut events, |stack, _| stack.ctrl_conn_count() == 1);

	let mut second = TcpStream::connect(stack.ctrl_local_addr().unwrap()).unwrap();
	second.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
	run_while(&mut stack, &mut events, |stack, _| stack.ctrl_conn_count() == 2);

	// A trap originated by the first connection reaches only the second;
	// a stack-originated trap reaches both.
	stack.ctrl_trap("net.alarm", "one", Some(0));
	stack.ctrl_trap("net.alarm", "two", None);

	let (mut fb1, mut fb2) = (FrameBuf::new(), FrameBuf::new());
	assert_eq!(read_ctrl_frame(&mut second, &mut fb2), b"TRAP 0 net.alarm one");
	assert_eq!(read_ctrl_frame(&mut second, &mut fb2), b"TRAP 0 net.alarm two");
	// The origin never saw its own trap: its first frame is the second one.
	assert_eq!(read_ctrl_frame(&mut first, &mut fb1), b"TRAP 0 net.alarm two");
}

#[test]
fn ctrl_get_set_over_tcp() {
	let mut stack = ProtocolStack::new(local_config()).unwrap();
	let mut events = Events::default();

	let value = std::rc::Rc::new(std::cell::RefCell::new(42u32));
	let (v_get, v_set) = (value.clone(), value.clone());
	stack.ctrl.register_rw(
		NodeKind::Net,
		"mnc",
		Box::new(move |_| Ok(v_get.borrow().to_string())),
		Box::new(move |_, val| {
			let parsed: u32 = val.parse().map_err(|_| "Invalid value.".to_string())?;
			*v_set.borrow_mut() = parsed;
			Ok(parsed.to_string())
		}),
	);

	let mut client = TcpStream::connect(stack.ctrl_local_addr().unwrap()).unwrap();
	client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
	client.set_nodelay(true).unwrap();

	client.write_all(&ipa::frame_osmo(b"GET 1 net.mnc", IPA_PROTO_EXT_CTRL)).unwrap();

	let mut fb = FrameBuf::new();
	let mut frame = None;
	let mut buf = [0u8; 512];
	let deadline = Instant::now() + Duration::from_secs(2);
	while frame.is_none() && Instant::now() < deadline {
		stack.run_once(&mut events, Duration::from_millis(20)).unwrap();
		match client.read(&mut buf) {
			Ok(n) => fb.feed(&buf[..n]),
			Err(ref e)
				if e.kind() == std::io::ErrorKind::WouldBlock
					|| e.kind() == std::io::ErrorKind::TimedOut => {}
			Err(e) => panic!("read failed: {e}"),
		}
		frame = fb.take_frame();
	}

	let (_, payload) = frame.expect("GET_REPLY frame");
	assert_eq!(&payload[1..], b"GET_REPLY 1 net.mnc 42");

	client.write_all(&ipa::frame_osmo(b"SET 2 net.mnc 262", IPA_PROTO_EXT_CTRL)).unwrap();
	run_while(&mut stack, &mut events, |_, _| *value.borrow() == 262);
	assert_eq!(*value.borrow(), 262);
}
