//! Instance-scoped composition of the protocol entities and the
//! single-threaded, cooperative event loop.
//!
//! One loop iteration drains the I/O selector (the NS UDP socket, the L1
//! UNIX-domain link, the CTRL TCP connections), then advances the protocol
//! timers.  Handlers never block: they enqueue outbound buffers or arm a
//! timer.  The TDMA scheduler is driven separately by the L1 clock through
//! [`ProtocolStack::sched`].

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::config::Config;
use crate::ctrl::{CtrlCmd, CtrlDispatch, CtrlType};
use crate::gb::bssgp::{Bssgp, BssgpUser};
use crate::gb::ns::{NsInstance, NsTransport, NsUser, NsvcIdx};
use crate::ipa::{FrameBuf, IPA_PROTO_EXT_CTRL, IPA_PROTO_EXT_L1CTL, IPA_PROTO_OSMO, frame_osmo, unwrap_osmo};
use crate::msgb::Msgb;
use crate::sched::BurstScheduler;

/// Upcalls of the whole stack towards the embedding application.
pub trait StackUser: BssgpUser {
	/// An L1CTL primitive frame arrived over the L1 transport.
	fn l1_frame(&mut self, payload: &[u8]) {
		let _ = payload;
	}
	/// The NS alive procedure declared an NS-VC dead.
	fn nsvc_blocked(&mut self, nsvci: u16, nsei: u16) {
		let _ = (nsvci, nsei);
	}
}

struct UdpTx<'a>(&'a UdpSocket);

impl NsTransport for UdpTx<'_> {
	fn sendto(&mut self, addr: SocketAddr, data: &[u8]) -> io::Result<()> {
		self.0.send_to(data, addr)?;
		Ok(())
	}
}

/// NS upcall shim: defers unit-data into a queue so BSSGP can run with the
/// NS instance borrowed again (handlers receive handles, not references).
#[derive(Default)]
struct NsEvents {
	unitdata: Vec<(NsvcIdx, Msgb)>,
	blocked: Vec<(u16, u16)>,
}

impl NsUser for NsEvents {
	fn unit_data(&mut self, nsvc: NsvcIdx, msg: Msgb) {
		self.unitdata.push((nsvc, msg));
	}

	fn nsvc_blocked(&mut self, nsvci: u16, nsei: u16) {
		self.blocked.push((nsvci, nsei));
	}
}

struct CtrlConn {
	stream: TcpStream,
	fb: FrameBuf,
	dead: bool,
}

struct L1Link {
	stream: UnixStream,
	fb: FrameBuf,
}

pub struct ProtocolStack {
	pub cfg: Config,
	pub ns: NsInstance,
	pub bssgp: Bssgp,
	pub sched: BurstScheduler,
	pub ctrl: CtrlDispatch,
	ns_socket: UdpSocket,
	ctrl_listener: TcpListener,
	ctrl_conns: Vec<CtrlConn>,
	l1: Option<L1Link>,
}

impl ProtocolStack {
	pub fn new(cfg: Config) -> io::Result<ProtocolStack> {
		let ns_socket = UdpSocket::bind(cfg.ns_bind)?;
		ns_socket.set_nonblocking(true)?;

		let ctrl_listener = TcpListener::bind(cfg.ctrl_bind)?;
		ctrl_listener.set_nonblocking(true)?;

		let mut stack = ProtocolStack {
			cfg,
			ns: NsInstance::new(),
			bssgp: Bssgp::new(),
			sched: BurstScheduler::new(),
			ctrl: CtrlDispatch::new(),
			ns_socket,
			ctrl_listener,
			ctrl_conns: Vec::new(),
			l1: None,
		};

		if let Some(sgsn) = stack.cfg.sgsn_addr {
			let (nsei, nsvci) = (stack.cfg.nsei, stack.cfg.nsvci);
			let mut tx = UdpTx(&stack.ns_socket);
			stack
				.ns
				.connect(sgsn, nsei, nsvci, &mut tx)
				.map_err(|e| io::Error::other(e.to_string()))?;
		}

		Ok(stack)
	}

	pub fn ns_local_addr(&self) -> io::Result<SocketAddr> {
		self.ns_socket.local_addr()
	}

	pub fn ctrl_local_addr(&self) -> io::Result<SocketAddr> {
		self.ctrl_listener.local_addr()
	}

	/// Connects the L1 transport.
	pub fn connect_l1(&mut self) -> io::Result<()> {
		let stream = UnixStream::connect(&self.cfg.l1_socket)?;
		stream.set_nonblocking(true)?;
		self.l1 = Some(L1Link { stream, fb: FrameBuf::new() });
		Ok(())
	}

	/// Frames and transmits an L1 primitive.
	pub fn send_l1_prim(&mut self, payload: &[u8]) -> io::Result<()> {
		let Some(l1) = &mut self.l1 else {
			return Err(io::Error::from(io::ErrorKind::NotConnected));
		};
		l1.stream.write_all(&frame_osmo(payload, IPA_PROTO_EXT_L1CTL))
	}

	/// Hands a downlink LLC PDU to BSSGP; `msg.cb` selects the link.
	pub fn send_dl_ud(&mut self, msg: Msgb) -> io::Result<()> {
		let mut tx = UdpTx(&self.ns_socket);
		self.bssgp
			.tx_dl_ud(msg, &mut self.ns, &mut tx)
			.map_err(|e| io::Error::other(e.to_string()))
	}

	/// Number of open control connections.
	pub fn ctrl_conn_count(&self) -> usize {
		self.ctrl_conns.len()
	}

	/// Broadcasts a TRAP to every control connection except the originating
	/// one, if any.  `origin` is a connection index as used by the event
	/// loop; traps raised by the stack itself pass `None`.
	pub fn ctrl_trap(&mut self, variable: &str, value: &str, origin: Option<usize>) {
		let frame = frame_osmo(&CtrlCmd::trap(variable, value).make(), IPA_PROTO_EXT_CTRL);
		for (idx, conn) in self.ctrl_conns.iter_mut().enumerate() {
			if Some(idx) == origin {
				continue;
			}
			if conn.stream.write_all(&frame).is_err() {
				conn.dead = true;
			}
		}
		self.ctrl_conns.retain(|c| !c.dead);
	}

	/// One iteration of the event loop: waits for I/O readiness (bounded by
	/// `max_wait` and the earliest protocol timer), drains the ready
	/// descriptors, then fires due timers.
	pub fn run_once(&mut self, user: &mut dyn StackUser, max_wait: Duration) -> io::Result<()> {
		let now = Instant::now();
		let mut timeout = max_wait;
		if let Some(deadline) = self.ns.next_deadline() {
			timeout = timeout.min(deadline.saturating_duration_since(now));
		}

		let mut fds: SmallVec<[BorrowedFd<'_>; 8]> = SmallVec::new();
		fds.push(self.ns_socket.as_fd());
		fds.push(self.ctrl_listener.as_fd());
		if let Some(l1) = &self.l1 {
			fds.push(l1.stream.as_fd());
		}
		let conn_base = fds.len();
		for conn in &self.ctrl_conns {
			fds.push(conn.stream.as_fd());
		}

		let ready = crate::select::wait_readable(&fds, Some(timeout))?;
		drop(fds);

		let l1_idx = self.l1.as_ref().map(|_| 2);
		for idx in ready {
			if idx == 0 {
				self.drain_ns(user);
			} else if idx == 1 {
				self.accept_ctrl();
			} else if Some(idx) == l1_idx {
				self.drain_l1(user);
			} else {
				self.drain_ctrl_conn(idx - conn_base);
			}
		}
		self.ctrl_conns.retain(|c| !c.dead);

		// Advance the timers.
		let mut events = NsEvents::default();
		let mut tx = UdpTx(&self.ns_socket);
		self.ns.timer_tick(Instant::now(), &mut tx, &mut events);
		for (nsvci, nsei) in events.blocked {
			user.nsvc_blocked(nsvci, nsei);
		}

		Ok(())
	}

	/// Reads every pending NS datagram and routes unit-data into BSSGP.
	fn drain_ns(&mut self, user: &mut dyn StackUser) {
		let mut buf = [0u8; 4096];
		loop {
			let (len, saddr) = match self.ns_socket.recv_from(&mut buf) {
				Ok(res) => res,
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(e) => {
					warn!("NS socket receive error: {e}");
					break;
				}
			};

			let mut msg = Msgb::alloc(buf.len().max(len), "Abis/IP/GPRS-NS");
			msg.put_slice(&buf[..len]);

			let mut events = NsEvents::default();
			let mut tx = UdpTx(&self.ns_socket);
			if let Err(e) = self.ns.rcvmsg(msg, saddr, &mut tx, &mut events) {
				info!("dropping NS PDU from {saddr}: {e}");
			}

			for (_, mut msg) in events.unitdata {
				let mut tx = UdpTx(&self.ns_socket);
				if let Err(e) = self.bssgp.rcvmsg(&mut msg, &mut self.ns, &mut tx, user) {
					info!("dropping BSSGP PDU: {e}");
				}
			}
			for (nsvci, nsei) in events.blocked {
				user.nsvc_blocked(nsvci, nsei);
			}
		}
	}

	fn accept_ctrl(&mut self) {
		loop {
			match self.ctrl_listener.accept() {
				Ok((stream, peer)) => {
					info!("accepted control connection from {peer}");
					if stream.set_nonblocking(true).is_err() {
						continue;
					}
					self.ctrl_conns.push(CtrlConn {
						stream,
						fb: FrameBuf::new(),
						dead: false,
					});
				}
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(e) => {
					warn!("control accept failed: {e}");
					break;
				}
			}
		}
	}

	fn drain_l1(&mut self, user: &mut dyn StackUser) {
		let Some(l1) = &mut self.l1 else { return };
		let mut buf = [0u8; 4096];
		let mut closed = false;

		loop {
			match l1.stream.read(&mut buf) {
				Ok(0) => {
					warn!("L1 transport closed");
					closed = true;
					break;
				}
				Ok(n) => l1.fb.feed(&buf[..n]),
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
				Err(e) => {
					warn!("L1 transport read error: {e}");
					closed = true;
					break;
				}
			}
		}

		while let Some((proto, payload)) = l1.fb.take_frame() {
			match unwrap_osmo(proto, &payload) {
				Ok((IPA_PROTO_EXT_L1CTL, inner)) => user.l1_frame(inner),
				Ok((ext, _)) => warn!("unexpected extension protocol 0x{ext:02x} on L1 link"),
				Err(e) => warn!("bad L1 frame: {e}"),
			}
		}

		if closed {
			self.l1 = None;
		}
	}

	fn drain_ctrl_conn(&mut self, conn_idx: usize) {
		let mut buf = [0u8; 4096];
		let mut frames: SmallVec<[Vec<u8>; 4]> = SmallVec::new();

		{
			let Some(conn) = self.ctrl_conns.get_mut(conn_idx) else { return };
			loop {
				match conn.stream.read(&mut buf) {
					Ok(0) => {
						info!("control connection closed");
						conn.dead = true;
						break;
					}
					Ok(n) => conn.fb.feed(&buf[..n]),
					Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
					Err(e) => {
						warn!("control read error: {e}");
						conn.dead = true;
						break;
					}
				}
			}

			while let Some((proto, payload)) = conn.fb.take_frame() {
				if proto != IPA_PROTO_OSMO {
					warn!("protocol mismatch on control connection: 0x{proto:02x}");
					conn.dead = true;
					return;
				}
				match unwrap_osmo(proto, &payload) {
					Ok((IPA_PROTO_EXT_CTRL, inner)) => frames.push(inner.to_vec()),
					Ok((ext, _)) => {
						warn!("extended protocol mismatch: 0x{ext:02x}");
						conn.dead = true;
						return;
					}
					Err(_) => {
						conn.dead = true;
						return;
					}
				}
			}
		}

		for frame in frames {
			let reply = match CtrlCmd::parse(&frame) {
				Ok(cmd) if matches!(cmd.ctype, CtrlType::Get | CtrlType::Set) => {
					self.ctrl.handle(&cmd)
				}
				Ok(cmd) => {
					debug!("ignoring control message {:?}", cmd.ctype);
					continue;
				}
				Err(e) => CtrlCmd {
					ctype: CtrlType::Error,
					id: "err".into(),
					variable: String::new(),
					value: None,
					reply: Some(e.to_string()),
				},
			};

			let frame = frame_osmo(&reply.make(), IPA_PROTO_EXT_CTRL);
			if let Some(conn) = self.ctrl_conns.get_mut(conn_idx) {
				if conn.stream.write_all(&frame).is_err() {
					conn.dead = true;
				}
			}
		}
	}
}
