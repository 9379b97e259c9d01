//! GPRS Network Service (NS), 3GPP TS 08.16, over UDP.
//!
//! NS is an intermediate shim between BSSGP and the underlying medium.  It
//! does not do much apart from link supervision (ALIVE), congestion and
//! status indication.  Terms:
//!
//! - NSVC: NS Virtual Connection, NSVCI its identifier
//! - NSEI: NS Entity Identifier, one per Gb link end-point
//! - Blocked: the NS-VC cannot be used for user traffic
//! - Alive: ability of the NS-VC to provide communication
//!
//! There can be multiple BSSGP virtual connections over one NSVC; BSSGP
//! identifies them by the BVCI it passes down.  NSVCs live in an arena owned
//! by the [`NsInstance`]; handlers work with indexes, not references.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::gsm48::value_string;
use crate::msgb::Msgb;
use crate::timer::{TimerToken, TimerWheel};
use crate::tlv::{TlvDefinition, TlvError, TlvParsed, TlvType};

/// Default UDP port of the LLC-in-BSSGP-in-NS stack.
pub const NS_UDP_PORT: u16 = 23000;

const NS_ALLOC_SIZE: usize = 1024;

/// Without a response for this long, the ALIVE is retried.
pub const NS_TIMER_ALIVE: Duration = Duration::from_secs(3);
/// Period of the link test procedure.
pub const NS_TIMER_TEST: Duration = Duration::from_secs(30);
/// Consecutive Tns-alive expirations before the peer is declared dead.
pub const NS_ALIVE_RETRIES: u32 = 10;

/// NS PDU types, TS 08.16 section 9.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum NsPduType {
	Unitdata = 0x00,
	Reset = 0x02,
	ResetAck = 0x03,
	Block = 0x04,
	BlockAck = 0x05,
	Unblock = 0x06,
	UnblockAck = 0x07,
	Status = 0x08,
	Alive = 0x0a,
	AliveAck = 0x0b,
}

/// NS information elements, TS 08.16 section 10.3.
pub const NS_IE_CAUSE: u8 = 0x00;
pub const NS_IE_VCI: u8 = 0x01;
pub const NS_IE_PDU: u8 = 0x02;
pub const NS_IE_BVCI: u8 = 0x03;
pub const NS_IE_NSEI: u8 = 0x04;

/// Section 10.3.2, Table 13.
pub const NS_CAUSE_NAMES: &[(u8, &str)] = &[
	(0x00, "Transit network failure"),
	(0x01, "O&M intervention"),
	(0x02, "Equipment failure"),
	(0x03, "NS-VC blocked"),
	(0x04, "NS-VC unknown"),
	(0x05, "BVCI unknown"),
	(0x08, "Semantically incorrect PDU"),
	(0x0a, "PDU not compatible with protocol state"),
	(0x0b, "Protocol error, unspecified"),
	(0x0c, "Invalid essential IE"),
	(0x0d, "Missing essential IE"),
];

fn ns_att_tlvdef() -> TlvDefinition {
	TlvDefinition::from_entries(&[
		(NS_IE_CAUSE, TlvType::TvLv),
		(NS_IE_VCI, TlvType::TvLv),
		(NS_IE_PDU, TlvType::TvLv),
		(NS_IE_BVCI, TlvType::TvLv),
		(NS_IE_NSEI, TlvType::TvLv),
	])
}

bitflags! {
	/// NS-VC state, local or as reported by the peer.
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub struct NsvcState: u8 {
		const BLOCKED = 0x01;
		const ALIVE = 0x02;
	}
}

#[derive(Debug, Error)]
pub enum NsError {
	#[error("datagram from unknown peer {0} is not a RESET")]
	UnknownPeer(SocketAddr),
	#[error("NS PDU too short")]
	ShortMessage,
	#[error("unknown NS PDU type 0x{0:02x}")]
	UnknownPdu(u8),
	#[error("missing mandatory IE in NS PDU")]
	MissingIe,
	#[error("no NS-VC for NSEI {0}")]
	UnknownNsei(u16),
	#[error("TLV parse failure: {0}")]
	Tlv(#[from] TlvError),
	#[error(transparent)]
	Io(#[from] io::Error),
}

/// Index of an NSVC within its instance.
pub type NsvcIdx = usize;

/// One NS virtual connection.
pub struct Nsvc {
	pub nsvci: u16,
	pub nsei: u16,
	pub remote: SocketAddr,
	pub state: NsvcState,
	pub remote_state: NsvcState,
	/// Whether the running timer is Tns-alive (true) or Tns-test (false).
	timer_is_tns_alive: bool,
	alive_retries: u32,
	pub remote_is_sgsn: bool,
	alive_timer: Option<TimerToken>,
}

impl Nsvc {
	fn new(nsvci: u16, remote: SocketAddr) -> Nsvc {
		Nsvc {
			nsvci,
			nsei: 0,
			remote,
			// Before the RESET procedure: blocked and dead.
			state: NsvcState::BLOCKED,
			remote_state: NsvcState::empty(),
			timer_is_tns_alive: false,
			alive_retries: 0,
			remote_is_sgsn: false,
			alive_timer: None,
		}
	}
}

/// Datagram output of the NS instance.  The production implementation wraps
/// a UDP socket; tests record.
pub trait NsTransport {
	fn sendto(&mut self, addr: SocketAddr, data: &[u8]) -> io::Result<()>;
}

/// Upcalls of the NS instance.
pub trait NsUser {
	/// NS-UNITDATA: `msg.cb` carries NSEI and BVCI, the L3 mark points at
	/// the inner (BSSGP) PDU.
	fn unit_data(&mut self, nsvc: NsvcIdx, msg: Msgb);
	/// The alive procedure has given up on an NS-VC.
	fn nsvc_blocked(&mut self, nsvci: u16, nsei: u16);
}

/// One NS entity, owning its NSVC arena and alive timers.
pub struct NsInstance {
	nsvcs: Vec<Nsvc>,
	wheel: TimerWheel<NsvcIdx>,
	tlvdef: TlvDefinition,
	/// PDUs dropped due to parse or state errors.
	pub dropped: u64,
	/// Alive procedures given up after the retry limit.
	pub alive_timeouts: u64,
}

impl NsInstance {
	pub fn new() -> NsInstance {
		NsInstance {
			nsvcs: Vec::new(),
			wheel: TimerWheel::new(),
			tlvdef: ns_att_tlvdef(),
			dropped: 0,
			alive_timeouts: 0,
		}
	}

	pub fn nsvc(&self, idx: NsvcIdx) -> &Nsvc {
		&self.nsvcs[idx]
	}

	pub fn nsvc_by_nsvci(&self, nsvci: u16) -> Option<NsvcIdx> {
		self.nsvcs.iter().position(|n| n.nsvci == nsvci)
	}

	pub fn nsvc_by_nsei(&self, nsei: u16) -> Option<NsvcIdx> {
		self.nsvcs.iter().position(|n| n.nsei == nsei)
	}

	pub fn nsvc_by_rem_addr(&self, addr: SocketAddr) -> Option<NsvcIdx> {
		self.nsvcs.iter().position(|n| n.remote == addr)
	}

	fn nsvc_create(&mut self, nsvci: u16, remote: SocketAddr) -> NsvcIdx {
		self.nsvcs.push(Nsvc::new(nsvci, remote));
		self.nsvcs.len() - 1
	}

	/// Earliest alive-timer deadline, for the selector.
	pub fn next_deadline(&mut self) -> Option<Instant> {
		self.wheel.next_deadline()
	}

	fn tx(&mut self, idx: NsvcIdx, msg: &Msgb, tx: &mut dyn NsTransport) -> Result<(), NsError> {
		let addr = self.nsvcs[idx].remote;
		tx.sendto(addr, msg.data())?;
		Ok(())
	}

	fn tx_simple(
		&mut self,
		idx: NsvcIdx,
		pdu_type: NsPduType,
		tx: &mut dyn NsTransport,
	) -> Result<(), NsError> {
		let mut msg = Msgb::alloc(NS_ALLOC_SIZE, "GPRS/NS");
		msg.put_u8(pdu_type.into());
		self.tx(idx, &msg, tx)
	}

	/// Section 9.2.6.
	fn tx_reset_ack(&mut self, idx: NsvcIdx, tx: &mut dyn NsTransport) -> Result<(), NsError> {
		let (nsvci, nsei) = (self.nsvcs[idx].nsvci, self.nsvcs[idx].nsei);
		debug!("NS RESET ACK nsvci={nsvci} nsei={nsei}");

		let mut msg = Msgb::alloc(NS_ALLOC_SIZE, "GPRS/NS");
		msg.put_u8(NsPduType::ResetAck.into());
		msg.tvlv_put(NS_IE_VCI, &nsvci.to_be_bytes());
		msg.tvlv_put(NS_IE_NSEI, &nsei.to_be_bytes());
		self.tx(idx, &msg, tx)
	}

	/// Section 9.2.10: transmit side / NS-UNITDATA request.  `msg.cb` must
	/// carry the NSEI and BVCI.
	pub fn sendmsg(&mut self, mut msg: Msgb, tx: &mut dyn NsTransport) -> Result<(), NsError> {
		let nsei = msg.cb.nsei;
		let idx = self.nsvc_by_nsei(nsei).ok_or(NsError::UnknownNsei(nsei))?;

		let bvci = msg.cb.bvci;
		let hdr = msg.push(4);
		hdr[0] = NsPduType::Unitdata.into();
		hdr[1] = 0; /* spare */
		hdr[2..4].copy_from_slice(&bvci.to_be_bytes());

		self.tx(idx, &msg, tx)
	}

	/// Establishes a connection (from the BSS) to the SGSN and initiates
	/// the RESET procedure.
	pub fn connect(
		&mut self,
		dest: SocketAddr,
		nsei: u16,
		nsvci: u16,
		tx: &mut dyn NsTransport,
	) -> Result<NsvcIdx, NsError> {
		let idx = self
			.nsvc_by_rem_addr(dest)
			.unwrap_or_else(|| self.nsvc_create(nsvci, dest));
		self.nsvcs[idx].nsei = nsei;
		self.nsvcs[idx].nsvci = nsvci;
		self.nsvcs[idx].remote_is_sgsn = true;

		self.tx_simple(idx, NsPduType::Reset, tx)?;
		Ok(idx)
	}

	/// Main entry point for incoming NS datagrams.
	pub fn rcvmsg(
		&mut self,
		mut msg: Msgb,
		saddr: SocketAddr,
		tx: &mut dyn NsTransport,
		user: &mut dyn NsUser,
	) -> Result<(), NsError> {
		if msg.is_empty() {
			self.dropped += 1;
			return Err(NsError::ShortMessage);
		}
		msg.set_l2h(0);
		let pdu_type = msg.data()[0];

		let idx = match self.nsvc_by_rem_addr(saddr) {
			Some(idx) => idx,
			None => {
				// Only the RESET procedure creates a new NSVC.
				if pdu_type != u8::from(NsPduType::Reset) {
					self.dropped += 1;
					return Err(NsError::UnknownPeer(saddr));
				}
				let idx = self.nsvc_create(0xffff, saddr);
				return self.rx_reset(idx, &msg, tx);
			}
		};
		msg.cb.nsei = self.nsvcs[idx].nsei;

		let pdu_type = NsPduType::try_from(pdu_type).map_err(|_| {
			self.dropped += 1;
			NsError::UnknownPdu(pdu_type)
		})?;

		match pdu_type {
			NsPduType::Alive => {
				// The remote end inquires whether we are still alive.
				self.tx_simple(idx, NsPduType::AliveAck, tx)
			}
			NsPduType::AliveAck => {
				// Stop Tns-alive, start Tns-test.
				let nsvc = &mut self.nsvcs[idx];
				if let Some(token) = nsvc.alive_timer.take() {
					self.wheel.cancel(token);
				}
				nsvc.timer_is_tns_alive = false;
				nsvc.alive_retries = 0;
				nsvc.alive_timer = Some(self.wheel.schedule(NS_TIMER_TEST, idx));
				Ok(())
			}
			NsPduType::Unitdata => self.rx_unitdata(idx, msg, user),
			NsPduType::Status => self.rx_status(idx, &msg),
			NsPduType::Reset => self.rx_reset(idx, &msg, tx),
			NsPduType::ResetAck => {
				debug!("NS RESET ACK");
				self.nsvcs[idx].remote_state = NsvcState::BLOCKED | NsvcState::ALIVE;
				Ok(())
			}
			NsPduType::Unblock => {
				// Section 7.2: unblocking procedure.
				debug!("NS UNBLOCK");
				self.nsvcs[idx].state.remove(NsvcState::BLOCKED);
				self.tx_simple(idx, NsPduType::UnblockAck, tx)
			}
			NsPduType::UnblockAck => {
				debug!("NS UNBLOCK ACK");
				self.nsvcs[idx].remote_state = NsvcState::ALIVE;
				Ok(())
			}
			NsPduType::Block => {
				debug!("NS BLOCK");
				self.nsvcs[idx].state.insert(NsvcState::BLOCKED);
				// Answered with an UNBLOCK_ACK, not a BLOCK_ACK.
				self.tx_simple(idx, NsPduType::UnblockAck, tx)
			}
			NsPduType::BlockAck => {
				debug!("NS BLOCK ACK");
				self.nsvcs[idx].remote_state = NsvcState::BLOCKED | NsvcState::ALIVE;
				Ok(())
			}
		}
	}

	/// Section 9.2.10: receive side.
	fn rx_unitdata(
		&mut self,
		idx: NsvcIdx,
		mut msg: Msgb,
		user: &mut dyn NsUser,
	) -> Result<(), NsError> {
		if msg.len() < 4 {
			self.dropped += 1;
			return Err(NsError::ShortMessage);
		}
		// One spare octet between PDU type and BVCI.
		let data = msg.data();
		let bvci = u16::from_be_bytes([data[2], data[3]]);
		msg.cb.bvci = bvci;
		msg.set_l3h(4);

		user.unit_data(idx, msg);
		Ok(())
	}

	/// Section 9.2.7.
	fn rx_status(&mut self, _idx: NsvcIdx, msg: &Msgb) -> Result<(), NsError> {
		let mut tp = TlvParsed::new();
		tp.parse(&self.tlvdef, &msg.data()[1..], None, None)?;

		let Some(cause) = tp.val(NS_IE_CAUSE).and_then(|v| v.first()) else {
			info!("NS STATUS with missing cause IE");
			return Err(NsError::MissingIe);
		};
		info!("NS STATUS cause={}", value_string(NS_CAUSE_NAMES, *cause));
		Ok(())
	}

	/// Section 7.3: the RESET procedure updates the NSVC identity, marks it
	/// blocked and alive, and starts the test procedure.
	fn rx_reset(&mut self, idx: NsvcIdx, msg: &Msgb, tx: &mut dyn NsTransport) -> Result<(), NsError> {
		let mut tp = TlvParsed::new();
		tp.parse(&self.tlvdef, &msg.data()[1..], None, None)?;

		let (Some(cause), Some(vci), Some(nsei)) =
			(tp.val(NS_IE_CAUSE), tp.val(NS_IE_VCI), tp.val(NS_IE_NSEI))
		else {
			warn!("NS RESET with missing mandatory IE");
			self.dropped += 1;
			return Err(NsError::MissingIe);
		};
		if cause.is_empty() || vci.len() < 2 || nsei.len() < 2 {
			self.dropped += 1;
			return Err(NsError::MissingIe);
		}

		let nsvc = &mut self.nsvcs[idx];
		nsvc.state = NsvcState::BLOCKED | NsvcState::ALIVE;
		nsvc.nsvci = u16::from_be_bytes([vci[0], vci[1]]);
		nsvc.nsei = u16::from_be_bytes([nsei[0], nsei[1]]);
		nsvc.alive_retries = 0;
		nsvc.timer_is_tns_alive = false;

		debug!(
			"NS RESET cause={}, NSVCI={}, NSEI={}",
			value_string(NS_CAUSE_NAMES, cause[0]),
			nsvc.nsvci,
			nsvc.nsei
		);

		// Start the test procedure.
		if let Some(token) = nsvc.alive_timer.take() {
			self.wheel.cancel(token);
		}
		nsvc.alive_timer = Some(self.wheel.schedule(NS_TIMER_ALIVE, idx));

		self.tx_reset_ack(idx, tx)
	}

	/// Fires due alive timers.  Call periodically from the event loop.
	pub fn timer_tick(&mut self, now: Instant, tx: &mut dyn NsTransport, user: &mut dyn NsUser) {
		for idx in self.wheel.expired(now) {
			self.alive_timer_expired(idx, tx, user);
		}
	}

	fn alive_timer_expired(&mut self, idx: NsvcIdx, tx: &mut dyn NsTransport, user: &mut dyn NsUser) {
		let nsvc = &mut self.nsvcs[idx];
		nsvc.alive_timer = None;

		if nsvc.timer_is_tns_alive {
			// Tns-alive expired without a response.
			nsvc.alive_retries += 1;
			if nsvc.alive_retries >= NS_ALIVE_RETRIES {
				// Mark as dead and blocked.
				nsvc.state = NsvcState::BLOCKED;
				warn!("Tns-alive more than {NS_ALIVE_RETRIES} retries, blocking NS-VC");
				let (nsvci, nsei) = (nsvc.nsvci, nsvc.nsei);
				self.alive_timeouts += 1;
				user.nsvc_blocked(nsvci, nsei);
				return;
			}
		}

		// Tns-test case: send an NS-ALIVE.
		if let Err(e) = self.tx_simple(idx, NsPduType::Alive, tx) {
			warn!("failed to transmit NS-ALIVE: {e}");
		}
		let nsvc = &mut self.nsvcs[idx];
		nsvc.timer_is_tns_alive = true;
		nsvc.alive_timer = Some(self.wheel.schedule(NS_TIMER_ALIVE, idx));
	}
}

impl Default for NsInstance {
	fn default() -> Self {
		NsInstance::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Default)]
	struct MockTx {
		sent: Vec<(SocketAddr, Vec<u8>)>,
	}

	impl NsTransport for MockTx {
		fn sendto(&mut self, addr: SocketAddr, data: &[u8]) -> io::Result<()> {
			self.sent.push((addr, data.to_vec()));
			Ok(())
		}
	}

	#[derive(Default)]
	struct MockUser {
		unitdata: Vec<(NsvcIdx, u16, Vec<u8>)>,
		blocked: Vec<(u16, u16)>,
	}

	impl NsUser for MockUser {
		fn unit_data(&mut self, nsvc: NsvcIdx, msg: Msgb) {
			self.unitdata.push((nsvc, msg.cb.bvci, msg.l3h().unwrap().to_vec()));
		}

		fn nsvc_blocked(&mut self, nsvci: u16, nsei: u16) {
			self.blocked.push((nsvci, nsei));
		}
	}

	fn peer() -> SocketAddr {
		"192.168.100.239:23000".parse().unwrap()
	}

	fn rx(ns: &mut NsInstance, bytes: &[u8], tx: &mut MockTx, user: &mut MockUser) {
		let mut msg = Msgb::alloc(NS_ALLOC_SIZE, "test");
		msg.put_slice(bytes);
		ns.rcvmsg(msg, peer(), tx, user).unwrap();
	}

	/// NS-RESET with cause, NSVCI 5, NSEI 100.
	fn reset_pdu() -> Vec<u8> {
		vec![0x02, 0x00, 0x81, 0x01, 0x01, 0x82, 0x00, 0x05, 0x04, 0x82, 0x00, 0x64]
	}

	#[test]
	fn reset_creates_nsvc_and_acks() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();
		let mut user = MockUser::default();

		rx(&mut ns, &reset_pdu(), &mut tx, &mut user);

		let idx = ns.nsvc_by_nsvci(5).unwrap();
		assert_eq!(ns.nsvc(idx).nsei, 100);
		assert_eq!(ns.nsvc(idx).state, NsvcState::BLOCKED | NsvcState::ALIVE);

		// RESET_ACK echoing NSVCI and NSEI as TvLV.
		let ack = &tx.sent[0].1;
		assert_eq!(ack[0], 0x03);
		assert_eq!(&ack[1..], &[0x01, 0x82, 0x00, 0x05, 0x04, 0x82, 0x00, 0x64]);
	}

	#[test]
	fn non_reset_from_unknown_peer_is_dropped() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();
		let mut user = MockUser::default();

		let mut msg = Msgb::alloc(NS_ALLOC_SIZE, "test");
		msg.put_u8(0x0a);
		assert!(matches!(
			ns.rcvmsg(msg, peer(), &mut tx, &mut user),
			Err(NsError::UnknownPeer(_))
		));
		assert_eq!(ns.dropped, 1);
	}

	#[test]
	fn alive_is_acked() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();
		let mut user = MockUser::default();

		rx(&mut ns, &reset_pdu(), &mut tx, &mut user);
		rx(&mut ns, &[0x0a], &mut tx, &mut user);
		assert_eq!(tx.sent.last().unwrap().1, vec![0x0b]);
	}

	#[test]
	fn unitdata_goes_up_with_bvci() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();
		let mut user = MockUser::default();

		rx(&mut ns, &reset_pdu(), &mut tx, &mut user);
		rx(&mut ns, &[0x00, 0x00, 0x12, 0x34, 0xde, 0xad], &mut tx, &mut user);

		let (_, bvci, payload) = &user.unitdata[0];
		assert_eq!(*bvci, 0x1234);
		assert_eq!(payload, &vec![0xde, 0xad]);
	}

	#[test]
	fn sendmsg_prepends_unitdata_header() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();
		let mut user = MockUser::default();
		rx(&mut ns, &reset_pdu(), &mut tx, &mut user);

		let mut msg = Msgb::alloc_headroom(128, 32, "test");
		msg.put_slice(&[0xca, 0xfe]);
		msg.cb.nsei = 100;
		msg.cb.bvci = 0x0007;
		ns.sendmsg(msg, &mut tx).unwrap();

		assert_eq!(tx.sent.last().unwrap().1, vec![0x00, 0x00, 0x00, 0x07, 0xca, 0xfe]);
	}

	#[test]
	fn block_answered_with_unblock_ack() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();
		let mut user = MockUser::default();
		rx(&mut ns, &reset_pdu(), &mut tx, &mut user);

		rx(&mut ns, &[0x04], &mut tx, &mut user);
		let idx = ns.nsvc_by_nsvci(5).unwrap();
		assert!(ns.nsvc(idx).state.contains(NsvcState::BLOCKED));
		assert_eq!(tx.sent.last().unwrap().1, vec![0x07]);
	}

	#[test]
	fn alive_timeout_blocks_after_ten_frames() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();
		let mut user = MockUser::default();
		rx(&mut ns, &reset_pdu(), &mut tx, &mut user);
		tx.sent.clear();

		// Suppress all ALIVE_ACKs and let the timer run 11 periods.
		let base = Instant::now();
		for i in 1..=11u32 {
			ns.timer_tick(base + NS_TIMER_ALIVE * i + Duration::from_millis(1), &mut tx, &mut user);
		}

		let alives = tx.sent.iter().filter(|(_, d)| d == &vec![0x0a]).count();
		assert_eq!(alives, 10);

		let idx = ns.nsvc_by_nsvci(5).unwrap();
		assert_eq!(ns.nsvc(idx).state, NsvcState::BLOCKED);
		assert_eq!(user.blocked, vec![(5, 100)]);

		// The procedure has stopped; no further timers pending.
		ns.timer_tick(base + NS_TIMER_ALIVE * 20, &mut tx, &mut user);
		assert_eq!(tx.sent.len(), 10);
	}

	#[test]
	fn alive_ack_restarts_test_cycle() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();
		let mut user = MockUser::default();
		rx(&mut ns, &reset_pdu(), &mut tx, &mut user);

		let base = Instant::now();
		ns.timer_tick(base + NS_TIMER_ALIVE + Duration::from_millis(1), &mut tx, &mut user);
		assert_eq!(tx.sent.last().unwrap().1, vec![0x0a]);

		rx(&mut ns, &[0x0b], &mut tx, &mut user);
		let idx = ns.nsvc_by_nsvci(5).unwrap();
		assert!(!ns.nsvc(idx).timer_is_tns_alive);
		assert_eq!(ns.nsvc(idx).alive_retries, 0);
	}

	#[test]
	fn connect_sends_reset() {
		let mut ns = NsInstance::new();
		let mut tx = MockTx::default();

		let idx = ns.connect(peer(), 100, 5, &mut tx).unwrap();
		assert!(ns.nsvc(idx).remote_is_sgsn);
		assert_eq!(tx.sent[0].1, vec![0x02]);
	}
}
