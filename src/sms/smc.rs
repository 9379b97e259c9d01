//! SMS Connection Management (CP) state machine, TS 04.11 section 5.
//!
//! Notes on release: whenever the machine returns to IDLE, the MM connection
//! is released with MMSMS-REL-REQ.  The exception is MMSMS-REL-IND from the
//! lower layer, after which the machine goes IDLE without a release request.
//! Entering IDLE always cancels the running TC1* timer.

use std::time::Duration;

use crate::msgb::Msgb;
use crate::prim::{MmsmsOp, MnsmsOp};
use crate::sms::{CP_CAUSE_MSGTYPE_NOTEXIST, CP_CAUSE_NAMES, MT_CP_ACK, MT_CP_DATA, MT_CP_ERROR};
use crate::timer::{TimerToken, TimerWheel};

/// TC1A of TS 04.11 section 10.
pub const TMR_TC1A: Duration = Duration::from_secs(40);
/// CP-DATA retransmissions before giving up.
pub const MAX_SMS_RETRY: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpState {
	Idle,
	MmConnPending,
	WaitCpAck,
	MmEstablished,
}

impl CpState {
	fn as_str(self) -> &'static str {
		match self {
			CpState::Idle => "IDLE",
			CpState::MmConnPending => "MM_CONN_PENDING",
			CpState::WaitCpAck => "WAIT_CP_ACK",
			CpState::MmEstablished => "MM_ESTABLISHED",
		}
	}
}

/// The environment an SMC instance talks to: the relay layer above and the
/// MM sublayer below.
pub trait SmcUser {
	/// MNSMS-* indication towards the relay layer.
	fn mn_recv(&mut self, op: MnsmsOp, msg: Msgb);
	/// MMSMS-* request towards the MM sublayer.  `cp_msg_type` names the CP
	/// message carried by a DATA-REQ, 0 otherwise.
	fn mm_send(&mut self, op: MmsmsOp, msg: Msgb, cp_msg_type: u8);
}

fn msgb_alloc() -> Msgb {
	Msgb::alloc_headroom(256, 64, "GSM 04.11")
}

/// One CP entity (one transaction).
pub struct Smc {
	network: bool,
	cp_state: CpState,
	cp_msg: Option<Msgb>,
	/// Release pending until established or released.
	cp_rel: bool,
	cp_retx: u8,
	cp_max_retr: u8,
	cp_tc1: Duration,
	cp_timer: Option<TimerToken>,
}

impl Smc {
	pub fn new(network: bool) -> Smc {
		info!("new SMC instance ({})", if network { "network" } else { "mobile" });
		Smc {
			network,
			cp_state: CpState::Idle,
			cp_msg: None,
			cp_rel: false,
			cp_retx: 0,
			cp_max_retr: MAX_SMS_RETRY,
			cp_tc1: TMR_TC1A / (u32::from(MAX_SMS_RETRY) + 1),
			cp_timer: None,
		}
	}

	pub fn state(&self) -> CpState {
		self.cp_state
	}

	pub fn is_network(&self) -> bool {
		self.network
	}

	/// Drops any pending message and timer.
	pub fn clear<K: Copy>(&mut self, wheel: &mut TimerWheel<K>) {
		if let Some(token) = self.cp_timer.take() {
			wheel.cancel(token);
		}
		if self.cp_msg.take().is_some() {
			info!("dropping pending CP message");
		}
	}

	fn new_cp_state<K: Copy>(&mut self, state: CpState, wheel: &mut TimerWheel<K>) {
		info!("new CP state {} -> {}", self.cp_state.as_str(), state.as_str());
		self.cp_state = state;

		if state == CpState::Idle {
			if let Some(token) = self.cp_timer.take() {
				wheel.cancel(token);
			}
		}
	}

	fn tx_cp_error(&mut self, cause: u8, user: &mut dyn SmcUser) {
		warn!(
			"TX CP-ERROR, cause {} ({})",
			cause,
			crate::gsm48::value_string(CP_CAUSE_NAMES, cause)
		);
		let mut nmsg = msgb_alloc();
		nmsg.put_u8(cause);
		user.mm_send(MmsmsOp::DataReq, nmsg, MT_CP_ERROR);
	}

	/// Clones the stored message, (re)starts TC1* and hands a CP-DATA down.
	fn send_stored_msg<K: Copy>(
		&mut self,
		wheel: &mut TimerWheel<K>,
		key: K,
		user: &mut dyn SmcUser,
	) {
		let Some(stored) = &self.cp_msg else {
			error!("no stored CP message to send, dropping transaction");
			return;
		};
		let stored_data = stored.data().to_vec();

		info!("send CP-DATA");
		if self.cp_state != CpState::WaitCpAck {
			self.cp_retx = 0;
		}
		self.new_cp_state(CpState::WaitCpAck, wheel);

		if let Some(token) = self.cp_timer.take() {
			wheel.cancel(token);
		}
		self.cp_timer = Some(wheel.schedule(self.cp_tc1, key));

		let mut nmsg = msgb_alloc();
		nmsg.put_slice(&stored_data);
		user.mm_send(MmsmsOp::DataReq, nmsg, MT_CP_DATA);
	}

	/// Message from the upper (MNSMS) SAP.
	pub fn send<K: Copy>(
		&mut self,
		op: MnsmsOp,
		msg: Msgb,
		wheel: &mut TimerWheel<K>,
		key: K,
		user: &mut dyn SmcUser,
	) {
		match (op, self.cp_state) {
			(MnsmsOp::EstReq, CpState::Idle) => {
				if self.cp_msg.replace(msg).is_some() {
					error!("EST-REQ, but a CP message is already stored");
				}
				self.new_cp_state(CpState::MmConnPending, wheel);
				self.cp_rel = false;
				user.mm_send(MmsmsOp::EstReq, msgb_alloc(), 0);
			}
			(MnsmsOp::RelReq, _) => {
				match self.cp_state {
					// Discard silently.
					CpState::Idle => {}
					CpState::MmEstablished => {
						self.cp_msg = None;
						self.new_cp_state(CpState::Idle, wheel);
						user.mm_send(MmsmsOp::RelReq, msgb_alloc(), 0);
					}
					// Store the release until established or released.
					_ => {
						warn!("cannot release yet in state {}", self.cp_state.as_str());
						self.cp_rel = true;
					}
				}
			}
			(MnsmsOp::DataReq, CpState::MmEstablished) => {
				if self.cp_msg.replace(msg).is_some() {
					error!("DATA-REQ, but a CP message is already stored");
				}
				self.send_stored_msg(wheel, key, user);
			}
			(MnsmsOp::AbortReq, state) if state != CpState::Idle => {
				self.cp_msg = None;
				self.new_cp_state(CpState::Idle, wheel);
				user.mm_send(MmsmsOp::DataReq, msg, MT_CP_ERROR);
				user.mm_send(MmsmsOp::RelReq, msgb_alloc(), 0);
			}
			_ => {
				warn!("{:?} unhandled in state {}", op, self.cp_state.as_str());
			}
		}
	}

	/// Message from the lower (MMSMS) SAP.  `cp_msg_type` discriminates the
	/// CP message carried by EST-IND / DATA-IND.
	pub fn recv<K: Copy>(
		&mut self,
		op: MmsmsOp,
		msg: Msgb,
		cp_msg_type: u8,
		wheel: &mut TimerWheel<K>,
		key: K,
		user: &mut dyn SmcUser,
	) {
		match (op, cp_msg_type, self.cp_state) {
			(MmsmsOp::EstCnf, _, CpState::MmConnPending) => {
				self.send_stored_msg(wheel, key, user);
			}
			(MmsmsOp::EstInd, MT_CP_DATA, CpState::Idle)
			| (MmsmsOp::DataInd, MT_CP_DATA, CpState::MmEstablished) => {
				self.rx_cp_data(msg, wheel, user);
			}
			(MmsmsOp::DataInd, MT_CP_ACK, CpState::WaitCpAck) => {
				self.rx_cp_ack(wheel, user);
			}
			(MmsmsOp::DataInd, MT_CP_ERROR, _) => {
				self.rx_cp_error(msg, wheel, user);
			}
			(MmsmsOp::RelInd, _, state) if state != CpState::Idle => {
				info!("MM layer is released");
				self.cp_msg = None;
				self.new_cp_state(CpState::Idle, wheel);
				user.mn_recv(MnsmsOp::ErrorInd, msgb_alloc());
			}
			(op, cp_msg_type, state) => {
				warn!(
					"{:?}/{} unhandled in state {}",
					op,
					cp_msg_type,
					state.as_str()
				);
				if matches!(op, MmsmsOp::EstInd | MmsmsOp::DataInd) {
					// TS 04.11 5.3.4: unknown message type.
					self.new_cp_state(CpState::Idle, wheel);
					self.tx_cp_error(CP_CAUSE_MSGTYPE_NOTEXIST, user);
					user.mn_recv(MnsmsOp::ErrorInd, msgb_alloc());
					user.mm_send(MmsmsOp::RelReq, msgb_alloc(), 0);
				}
			}
		}
	}

	fn rx_cp_data<K: Copy>(&mut self, msg: Msgb, wheel: &mut TimerWheel<K>, user: &mut dyn SmcUser) {
		info!("received CP-DATA");
		let mut mt = MnsmsOp::DataInd;
		if self.cp_state == CpState::Idle {
			self.new_cp_state(CpState::MmEstablished, wheel);
			mt = MnsmsOp::EstInd;
			self.cp_rel = false;
		}
		user.mm_send(MmsmsOp::DataReq, msgb_alloc(), MT_CP_ACK);
		user.mn_recv(mt, msg);
	}

	fn rx_cp_ack<K: Copy>(&mut self, wheel: &mut TimerWheel<K>, user: &mut dyn SmcUser) {
		info!("received CP-ACK");
		self.cp_msg = None;
		self.new_cp_state(CpState::MmEstablished, wheel);
		if let Some(token) = self.cp_timer.take() {
			wheel.cancel(token);
		}

		if self.cp_rel {
			info!("pending release");
			self.new_cp_state(CpState::Idle, wheel);
			user.mm_send(MmsmsOp::RelReq, msgb_alloc(), 0);
		}
	}

	fn rx_cp_error<K: Copy>(
		&mut self,
		msg: Msgb,
		wheel: &mut TimerWheel<K>,
		user: &mut dyn SmcUser,
	) {
		info!("received CP-ERROR");
		self.cp_msg = None;
		self.new_cp_state(CpState::Idle, wheel);
		user.mn_recv(MnsmsOp::ErrorInd, msg);
		user.mm_send(MmsmsOp::RelReq, msgb_alloc(), 0);
	}

	/// TC1* has expired.
	pub fn timer_expired<K: Copy>(
		&mut self,
		wheel: &mut TimerWheel<K>,
		key: K,
		user: &mut dyn SmcUser,
	) {
		self.cp_timer = None;
		if self.cp_retx == self.cp_max_retr {
			info!("TC1* timeout, no more retries");
			self.new_cp_state(CpState::Idle, wheel);
			user.mn_recv(MnsmsOp::ErrorInd, msgb_alloc());
			self.cp_msg = None;
			user.mm_send(MmsmsOp::RelReq, msgb_alloc(), 0);
			return;
		}

		info!("TC1* timeout, retrying");
		self.cp_retx += 1;
		self.send_stored_msg(wheel, key, user);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Default)]
	struct Record {
		mn: Vec<(MnsmsOp, Vec<u8>)>,
		mm: Vec<(MmsmsOp, u8, Vec<u8>)>,
	}

	impl SmcUser for Record {
		fn mn_recv(&mut self, op: MnsmsOp, msg: Msgb) {
			self.mn.push((op, msg.data().to_vec()));
		}

		fn mm_send(&mut self, op: MmsmsOp, msg: Msgb, cp_msg_type: u8) {
			self.mm.push((op, cp_msg_type, msg.data().to_vec()));
		}
	}

	fn payload() -> Msgb {
		let mut msg = Msgb::alloc_headroom(256, 64, "test");
		msg.put_slice(&[0x09, 0x01, 0x2b]);
		msg
	}

	fn established() -> (Smc, TimerWheel<()>, Record) {
		let mut smc = Smc::new(false);
		let mut wheel = TimerWheel::new();
		let mut user = Record::default();

		smc.send(MnsmsOp::EstReq, payload(), &mut wheel, (), &mut user);
		assert_eq!(smc.state(), CpState::MmConnPending);
		smc.recv(MmsmsOp::EstCnf, Msgb::alloc(8, "t"), 0, &mut wheel, (), &mut user);
		assert_eq!(smc.state(), CpState::WaitCpAck);
		(smc, wheel, user)
	}

	#[test]
	fn establish_and_ack() {
		let (mut smc, mut wheel, mut user) = established();
		// EST-REQ produced an MMSMS-EST-REQ, EST-CNF a CP-DATA carrying the
		// stored payload.
		assert_eq!(user.mm[0].0, MmsmsOp::EstReq);
		assert_eq!(user.mm[1].0, MmsmsOp::DataReq);
		assert_eq!(user.mm[1].1, MT_CP_DATA);
		assert_eq!(user.mm[1].2, vec![0x09, 0x01, 0x2b]);
		assert_eq!(wheel.pending(), 1);

		smc.recv(MmsmsOp::DataInd, Msgb::alloc(8, "t"), MT_CP_ACK, &mut wheel, (), &mut user);
		assert_eq!(smc.state(), CpState::MmEstablished);
		assert_eq!(wheel.pending(), 0);
	}

	#[test]
	fn tc1_retransmit_then_give_up() {
		let (mut smc, mut wheel, mut user) = established();
		user.mm.clear();

		// Two retransmissions...
		for i in 0..2 {
			smc.timer_expired(&mut wheel, (), &mut user);
			assert_eq!(smc.state(), CpState::WaitCpAck);
			assert_eq!(user.mm[i].1, MT_CP_DATA);
		}
		// ...then error indication and release.
		smc.timer_expired(&mut wheel, (), &mut user);
		assert_eq!(smc.state(), CpState::Idle);
		assert_eq!(user.mn.last().unwrap().0, MnsmsOp::ErrorInd);
		assert_eq!(user.mm.last().unwrap().0, MmsmsOp::RelReq);
		assert_eq!(wheel.pending(), 0);
	}

	#[test]
	fn mt_cp_data_in_idle() {
		let mut smc = Smc::new(false);
		let mut wheel = TimerWheel::new();
		let mut user = Record::default();

		smc.recv(MmsmsOp::EstInd, payload(), MT_CP_DATA, &mut wheel, (), &mut user);
		assert_eq!(smc.state(), CpState::MmEstablished);
		// CP-ACK goes down, EST-IND with the data goes up.
		assert_eq!(user.mm[0].1, MT_CP_ACK);
		assert_eq!(user.mn[0].0, MnsmsOp::EstInd);
		assert_eq!(user.mn[0].1, vec![0x09, 0x01, 0x2b]);
	}

	#[test]
	fn cp_error_releases() {
		let (mut smc, mut wheel, mut user) = established();
		smc.recv(MmsmsOp::DataInd, Msgb::alloc(8, "t"), MT_CP_ERROR, &mut wheel, (), &mut user);
		assert_eq!(smc.state(), CpState::Idle);
		assert_eq!(user.mn.last().unwrap().0, MnsmsOp::ErrorInd);
		assert_eq!(user.mm.last().unwrap().0, MmsmsOp::RelReq);
		// Entering IDLE cancelled TC1*.
		assert_eq!(wheel.pending(), 0);
	}

	#[test]
	fn pending_release_applied_after_ack() {
		let (mut smc, mut wheel, mut user) = established();
		smc.send(MnsmsOp::RelReq, Msgb::alloc(8, "t"), &mut wheel, (), &mut user);
		// Cannot release in WAIT_CP_ACK; flag is stored.
		assert_eq!(smc.state(), CpState::WaitCpAck);

		smc.recv(MmsmsOp::DataInd, Msgb::alloc(8, "t"), MT_CP_ACK, &mut wheel, (), &mut user);
		assert_eq!(smc.state(), CpState::Idle);
		assert_eq!(user.mm.last().unwrap().0, MmsmsOp::RelReq);
	}

	#[test]
	fn unknown_message_type_answered_with_cp_error() {
		let mut smc = Smc::new(false);
		let mut wheel = TimerWheel::new();
		let mut user = Record::default();

		smc.recv(MmsmsOp::DataInd, Msgb::alloc(8, "t"), 0x55, &mut wheel, (), &mut user);
		assert_eq!(smc.state(), CpState::Idle);
		let err = user.mm.iter().find(|m| m.1 == MT_CP_ERROR).unwrap();
		assert_eq!(err.2, vec![CP_CAUSE_MSGTYPE_NOTEXIST]);
	}
}
