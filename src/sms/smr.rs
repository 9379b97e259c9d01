//! SMS Relay (RP) state machine, TS 04.11 section 6.
//!
//! Sending MNSMS-ABORT-REQ or MNSMS-REL-REQ may cause the lower layer to
//! become IDLE and destroy this instance, so handing those down is always
//! the last thing a handler does.

use std::time::Duration;

use crate::msgb::Msgb;
use crate::prim::{MnsmsOp, SmRlOp};
use crate::sms::{
	MT_RP_ACK_MO, MT_RP_ACK_MT, MT_RP_DATA_MO, MT_RP_DATA_MT, MT_RP_ERROR_MO, MT_RP_ERROR_MT,
	MT_RP_SMMA_MO, RP_CAUSE_MSG_INCOMP_STATE, RP_CAUSE_MSGTYPE_NOTEXIST, RP_CAUSE_PROTOCOL_ERR,
};
use crate::timer::{TimerToken, TimerWheel};

/// TR1M: waiting for RP-ACK.
pub const TMR_TR1M: Duration = Duration::from_secs(40);
/// TR2M: waiting to transmit RP-ACK.
pub const TMR_TR2M: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpState {
	Idle,
	WaitForRpAck,
	WaitToTxRpAck,
}

impl RpState {
	fn as_str(self) -> &'static str {
		match self {
			RpState::Idle => "IDLE",
			RpState::WaitForRpAck => "WAIT_FOR_RP_ACK",
			RpState::WaitToTxRpAck => "WAIT_TO_TX_RP_ACK",
		}
	}
}

/// The environment an SMR instance talks to: the short-message entity above
/// and the CP layer (SMC) below.
pub trait SmrUser {
	/// SM-RL-* indication towards the SM entity.
	fn rl_recv(&mut self, op: SmRlOp, msg: Msgb);
	/// MNSMS-* request towards the CP layer.
	fn mn_send(&mut self, op: MnsmsOp, msg: Msgb);
}

fn msgb_alloc() -> Msgb {
	Msgb::alloc_headroom(256, 64, "GSM 04.11")
}

/// One RP entity (one transaction).
pub struct Smr {
	pub id: u64,
	network: bool,
	rp_state: RpState,
	rp_timer: Option<TimerToken>,
}

/// RP header fields of a message carried up from CP: `(len, type, ref)`.
fn rp_header(msg: &Msgb) -> Option<(u8, u8, u8)> {
	// Skip the 2-octet 04.08 header in front of the RP header.
	let l3 = msg.l3h().unwrap_or_else(|| msg.data());
	if l3.len() < 5 {
		return None;
	}
	Some((l3[2], l3[3], l3[4]))
}

impl Smr {
	pub fn new(id: u64, network: bool) -> Smr {
		info!("SMR({}) instance created for {}", id, if network { "network" } else { "mobile" });
		Smr { id, network, rp_state: RpState::Idle, rp_timer: None }
	}

	pub fn state(&self) -> RpState {
		self.rp_state
	}

	pub fn clear<K: Copy>(&mut self, wheel: &mut TimerWheel<K>) {
		info!("SMR({}) clearing instance", self.id);
		if let Some(token) = self.rp_timer.take() {
			wheel.cancel(token);
		}
	}

	fn new_rp_state<K: Copy>(&mut self, state: RpState, wheel: &mut TimerWheel<K>) {
		info!(
			"SMR({}) new RP state {} -> {}",
			self.id,
			self.rp_state.as_str(),
			state.as_str()
		);
		self.rp_state = state;

		// Stop the timer when going idle.
		if state == RpState::Idle {
			if let Some(token) = self.rp_timer.take() {
				wheel.cancel(token);
			}
		}
	}

	/// Prefixes `msg` with an RP header and hands it down.
	fn rp_sendmsg(&mut self, mut msg: Msgb, rp_msg_type: u8, rp_msg_ref: u8, op: MnsmsOp, user: &mut dyn SmrUser) {
		let len = msg.len() as u8;
		let hdr = msg.push(3);
		hdr[0] = len + 2;
		hdr[1] = rp_msg_type;
		hdr[2] = rp_msg_ref;
		user.mn_send(op, msg);
	}

	fn send_rp_error(&mut self, msg_ref: u8, cause: u8, user: &mut dyn SmrUser) {
		let mut msg = msgb_alloc();
		msg.lv_put(&[cause]);
		warn!("SMR({}) TX RP-ERROR, cause {}", self.id, cause);
		let mt = if self.network { MT_RP_ERROR_MT } else { MT_RP_ERROR_MO };
		self.rp_sendmsg(msg, mt, msg_ref, MnsmsOp::DataReq, user);
	}

	fn send_release(&mut self, user: &mut dyn SmrUser) {
		debug!("SMR({}) TX MNSMS-REL-REQ", self.id);
		user.mn_send(MnsmsOp::RelReq, msgb_alloc());
	}

	fn send_abort(&mut self, user: &mut dyn SmrUser) {
		debug!("SMR({}) TX MNSMS-ABORT-REQ", self.id);
		let mut msg = msgb_alloc();
		msg.lv_put(&[RP_CAUSE_PROTOCOL_ERR]);
		user.mn_send(MnsmsOp::AbortReq, msg);
	}

	fn send_report(&mut self, user: &mut dyn SmrUser) {
		debug!("SMR({}) empty SM-RL-REPORT-IND", self.id);
		user.rl_recv(SmRlOp::ReportInd, msgb_alloc());
	}

	/// Message from the upper (SM-RL) SAP.
	pub fn send<K: Copy>(
		&mut self,
		op: SmRlOp,
		msg: Msgb,
		wheel: &mut TimerWheel<K>,
		key: K,
		user: &mut dyn SmrUser,
	) {
		match (op, self.rp_state) {
			(SmRlOp::DataReq, RpState::Idle) => {
				debug!("SMR({}) TX RP-DATA", self.id);
				if let Some(token) = self.rp_timer.take() {
					wheel.cancel(token);
				}
				self.rp_timer = Some(wheel.schedule(TMR_TR1M, key));
				self.new_rp_state(RpState::WaitForRpAck, wheel);
				user.mn_send(MnsmsOp::EstReq, msg);
			}
			(SmRlOp::ReportReq, RpState::WaitToTxRpAck) => {
				debug!("SMR({}) TX report", self.id);
				self.new_rp_state(RpState::Idle, wheel);
				user.mn_send(MnsmsOp::DataReq, msg);
				self.send_release(user);
			}
			_ => {
				warn!("SMR({}) {:?} unhandled in state {}", self.id, op, self.rp_state.as_str());
			}
		}
	}

	/// Message from the lower (MNSMS) SAP.
	pub fn recv<K: Copy>(
		&mut self,
		op: MnsmsOp,
		msg: Msgb,
		wheel: &mut TimerWheel<K>,
		key: K,
		user: &mut dyn SmrUser,
	) {
		match (op, self.rp_state) {
			(MnsmsOp::EstInd, RpState::Idle) => self.rx_est_ind(msg, wheel, key, user),
			(MnsmsOp::DataInd, RpState::WaitForRpAck) => self.rx_data_ind(msg, wheel, user),
			(MnsmsOp::ErrorInd, RpState::WaitForRpAck) => {
				debug!("SMR({}) RX MNSMS-ERROR-IND", self.id);
				self.new_rp_state(RpState::Idle, wheel);
				user.rl_recv(SmRlOp::ReportInd, msg);
				self.send_release(user);
			}
			(MnsmsOp::ErrorInd, RpState::WaitToTxRpAck) => {
				debug!("SMR({}) RX MNSMS-ERROR-IND", self.id);
				self.new_rp_state(RpState::Idle, wheel);
				user.rl_recv(SmRlOp::ReportInd, msg);
			}
			_ => {
				warn!("SMR({}) {:?} unhandled in state {}", self.id, op, self.rp_state.as_str());
			}
		}
	}

	fn rx_est_ind<K: Copy>(
		&mut self,
		msg: Msgb,
		wheel: &mut TimerWheel<K>,
		key: K,
		user: &mut dyn SmrUser,
	) {
		let Some((_, raw_type, msg_ref)) = rp_header(&msg) else {
			warn!("SMR({}) short RP message", self.id);
			return;
		};
		let msg_type = raw_type & 0x07;

		// The direction bit must not match our own side.
		if self.network == (msg_type & 1 != 0) {
			warn!("SMR({}) invalid RP type 0x{:02x}", self.id, msg_type);
			self.send_rp_error(msg_ref, RP_CAUSE_MSG_INCOMP_STATE, user);
			self.new_rp_state(RpState::Idle, wheel);
			self.send_release(user);
			return;
		}

		match msg_type {
			MT_RP_DATA_MT | MT_RP_DATA_MO | MT_RP_SMMA_MO => {
				debug!("SMR({}) RX RP-DATA", self.id);
				if let Some(token) = self.rp_timer.take() {
					wheel.cancel(token);
				}
				self.rp_timer = Some(wheel.schedule(TMR_TR2M, key));
				self.new_rp_state(RpState::WaitToTxRpAck, wheel);
				user.rl_recv(SmRlOp::DataInd, msg);
			}
			_ => {
				warn!("SMR({}) invalid RP type 0x{:02x}", self.id, msg_type);
				self.send_rp_error(msg_ref, RP_CAUSE_MSGTYPE_NOTEXIST, user);
				self.new_rp_state(RpState::Idle, wheel);
			}
		}
	}

	fn rx_data_ind<K: Copy>(&mut self, msg: Msgb, wheel: &mut TimerWheel<K>, user: &mut dyn SmrUser) {
		let Some((_, raw_type, msg_ref)) = rp_header(&msg) else {
			warn!("SMR({}) short RP message", self.id);
			return;
		};
		let msg_type = raw_type & 0x07;

		if self.network == (msg_type & 1 != 0) {
			warn!("SMR({}) invalid RP type 0x{:02x}", self.id, msg_type);
			self.send_rp_error(msg_ref, RP_CAUSE_MSG_INCOMP_STATE, user);
			self.new_rp_state(RpState::Idle, wheel);
			self.send_release(user);
			return;
		}

		match msg_type {
			MT_RP_ACK_MO | MT_RP_ACK_MT => {
				debug!("SMR({}) RX RP-ACK", self.id);
				self.new_rp_state(RpState::Idle, wheel);
				user.rl_recv(SmRlOp::ReportInd, msg);
				self.send_release(user);
			}
			MT_RP_ERROR_MO | MT_RP_ERROR_MT => {
				debug!("SMR({}) RX RP-ERROR", self.id);
				self.new_rp_state(RpState::Idle, wheel);
				user.rl_recv(SmRlOp::ReportInd, msg);
				self.send_release(user);
			}
			_ => {
				warn!("SMR({}) invalid RP type 0x{:02x}", self.id, msg_type);
				self.send_rp_error(msg_ref, RP_CAUSE_MSGTYPE_NOTEXIST, user);
				self.new_rp_state(RpState::Idle, wheel);
				self.send_release(user);
			}
		}
	}

	/// TR1N or TR2N has expired.
	pub fn timer_expired<K: Copy>(&mut self, wheel: &mut TimerWheel<K>, user: &mut dyn SmrUser) {
		let name = if self.rp_state == RpState::WaitToTxRpAck { "TR2N" } else { "TR1N" };
		debug!("SMR({}) {} expired", self.id, name);
		self.rp_timer = None;
		self.new_rp_state(RpState::Idle, wheel);
		self.send_report(user);
		self.send_abort(user);
	}
}
