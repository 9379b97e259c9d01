//! End-to-end mobile-originated SMS transfer: the relay entity drives the
//! connection entity, CP-DATA carries the RP-DATA, and the network answer
//! flows back up as an RP report.

use umcore::msgb::Msgb;
use umcore::prim::{MmsmsOp, MnsmsOp, SmRlOp};
use umcore::sms::smc::{CpState, Smc, SmcUser};
use umcore::sms::smr::{RpState, Smr, SmrUser};
use umcore::sms::{MT_CP_ACK, MT_CP_DATA, MT_RP_ACK_MT};
use umcore::timer::TimerWheel;

#[derive(Default)]
struct CpRecord {
	mn: Vec<(MnsmsOp, Vec<u8>)>,
	mm: Vec<(MmsmsOp, u8, Vec<u8>)>,
}

impl SmcUser for CpRecord {
	fn mn_recv(&mut self, op: MnsmsOp, msg: Msgb) {
		self.mn.push((op, msg.data().to_vec()));
	}

	fn mm_send(&mut self, op: MmsmsOp, msg: Msgb, cp_msg_type: u8) {
		self.mm.push((op, cp_msg_type, msg.data().to_vec()));
	}
}

#[derive(Default)]
struct RpRecord {
	rl: Vec<(SmRlOp, Vec<u8>)>,
	mn: Vec<(MnsmsOp, Vec<u8>)>,
}

impl SmrUser for RpRecord {
	fn rl_recv(&mut self, op: SmRlOp, msg: Msgb) {
		self.rl.push((op, msg.data().to_vec()));
	}

	fn mn_send(&mut self, op: MnsmsOp, msg: Msgb) {
		self.mn.push((op, msg.data().to_vec()));
	}
}

/// An RP-DATA (MO) payload the SM entity would hand to the relay layer.
fn rp_user_data() -> Msgb {
	let mut msg = Msgb::alloc_headroom(256, 64, "sms");
	// Destination address and TPDU, abbreviated.
	msg.put_slice(&[0x00, 0x05, 0x91, 0x21, 0x43, 0x65, 0x07]);
	msg
}

#[test]
fn mo_sms_end_to_end() {
	let mut wheel: TimerWheel<u8> = TimerWheel::new();

	let mut smr = Smr::new(1, false);
	let mut smc = Smc::new(false);
	let mut rp_user = RpRecord::default();
	let mut cp_user = CpRecord::default();

	// SM entity: SM-RL-DATA-REQ with the RP user data.
	smr.send(SmRlOp::DataReq, rp_user_data(), &mut wheel, 1, &mut rp_user);
	assert_eq!(smr.state(), RpState::WaitForRpAck);

	// The relay handed an MNSMS-EST-REQ (with the RP header pushed) to CP.
	let (op, rp_pdu) = rp_user.mn.remove(0);
	assert_eq!(op, MnsmsOp::EstReq);
	// RP header: length, RP-DATA (MO), reference.
	assert_eq!(rp_pdu[0] as usize, rp_pdu.len() - 1);
	assert_eq!(rp_pdu[1] & 0x07, 0x00);

	let mut est = Msgb::alloc_headroom(256, 64, "sms");
	est.put_slice(&rp_pdu);
	smc.send(MnsmsOp::EstReq, est, &mut wheel, 2, &mut cp_user);
	assert_eq!(smc.state(), CpState::MmConnPending);

	// The MM layer confirms; CP-DATA goes out and carries the RP PDU.
	smc.recv(MmsmsOp::EstCnf, Msgb::alloc(8, "t"), 0, &mut wheel, 2, &mut cp_user);
	assert_eq!(smc.state(), CpState::WaitCpAck);
	let cp_data = cp_user.mm.iter().find(|m| m.1 == MT_CP_DATA).unwrap();
	assert_eq!(cp_data.2, rp_pdu);

	// Network acknowledges the CP-DATA.
	smc.recv(MmsmsOp::DataInd, Msgb::alloc(8, "t"), MT_CP_ACK, &mut wheel, 2, &mut cp_user);
	assert_eq!(smc.state(), CpState::MmEstablished);

	// The network's RP-ACK arrives inside a CP-DATA.  04.08 header, then
	// the RP header echoing our reference.
	let mut ack = Msgb::alloc_headroom(256, 64, "sms");
	ack.put_slice(&[0x09, 0x01]);
	ack.put_slice(&[0x02, MT_RP_ACK_MT, rp_pdu[2]]);
	ack.set_l3h(0);
	smc.recv(MmsmsOp::DataInd, ack, MT_CP_DATA, &mut wheel, 2, &mut cp_user);

	// CP acknowledged it and passed it up; feed it into the relay.
	assert!(cp_user.mm.iter().any(|m| m.1 == MT_CP_ACK));
	let (op, data) = cp_user.mn.remove(0);
	assert_eq!(op, MnsmsOp::DataInd);

	let mut up = Msgb::alloc_headroom(256, 64, "sms");
	up.put_slice(&data);
	up.set_l3h(0);
	smr.recv(MnsmsOp::DataInd, up, &mut wheel, 1, &mut rp_user);

	// The relay reported the delivery and released; TR1N is stopped.
	assert_eq!(smr.state(), RpState::Idle);
	assert_eq!(rp_user.rl.last().unwrap().0, SmRlOp::ReportInd);
	assert_eq!(rp_user.mn.last().unwrap().0, MnsmsOp::RelReq);
	assert_eq!(wheel.pending(), 0);

	// Release the CP side as well.
	smc.send(MnsmsOp::RelReq, Msgb::alloc(8, "t"), &mut wheel, 2, &mut cp_user);
	assert_eq!(smc.state(), CpState::Idle);
}
