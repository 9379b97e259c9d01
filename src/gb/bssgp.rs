//! GPRS BSSGP protocol, 3GPP TS 08.18 (SGSN side of the Gb link).
//!
//! One [`BtsCtx`] is kept per remote BTS, identified both by the
//! (BVCI, NSEI) tuple of the underlying link and by the parsed routing area
//! + cell id learned from BVC-RESET.  Uplink PDUs are dispatched here;
//! downlink unit-data is wrapped and handed to the NS instance.

use ahash::RandomState;
use hashbrown::HashMap;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::gb::ns::{NsError, NsInstance, NsTransport};
use crate::gsm48::{self, RaId, value_string};
use crate::msgb::Msgb;
use crate::tlv::{TVLV_MAX_ONEBYTE, TlvDefinition, TlvError, TlvParsed, TlvType};

/// BSSGP PDU types, TS 08.18 section 11.3.26.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BssgpPduType {
	DlUnitdata = 0x00,
	UlUnitdata = 0x01,
	RaCapability = 0x02,
	PagingPs = 0x06,
	PagingCs = 0x07,
	RaCapaUpdate = 0x08,
	RaCapaUpdateAck = 0x09,
	RadioStatus = 0x0a,
	Suspend = 0x0b,
	SuspendAck = 0x0c,
	SuspendNack = 0x0d,
	Resume = 0x0e,
	ResumeAck = 0x0f,
	ResumeNack = 0x10,
	BvcBlock = 0x20,
	BvcBlockAck = 0x21,
	BvcReset = 0x22,
	BvcResetAck = 0x23,
	BvcUnblock = 0x24,
	BvcUnblockAck = 0x25,
	FlowControlBvc = 0x26,
	FlowControlBvcAck = 0x27,
	FlowControlMs = 0x28,
	FlowControlMsAck = 0x29,
	FlushLl = 0x2a,
	FlushLlAck = 0x2b,
	LlcDiscard = 0x2c,
	SgsnInvokeTrace = 0x40,
	Status = 0x41,
	DownloadBssPfc = 0x50,
	CreateBssPfc = 0x51,
	CreateBssPfcAck = 0x52,
	CreateBssPfcNack = 0x53,
	ModifyBssPfc = 0x54,
	DeleteBssPfc = 0x56,
	DeleteBssPfcAck = 0x57,
}

/// BSSGP information elements, TS 08.18 section 11.3.
pub const BSSGP_IE_ALIGNMENT: u8 = 0x00;
pub const BSSGP_IE_BMAX_DEFAULT_MS: u8 = 0x01;
pub const BSSGP_IE_BUCKET_LEAK_RATE: u8 = 0x03;
pub const BSSGP_IE_BVCI: u8 = 0x04;
pub const BSSGP_IE_BVC_BUCKET_SIZE: u8 = 0x05;
pub const BSSGP_IE_CAUSE: u8 = 0x07;
pub const BSSGP_IE_CELL_ID: u8 = 0x08;
pub const BSSGP_IE_DRX_PARAMS: u8 = 0x0a;
pub const BSSGP_IE_FLUSH_ACTION: u8 = 0x0c;
pub const BSSGP_IE_IMSI: u8 = 0x0d;
pub const BSSGP_IE_LLC_PDU: u8 = 0x0e;
pub const BSSGP_IE_LLC_FRAMES_DISCARDED: u8 = 0x0f;
pub const BSSGP_IE_MS_RADIO_ACCESS_CAP: u8 = 0x13;
pub const BSSGP_IE_PDU_IN_ERROR: u8 = 0x15;
pub const BSSGP_IE_PDU_LIFETIME: u8 = 0x16;
pub const BSSGP_IE_QOS_PROFILE: u8 = 0x18;
pub const BSSGP_IE_RADIO_CAUSE: u8 = 0x19;
pub const BSSGP_IE_ROUTEING_AREA: u8 = 0x1b;
pub const BSSGP_IE_R_DEFAULT_MS: u8 = 0x1c;
pub const BSSGP_IE_SUSPEND_REF_NR: u8 = 0x1d;
pub const BSSGP_IE_TAG: u8 = 0x1e;
pub const BSSGP_IE_TLLI: u8 = 0x1f;
pub const BSSGP_IE_TMSI: u8 = 0x20;

/// Cause values, TS 08.18 section 11.3.8.
pub const BSSGP_CAUSE_PROC_OVERLOAD: u8 = 0x00;
pub const BSSGP_CAUSE_EQUIP_FAIL: u8 = 0x01;
pub const BSSGP_CAUSE_TRANSIT_NET_FAIL: u8 = 0x02;
pub const BSSGP_CAUSE_UNKNOWN_MS: u8 = 0x04;
pub const BSSGP_CAUSE_UNKNOWN_BVCI: u8 = 0x05;
pub const BSSGP_CAUSE_CELL_TRAF_CONG: u8 = 0x06;
pub const BSSGP_CAUSE_SGSN_CONG: u8 = 0x07;
pub const BSSGP_CAUSE_OML_INTERV: u8 = 0x08;
pub const BSSGP_CAUSE_BVCI_BLOCKED: u8 = 0x09;
pub const BSSGP_CAUSE_SEM_INCORR_PDU: u8 = 0x20;
pub const BSSGP_CAUSE_INV_MAND_INF: u8 = 0x21;
pub const BSSGP_CAUSE_MISSING_MAND_IE: u8 = 0x22;
pub const BSSGP_CAUSE_MISSING_COND_IE: u8 = 0x23;
pub const BSSGP_CAUSE_UNEXP_COND_IE: u8 = 0x24;
pub const BSSGP_CAUSE_COND_IE_ERR: u8 = 0x25;
pub const BSSGP_CAUSE_PDU_INCOMP_STATE: u8 = 0x26;
pub const BSSGP_CAUSE_PROTO_ERR_UNSPEC: u8 = 0x27;
pub const BSSGP_CAUSE_PDU_INCOMP_FEAT: u8 = 0x28;

/// Chapter 11.3.9 / Table 11.10.
pub const BSSGP_CAUSE_NAMES: &[(u8, &str)] = &[
	(BSSGP_CAUSE_PROC_OVERLOAD, "Processor overload"),
	(BSSGP_CAUSE_EQUIP_FAIL, "Equipment failure"),
	(BSSGP_CAUSE_TRANSIT_NET_FAIL, "Transit network service failure"),
	(BSSGP_CAUSE_UNKNOWN_MS, "Unknown MS"),
	(BSSGP_CAUSE_UNKNOWN_BVCI, "Unknown BVCI"),
	(BSSGP_CAUSE_CELL_TRAF_CONG, "Cell traffic congestion"),
	(BSSGP_CAUSE_SGSN_CONG, "SGSN congestion"),
	(BSSGP_CAUSE_OML_INTERV, "O&M intervention"),
	(BSSGP_CAUSE_BVCI_BLOCKED, "BVCI blocked"),
	(BSSGP_CAUSE_SEM_INCORR_PDU, "Semantically incorrect PDU"),
	(BSSGP_CAUSE_INV_MAND_INF, "Invalid mandatory information"),
	(BSSGP_CAUSE_MISSING_MAND_IE, "Missing mandatory IE"),
	(BSSGP_CAUSE_MISSING_COND_IE, "Missing conditional IE"),
	(BSSGP_CAUSE_UNEXP_COND_IE, "Unexpected conditional IE"),
	(BSSGP_CAUSE_COND_IE_ERR, "Conditional IE error"),
	(BSSGP_CAUSE_PDU_INCOMP_STATE, "PDU incompatible with protocol state"),
	(BSSGP_CAUSE_PROTO_ERR_UNSPEC, "Protocol error - unspecified"),
	(BSSGP_CAUSE_PDU_INCOMP_FEAT, "PDU not compatible with feature set"),
];

/// Default PDU lifetime in centiseconds.
const PDU_LIFETIME_DEFAULT_CS: u16 = 1000;
const QOS_PROFILE_DEFAULT: [u8; 3] = [0x00, 0x00, 0x21];

/// Size of the unit-data header: PDU type, TLLI, QoS profile.
const UD_HDR_LEN: usize = 8;

fn bssgp_att_tlvdef() -> TlvDefinition {
	TlvDefinition::from_entries(&[
		(BSSGP_IE_ALIGNMENT, TlvType::TvLv),
		(BSSGP_IE_BMAX_DEFAULT_MS, TlvType::TvLv),
		(BSSGP_IE_BUCKET_LEAK_RATE, TlvType::TvLv),
		(BSSGP_IE_BVCI, TlvType::TvLv),
		(BSSGP_IE_BVC_BUCKET_SIZE, TlvType::TvLv),
		(BSSGP_IE_CAUSE, TlvType::TvLv),
		(BSSGP_IE_CELL_ID, TlvType::TvLv),
		(BSSGP_IE_DRX_PARAMS, TlvType::TvLv),
		(BSSGP_IE_FLUSH_ACTION, TlvType::TvLv),
		(BSSGP_IE_IMSI, TlvType::TvLv),
		(BSSGP_IE_LLC_PDU, TlvType::TvLv),
		(BSSGP_IE_LLC_FRAMES_DISCARDED, TlvType::TvLv),
		(BSSGP_IE_MS_RADIO_ACCESS_CAP, TlvType::TvLv),
		(BSSGP_IE_PDU_IN_ERROR, TlvType::TvLv),
		(BSSGP_IE_PDU_LIFETIME, TlvType::TvLv),
		(BSSGP_IE_QOS_PROFILE, TlvType::TvLv),
		(BSSGP_IE_RADIO_CAUSE, TlvType::TvLv),
		(BSSGP_IE_ROUTEING_AREA, TlvType::TvLv),
		(BSSGP_IE_R_DEFAULT_MS, TlvType::TvLv),
		(BSSGP_IE_SUSPEND_REF_NR, TlvType::TvLv),
		(BSSGP_IE_TAG, TlvType::TvLv),
		(BSSGP_IE_TLLI, TlvType::TvLv),
		(BSSGP_IE_TMSI, TlvType::TvLv),
	])
}

#[derive(Debug, Error)]
pub enum BssgpError {
	#[error("BSSGP PDU too short")]
	ShortMessage,
	#[error("unknown BSSGP PDU type 0x{0:02x}")]
	UnknownPdu(u8),
	#[error("missing mandatory IE")]
	MissingMandIe,
	#[error("PDU type only exists in the other direction")]
	WrongDirection,
	#[error("cannot send DL unit-data to signalling BVCI {0}")]
	SignallingBvci(u16),
	#[error("TLV parse failure: {0}")]
	Tlv(#[from] TlvError),
	#[error("NS failure: {0}")]
	Ns(#[from] NsError),
}

/// The per-BTS context kept on the SGSN side of the BSSGP link.
#[derive(Clone, Copy, Debug, Default)]
pub struct BtsCtx {
	/// Parsed RA ID and Cell ID of the remote BTS.
	pub ra_id: RaId,
	pub cell_id: u16,
	/// NSEI and BVCI of the underlying Gb link; together they uniquely
	/// identify a link to a BTS (section 5.4.4).
	pub bvci: u16,
	pub nsei: u16,
	pub blocked: bool,
}

/// Upcalls towards LLC/GMM.
pub trait BssgpUser {
	/// UL-UNITDATA carrying an LLC PDU; `msg.cb.tlli` is set and the L4
	/// mark points at the LLC-PDU octets.
	fn llc_data(&mut self, msg: Msgb);
	/// An MS asks to suspend GPRS service (forwarded to GMM).
	fn suspend(&mut self, _tlli: u32, _raid: RaId) {}
	/// An MS resumes GPRS service (forwarded to GMM).
	fn resume(&mut self, _tlli: u32, _raid: RaId, _suspend_ref: u8) {}
}

pub struct Bssgp {
	bts_ctxs: Vec<BtsCtx>,
	by_link: HashMap<(u16, u16), usize, RandomState>,
	tlvdef: TlvDefinition,
}

fn bssgp_msgb_alloc() -> Msgb {
	Msgb::alloc_headroom(4096, 128, "BSSGP")
}

impl Bssgp {
	pub fn new() -> Bssgp {
		Bssgp {
			bts_ctxs: Vec::new(),
			by_link: HashMap::with_hasher(RandomState::new()),
			tlvdef: bssgp_att_tlvdef(),
		}
	}

	pub fn ctx_by_bvci_nsei(&self, bvci: u16, nsei: u16) -> Option<&BtsCtx> {
		self.by_link.get(&(bvci, nsei)).map(|&i| &self.bts_ctxs[i])
	}

	pub fn ctx_by_raid_cid(&self, raid: &RaId, cid: u16) -> Option<&BtsCtx> {
		self.bts_ctxs.iter().find(|c| c.ra_id == *raid && c.cell_id == cid)
	}

	fn ctx_get_or_alloc(&mut self, bvci: u16, nsei: u16) -> usize {
		if let Some(&idx) = self.by_link.get(&(bvci, nsei)) {
			return idx;
		}
		self.bts_ctxs.push(BtsCtx { bvci, nsei, ..BtsCtx::default() });
		let idx = self.bts_ctxs.len() - 1;
		self.by_link.insert((bvci, nsei), idx);
		idx
	}

	/// Transmits a simple acknowledgement (BLOCK/UNBLOCK/RESET ACK)
	/// carrying a BVCI IE.
	fn tx_simple_bvci(
		&mut self,
		pdu_type: BssgpPduType,
		nsei: u16,
		bvci: u16,
		ns_bvci: u16,
		ns: &mut NsInstance,
		tx: &mut dyn NsTransport,
	) -> Result<(), BssgpError> {
		let mut msg = bssgp_msgb_alloc();
		msg.cb.nsei = nsei;
		msg.cb.bvci = ns_bvci;
		msg.put_u8(pdu_type.into());
		msg.tvlv_put(BSSGP_IE_BVCI, &bvci.to_be_bytes());
		ns.sendmsg(msg, tx)?;
		Ok(())
	}

	/// Chapter 10.4.5: Flow Control BVC ACK, echoing the flow-control tag.
	fn tx_fc_bvc_ack(
		&mut self,
		nsei: u16,
		tag: u8,
		ns_bvci: u16,
		ns: &mut NsInstance,
		tx: &mut dyn NsTransport,
	) -> Result<(), BssgpError> {
		let mut msg = bssgp_msgb_alloc();
		msg.cb.nsei = nsei;
		msg.cb.bvci = ns_bvci;
		msg.put_u8(BssgpPduType::FlowControlBvcAck.into());
		msg.tvlv_put(BSSGP_IE_TAG, &[tag]);
		ns.sendmsg(msg, tx)?;
		Ok(())
	}

	/// Chapter 10.4.14: STATUS, echoing the PDU in error.
	pub fn tx_status(
		&mut self,
		cause: u8,
		bvci: Option<u16>,
		orig_msg: &Msgb,
		ns: &mut NsInstance,
		tx: &mut dyn NsTransport,
	) -> Result<(), BssgpError> {
		debug!("BSSGP TX STATUS, cause={}", value_string(BSSGP_CAUSE_NAMES, cause));

		let mut msg = bssgp_msgb_alloc();
		msg.cb.nsei = orig_msg.cb.nsei;
		msg.cb.bvci = 0;
		msg.put_u8(BssgpPduType::Status.into());
		msg.tvlv_put(BSSGP_IE_CAUSE, &[cause]);
		if let Some(bvci) = bvci {
			msg.tvlv_put(BSSGP_IE_BVCI, &bvci.to_be_bytes());
		}
		if let Some(l3) = orig_msg.l3h() {
			msg.tvlv_put(BSSGP_IE_PDU_IN_ERROR, l3);
		}
		ns.sendmsg(msg, tx)?;
		Ok(())
	}

	/// Parses a Cell Identifier IE: 6 octets routing area, 2 octets CID.
	fn parse_cell_id(buf: &[u8]) -> Option<(RaId, u16)> {
		if buf.len() < 8 {
			return None;
		}
		let raid = gsm48::parse_ra(buf[..6].try_into().unwrap());
		let cid = u16::from_be_bytes([buf[6], buf[7]]);
		Some((raid, cid))
	}

	/// We expect the L3 mark of `msg` to point at the BSSGP header.
	pub fn rcvmsg(
		&mut self,
		msg: &mut Msgb,
		ns: &mut NsInstance,
		tx: &mut dyn NsTransport,
		user: &mut dyn BssgpUser,
	) -> Result<(), BssgpError> {
		let l3 = msg.l3h().ok_or(BssgpError::ShortMessage)?;
		if l3.is_empty() {
			return Err(BssgpError::ShortMessage);
		}
		let pdu_type =
			BssgpPduType::try_from(l3[0]).map_err(|_| BssgpError::UnknownPdu(l3[0]))?;
		let ns_bvci = msg.cb.bvci;
		let nsei = msg.cb.nsei;

		// UNITDATA headers have the TLLI in front instead of IEs.
		if pdu_type == BssgpPduType::UlUnitdata {
			return self.rx_ul_ud(msg, user);
		}
		if pdu_type == BssgpPduType::DlUnitdata {
			warn!("BSSGP RX DL-UNITDATA on the uplink side");
			return Err(BssgpError::WrongDirection);
		}

		let mut tp = TlvParsed::new();
		tp.parse(&self.tlvdef, &l3[1..], None, None)?;

		match pdu_type {
			BssgpPduType::RaCapability => {
				debug!("BSSGP RA CAPABILITY UPDATE");
				Ok(())
			}
			BssgpPduType::RadioStatus => {
				debug!("BSSGP RADIO STATUS");
				Ok(())
			}
			BssgpPduType::Suspend => {
				debug!("BSSGP SUSPEND");
				let (Some(tlli), Some(ra)) =
					(tp.val(BSSGP_IE_TLLI), tp.val(BSSGP_IE_ROUTEING_AREA))
				else {
					return self.err_mand_ie(msg, ns, tx);
				};
				if tlli.len() < 4 || ra.len() < 6 {
					return self.err_mand_ie(msg, ns, tx);
				}
				let tlli = u32::from_be_bytes(tlli[..4].try_into().unwrap());
				user.suspend(tlli, gsm48::parse_ra(ra[..6].try_into().unwrap()));
				Ok(())
			}
			BssgpPduType::Resume => {
				debug!("BSSGP RESUME");
				let (Some(tlli), Some(ra), Some(sref)) = (
					tp.val(BSSGP_IE_TLLI),
					tp.val(BSSGP_IE_ROUTEING_AREA),
					tp.val(BSSGP_IE_SUSPEND_REF_NR),
				) else {
					return self.err_mand_ie(msg, ns, tx);
				};
				if tlli.len() < 4 || ra.len() < 6 || sref.is_empty() {
					return self.err_mand_ie(msg, ns, tx);
				}
				let tlli = u32::from_be_bytes(tlli[..4].try_into().unwrap());
				user.resume(tlli, gsm48::parse_ra(ra[..6].try_into().unwrap()), sref[0]);
				Ok(())
			}
			BssgpPduType::FlushLl => {
				debug!("BSSGP FLUSH LL");
				Ok(())
			}
			BssgpPduType::LlcDiscard => {
				debug!("BSSGP LLC DISCARDED");
				Ok(())
			}
			BssgpPduType::FlowControlBvc => {
				debug!("BSSGP FC BVC");
				if !tp.present(BSSGP_IE_TAG)
					|| !tp.present(BSSGP_IE_BVC_BUCKET_SIZE)
					|| !tp.present(BSSGP_IE_BUCKET_LEAK_RATE)
					|| !tp.present(BSSGP_IE_BMAX_DEFAULT_MS)
					|| !tp.present(BSSGP_IE_R_DEFAULT_MS)
				{
					return self.err_mand_ie(msg, ns, tx);
				}
				let tag = tp.val(BSSGP_IE_TAG).unwrap()[0];
				self.tx_fc_bvc_ack(nsei, tag, ns_bvci, ns, tx)
			}
			BssgpPduType::FlowControlMs => {
				debug!("BSSGP FC MS");
				Ok(())
			}
			BssgpPduType::BvcBlock => {
				let (Some(bvci), Some(cause)) =
					(tp.val(BSSGP_IE_BVCI), tp.val(BSSGP_IE_CAUSE))
				else {
					return self.err_mand_ie(msg, ns, tx);
				};
				if bvci.len() < 2 || cause.is_empty() {
					return self.err_mand_ie(msg, ns, tx);
				}
				let bvci = u16::from_be_bytes([bvci[0], bvci[1]]);
				debug!(
					"BSSGP BVC BLOCK BVCI={bvci}, cause={}",
					value_string(BSSGP_CAUSE_NAMES, cause[0])
				);
				if let Some(&idx) = self.by_link.get(&(bvci, nsei)) {
					self.bts_ctxs[idx].blocked = true;
				}
				// The BLOCKing is always acknowledged.
				self.tx_simple_bvci(BssgpPduType::BvcBlockAck, nsei, bvci, ns_bvci, ns, tx)
			}
			BssgpPduType::BvcUnblock => {
				let Some(bvci) = tp.val(BSSGP_IE_BVCI) else {
					return self.err_mand_ie(msg, ns, tx);
				};
				if bvci.len() < 2 {
					return self.err_mand_ie(msg, ns, tx);
				}
				let bvci = u16::from_be_bytes([bvci[0], bvci[1]]);
				debug!("BSSGP BVC UNBLOCK BVCI={bvci}");
				if let Some(&idx) = self.by_link.get(&(bvci, nsei)) {
					self.bts_ctxs[idx].blocked = false;
				}
				self.tx_simple_bvci(BssgpPduType::BvcUnblockAck, nsei, bvci, ns_bvci, ns, tx)
			}
			BssgpPduType::BvcReset => {
				if !tp.present(BSSGP_IE_BVCI) || !tp.present(BSSGP_IE_CAUSE) {
					return self.err_mand_ie(msg, ns, tx);
				}
				self.rx_bvc_reset(msg, &tp, ns_bvci, ns, tx)
			}
			BssgpPduType::Status => {
				let cause = tp.val(BSSGP_IE_CAUSE).and_then(|v| v.first().copied());
				info!(
					"BSSGP RX STATUS cause={}",
					value_string(BSSGP_CAUSE_NAMES, cause.unwrap_or(0xff))
				);
				Ok(())
			}
			BssgpPduType::RaCapaUpdate
			| BssgpPduType::DownloadBssPfc
			| BssgpPduType::CreateBssPfcAck
			| BssgpPduType::CreateBssPfcNack
			| BssgpPduType::ModifyBssPfc
			| BssgpPduType::DeleteBssPfcAck
			| BssgpPduType::CreateBssPfc
			| BssgpPduType::DeleteBssPfc => {
				debug!("BSSGP PDU type {pdu_type:?} not implemented");
				Ok(())
			}
			// Those only exist in the SGSN -> BSS direction.
			BssgpPduType::PagingPs
			| BssgpPduType::PagingCs
			| BssgpPduType::RaCapaUpdateAck
			| BssgpPduType::SuspendAck
			| BssgpPduType::SuspendNack
			| BssgpPduType::ResumeAck
			| BssgpPduType::ResumeNack
			| BssgpPduType::FlushLlAck
			| BssgpPduType::FlowControlBvcAck
			| BssgpPduType::FlowControlMsAck
			| BssgpPduType::BvcBlockAck
			| BssgpPduType::BvcUnblockAck
			| BssgpPduType::BvcResetAck
			| BssgpPduType::SgsnInvokeTrace => {
				debug!("BSSGP PDU type {pdu_type:?} only exists in DL");
				Err(BssgpError::WrongDirection)
			}
			BssgpPduType::UlUnitdata | BssgpPduType::DlUnitdata => unreachable!(),
		}
	}

	fn err_mand_ie(
		&mut self,
		msg: &Msgb,
		ns: &mut NsInstance,
		tx: &mut dyn NsTransport,
	) -> Result<(), BssgpError> {
		self.tx_status(BSSGP_CAUSE_MISSING_MAND_IE, None, msg, ns, tx)?;
		Err(BssgpError::MissingMandIe)
	}

	/// Chapter 8.4: BVC-Reset procedure.
	fn rx_bvc_reset(
		&mut self,
		msg: &Msgb,
		tp: &TlvParsed<'_>,
		ns_bvci: u16,
		ns: &mut NsInstance,
		tx: &mut dyn NsTransport,
	) -> Result<(), BssgpError> {
		let nsei = msg.cb.nsei;
		let bvci_ie = tp.val(BSSGP_IE_BVCI).unwrap();
		if bvci_ie.len() < 2 {
			return self.err_mand_ie(msg, ns, tx);
		}
		let bvci = u16::from_be_bytes([bvci_ie[0], bvci_ie[1]]);
		let cause = tp.val(BSSGP_IE_CAUSE).unwrap().first().copied().unwrap_or(0xff);
		debug!("BSSGP BVC RESET BVCI={bvci}, cause={}", value_string(BSSGP_CAUSE_NAMES, cause));

		let idx = self.ctx_get_or_alloc(bvci, nsei);

		// A BVC-RESET of a PTP BVCI informs us about RAC and Cell ID of the
		// BSS, so a mapping can be created.
		if bvci != 0 && bvci != 1 {
			let Some((raid, cid)) = tp.val(BSSGP_IE_CELL_ID).and_then(Self::parse_cell_id)
			else {
				warn!("BSSGP RESET BVCI={bvci} missing mandatory IE");
				return self.err_mand_ie(msg, ns, tx);
			};
			self.bts_ctxs[idx].ra_id = raid;
			self.bts_ctxs[idx].cell_id = cid;
			info!(
				"cell {}-{}-{}-{} CI {} on BVCI {}",
				raid.mcc, raid.mnc, raid.lac, raid.rac, cid, bvci
			);
		}

		// Acknowledge the RESET to the BTS.
		self.tx_simple_bvci(BssgpPduType::BvcResetAck, nsei, bvci, ns_bvci, ns, tx)
	}

	/// Uplink unit-data: extract the TLLI, locate the LLC PDU and pass it
	/// up.
	fn rx_ul_ud(&mut self, msg: &mut Msgb, user: &mut dyn BssgpUser) -> Result<(), BssgpError> {
		let l3 = msg.l3h().ok_or(BssgpError::ShortMessage)?;
		if l3.len() < UD_HDR_LEN {
			return Err(BssgpError::ShortMessage);
		}
		debug!("BSSGP UL-UD");

		let tlli = u32::from_be_bytes(l3[1..5].try_into().unwrap());

		let mut tp = TlvParsed::new();
		tp.parse(&self.tlvdef, &l3[UD_HDR_LEN..], None, None)?;

		// Cell ID and LLC-PDU are the mandatory IEs here.
		let (Some(_), Some(llc)) = (tp.val(BSSGP_IE_CELL_ID), tp.val(BSSGP_IE_LLC_PDU)) else {
			return Err(BssgpError::MissingMandIe);
		};

		let llc_off = llc.as_ptr() as usize - msg.data().as_ptr() as usize;
		let llc_len = llc.len();

		msg.cb.tlli = tlli;
		msg.set_l4h(llc_off);
		let _ = msg.trim(llc_off + llc_len);

		user.llc_data(msg.clone());
		Ok(())
	}

	/// Entry function from the upper layer (LLC), transmitting a BSSGP
	/// DL-UNITDATA to the MS identified by `msg.cb.tlli` at the BTS
	/// identified by `msg.cb.bvci` / `msg.cb.nsei`.
	pub fn tx_dl_ud(
		&mut self,
		mut msg: Msgb,
		ns: &mut NsInstance,
		tx: &mut dyn NsTransport,
	) -> Result<(), BssgpError> {
		let bvci = msg.cb.bvci;
		let nsei = msg.cb.nsei;

		if bvci < 2 {
			warn!("cannot send DL-UD to BVCI {bvci}");
			return Err(BssgpError::SignallingBvci(bvci));
		}
		let _ = self.ctx_get_or_alloc(bvci, nsei);

		// Tag and length of the LLC-PDU TvLV.
		let msg_len = msg.len() as u16;
		if msg_len > TVLV_MAX_ONEBYTE {
			let hdr = msg.push(3);
			hdr[0] = BSSGP_IE_LLC_PDU;
			hdr[1..3].copy_from_slice(&msg_len.to_be_bytes());
		} else {
			let hdr = msg.push(2);
			hdr[0] = BSSGP_IE_LLC_PDU;
			hdr[1] = 0x80 | msg_len as u8;
		}

		msg.tvlv_push(BSSGP_IE_PDU_LIFETIME, &PDU_LIFETIME_DEFAULT_CS.to_be_bytes());

		// QoS profile, TLLI and PDU type in front.
		let tlli = msg.cb.tlli;
		let hdr = msg.push(UD_HDR_LEN);
		hdr[0] = BssgpPduType::DlUnitdata.into();
		hdr[1..5].copy_from_slice(&tlli.to_be_bytes());
		hdr[5..8].copy_from_slice(&QOS_PROFILE_DEFAULT);

		ns.sendmsg(msg, tx)?;
		Ok(())
	}
}

impl Default for Bssgp {
	fn default() -> Self {
		Bssgp::new()
	}
}

#[cfg(test)]
mod tests {
	use std::net::SocketAddr;

	use super::*;

	#[derive(Default)]
	struct MockTx {
		sent: Vec<(SocketAddr, Vec<u8>)>,
	}

	impl NsTransport for MockTx {
		fn sendto(&mut self, addr: SocketAddr, data: &[u8]) -> std::io::Result<()> {
			self.sent.push((addr, data.to_vec()));
			Ok(())
		}
	}

	#[derive(Default)]
	struct MockUser {
		llc: Vec<(u32, Vec<u8>)>,
	}

	impl BssgpUser for MockUser {
		fn llc_data(&mut self, msg: Msgb) {
			self.llc.push((msg.cb.tlli, msg.l4h().unwrap().to_vec()));
		}
	}

	/// NS instance with one NSVC for NSEI 100.
	fn ns_with_link(tx: &mut MockTx) -> NsInstance {
		let mut ns = NsInstance::new();
		ns.connect("127.0.0.1:23000".parse().unwrap(), 100, 5, tx).unwrap();
		tx.sent.clear();
		ns
	}

	fn bssgp_msg(l3: &[u8], nsei: u16, ns_bvci: u16) -> Msgb {
		let mut msg = Msgb::alloc_headroom(1024, 128, "test");
		msg.put_slice(l3);
		msg.set_l3h(0);
		msg.cb.nsei = nsei;
		msg.cb.bvci = ns_bvci;
		msg
	}

	#[test]
	fn bvc_reset_creates_context_and_acks() {
		let mut tx = MockTx::default();
		let mut ns = ns_with_link(&mut tx);
		let mut bssgp = Bssgp::new();
		let mut user = MockUser::default();

		let pdu = [
			0x22, 0x04, 0x82, 0x00, 0x07, 0x07, 0x81, 0x08, 0x08, 0x88, 0x72, 0xf4, 0x80, 0x10,
			0x22, 0x11, 0x00, 0x01,
		];
		let mut msg = bssgp_msg(&pdu, 100, 0);
		bssgp.rcvmsg(&mut msg, &mut ns, &mut tx, &mut user).unwrap();

		let ctx = *bssgp.ctx_by_bvci_nsei(7, 100).unwrap();
		assert_eq!(ctx.ra_id, RaId { mcc: 274, mnc: 8, lac: 0x1022, rac: 0x11 });
		assert_eq!(ctx.cell_id, 1);
		assert!(bssgp.ctx_by_raid_cid(&ctx.ra_id, 1).is_some());

		// BVC-RESET-ACK with BVCI 7, wrapped in the NS unit-data header.
		let wire = &tx.sent[0].1;
		assert_eq!(&wire[..4], &[0x00, 0x00, 0x00, 0x00]);
		assert_eq!(&wire[4..], &[0x23, 0x04, 0x82, 0x00, 0x07]);
	}

	#[test]
	fn bvc_reset_of_ptp_bvci_requires_cell_id() {
		let mut tx = MockTx::default();
		let mut ns = ns_with_link(&mut tx);
		let mut bssgp = Bssgp::new();
		let mut user = MockUser::default();

		// BVCI 7 and cause, but no Cell Identifier.
		let pdu = [0x22, 0x04, 0x82, 0x00, 0x07, 0x07, 0x81, 0x08];
		let mut msg = bssgp_msg(&pdu, 100, 0);
		assert!(matches!(
			bssgp.rcvmsg(&mut msg, &mut ns, &mut tx, &mut user),
			Err(BssgpError::MissingMandIe)
		));

		// An outgoing STATUS with cause MISSING_MAND_IE and the PDU in
		// error echoed.
		let wire = &tx.sent[0].1;
		assert_eq!(wire[4], 0x41);
		assert_eq!(&wire[5..8], &[0x07, 0x81, BSSGP_CAUSE_MISSING_MAND_IE]);
		assert_eq!(&wire[8..10], &[0x15, 0x88]);
		assert_eq!(&wire[10..], &pdu);
	}

	#[test]
	fn ul_unitdata_delivers_llc_pdu() {
		let mut tx = MockTx::default();
		let mut ns = ns_with_link(&mut tx);
		let mut bssgp = Bssgp::new();
		let mut user = MockUser::default();

		let mut pdu = vec![0x01]; // UL-UNITDATA
		pdu.extend_from_slice(&0xc0fe_1234u32.to_be_bytes());
		pdu.extend_from_slice(&[0x00, 0x00, 0x21]); // QoS profile
		// Cell Identifier + LLC-PDU IEs.
		pdu.extend_from_slice(&[0x08, 0x88, 0x72, 0xf4, 0x80, 0x10, 0x22, 0x11, 0x00, 0x01]);
		pdu.extend_from_slice(&[0x0e, 0x83, 0xaa, 0xbb, 0xcc]);

		let mut msg = bssgp_msg(&pdu, 100, 7);
		bssgp.rcvmsg(&mut msg, &mut ns, &mut tx, &mut user).unwrap();

		assert_eq!(user.llc, vec![(0xc0fe_1234, vec![0xaa, 0xbb, 0xcc])]);
	}

	#[test]
	fn dl_unitdata_wire_format() {
		let mut tx = MockTx::default();
		let mut ns = ns_with_link(&mut tx);
		let mut bssgp = Bssgp::new();

		let mut msg = Msgb::alloc_headroom(1024, 128, "test");
		msg.put_slice(&[0x11, 0x22, 0x33]);
		msg.cb.bvci = 7;
		msg.cb.nsei = 100;
		msg.cb.tlli = 0xdead_beef;
		bssgp.tx_dl_ud(msg, &mut ns, &mut tx).unwrap();

		let wire = &tx.sent[0].1;
		// NS unit-data header towards BVCI 7.
		assert_eq!(&wire[..4], &[0x00, 0x00, 0x00, 0x07]);
		// DL-UNITDATA, TLLI, default QoS profile.
		assert_eq!(wire[4], 0x00);
		assert_eq!(&wire[5..9], &0xdead_beefu32.to_be_bytes());
		assert_eq!(&wire[9..12], &QOS_PROFILE_DEFAULT);
		// PDU lifetime 1000 cs, then the LLC PDU as TvLV.
		assert_eq!(&wire[12..16], &[0x16, 0x82, 0x03, 0xe8]);
		assert_eq!(&wire[16..], &[0x0e, 0x83, 0x11, 0x22, 0x33]);
	}

	#[test]
	fn dl_unitdata_rejects_signalling_bvci() {
		let mut tx = MockTx::default();
		let mut ns = ns_with_link(&mut tx);
		let mut bssgp = Bssgp::new();

		let mut msg = Msgb::alloc_headroom(256, 64, "test");
		msg.cb.bvci = 0;
		msg.cb.nsei = 100;
		assert!(matches!(
			bssgp.tx_dl_ud(msg, &mut ns, &mut tx),
			Err(BssgpError::SignallingBvci(0))
		));
	}

	#[test]
	fn dl_only_pdu_rejected_on_uplink() {
		let mut tx = MockTx::default();
		let mut ns = ns_with_link(&mut tx);
		let mut bssgp = Bssgp::new();
		let mut user = MockUser::default();

		let mut msg = bssgp_msg(&[0x06], 100, 0); // PAGING-PS
		assert!(matches!(
			bssgp.rcvmsg(&mut msg, &mut ns, &mut tx, &mut user),
			Err(BssgpError::WrongDirection)
		));
	}

	#[test]
	fn flow_control_acked_with_tag() {
		let mut tx = MockTx::default();
		let mut ns = ns_with_link(&mut tx);
		let mut bssgp = Bssgp::new();
		let mut user = MockUser::default();

		let pdu = [
			0x26, // FLOW-CONTROL-BVC
			0x1e, 0x81, 0x2a, // Tag
			0x05, 0x82, 0x00, 0x10, // BVC bucket size
			0x03, 0x82, 0x00, 0x20, // Bucket leak rate
			0x01, 0x82, 0x00, 0x08, // Bmax default MS
			0x1c, 0x82, 0x00, 0x04, // R default MS
		];
		let mut msg = bssgp_msg(&pdu, 100, 7);
		bssgp.rcvmsg(&mut msg, &mut ns, &mut tx, &mut user).unwrap();

		let wire = &tx.sent[0].1;
		assert_eq!(&wire[4..], &[0x27, 0x1e, 0x81, 0x2a]);
	}
}
