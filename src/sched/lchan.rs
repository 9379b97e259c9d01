//! Logical channels of the TDMA multiframe: descriptors, per-channel
//! interleave state and the burst-level rx/tx handlers.
//!
//! A handler collects the bursts of one interleaved block (4 for traffic
//! and control channels, 6 for FACCH/H), tracks which burst ids have been
//! seen in a bitmask and only then attempts a decode.  The bit-level FEC
//! itself is a collaborator behind [`SchedIo`]; the scheduler owns cadence,
//! masks, FACCH ownership and measurement bookkeeping.

use std::collections::VecDeque;

use bitflags::bitflags;
use enum_dispatch::enum_dispatch;

use crate::sched::meas::{MeasHist, MeasSet};
use crate::sched::tchh;

/// Bits of a GMSK normal burst and of its payload.
pub const NBITS_NB_GMSK_BURST: usize = 148;
pub const NBITS_NB_GMSK_PAYLOAD: usize = 116;
/// Bits of an 8-PSK normal burst payload (EDGE).
pub const NBITS_NB_8PSK_PAYLOAD: usize = 348;

/// Octets of a MAC block on signalling channels.
pub const MACBLOCK_LEN: usize = 23;

/// Link identifiers as in RSL.
pub const CH_LID_DEDIC: u8 = 0x00;
pub const CH_LID_SACCH: u8 = 0x40;
/// Distinguishes PTCCH from PDTCH on a PDCH timeslot (TS 45.002, 3.3.4.2).
pub const CH_LID_PTCCH: u8 = 0x80;

/// The logical channels of a multiframe.  Each has its own queues and can
/// be activated individually.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LchanType {
	Idle,
	Fcch,
	Sch,
	Bcch,
	Rach,
	Ccch,
	TchF,
	TchH0,
	TchH1,
	Sdcch4_0,
	Sdcch4_1,
	Sdcch4_2,
	Sdcch4_3,
	Sdcch8_0,
	Sdcch8_1,
	Sdcch8_2,
	Sdcch8_3,
	Sdcch8_4,
	Sdcch8_5,
	Sdcch8_6,
	Sdcch8_7,
	SacchTf,
	SacchTh0,
	SacchTh1,
	Sacch4_0,
	Sacch4_1,
	Sacch4_2,
	Sacch4_3,
	Sacch8_0,
	Sacch8_1,
	Sacch8_2,
	Sacch8_3,
	Sacch8_4,
	Sacch8_5,
	Sacch8_6,
	Sacch8_7,
	Pdtch,
	Ptcch,
	Sdcch4Cbch,
	Sdcch8Cbch,
}

pub const LCHAN_COUNT: usize = LchanType::Sdcch8Cbch as usize + 1;

bitflags! {
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub struct LchanFlags: u8 {
		/// Channel is related to PDCH (GPRS).
		const PDCH = 0x01;
		/// Channel is activated automatically.
		const AUTO = 0x02;
	}
}

/// Identity of the burst-level handler of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
	None,
	Xcch,
	TchF,
	TchH,
	Rach,
	Sch,
	Fcch,
	Pdtch,
	Ptcch,
}

/// Static per-channel description.
pub struct LchanDesc {
	/// Human-readable name.
	pub name: &'static str,
	pub desc: &'static str,
	/// Channel number, like in RSL.
	pub chan_nr: u8,
	/// Link id, like in RSL.
	pub link_id: u8,
	/// Bits of burst memory the channel needs.
	pub burst_buf_size: usize,
	pub flags: LchanFlags,
	pub rx: HandlerKind,
	pub tx: HandlerKind,
}

const fn desc(
	name: &'static str,
	desc: &'static str,
	chan_nr: u8,
	link_id: u8,
	burst_buf_size: usize,
	flags: LchanFlags,
	rx: HandlerKind,
	tx: HandlerKind,
) -> LchanDesc {
	LchanDesc { name, desc, chan_nr, link_id, burst_buf_size, flags, rx, tx }
}

const XCCH_BUF: usize = 4 * NBITS_NB_GMSK_PAYLOAD;
const TCHF_BUF: usize = 8 * NBITS_NB_GMSK_PAYLOAD;
const TCHH_BUF: usize = 6 * NBITS_NB_GMSK_PAYLOAD;
const PDTCH_BUF: usize = 4 * NBITS_NB_8PSK_PAYLOAD;

#[rustfmt::skip]
static LCHAN_DESC: [LchanDesc; LCHAN_COUNT] = [
	desc("IDLE", "Idle channel", 0x00, 0x00, 0, LchanFlags::AUTO, HandlerKind::None, HandlerKind::None),
	desc("FCCH", "Frequency correction channel", 0x00, 0x00, 0, LchanFlags::AUTO, HandlerKind::Fcch, HandlerKind::None),
	desc("SCH", "Synchronization channel", 0x00, 0x00, 0, LchanFlags::AUTO, HandlerKind::Sch, HandlerKind::None),
	desc("BCCH", "Broadcast control channel", 0x80, 0x00, XCCH_BUF, LchanFlags::AUTO, HandlerKind::Xcch, HandlerKind::None),
	desc("RACH", "Random access channel", 0x88, 0x00, 0, LchanFlags::AUTO, HandlerKind::None, HandlerKind::Rach),
	desc("CCCH", "Common control channel", 0x90, 0x00, XCCH_BUF, LchanFlags::AUTO, HandlerKind::Xcch, HandlerKind::None),
	desc("TCH/F", "Full-rate traffic channel", 0x08, CH_LID_DEDIC, TCHF_BUF, LchanFlags::empty(), HandlerKind::TchF, HandlerKind::TchF),
	desc("TCH/H(0)", "Half-rate traffic channel", 0x10, CH_LID_DEDIC, TCHH_BUF, LchanFlags::empty(), HandlerKind::TchH, HandlerKind::TchH),
	desc("TCH/H(1)", "Half-rate traffic channel", 0x18, CH_LID_DEDIC, TCHH_BUF, LchanFlags::empty(), HandlerKind::TchH, HandlerKind::TchH),
	desc("SDCCH/4(0)", "Stand-alone dedicated control channel", 0x20, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/4(1)", "Stand-alone dedicated control channel", 0x28, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/4(2)", "Stand-alone dedicated control channel", 0x30, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/4(3)", "Stand-alone dedicated control channel", 0x38, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/8(0)", "Stand-alone dedicated control channel", 0x40, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/8(1)", "Stand-alone dedicated control channel", 0x48, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/8(2)", "Stand-alone dedicated control channel", 0x50, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/8(3)", "Stand-alone dedicated control channel", 0x58, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/8(4)", "Stand-alone dedicated control channel", 0x60, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/8(5)", "Stand-alone dedicated control channel", 0x68, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/8(6)", "Stand-alone dedicated control channel", 0x70, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SDCCH/8(7)", "Stand-alone dedicated control channel", 0x78, CH_LID_DEDIC, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/TF", "Slow associated control channel", 0x08, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/TH(0)", "Slow associated control channel", 0x10, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/TH(1)", "Slow associated control channel", 0x18, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/4(0)", "Slow associated control channel", 0x20, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/4(1)", "Slow associated control channel", 0x28, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/4(2)", "Slow associated control channel", 0x30, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/4(3)", "Slow associated control channel", 0x38, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/8(0)", "Slow associated control channel", 0x40, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/8(1)", "Slow associated control channel", 0x48, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/8(2)", "Slow associated control channel", 0x50, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/8(3)", "Slow associated control channel", 0x58, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/8(4)", "Slow associated control channel", 0x60, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/8(5)", "Slow associated control channel", 0x68, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/8(6)", "Slow associated control channel", 0x70, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("SACCH/8(7)", "Slow associated control channel", 0x78, CH_LID_SACCH, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::Xcch),
	desc("PDTCH", "Packet data traffic channel", 0xc0, CH_LID_DEDIC, PDTCH_BUF, LchanFlags::PDCH, HandlerKind::Pdtch, HandlerKind::Pdtch),
	desc("PTCCH", "Packet timing advance control channel", 0xc0, CH_LID_PTCCH, PDTCH_BUF, LchanFlags::PDCH, HandlerKind::Ptcch, HandlerKind::Ptcch),
	desc("SDCCH/4(CBCH)", "Cell broadcast channel on SDCCH/4", 0xc8, 0x02, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::None),
	desc("SDCCH/8(CBCH)", "Cell broadcast channel on SDCCH/8", 0xd0, 0x02, XCCH_BUF, LchanFlags::empty(), HandlerKind::Xcch, HandlerKind::None),
];

pub fn lchan_desc(chan: LchanType) -> &'static LchanDesc {
	&LCHAN_DESC[chan as usize]
}

/// Is this a traffic channel?
pub fn lchan_is_tch(chan: LchanType) -> bool {
	matches!(chan, LchanType::TchF | LchanType::TchH0 | LchanType::TchH1)
}

pub fn lchan_is_sacch(chan: LchanType) -> bool {
	lchan_desc(chan).link_id & CH_LID_SACCH != 0
}

/// Channel mode of a TCH (GSM 04.08 channel mode IE).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TchMode {
	#[default]
	Signalling,
	SpeechV1,
	SpeechEfr,
	SpeechAmr,
}

/// Normal-burst training sequences (TS 05.02, table 5.2.3).
#[rustfmt::skip]
pub static NB_TRAINING_BITS: [[u8; 26]; 8] = [
	[0, 0, 1, 0, 0, 1, 0, 1, 1, 1, 0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 1, 0, 1, 1, 1],
	[0, 0, 1, 0, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 1, 1, 0, 1, 1, 1],
	[0, 1, 0, 0, 0, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 0, 0, 1, 0, 0, 0, 0, 1, 1, 1, 0],
	[0, 1, 0, 0, 0, 1, 1, 1, 1, 0, 1, 1, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 1, 1, 1, 0],
	[0, 0, 0, 1, 1, 0, 1, 0, 1, 1, 1, 0, 0, 1, 0, 0, 0, 0, 0, 1, 1, 0, 1, 0, 1, 1],
	[0, 1, 0, 0, 1, 1, 1, 0, 1, 0, 1, 1, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 1, 0, 1, 0],
	[1, 0, 1, 0, 0, 1, 1, 1, 1, 1, 0, 1, 1, 0, 0, 0, 1, 0, 1, 0, 0, 1, 1, 1, 1, 1],
	[1, 1, 1, 0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1, 0, 1, 1, 1, 0, 1, 1, 1, 1, 0, 0],
];

/// A burst received from the PHY.
#[derive(Clone, Debug)]
pub struct BurstInd {
	pub fn_: u32,
	pub tn: u8,
	/// Timing of arrival, 1/256 symbol periods.
	pub toa256: i16,
	pub rssi: i8,
	/// Burst id within the interleaved block.
	pub bid: u8,
	/// Soft bits of the whole burst.
	pub bits: Vec<i8>,
}

/// A burst to be transmitted.
#[derive(Clone, Debug)]
pub struct BurstReq {
	pub fn_: u32,
	pub tn: u8,
	pub pwr: u8,
	pub bid: u8,
	/// Hard bits of the whole burst; empty until a handler fills it.
	pub bits: Vec<u8>,
}

/// A queued L2 frame waiting for transmission on a logical channel.
#[derive(Clone, Debug)]
pub struct TxPrim {
	pub chan: LchanType,
	pub payload: Vec<u8>,
}

impl TxPrim {
	pub fn is_facch(&self) -> bool {
		lchan_is_tch(self.chan) && self.payload.len() == MACBLOCK_LEN
	}
}

/// Decode request at the interleave boundary.
pub struct DecodeReq<'a> {
	pub chan: LchanType,
	pub mode: TchMode,
	/// Deinterleaver input: the collected payload soft bits.
	pub bits: &'a [i8],
	/// Frame position allows a FACCH frame to end here.
	pub facch_hint: bool,
	/// Frame position carries the AMR CMI (not the CMR).
	pub amr_cmi: bool,
}

/// Encode request at the interleave boundary.
pub struct EncodeReq<'a> {
	pub chan: LchanType,
	pub mode: TchMode,
	pub data: &'a [u8],
	pub bits: &'a mut [u8],
}

/// Collaborator interface of the channel handlers: bit-level FEC below,
/// data indications above.
pub trait SchedIo {
	/// Attempts to decode one interleaved block.  `None` is a bad frame.
	fn decode(&mut self, req: DecodeReq<'_>) -> Option<Vec<u8>>;
	/// Encodes an L2 frame into the interleave buffer.
	fn encode(&mut self, req: EncodeReq<'_>) -> Result<(), ()>;
	/// A block arrived: decoded bytes, or `None` for a bad-frame
	/// indication.  `traffic` separates speech from signalling.
	fn data_ind(&mut self, chan: LchanType, meas: MeasSet, data: Option<&[u8]>, traffic: bool);
	/// A queued frame has been fully transmitted.
	fn data_cnf(&mut self, chan: LchanType, fn_: u32);
}

/// Live state of one logical channel.
pub struct LchanState {
	pub chan: LchanType,
	pub active: bool,

	/// Mask of received bursts within the current block.
	pub rx_burst_mask: u32,
	/// Mask of transmitted bursts.
	pub tx_burst_mask: u32,
	rx_bursts: Vec<i8>,
	tx_bursts: Vec<u8>,

	/// Queue of L2 frames to transmit.
	pub tx_prims: VecDeque<TxPrim>,
	/// Frame being transmitted.
	pub prim: Option<TxPrim>,

	pub tch_mode: TchMode,
	/// Training sequence code.
	pub tsc: u8,

	/// A FACCH/H steals the next two TCH bursts on downlink.
	pub dl_ongoing_facch: bool,
	/// Pending FACCH/H burst count on uplink.
	pub ul_facch_blocks: u8,

	pub meas_hist: MeasHist,
	/// Averaged measurements of the last received block.
	pub meas_avg: MeasSet,
}

impl LchanState {
	pub fn new(chan: LchanType) -> LchanState {
		let size = lchan_desc(chan).burst_buf_size;
		LchanState {
			chan,
			active: false,
			rx_burst_mask: 0,
			tx_burst_mask: 0,
			rx_bursts: vec![0; size],
			tx_bursts: vec![0; size],
			tx_prims: VecDeque::new(),
			prim: None,
			tch_mode: TchMode::Signalling,
			tsc: 0,
			dl_ongoing_facch: false,
			ul_facch_blocks: 0,
			meas_hist: MeasHist::new(),
			meas_avg: MeasSet::default(),
		}
	}

	/// Drops the interleave state and all queued frames.
	pub fn reset(&mut self) {
		self.rx_burst_mask = 0;
		self.tx_burst_mask = 0;
		self.rx_bursts.fill(0);
		self.tx_bursts.fill(0);
		self.tx_prims.clear();
		self.prim = None;
		self.dl_ongoing_facch = false;
		self.ul_facch_blocks = 0;
		self.meas_hist.clear();
	}

	/// Next queued frame for transmission starting at `fn_`.  On a TCH/H in
	/// speech mode a FACCH frame may only leave the queue on a FACCH block
	/// boundary; a speech frame further back may overtake it.
	fn take_prim(&mut self, fn_: u32) -> Option<TxPrim> {
		let facch_capable = matches!(self.chan, LchanType::TchH0 | LchanType::TchH1)
			&& self.tch_mode != TchMode::Signalling;

		if facch_capable
			&& self.tx_prims.front().is_some_and(TxPrim::is_facch)
			&& !tchh::tchh_facch_start(self.chan, fn_, true)
		{
			if let Some(pos) = self.tx_prims.iter().position(|p| !p.is_facch()) {
				return self.tx_prims.remove(pos);
			}
			return None;
		}

		self.tx_prims.pop_front()
	}
}

/// Copies the payload halves of a received burst (skipping tail bits and
/// the midamble) into the interleave buffer at `burst_off` bits.
fn copy_rx_payload(buf: &mut [i8], burst_off: usize, bits: &[i8]) {
	if bits.len() < NBITS_NB_GMSK_BURST {
		return;
	}
	buf[burst_off..burst_off + 58].copy_from_slice(&bits[3..61]);
	buf[burst_off + 58..burst_off + 116].copy_from_slice(&bits[87..145]);
}

/// Composes a complete normal burst from 116 payload bits and a training
/// sequence: 3 tail, 58 payload, 26 midamble, 58 payload, 3 tail.
fn compose_nb(payload: &[u8], tsc: u8) -> Vec<u8> {
	let train = &NB_TRAINING_BITS[tsc as usize & 7];
	let mut bits = vec![0u8; NBITS_NB_GMSK_BURST];
	bits[3..61].copy_from_slice(&payload[..58]);
	bits[61..87].copy_from_slice(train);
	bits[87..145].copy_from_slice(&payload[58..116]);
	bits
}

#[enum_dispatch]
pub trait BurstHandler {
	/// A burst arrived from the PHY for this channel.
	fn rx_burst(&self, lchan: &mut LchanState, bi: &BurstInd, io: &mut dyn SchedIo);
	/// Produce the burst to transmit; returns false when the channel has
	/// nothing to send (alignment wait or empty queue).
	fn tx_burst(&self, lchan: &mut LchanState, br: &mut BurstReq, io: &mut dyn SchedIo) -> bool;
}

/// Dispatch table entry for the implemented handler kinds.
#[enum_dispatch(BurstHandler)]
pub enum Handler {
	Xcch(XcchHandler),
	TchF(TchfHandler),
	TchH(TchhHandler),
}

impl Handler {
	/// The handler object for a descriptor discriminator, if the kind is
	/// driven by this scheduler (PHY-side kinds like RACH, FCCH and SCH
	/// are served by the L1 itself).
	pub fn for_kind(kind: HandlerKind) -> Option<Handler> {
		match kind {
			HandlerKind::Xcch => Some(Handler::Xcch(XcchHandler)),
			HandlerKind::TchF => Some(Handler::TchF(TchfHandler)),
			HandlerKind::TchH => Some(Handler::TchH(TchhHandler)),
			_ => None,
		}
	}
}

/// Handler for SDCCH/SACCH/BCCH/CCCH style channels: one block is four
/// bursts, interleaved block-diagonally.
pub struct XcchHandler;

impl BurstHandler for XcchHandler {
	fn rx_burst(&self, lchan: &mut LchanState, bi: &BurstInd, io: &mut dyn SchedIo) {
		trace!("{}: rx fn={} bid={}", lchan_desc(lchan.chan).name, bi.fn_, bi.bid);

		if bi.bid == 0 {
			lchan.rx_burst_mask = 0;
			lchan.rx_bursts.fill(0);
		} else if lchan.rx_burst_mask == 0 {
			// Align to the first burst of a block.
			return;
		}

		lchan.rx_burst_mask |= 1 << bi.bid;
		lchan.meas_hist.push(MeasSet { fn_: bi.fn_, toa256: bi.toa256, rssi: bi.rssi });
		copy_rx_payload(&mut lchan.rx_bursts, bi.bid as usize * NBITS_NB_GMSK_PAYLOAD, &bi.bits);

		if bi.bid != 3 {
			return;
		}

		lchan.meas_avg = lchan.meas_hist.avg(4);
		if lchan.rx_burst_mask & 0x0f != 0x0f {
			warn!("{}: incomplete block at fn={}", lchan_desc(lchan.chan).name, bi.fn_);
			io.data_ind(lchan.chan, lchan.meas_avg, None, false);
			return;
		}

		let decoded = io.decode(DecodeReq {
			chan: lchan.chan,
			mode: TchMode::Signalling,
			bits: &lchan.rx_bursts,
			facch_hint: false,
			amr_cmi: false,
		});
		io.data_ind(lchan.chan, lchan.meas_avg, decoded.as_deref(), false);
	}

	fn tx_burst(&self, lchan: &mut LchanState, br: &mut BurstReq, io: &mut dyn SchedIo) -> bool {
		if br.bid == 0 {
			lchan.tx_burst_mask = 0;
			if lchan.prim.is_none() {
				lchan.prim = lchan.take_prim(br.fn_);
			}
			let Some(prim) = &lchan.prim else {
				return false;
			};

			let mut bits = std::mem::take(&mut lchan.tx_bursts);
			let rc = io.encode(EncodeReq {
				chan: lchan.chan,
				mode: TchMode::Signalling,
				data: &prim.payload,
				bits: &mut bits,
			});
			lchan.tx_bursts = bits;
			if rc.is_err() {
				warn!("{}: failed to encode L2 payload", lchan_desc(lchan.chan).name);
				lchan.prim = None;
				return false;
			}
		} else if lchan.prim.is_none() {
			return false;
		}

		let off = br.bid as usize * NBITS_NB_GMSK_PAYLOAD;
		br.bits = compose_nb(&lchan.tx_bursts[off..off + NBITS_NB_GMSK_PAYLOAD], lchan.tsc);
		lchan.tx_burst_mask |= 1 << br.bid;

		if lchan.tx_burst_mask & 0x0f == 0x0f {
			io.data_cnf(lchan.chan, br.fn_);
			lchan.prim = None;
		}
		true
	}
}

/// Handler for full-rate traffic: one block is four bursts; a decoded MAC
/// block means the FACCH stole the frame.
pub struct TchfHandler;

impl BurstHandler for TchfHandler {
	fn rx_burst(&self, lchan: &mut LchanState, bi: &BurstInd, io: &mut dyn SchedIo) {
		trace!("{}: traffic fn={} bid={}", lchan_desc(lchan.chan).name, bi.fn_, bi.bid);

		if bi.bid == 0 {
			lchan.rx_burst_mask = 0;
			lchan.rx_bursts[..4 * NBITS_NB_GMSK_PAYLOAD].fill(0);
		} else if lchan.rx_burst_mask == 0 {
			return;
		}

		lchan.rx_burst_mask |= 1 << bi.bid;
		lchan.meas_hist.push(MeasSet { fn_: bi.fn_, toa256: bi.toa256, rssi: bi.rssi });
		copy_rx_payload(&mut lchan.rx_bursts, bi.bid as usize * NBITS_NB_GMSK_PAYLOAD, &bi.bits);

		if bi.bid != 3 {
			return;
		}

		lchan.meas_avg = lchan.meas_hist.avg(4);
		if lchan.rx_burst_mask & 0x0f != 0x0f {
			io.data_ind(lchan.chan, lchan.meas_avg, None, lchan.tch_mode != TchMode::Signalling);
			return;
		}

		let decoded = io.decode(DecodeReq {
			chan: lchan.chan,
			mode: lchan.tch_mode,
			bits: &lchan.rx_bursts[..4 * NBITS_NB_GMSK_PAYLOAD],
			facch_hint: false,
			amr_cmi: false,
		});
		match decoded {
			// A stolen frame carries FACCH signalling.
			Some(data) if data.len() == MACBLOCK_LEN => {
				io.data_ind(lchan.chan, lchan.meas_avg, Some(&data), false);
			}
			Some(data) => {
				io.data_ind(lchan.chan, lchan.meas_avg, Some(&data), true);
			}
			None => {
				io.data_ind(lchan.chan, lchan.meas_avg, None, lchan.tch_mode != TchMode::Signalling);
			}
		}
	}

	fn tx_burst(&self, lchan: &mut LchanState, br: &mut BurstReq, io: &mut dyn SchedIo) -> bool {
		// Same four-burst shape as the control channels, with the traffic
		// channel mode of this lchan.
		if br.bid == 0 {
			lchan.tx_burst_mask = 0;
			if lchan.prim.is_none() {
				lchan.prim = lchan.take_prim(br.fn_);
			}
			let Some(prim) = &lchan.prim else {
				return false;
			};

			let mut bits = std::mem::take(&mut lchan.tx_bursts);
			let rc = io.encode(EncodeReq {
				chan: lchan.chan,
				mode: lchan.tch_mode,
				data: &prim.payload,
				bits: &mut bits,
			});
			lchan.tx_bursts = bits;
			if rc.is_err() {
				warn!("{}: failed to encode L2 payload", lchan_desc(lchan.chan).name);
				lchan.prim = None;
				return false;
			}
		} else if lchan.prim.is_none() {
			return false;
		}

		let off = br.bid as usize * NBITS_NB_GMSK_PAYLOAD;
		br.bits = compose_nb(&lchan.tx_bursts[off..off + NBITS_NB_GMSK_PAYLOAD], lchan.tsc);
		lchan.tx_burst_mask |= 1 << br.bid;

		if lchan.tx_burst_mask & 0x0f == 0x0f {
			io.data_cnf(lchan.chan, br.fn_);
			lchan.prim = None;
		}
		true
	}
}

/// Handler for TCH/H and the FACCH/H riding on it.  Traffic is interleaved
/// over 4 bursts, FACCH/H over 6; the buffer holds 6 bursts and slides by
/// two on every even burst id.
pub struct TchhHandler;

impl BurstHandler for TchhHandler {
	fn rx_burst(&self, lchan: &mut LchanState, bi: &BurstInd, io: &mut dyn SchedIo) {
		trace!("{}: traffic fn={} bid={}", lchan_desc(lchan.chan).name, bi.fn_, bi.bid);

		if bi.bid == 0 {
			// Slide the burst buffer by two bursts leftwards.
			lchan.rx_bursts.copy_within(2 * NBITS_NB_GMSK_PAYLOAD.., 0);
			lchan.rx_bursts[4 * NBITS_NB_GMSK_PAYLOAD..].fill(0);
			lchan.rx_burst_mask <<= 2;
		}

		if lchan.rx_burst_mask == 0 {
			// Align to the first burst of a block.
			if bi.bid > 0 {
				return;
			}
			let aligned = if lchan.tch_mode == TchMode::Signalling {
				tchh::tchh_facch_start(lchan.chan, bi.fn_, false)
			} else {
				tchh::tchh_traffic_start(lchan.chan, bi.fn_, false)
			};
			if !aligned {
				return;
			}
		}

		lchan.rx_burst_mask |= 1 << bi.bid;
		lchan.meas_hist.push(MeasSet { fn_: bi.fn_, toa256: bi.toa256, rssi: bi.rssi });

		// The buffer tail holds the newest two bursts.
		let off = (4 + bi.bid as usize) * NBITS_NB_GMSK_PAYLOAD;
		copy_rx_payload(&mut lchan.rx_bursts, off, &bi.bits);

		// Wait for the second burst of the pair.
		if bi.bid != 1 {
			return;
		}

		// A complete set of bursts?
		let complete = if lchan.tch_mode == TchMode::Signalling {
			// FACCH/H is interleaved over 6 bursts.
			lchan.rx_burst_mask & 0x3f == 0x3f
		} else {
			// Traffic is interleaved over 4 bursts.
			lchan.rx_burst_mask & 0x0f == 0x0f
		};
		if !complete {
			bfi(lchan, bi, io, false);
			return;
		}

		// A FACCH/H stole these bursts; skip the decode attempt.
		if lchan.dl_ongoing_facch {
			lchan.dl_ongoing_facch = false;
			bfi(lchan, bi, io, false);
			return;
		}

		let decoded = io.decode(DecodeReq {
			chan: lchan.chan,
			mode: lchan.tch_mode,
			bits: &lchan.rx_bursts,
			facch_hint: tchh::TCHH_DL_FACCH_MAP[(bi.fn_ % 26) as usize],
			amr_cmi: tchh::TCHH_DL_AMR_CMI_MAP[(bi.fn_ % 26) as usize],
		});

		match decoded {
			None => bfi(lchan, bi, io, true),
			Some(data) if data.len() == MACBLOCK_LEN => {
				// FACCH/H: skip decoding of the next two stolen bursts.
				lchan.dl_ongoing_facch = true;
				lchan.meas_avg = lchan.meas_hist.avg(6);
				io.data_ind(lchan.chan, lchan.meas_avg, Some(&data), false);
				// Substitute a BFI for 1/2 stolen TCH frames.
				bfi(lchan, bi, io, false);
			}
			Some(data) => {
				lchan.meas_avg = lchan.meas_hist.avg(4);
				io.data_ind(lchan.chan, lchan.meas_avg, Some(&data), true);
			}
		}
	}

	fn tx_burst(&self, lchan: &mut LchanState, br: &mut BurstReq, io: &mut dyn SchedIo) -> bool {
		if br.bid == 0 {
			if lchan.tx_burst_mask == 0 {
				// Align transmission of the first FACCH/H frame.
				if lchan.tch_mode == TchMode::Signalling
					&& !tchh::tchh_facch_start(lchan.chan, br.fn_, true)
				{
					return false;
				}
			}

			// Slide the burst buffer by two bursts for interleaving.
			lchan.tx_bursts.copy_within(2 * NBITS_NB_GMSK_PAYLOAD.., 0);
			lchan.tx_bursts[4 * NBITS_NB_GMSK_PAYLOAD..].fill(0);
			lchan.tx_burst_mask <<= 2;

			// Encode fresh data unless FACCH/H blocks are still pending.
			if lchan.ul_facch_blocks <= 2 {
				if lchan.prim.is_none() {
					lchan.prim = lchan.take_prim(br.fn_);
				}
				match &lchan.prim {
					None if lchan.ul_facch_blocks == 0 => return false,
					// Let the tail bursts of a pending FACCH/H drain.
					None => {}
					Some(prim) => {
						if prim.payload.len() == MACBLOCK_LEN {
							lchan.ul_facch_blocks = 6;
						}

						let payload = prim.payload.clone();
						let mut bits = std::mem::take(&mut lchan.tx_bursts);
						let rc = io.encode(EncodeReq {
							chan: lchan.chan,
							mode: lchan.tch_mode,
							data: &payload,
							bits: &mut bits,
						});
						lchan.tx_bursts = bits;
						if rc.is_err() {
							warn!(
								"{}: failed to encode L2 payload",
								lchan_desc(lchan.chan).name
							);
							lchan.prim = None;
							lchan.ul_facch_blocks = 0;
							return false;
						}
					}
				}
			}
		} else if lchan.prim.is_none() && lchan.ul_facch_blocks == 0 {
			return false;
		}

		let off = br.bid as usize * NBITS_NB_GMSK_PAYLOAD;
		br.bits = compose_nb(&lchan.tx_bursts[off..off + NBITS_NB_GMSK_PAYLOAD], lchan.tsc);
		lchan.tx_burst_mask |= 1 << br.bid;

		// One burst less of a pending FACCH/H frame.
		if lchan.ul_facch_blocks > 0 {
			lchan.ul_facch_blocks -= 1;
		}

		if lchan.tx_burst_mask & 0x0f == 0x0f {
			if lchan.ul_facch_blocks == 0 {
				io.data_cnf(lchan.chan, br.fn_);
			}
			lchan.prim = None;
		}
		true
	}
}

/// Bad frame on TCH/H.  When no decode was attempted, the measurement set
/// is imputed with the frame number of the first burst of the block, so
/// upper layers see a stable frame number.
fn bfi(lchan: &mut LchanState, bi: &BurstInd, io: &mut dyn SchedIo, decoded: bool) {
	if !decoded {
		lchan.meas_avg = MeasSet {
			fn_: tchh::tchh_block_dl_first_fn(lchan.chan, bi.fn_, false),
			toa256: 0,
			rssi: -110,
		};
	} else {
		lchan.meas_avg = lchan.meas_hist.avg(4);
	}

	// A BFI is not applicable in signalling mode.
	let traffic = lchan.tch_mode != TchMode::Signalling;
	io.data_ind(lchan.chan, lchan.meas_avg, None, traffic);
}
