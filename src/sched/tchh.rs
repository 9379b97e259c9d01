//! Interleaved TCH/H and FACCH/H block mappings on the 26-frame
//! multiframe, from 3GPP TS 45.002 clause 7, table 1, plus the AMR
//! CMI/CMR half-frame cadence of TS 45.009.

use crate::sched::lchan::LchanType;

/// B0(0,2,4,6), B1(4,6,8,10), B2(8,10,0,2)
const TCH_H0_TRAFFIC_BLOCK_MAP: [[u8; 4]; 3] = [[0, 2, 4, 6], [4, 6, 8, 10], [8, 10, 0, 2]];

/// B0(1,3,5,7), B1(5,7,9,11), B2(9,11,1,3)
const TCH_H1_TRAFFIC_BLOCK_MAP: [[u8; 4]; 3] = [[1, 3, 5, 7], [5, 7, 9, 11], [9, 11, 1, 3]];

/// B0(4,6,8,10,13,15), B1(13,15,17,19,21,23), B2(21,23,0,2,4,6)
const TCH_H0_DL_FACCH_BLOCK_MAP: [[u8; 6]; 3] =
	[[4, 6, 8, 10, 13, 15], [13, 15, 17, 19, 21, 23], [21, 23, 0, 2, 4, 6]];

/// B0(0,2,4,6,8,10), B1(8,10,13,15,17,19), B2(17,19,21,23,0,2)
const TCH_H0_UL_FACCH_BLOCK_MAP: [[u8; 6]; 3] =
	[[0, 2, 4, 6, 8, 10], [8, 10, 13, 15, 17, 19], [17, 19, 21, 23, 0, 2]];

/// B0(5,7,9,11,14,16), B1(14,16,18,20,22,24), B2(22,24,1,3,5,7)
const TCH_H1_DL_FACCH_BLOCK_MAP: [[u8; 6]; 3] =
	[[5, 7, 9, 11, 14, 16], [14, 16, 18, 20, 22, 24], [22, 24, 1, 3, 5, 7]];

/// B0(1,3,5,7,9,11), B1(9,11,14,16,18,20), B2(18,20,22,24,1,3)
const TCH_H1_UL_FACCH_BLOCK_MAP: [[u8; 6]; 3] =
	[[1, 3, 5, 7, 9, 11], [9, 11, 14, 16, 18, 20], [18, 20, 22, 24, 1, 3]];

/// FACCH/H channel mapping for Downlink (TS 45.002, table 1), valid for
/// both FACCH/H(0) and FACCH/H(1).  The TDMA frame number of burst 'f' is
/// the table index.
pub const TCHH_DL_FACCH_MAP: [bool; 26] = {
	let mut map = [false; 26];
	map[15] = true; // FACCH/H(0): B0(4,6,8,10,13,15)
	map[16] = true; // FACCH/H(1): B0(5,7,9,11,14,16)
	map[23] = true; // FACCH/H(0): B1(13,15,17,19,21,23)
	map[24] = true; // FACCH/H(1): B1(14,16,18,20,22,24)
	map[6] = true; // FACCH/H(0): B2(21,23,0,2,4,6)
	map[7] = true; // FACCH/H(1): B2(22,24,1,3,5,7)
	map
};

/// TS 45.009, tables 3.2.1.3-{2,4}: AMR on Downlink TCH/H.
///
/// ```text
/// +---+---+---+---+---+---+
/// | a | b | c | d | e | f |  Burst 'a' received first
/// +---+---+---+---+---+---+
///  ^^^^^^^^^^^^^^^^^^^^^^^   FACCH frame  (bursts 'a' .. 'f')
///  ^^^^^^^^^^^^^^^            Speech frame (bursts 'a' .. 'd')
/// ```
///
/// The TDMA frame number of burst 'f' is the table index.
pub const TCHH_DL_AMR_CMI_MAP: [bool; 26] = {
	let mut map = [false; 26];
	map[15] = true; // TCH/H(0): a=4  / d=10 / f=15
	map[23] = true; // TCH/H(0): a=13 / d=19 / f=23
	map[6] = true; // TCH/H(0): a=21 / d=2  / f=6
	map[16] = true; // TCH/H(1): a=5  / d=11 / f=16
	map[24] = true; // TCH/H(1): a=14 / d=20 / f=24
	map[7] = true; // TCH/H(1): a=22 / d=3  / f=7
	map
};

/// The TDMA frame number of burst 'a' is the table index.
pub const TCHH_UL_AMR_CMI_MAP: [bool; 26] = {
	let mut map = [false; 26];
	map[0] = true; // TCH/H(0): a=0
	map[8] = true; // TCH/H(0): a=8
	map[17] = true; // TCH/H(0): a=17
	map[1] = true; // TCH/H(1): a=1
	map[9] = true; // TCH/H(1): a=9
	map[18] = true; // TCH/H(1): a=18
	map
};

fn map_check<const N: usize>(map: &[[u8; N]; 3], fn_mf: u8, start: bool) -> bool {
	let pos = if start { 0 } else { N - 1 };
	map.iter().any(|block| block[pos] == fn_mf)
}

/// Can a TCH/H block transmission be initiated (`start`) or finished on
/// frame number `fn_` of `chan` (TCH/H(0) or TCH/H(1))?
pub fn tchh_block_map_fn(chan: LchanType, fn_: u32, ul: bool, facch: bool, start: bool) -> bool {
	debug_assert!(matches!(chan, LchanType::TchH0 | LchanType::TchH1));

	let fn_mf = if facch { (fn_ % 26) as u8 } else { (fn_ % 13) as u8 };

	if facch {
		let map = match (ul, chan) {
			(true, LchanType::TchH0) => &TCH_H0_UL_FACCH_BLOCK_MAP,
			(true, _) => &TCH_H1_UL_FACCH_BLOCK_MAP,
			(false, LchanType::TchH0) => &TCH_H0_DL_FACCH_BLOCK_MAP,
			(false, _) => &TCH_H1_DL_FACCH_BLOCK_MAP,
		};
		map_check(map, fn_mf, start)
	} else {
		let map = match chan {
			LchanType::TchH0 => &TCH_H0_TRAFFIC_BLOCK_MAP,
			_ => &TCH_H1_TRAFFIC_BLOCK_MAP,
		};
		map_check(map, fn_mf, start)
	}
}

pub fn tchh_traffic_start(chan: LchanType, fn_: u32, ul: bool) -> bool {
	tchh_block_map_fn(chan, fn_, ul, false, true)
}

pub fn tchh_traffic_end(chan: LchanType, fn_: u32, ul: bool) -> bool {
	tchh_block_map_fn(chan, fn_, ul, false, false)
}

pub fn tchh_facch_start(chan: LchanType, fn_: u32, ul: bool) -> bool {
	tchh_block_map_fn(chan, fn_, ul, true, true)
}

pub fn tchh_facch_end(chan: LchanType, fn_: u32, ul: bool) -> bool {
	tchh_block_map_fn(chan, fn_, ul, true, false)
}

fn first_fn_from<const N: usize>(map: &[[u8; N]; 3], last_fn: u32, period: u32) -> Option<u32> {
	let fn_mf = (last_fn % period) as u8;
	for block in map {
		if block[N - 1] == fn_mf {
			let diff = (u32::from(fn_mf) + period - u32::from(block[0])) % period;
			return Some(crate::sched::fn_sub(last_fn, diff));
		}
	}
	None
}

/// Frame number of the first burst of the downlink block ending at
/// `last_fn`, for imputing a stable frame number on bad-frame indications.
/// Falls back to `last_fn` if the frame number does not end a block.
pub fn tchh_block_dl_first_fn(chan: LchanType, last_fn: u32, facch: bool) -> u32 {
	debug_assert!(matches!(chan, LchanType::TchH0 | LchanType::TchH1));

	let first = if facch {
		let map = match chan {
			LchanType::TchH0 => &TCH_H0_DL_FACCH_BLOCK_MAP,
			_ => &TCH_H1_DL_FACCH_BLOCK_MAP,
		};
		first_fn_from(map, last_fn, 26)
	} else {
		let map = match chan {
			LchanType::TchH0 => &TCH_H0_TRAFFIC_BLOCK_MAP,
			_ => &TCH_H1_TRAFFIC_BLOCK_MAP,
		};
		first_fn_from(map, last_fn, 13)
	};

	first.unwrap_or_else(|| {
		error!(
			"no first-burst frame number for {} block ending at fn={last_fn}",
			if facch { "FACCH/H" } else { "TCH/H" }
		);
		last_fn
	})
}
