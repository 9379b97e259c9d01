//! GSM 04.08 layer-3 helpers: BCD numbers, location/routing area
//! identities and Mobile Identity coding.

use thiserror::Error;

/// Mobile Identity type, low nibble of the first MI octet (10.5.1.4).
pub const MI_TYPE_MASK: u8 = 0x07;
pub const MI_TYPE_NONE: u8 = 0x00;
pub const MI_TYPE_IMSI: u8 = 0x01;
pub const MI_TYPE_IMEI: u8 = 0x02;
pub const MI_TYPE_IMEISV: u8 = 0x03;
pub const MI_TYPE_TMSI: u8 = 0x04;
/// Odd number of identity digits.
pub const MI_ODD: u8 = 0x08;

/// IEI of the Mobile Identity IE.
pub const IE_MOBILE_ID: u8 = 0x17;
/// Length of a TMSI Mobile Identity value (type octet + 4 octets TMSI).
pub const TMSI_LEN: u8 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Gsm48Error {
	#[error("character {0:?} is not a BCD number digit")]
	InvalidDigit(char),
	#[error("encoded number does not fit the output limit")]
	Overlong,
	#[error("truncated or malformed identity")]
	BadIdentity,
}

/// Routing Area Identity (10.5.5.15).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RaId {
	pub mcc: u16,
	pub mnc: u16,
	pub lac: u16,
	pub rac: u8,
}

/// Digits of the called/calling-party BCD alphabet, indexed by nibble.
const BCD_NUM_DIGITS: [char; 15] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '*', '#', 'a', 'b', 'c',
];

fn asc_to_bcd(asc: char) -> Result<u8, Gsm48Error> {
	BCD_NUM_DIGITS
		.iter()
		.position(|&c| c == asc)
		.map(|i| i as u8)
		.ok_or(Gsm48Error::InvalidDigit(asc))
}

fn bcd_to_asc(bcd: u8) -> Option<char> {
	BCD_NUM_DIGITS.get(bcd as usize).copied()
}

/// Looks up a value in a `(value, name)` table, for log output.
pub fn value_string(table: &[(u8, &'static str)], val: u8) -> &'static str {
	table
		.iter()
		.find(|&&(v, _)| v == val)
		.map_or("unknown", |&(_, s)| s)
}

/// Encodes an ASCII phone number as a 'called/calling/connect party BCD
/// number' (10.5.4.7): one length octet, the caller-supplied header octets
/// (type-of-number etc.), then two digits per octet in little-endian nibble
/// order, an odd final digit padded with 0xf.
pub fn encode_bcd_number(header: &[u8], number: &str) -> Result<Vec<u8>, Gsm48Error> {
	let h_len = header.len();
	let mut lv_len = number.len() / 2 + h_len;
	if number.len() % 2 != 0 {
		lv_len += 1;
	}
	if lv_len > 0xff {
		return Err(Gsm48Error::Overlong);
	}

	let mut out = Vec::with_capacity(1 + lv_len);
	out.push(lv_len as u8);
	out.extend_from_slice(header);

	let mut cur = 0u8;
	for (i, c) in number.chars().enumerate() {
		let bcd = asc_to_bcd(c)?;
		if i % 2 == 0 {
			cur = bcd;
		} else {
			out.push(cur | (bcd << 4));
		}
	}
	if number.len() % 2 != 0 {
		out.push(cur | 0xf0);
	}

	Ok(out)
}

/// Decodes a BCD number LV (skipping `h_len` header octets) back into its
/// ASCII digits.  Decoding stops at the announced length; the terminating
/// 0xf pad nibble ends the number.
pub fn decode_bcd_number(bcd_lv: &[u8], h_len: usize) -> String {
	let mut out = String::new();
	if bcd_lv.is_empty() {
		return out;
	}
	let in_len = bcd_lv[0] as usize;

	for i in 1 + h_len..=in_len.min(bcd_lv.len() - 1) {
		if let Some(c) = bcd_to_asc(bcd_lv[i] & 0xf) {
			out.push(c);
		}
		if let Some(c) = bcd_to_asc(bcd_lv[i] >> 4) {
			out.push(c);
		}
	}
	out
}

fn to_bcd(val: u16) -> [u8; 3] {
	[(val / 100 % 10) as u8, (val / 10 % 10) as u8, (val % 10) as u8]
}

/// Packs MCC/MNC/LAC into the 5-octet Location Area Identification of
/// 3GPP TS 24.008 Table 10.5.3, handling both 2- and 3-digit MNC.
pub fn encode_lai(mcc: u16, mnc: u16, lac: u16) -> [u8; 5] {
	let mut lai = [0u8; 5];
	let bcd = to_bcd(mcc);

	lai[0] = bcd[0] | (bcd[1] << 4);
	lai[1] = bcd[2];

	let bcd = to_bcd(mnc);
	if mnc > 99 {
		lai[1] |= bcd[2] << 4;
		lai[2] = bcd[0] | (bcd[1] << 4);
	} else {
		lai[1] |= 0xf << 4;
		lai[2] = bcd[1] | (bcd[2] << 4);
	}

	lai[3..5].copy_from_slice(&lac.to_be_bytes());
	lai
}

/// Inverse of [`encode_lai`].  Returns true integers, not hex.
pub fn decode_lai(lai: &[u8; 5]) -> (u16, u16, u16) {
	let mcc =
		u16::from(lai[0] & 0x0f) * 100 + u16::from(lai[0] >> 4) * 10 + u16::from(lai[1] & 0x0f);

	let mnc = if lai[1] & 0xf0 == 0xf0 {
		u16::from(lai[2] & 0x0f) * 10 + u16::from(lai[2] >> 4)
	} else {
		u16::from(lai[2] & 0x0f) * 100 + u16::from(lai[2] >> 4) * 10 + u16::from(lai[1] >> 4)
	};

	let lac = u16::from_be_bytes([lai[3], lai[4]]);
	(mcc, mnc, lac)
}

/// Builds the 6-octet Routing Area Identification: the LAI BCD rules plus
/// one RAC octet.
pub fn construct_ra(raid: &RaId) -> [u8; 6] {
	let mut buf = [0u8; 6];
	buf[..5].copy_from_slice(&encode_lai(raid.mcc, raid.mnc, raid.lac));
	buf[5] = raid.rac;
	buf
}

/// Parses a 6-octet Routing Area Identification.
pub fn parse_ra(buf: &[u8; 6]) -> RaId {
	let (mcc, mnc, lac) = decode_lai(buf[..5].try_into().unwrap());
	RaId { mcc, mnc, lac, rac: buf[5] }
}

/// Generates a complete Mobile Identity IE (IEI + length + value) from a
/// TMSI.  The filler nibble is 0xf as the digit count is even.
pub fn generate_mid_from_tmsi(tmsi: u32) -> [u8; 7] {
	let mut buf = [0u8; 7];
	buf[0] = IE_MOBILE_ID;
	buf[1] = TMSI_LEN;
	buf[2] = 0xf0 | MI_TYPE_TMSI;
	buf[3..7].copy_from_slice(&tmsi.to_be_bytes());
	buf
}

/// Generates a Mobile Identity IE from an IMSI of 1..=15 digits.
pub fn generate_mid_from_imsi(imsi: &str) -> Result<Vec<u8>, Gsm48Error> {
	let digits = imsi.chars().map(asc_to_bcd).collect::<Result<Vec<_>, _>>()?;
	if digits.is_empty() || digits.len() > 15 {
		return Err(Gsm48Error::BadIdentity);
	}

	let odd = digits.len() % 2 != 0;
	let mi_len = if odd { digits.len().div_ceil(2) } else { digits.len() / 2 + 1 };

	let mut buf = vec![0u8; 2 + mi_len];
	buf[0] = IE_MOBILE_ID;
	buf[1] = mi_len as u8;
	buf[2] = (digits[0] << 4) | MI_TYPE_IMSI | (u8::from(odd) << 3);

	let mut off = 1;
	for i in 1..mi_len {
		let lower = digits[off];
		off += 1;
		let upper = if off < digits.len() {
			let u = digits[off];
			off += 1;
			u
		} else {
			0x0f
		};
		buf[2 + i] = (upper << 4) | lower;
	}

	Ok(buf)
}

/// Converts a Mobile Identity value (without IEI and length octet) to its
/// string representation, discriminating on the identity type nibble.
pub fn mi_to_string(mi: &[u8]) -> Result<String, Gsm48Error> {
	if mi.is_empty() {
		return Err(Gsm48Error::BadIdentity);
	}

	match mi[0] & MI_TYPE_MASK {
		MI_TYPE_NONE => Ok(String::new()),
		MI_TYPE_TMSI => {
			if mi.len() != TMSI_LEN as usize || mi[0] != 0xf0 | MI_TYPE_TMSI {
				return Err(Gsm48Error::BadIdentity);
			}
			let tmsi = u32::from_be_bytes(mi[1..5].try_into().unwrap());
			Ok(tmsi.to_string())
		}
		MI_TYPE_IMSI | MI_TYPE_IMEI | MI_TYPE_IMEISV => {
			let mut out = String::new();
			if let Some(c) = bcd_to_asc(mi[0] >> 4) {
				out.push(c);
			}
			for i in 1..mi.len() {
				if let Some(c) = bcd_to_asc(mi[i] & 0xf) {
					out.push(c);
				}
				// Skip the pad nibble of an even-length identity.
				if i != mi.len() - 1 || mi[0] & MI_ODD != 0 {
					if let Some(c) = bcd_to_asc(mi[i] >> 4) {
						out.push(c);
					}
				}
			}
			Ok(out)
		}
		_ => Err(Gsm48Error::BadIdentity),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lai_two_digit_mnc() {
		let lai = encode_lai(262, 42, 0x1234);
		assert_eq!(decode_lai(&lai), (262, 42, 0x1234));
		// Filler nibble marks the 2-digit MNC.
		assert_eq!(lai[1] & 0xf0, 0xf0);
	}

	#[test]
	fn lai_three_digit_mnc() {
		let lai = encode_lai(310, 410, 0xbeef);
		assert_eq!(decode_lai(&lai), (310, 410, 0xbeef));
	}

	#[test]
	fn ra_roundtrip() {
		let raid = RaId { mcc: 262, mnc: 3, lac: 0x1022, rac: 0x11 };
		assert_eq!(parse_ra(&construct_ra(&raid)), raid);
	}

	#[test]
	fn mid_tmsi_roundtrip() {
		for tmsi in [0u32, 1, 0x2342, 0xdeadbeef, u32::MAX] {
			let mid = generate_mid_from_tmsi(tmsi);
			assert_eq!(mid[..3], [IE_MOBILE_ID, TMSI_LEN, 0xf4]);
			assert_eq!(mi_to_string(&mid[2..]).unwrap(), tmsi.to_string());
		}
	}

	#[test]
	fn mid_imsi_roundtrip() {
		for imsi in ["1", "26203", "262420123456789", "8984", "123456789012345"] {
			let mid = generate_mid_from_imsi(imsi).unwrap();
			assert_eq!(mid[0], IE_MOBILE_ID);
			assert_eq!(mid[1] as usize, mid.len() - 2);
			assert_eq!(mi_to_string(&mid[2..]).unwrap(), imsi);
		}
	}

	#[test]
	fn bcd_number_odd_padding() {
		let lv = encode_bcd_number(&[0x81], "12345").unwrap();
		assert_eq!(lv[0] as usize, lv.len() - 1);
		assert_eq!(lv[lv.len() - 1] & 0xf0, 0xf0);
		assert_eq!(decode_bcd_number(&lv, 1), "12345");
	}

	#[test]
	fn bcd_number_full_alphabet() {
		let lv = encode_bcd_number(&[], "0123456789*#abc").unwrap();
		assert_eq!(decode_bcd_number(&lv, 0), "0123456789*#abc");
	}

	#[test]
	fn bcd_number_rejects_garbage() {
		assert_eq!(encode_bcd_number(&[], "12x"), Err(Gsm48Error::InvalidDigit('x')));
	}
}
