//! GSM L3 compatible TLV codec.
//!
//! Terminology / wording:
//!
//! ```text
//!             tag     length      value   (in bits)
//!      V      -       -           8
//!     LV      -       8           N * 8
//!    TLV      8       8           N * 8
//!  TL16V      8       16          N * 8
//!  TLV16      8       8           N * 16
//!   TvLV      8       8/16        N * 8
//!  vTvLV      8/16    8/16        N * 8
//! ```
//!
//! The encoder side appends (`*_put`) or prepends (`*_push`) fields to a
//! [`Msgb`].  The parser walks a byte slice against a per-IE
//! [`TlvDefinition`] and stores `(len, value)` references in a 256-entry
//! [`TlvParsed`] index with O(1) lookup.

use thiserror::Error;

use crate::msgb::Msgb;

/// Maximum value length encodable in a single TvLV length octet.
pub const TVLV_MAX_ONEBYTE: u16 = 0x7f;

/// Coding of a single IE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlvType {
	/// Tag not known / not allowed.
	#[default]
	None,
	/// Fixed-length value with a plain tag.
	Fixed(u8),
	/// Tag-only.
	T,
	/// Tag and one value octet.
	Tv,
	/// Tag, 8-bit length, value.
	Tlv,
	/// Tag, 16-bit length, value.
	Tl16v,
	/// Tag, variable-size length, value.
	TvLv,
	/// Tag and value share one octet (upper/lower nibble).
	SingleTv,
	/// Variable-size tag and variable-size length (GAN flavour).
	VTvLvGan,
}

/// Definition of all 256 IEs of one protocol.
#[derive(Clone)]
pub struct TlvDefinition {
	def: [TlvType; 256],
}

impl TlvDefinition {
	pub const fn new() -> TlvDefinition {
		TlvDefinition { def: [TlvType::None; 256] }
	}

	/// Builds a definition from `(tag, coding)` pairs.
	pub fn from_entries(entries: &[(u8, TlvType)]) -> TlvDefinition {
		let mut this = TlvDefinition::new();
		for &(tag, ty) in entries {
			this.def[tag as usize] = ty;
		}
		this
	}

	pub fn get(&self, tag: u8) -> TlvType {
		self.def[tag as usize]
	}

	pub fn set(&mut self, tag: u8, ty: TlvType) {
		self.def[tag as usize] = ty;
	}

	/// Takes a master definition and fills up all empty slots of `self`.
	/// Used to apply protocol-family defaults.
	pub fn patch(&mut self, src: &TlvDefinition) {
		for i in 0..256 {
			if self.def[i] == TlvType::None {
				self.def[i] = src.def[i];
			}
		}
	}
}

impl Default for TlvDefinition {
	fn default() -> TlvDefinition {
		TlvDefinition::new()
	}
}

/// Protocol-family default treating every tag as TvLV-coded, used as a
/// patch source by protocols whose IEs all share that coding.
pub fn tvlv_att_def() -> TlvDefinition {
	TlvDefinition { def: [TlvType::TvLv; 256] }
}

/// Protocol-family default treating every tag as vTvLV (GAN) coded.
pub fn vtvlv_gan_att_def() -> TlvDefinition {
	TlvDefinition { def: [TlvType::VTvLvGan; 256] }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
	/// The buffer ended in the middle of an IE header or value.
	#[error("insufficient input while parsing IE")]
	InsufficientInput,
	/// The tag has no entry in the definition table.
	#[error("unknown IE tag 0x{0:02x}")]
	UnknownTag(u8),
	/// The announced value length exceeds the remaining buffer.
	#[error("IE length overflows the buffer")]
	LengthOverflow,
}

/// Result of the TLV parser: per-tag value references into the input.
pub struct TlvParsed<'a> {
	lv: [Option<&'a [u8]>; 256],
}

impl<'a> TlvParsed<'a> {
	pub fn new() -> TlvParsed<'a> {
		TlvParsed { lv: [None; 256] }
	}

	pub fn present(&self, tag: u8) -> bool {
		self.lv[tag as usize].is_some()
	}

	pub fn val(&self, tag: u8) -> Option<&'a [u8]> {
		self.lv[tag as usize]
	}

	pub fn len(&self, tag: u8) -> usize {
		self.lv[tag as usize].map_or(0, <[u8]>::len)
	}

	/// Parses `buf` against `def`, storing every recognized IE.  Repeated
	/// tags overwrite.  Up to two headless LV fields at the start of the
	/// buffer may be injected into the table under the given sentinel tags.
	///
	/// On error the IEs parsed so far remain in the table.  A tag with no
	/// definition entry is skipped assuming TLV coding; if that cannot be
	/// done the parser stops.
	pub fn parse(
		&mut self,
		def: &TlvDefinition,
		buf: &'a [u8],
		lv_tag: Option<u8>,
		lv_tag2: Option<u8>,
	) -> Result<usize, TlvError> {
		let mut ofs = 0usize;
		let mut num_parsed = 0usize;

		for tag in [lv_tag, lv_tag2].into_iter().flatten() {
			if ofs >= buf.len() {
				return Err(TlvError::InsufficientInput);
			}
			let len = buf[ofs] as usize;
			if ofs + 1 + len > buf.len() {
				return Err(TlvError::LengthOverflow);
			}
			self.lv[tag as usize] = Some(&buf[ofs + 1..ofs + 1 + len]);
			num_parsed += 1;
			ofs += len + 1;
		}

		while ofs < buf.len() {
			match parse_one(def, &buf[ofs..]) {
				Ok((tag, val, consumed)) => {
					self.lv[tag as usize] = Some(val);
					ofs += consumed;
					num_parsed += 1;
				}
				Err(TlvError::UnknownTag(tag)) => {
					// Comprehension rule: assume TLV coding and
					// drop the IE silently.
					if ofs + 2 > buf.len() {
						return Err(TlvError::UnknownTag(tag));
					}
					let len = buf[ofs + 1] as usize;
					if ofs + 2 + len > buf.len() {
						return Err(TlvError::UnknownTag(tag));
					}
					trace!("dropping unknown IE 0x{tag:02x} ({len} octets)");
					ofs += 2 + len;
				}
				Err(e) => return Err(e),
			}
		}

		Ok(num_parsed)
	}
}

impl Default for TlvParsed<'_> {
	fn default() -> Self {
		TlvParsed::new()
	}
}

/// Parses a single IE, returning `(tag, value, octets consumed)`.
pub fn parse_one<'a>(def: &TlvDefinition, buf: &'a [u8]) -> Result<(u8, &'a [u8], usize), TlvError> {
	if buf.is_empty() {
		return Err(TlvError::InsufficientInput);
	}
	let tag = buf[0];

	// Single-octet TV: the upper nibble is the tag.
	if def.get(tag & 0xf0) == TlvType::SingleTv {
		return Ok((tag & 0xf0, &buf[0..1], 1));
	}

	let take = |hdr: usize, len: usize| -> Result<(u8, &'a [u8], usize), TlvError> {
		if hdr + len > buf.len() {
			return Err(TlvError::LengthOverflow);
		}
		Ok((tag, &buf[hdr..hdr + len], hdr + len))
	};

	match def.get(tag) {
		TlvType::T => Ok((tag, &buf[0..0], 1)),
		TlvType::Tv => take(1, 1),
		TlvType::Fixed(n) => take(1, n as usize),
		TlvType::Tlv => {
			if buf.len() < 2 {
				return Err(TlvError::InsufficientInput);
			}
			take(2, buf[1] as usize)
		}
		TlvType::TvLv => {
			if buf.len() < 2 {
				return Err(TlvError::InsufficientInput);
			}
			if buf[1] & 0x80 != 0 {
				take(2, (buf[1] & 0x7f) as usize)
			} else {
				if buf.len() < 3 {
					return Err(TlvError::InsufficientInput);
				}
				take(3, u16::from_be_bytes([buf[1], buf[2]]) as usize)
			}
		}
		TlvType::Tl16v => {
			if buf.len() < 3 {
				return Err(TlvError::InsufficientInput);
			}
			take(3, u16::from_be_bytes([buf[1], buf[2]]) as usize)
		}
		TlvType::VTvLvGan => {
			if buf.len() < 2 {
				return Err(TlvError::InsufficientInput);
			}
			if buf[1] & 0x80 != 0 {
				// Like TL16V but without the highest bit of the length.
				if buf.len() < 3 {
					return Err(TlvError::InsufficientInput);
				}
				take(3, (u16::from_be_bytes([buf[1] & 0x7f, buf[2]])) as usize)
			} else {
				take(2, buf[1] as usize)
			}
		}
		TlvType::SingleTv | TlvType::None => Err(TlvError::UnknownTag(tag)),
	}
}

/// Gross (on-the-wire) length of an LV field.
pub const fn lv_gross_len(len: usize) -> usize {
	len + 1
}

/// Gross length of a TLV field.
pub const fn tlv_gross_len(len: usize) -> usize {
	len + 2
}

/// Gross length of a TLV16 field of `n` 16-bit values.
pub const fn tlv16_gross_len(n: usize) -> usize {
	2 * n + 2
}

/// Gross length of a TL16V field.
pub const fn tl16v_gross_len(len: usize) -> usize {
	len + 3
}

/// Gross length of an L16TV field.
pub const fn l16tv_gross_len(len: usize) -> usize {
	len + 3
}

/// Gross length of a TvLV field.
pub fn tvlv_gross_len(len: u16) -> usize {
	if len <= TVLV_MAX_ONEBYTE {
		tlv_gross_len(len as usize)
	} else {
		tl16v_gross_len(len as usize)
	}
}

/// Gross length of a vTvLV (GAN) field.
pub fn vtvlv_gan_gross_len(tag: u16, len: u16) -> usize {
	let mut ret = if len <= TVLV_MAX_ONEBYTE {
		tlv_gross_len(len as usize)
	} else {
		tl16v_gross_len(len as usize)
	};
	if tag > TVLV_MAX_ONEBYTE {
		ret += 1;
	}
	ret
}

fn write_vtvlv_gan(out: &mut [u8], tag: u16, val: &[u8]) {
	let mut ofs = 0;
	if tag > TVLV_MAX_ONEBYTE {
		out[0] = 0x80 | (tag >> 8) as u8;
		out[1] = (tag & 0xff) as u8;
		ofs = 2;
	} else {
		out[0] = tag as u8;
		ofs += 1;
	}
	let len = val.len() as u16;
	if len > TVLV_MAX_ONEBYTE {
		out[ofs] = 0x80 | (len >> 8) as u8;
		out[ofs + 1] = (len & 0xff) as u8;
		ofs += 2;
	} else {
		out[ofs] = len as u8;
		ofs += 1;
	}
	out[ofs..ofs + val.len()].copy_from_slice(val);
}

fn write_tvlv(out: &mut [u8], tag: u8, val: &[u8]) {
	out[0] = tag;
	let len = val.len() as u16;
	if len <= TVLV_MAX_ONEBYTE {
		out[1] = 0x80 | len as u8;
		out[2..2 + val.len()].copy_from_slice(val);
	} else {
		out[1] = (len >> 8) as u8;
		out[2] = (len & 0xff) as u8;
		out[3..3 + val.len()].copy_from_slice(val);
	}
}

/// TLV generation on top of [`Msgb`].
impl Msgb {
	/// Appends a V field.
	pub fn v_put(&mut self, val: u8) {
		self.put_u8(val);
	}

	/// Appends an LV field.
	pub fn lv_put(&mut self, val: &[u8]) {
		let out = self.put(lv_gross_len(val.len()));
		out[0] = val.len() as u8;
		out[1..].copy_from_slice(val);
	}

	/// Appends a TV field.
	pub fn tv_put(&mut self, tag: u8, val: u8) {
		let out = self.put(2);
		out[0] = tag;
		out[1] = val;
	}

	/// Appends a TV field with a 16-bit value in network byte order.
	pub fn tv16_put(&mut self, tag: u8, val: u16) {
		let out = self.put(3);
		out[0] = tag;
		out[1..3].copy_from_slice(&val.to_be_bytes());
	}

	/// Appends a tag followed by a fixed-length value.
	pub fn tv_fixed_put(&mut self, tag: u8, val: &[u8]) {
		let out = self.put(1 + val.len());
		out[0] = tag;
		out[1..].copy_from_slice(val);
	}

	/// Appends a TLV field.
	pub fn tlv_put(&mut self, tag: u8, val: &[u8]) {
		let out = self.put(tlv_gross_len(val.len()));
		out[0] = tag;
		out[1] = val.len() as u8;
		out[2..].copy_from_slice(val);
	}

	/// Appends a TLV16 field of 16-bit values.
	pub fn tlv16_put(&mut self, tag: u8, val: &[u16]) {
		let out = self.put(tlv16_gross_len(val.len()));
		out[0] = tag;
		out[1] = val.len() as u8;
		for (i, v) in val.iter().enumerate() {
			out[2 + 2 * i..4 + 2 * i].copy_from_slice(&v.to_be_bytes());
		}
	}

	/// Appends a TL16V field.
	pub fn tl16v_put(&mut self, tag: u8, val: &[u8]) {
		let out = self.put(tl16v_gross_len(val.len()));
		out[0] = tag;
		out[1..3].copy_from_slice(&(val.len() as u16).to_be_bytes());
		out[3..].copy_from_slice(val);
	}

	/// Appends a TvLV field.
	pub fn tvlv_put(&mut self, tag: u8, val: &[u8]) {
		let out = self.put(tvlv_gross_len(val.len() as u16));
		write_tvlv(out, tag, val);
	}

	/// Appends a vTvLV (GAN) field.
	pub fn vtvlv_gan_put(&mut self, tag: u16, val: &[u8]) {
		let out = self.put(vtvlv_gan_gross_len(tag, val.len() as u16));
		write_vtvlv_gan(out, tag, val);
	}

	/// Appends an L16TV field.
	pub fn l16tv_put(&mut self, tag: u8, val: &[u8]) {
		let out = self.put(l16tv_gross_len(val.len()));
		out[0..2].copy_from_slice(&(val.len() as u16).to_be_bytes());
		out[2] = tag;
		out[3..].copy_from_slice(val);
	}

	/// Prepends a TV field.
	pub fn tv_push(&mut self, tag: u8, val: u8) {
		let out = self.push(2);
		out[0] = tag;
		out[1] = val;
	}

	/// Prepends a TV field with a 16-bit value.
	pub fn tv16_push(&mut self, tag: u8, val: u16) {
		let out = self.push(3);
		out[0] = tag;
		out[1..3].copy_from_slice(&val.to_be_bytes());
	}

	/// Prepends a TLV field.
	pub fn tlv_push(&mut self, tag: u8, val: &[u8]) {
		let out = self.push(tlv_gross_len(val.len()));
		out[0] = tag;
		out[1] = val.len() as u8;
		out[2..].copy_from_slice(val);
	}

	/// Prepends a TvLV field.
	pub fn tvlv_push(&mut self, tag: u8, val: &[u8]) {
		let out = self.push(tvlv_gross_len(val.len() as u16));
		write_tvlv(out, tag, val);
	}

	/// Prepends a vTvLV (GAN) field.
	pub fn vtvlv_gan_push(&mut self, tag: u16, val: &[u8]) {
		let out = self.push(vtvlv_gan_gross_len(tag, val.len() as u16));
		write_vtvlv_gan(out, tag, val);
	}
}
