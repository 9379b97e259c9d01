//! IPA multiplex framing.
//!
//! Every stream transported by this crate (L1 primitives over a UNIX
//! socket, the CTRL protocol over TCP) is framed by the ip.access header:
//! a 16-bit big-endian payload length and a protocol octet, optionally
//! followed by an extension protocol octet for the OSMO protocol space.

use thiserror::Error;

use crate::msgb::Msgb;

/// Size of the basic IPA header.
pub const IPA_HDR_LEN: usize = 3;

/// Protocol identifiers of the basic header.
pub const IPA_PROTO_RSL: u8 = 0x00;
pub const IPA_PROTO_IPACCESS: u8 = 0xfe;
pub const IPA_PROTO_OML: u8 = 0xff;
/// Osmocom protocol space; an extension octet follows the header.
pub const IPA_PROTO_OSMO: u8 = 0xee;

/// Extension protocol identifiers below [`IPA_PROTO_OSMO`].
pub const IPA_PROTO_EXT_CTRL: u8 = 0x00;
pub const IPA_PROTO_EXT_L1CTL: u8 = 0x01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpaError {
	#[error("IPA frame exceeds the receive buffer")]
	Oversized,
	#[error("unexpected IPA protocol 0x{0:02x}")]
	WrongProto(u8),
}

/// Prepends the basic IPA header.  The length field covers everything
/// currently in the buffer.
pub fn prepend_header(msg: &mut Msgb, proto: u8) {
	let len = msg.len() as u16;
	let hdr = msg.push(IPA_HDR_LEN);
	hdr[0..2].copy_from_slice(&len.to_be_bytes());
	hdr[2] = proto;
}

/// Prepends the extension header octet used by the OSMO protocol space.
pub fn prepend_header_ext(msg: &mut Msgb, proto_ext: u8) {
	msg.push(1)[0] = proto_ext;
}

/// Incremental reassembly of IPA frames from a byte stream.
#[derive(Default)]
pub struct FrameBuf {
	buf: Vec<u8>,
}

impl FrameBuf {
	pub fn new() -> FrameBuf {
		FrameBuf::default()
	}

	/// Appends freshly read stream bytes.
	pub fn feed(&mut self, data: &[u8]) {
		self.buf.extend_from_slice(data);
	}

	/// Takes one complete frame off the stream: `(proto, payload)`.  The
	/// payload of an OSMO frame still starts with the extension octet.
	pub fn take_frame(&mut self) -> Option<(u8, Vec<u8>)> {
		if self.buf.len() < IPA_HDR_LEN {
			return None;
		}
		let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
		if self.buf.len() < IPA_HDR_LEN + len {
			return None;
		}

		let proto = self.buf[2];
		let payload = self.buf[IPA_HDR_LEN..IPA_HDR_LEN + len].to_vec();
		self.buf.drain(..IPA_HDR_LEN + len);
		Some((proto, payload))
	}

	pub fn pending(&self) -> usize {
		self.buf.len()
	}
}

/// Frames an OSMO-space payload: basic header + extension octet.
pub fn frame_osmo(payload: &[u8], proto_ext: u8) -> Vec<u8> {
	let len = (payload.len() + 1) as u16;
	let mut out = Vec::with_capacity(IPA_HDR_LEN + payload.len() + 1);
	out.extend_from_slice(&len.to_be_bytes());
	out.push(IPA_PROTO_OSMO);
	out.push(proto_ext);
	out.extend_from_slice(payload);
	out
}

/// Splits an OSMO-space frame payload into `(proto_ext, inner payload)`.
pub fn unwrap_osmo(proto: u8, payload: &[u8]) -> Result<(u8, &[u8]), IpaError> {
	if proto != IPA_PROTO_OSMO {
		return Err(IpaError::WrongProto(proto));
	}
	if payload.is_empty() {
		return Err(IpaError::WrongProto(proto));
	}
	Ok((payload[0], &payload[1..]))
}
