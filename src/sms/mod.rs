//! Point-to-Point Short Message Service support on the mobile radio
//! interface (3GPP TS 04.11), plus the GSM 03.38 default-alphabet codec.

pub mod coding;
pub mod smc;
pub mod smr;

/// CP cause codes (TS 04.11 section 8.1.4.2).
pub const CP_CAUSE_NET_FAIL: u8 = 17;
pub const CP_CAUSE_CONGESTION: u8 = 22;
pub const CP_CAUSE_INV_TRANS_ID: u8 = 81;
pub const CP_CAUSE_SEMANT_INC_MSG: u8 = 95;
pub const CP_CAUSE_INV_MAND_INF: u8 = 96;
pub const CP_CAUSE_MSGTYPE_NOTEXIST: u8 = 97;
pub const CP_CAUSE_MSG_INCOMP_STATE: u8 = 101;
pub const CP_CAUSE_IE_NOTEXIST: u8 = 99;
pub const CP_CAUSE_PROTOCOL_ERR: u8 = 111;

/// RP cause codes used by the relay layer (TS 04.11 section 8.2.5.4).
pub const RP_CAUSE_MSG_INCOMP_STATE: u8 = 98;
pub const RP_CAUSE_MSGTYPE_NOTEXIST: u8 = 97;
pub const RP_CAUSE_PROTOCOL_ERR: u8 = 111;

/// CP message types (TS 04.11 section 8.1.3).
pub const MT_CP_DATA: u8 = 0x01;
pub const MT_CP_ACK: u8 = 0x04;
pub const MT_CP_ERROR: u8 = 0x10;

/// RP message types (TS 04.11 section 8.2.2).  Bit 0 encodes the
/// direction: 0 = MS -> network, 1 = network -> MS.
pub const MT_RP_DATA_MO: u8 = 0x00;
pub const MT_RP_DATA_MT: u8 = 0x01;
pub const MT_RP_ACK_MO: u8 = 0x02;
pub const MT_RP_ACK_MT: u8 = 0x03;
pub const MT_RP_ERROR_MO: u8 = 0x04;
pub const MT_RP_ERROR_MT: u8 = 0x05;
pub const MT_RP_SMMA_MO: u8 = 0x06;

pub const CP_CAUSE_NAMES: &[(u8, &str)] = &[
	(CP_CAUSE_NET_FAIL, "Network Failure"),
	(CP_CAUSE_CONGESTION, "Congestion"),
	(CP_CAUSE_INV_TRANS_ID, "Invalid Transaction ID"),
	(CP_CAUSE_SEMANT_INC_MSG, "Semantically Incorrect Message"),
	(CP_CAUSE_INV_MAND_INF, "Invalid Mandatory Information"),
	(CP_CAUSE_MSGTYPE_NOTEXIST, "Message Type doesn't exist"),
	(CP_CAUSE_MSG_INCOMP_STATE, "Message incompatible with protocol state"),
	(CP_CAUSE_IE_NOTEXIST, "IE does not exist"),
	(CP_CAUSE_PROTOCOL_ERR, "Protocol Error"),
];
