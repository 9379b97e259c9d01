//! SNMP-like control interface: a line-oriented GET/SET/TRAP text protocol,
//! IPA-framed over TCP.
//!
//! ```text
//! GET <id> <variable>
//! SET <id> <variable> <value>
//! GET_REPLY <id> <variable> <value>
//! SET_REPLY <id> <variable> <value>
//! TRAP <id> <variable> <value>
//! ERROR <id> <message>
//! ```
//!
//! Variables are dot-separated; the leading tokens address a node in the
//! static tree `{root, net, bts.N, trx.N, ts.N}`, the rest names a command
//! registered for that node kind.

use ahash::RandomState;
use hashbrown::HashMap;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtrlType {
	Get,
	Set,
	GetReply,
	SetReply,
	Trap,
	Error,
}

impl CtrlType {
	pub fn as_str(self) -> &'static str {
		match self {
			CtrlType::Get => "GET",
			CtrlType::Set => "SET",
			CtrlType::GetReply => "GET_REPLY",
			CtrlType::SetReply => "SET_REPLY",
			CtrlType::Trap => "TRAP",
			CtrlType::Error => "ERROR",
		}
	}

	pub fn from_token(s: &str) -> Option<CtrlType> {
		match s {
			"GET" => Some(CtrlType::Get),
			"SET" => Some(CtrlType::Set),
			"GET_REPLY" => Some(CtrlType::GetReply),
			"SET_REPLY" => Some(CtrlType::SetReply),
			"TRAP" => Some(CtrlType::Trap),
			"ERROR" => Some(CtrlType::Error),
			_ => None,
		}
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CtrlError {
	#[error("request malformed")]
	Malformed,
	#[error("request type unknown")]
	UnknownType,
	#[error("missing ID")]
	MissingId,
	#[error("{0} incomplete")]
	Incomplete(&'static str),
}

/// One parsed control message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CtrlCmd {
	pub ctype: CtrlType,
	pub id: String,
	pub variable: String,
	pub value: Option<String>,
	pub reply: Option<String>,
}

impl CtrlCmd {
	pub fn trap(variable: &str, value: &str) -> CtrlCmd {
		CtrlCmd {
			ctype: CtrlType::Trap,
			id: "0".into(),
			variable: variable.into(),
			value: None,
			reply: Some(value.into()),
		}
	}

	/// Parses the payload of one CTRL frame.
	pub fn parse(payload: &[u8]) -> Result<CtrlCmd, CtrlError> {
		let text = String::from_utf8_lossy(payload);
		let mut tokens = text.split_ascii_whitespace();

		let ctype = tokens.next().ok_or(CtrlError::Malformed)?;
		let ctype = CtrlType::from_token(ctype).ok_or(CtrlError::UnknownType)?;
		let id = tokens.next().ok_or(CtrlError::MissingId)?.to_string();

		let mut cmd =
			CtrlCmd { ctype, id, variable: String::new(), value: None, reply: None };

		match ctype {
			CtrlType::Get => {
				cmd.variable = tokens.next().ok_or(CtrlError::Incomplete("GET"))?.into();
				debug!("command: GET {}", cmd.variable);
			}
			CtrlType::Set => {
				cmd.variable = tokens.next().ok_or(CtrlError::Incomplete("SET"))?.into();
				// The value runs to the end of the line.
				let value: Vec<&str> = tokens.collect();
				if value.is_empty() {
					return Err(CtrlError::Incomplete("SET"));
				}
				cmd.value = Some(value.join(" "));
				debug!("command: SET {} = {}", cmd.variable, cmd.value.as_deref().unwrap());
			}
			CtrlType::GetReply | CtrlType::SetReply | CtrlType::Trap => {
				cmd.variable =
					tokens.next().ok_or(CtrlError::Incomplete("Trap/Reply"))?.into();
				cmd.reply =
					Some(tokens.next().ok_or(CtrlError::Incomplete("Trap/Reply"))?.into());
			}
			CtrlType::Error => {
				let reply: Vec<&str> = tokens.collect();
				cmd.reply = Some(reply.join(" "));
			}
		}

		Ok(cmd)
	}

	/// Serializes the message for transmission.
	pub fn make(&self) -> Vec<u8> {
		let out = match self.ctype {
			CtrlType::Get => format!("{} {} {}", self.ctype.as_str(), self.id, self.variable),
			CtrlType::Set => format!(
				"{} {} {} {}",
				self.ctype.as_str(),
				self.id,
				self.variable,
				self.value.as_deref().unwrap_or("")
			),
			CtrlType::GetReply | CtrlType::SetReply | CtrlType::Trap => format!(
				"{} {} {} {}",
				self.ctype.as_str(),
				self.id,
				self.variable,
				self.reply.as_deref().unwrap_or("")
			),
			CtrlType::Error => {
				format!("{} {} {}", self.ctype.as_str(), self.id, self.reply.as_deref().unwrap_or(""))
			}
		};
		out.into_bytes()
	}
}

/// A node of the static addressing tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtrlNode {
	Root,
	Net,
	Bts(u32),
	Trx(u32, u32),
	Ts(u32, u32, u32),
}

impl CtrlNode {
	pub fn kind(self) -> NodeKind {
		match self {
			CtrlNode::Root => NodeKind::Root,
			CtrlNode::Net => NodeKind::Net,
			CtrlNode::Bts(..) => NodeKind::Bts,
			CtrlNode::Trx(..) => NodeKind::Trx,
			CtrlNode::Ts(..) => NodeKind::Ts,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
	Root,
	Net,
	Bts,
	Trx,
	Ts,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
	#[error("error while resolving object")]
	MissingObject,
	#[error("error while parsing the index")]
	BadIndex,
	#[error("command not found")]
	UnknownCommand,
}

/// Resolves the node-addressing prefix of a dot-separated variable,
/// returning the node and the remaining command name.
pub fn lookup_node(variable: &str) -> Result<(CtrlNode, String), LookupError> {
	let tokens: Vec<&str> = variable.split('.').collect();
	let mut node = CtrlNode::Root;
	let mut i = 0;

	let parse_num = |tok: Option<&&str>| -> Result<u32, LookupError> {
		tok.ok_or(LookupError::MissingObject)?.parse().map_err(|_| LookupError::BadIndex)
	};

	while i < tokens.len() {
		node = match (node, tokens[i]) {
			(CtrlNode::Root, "net") => {
				i += 1;
				CtrlNode::Net
			}
			(CtrlNode::Net, "bts") => {
				let n = parse_num(tokens.get(i + 1))?;
				i += 2;
				CtrlNode::Bts(n)
			}
			(CtrlNode::Bts(b), "trx") => {
				let n = parse_num(tokens.get(i + 1))?;
				i += 2;
				CtrlNode::Trx(b, n)
			}
			(CtrlNode::Trx(b, t), "ts") => {
				let n = parse_num(tokens.get(i + 1))?;
				i += 2;
				CtrlNode::Ts(b, t, n)
			}
			// The rest is the command.
			_ => break,
		};
	}

	if i == tokens.len() {
		return Err(LookupError::UnknownCommand);
	}
	Ok((node, tokens[i..].join(".")))
}

type GetFn = Box<dyn FnMut(CtrlNode) -> Result<String, String>>;
type SetFn = Box<dyn FnMut(CtrlNode, &str) -> Result<String, String>>;

struct CtrlCommand {
	get: Option<GetFn>,
	set: Option<SetFn>,
}

/// Registry of the commands of every node kind, and the GET/SET execution
/// engine.
#[derive(Default)]
pub struct CtrlDispatch {
	cmds: HashMap<(NodeKind, String), CtrlCommand, RandomState>,
}

impl CtrlDispatch {
	pub fn new() -> CtrlDispatch {
		CtrlDispatch { cmds: HashMap::with_hasher(RandomState::new()) }
	}

	pub fn register_ro(&mut self, kind: NodeKind, name: &str, get: GetFn) {
		self.cmds.insert((kind, name.to_string()), CtrlCommand { get: Some(get), set: None });
	}

	pub fn register_rw(&mut self, kind: NodeKind, name: &str, get: GetFn, set: SetFn) {
		self.cmds
			.insert((kind, name.to_string()), CtrlCommand { get: Some(get), set: Some(set) });
	}

	/// Executes a GET or SET and produces the reply message.
	pub fn handle(&mut self, cmd: &CtrlCmd) -> CtrlCmd {
		let mut reply = cmd.clone();

		let err = |mut reply: CtrlCmd, text: &str| {
			reply.ctype = CtrlType::Error;
			reply.reply = Some(text.to_string());
			reply
		};

		let (node, name) = match lookup_node(&cmd.variable) {
			Ok(resolved) => resolved,
			Err(e) => return err(reply, &e.to_string()),
		};

		let Some(command) = self.cmds.get_mut(&(node.kind(), name)) else {
			return err(reply, "Command not found.");
		};

		match cmd.ctype {
			CtrlType::Get => match command.get.as_mut() {
				Some(get) => match get(node) {
					Ok(val) => {
						reply.ctype = CtrlType::GetReply;
						reply.reply = Some(val);
					}
					Err(e) => return err(reply, &e),
				},
				None => return err(reply, "Write only attribute."),
			},
			CtrlType::Set => {
				let Some(value) = cmd.value.as_deref() else {
					return err(reply, "SET incomplete");
				};
				match command.set.as_mut() {
					Some(set) => match set(node, value) {
						Ok(val) => {
							reply.ctype = CtrlType::SetReply;
							reply.reply = Some(val);
						}
						Err(e) => return err(reply, &e),
					},
					None => return err(reply, "Read only attribute."),
				}
			}
			_ => return err(reply, "Only GET and SET are handled."),
		}

		reply
	}
}
