//! Runtime configuration: socket endpoints and protocol constants, with
//! environment overrides parsed once at startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::gb::ns::NS_UDP_PORT;

#[derive(Clone, Debug)]
pub struct Config {
	/// Local endpoint of the NS-over-UDP link.
	pub ns_bind: SocketAddr,
	/// Remote SGSN to connect to, if this side initiates the RESET.
	pub sgsn_addr: Option<SocketAddr>,
	/// NSEI/NSVCI used for an initiated connection.
	pub nsei: u16,
	pub nsvci: u16,
	/// TCP endpoint of the control interface.
	pub ctrl_bind: SocketAddr,
	/// UNIX-domain socket of the L1 transport.
	pub l1_socket: PathBuf,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			ns_bind: SocketAddr::from(([0, 0, 0, 0], NS_UDP_PORT)),
			sgsn_addr: None,
			nsei: 0,
			nsvci: 0,
			ctrl_bind: SocketAddr::from(([127, 0, 0, 1], 4249)),
			l1_socket: PathBuf::from("/tmp/osmocom_l2"),
		}
	}
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
	let val = std::env::var(name).ok()?;
	match val.parse() {
		Ok(parsed) => Some(parsed),
		Err(_) => {
			warn!("ignoring malformed {name}={val}");
			None
		}
	}
}

impl Config {
	/// Defaults, overridden by `UMCORE_*` environment variables.
	pub fn from_env() -> Config {
		let mut cfg = Config::default();

		if let Some(addr) = parse_env("UMCORE_NS_BIND") {
			cfg.ns_bind = addr;
		}
		if let Some(addr) = parse_env("UMCORE_SGSN_ADDR") {
			cfg.sgsn_addr = Some(addr);
		}
		if let Some(nsei) = parse_env("UMCORE_NSEI") {
			cfg.nsei = nsei;
		}
		if let Some(nsvci) = parse_env("UMCORE_NSVCI") {
			cfg.nsvci = nsvci;
		}
		if let Some(addr) = parse_env("UMCORE_CTRL_BIND") {
			cfg.ctrl_bind = addr;
		}
		if let Some(path) = std::env::var_os("UMCORE_L1_SOCKET") {
			cfg.l1_socket = PathBuf::from(path);
		}

		cfg
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let cfg = Config::default();
		assert_eq!(cfg.ns_bind.port(), NS_UDP_PORT);
		assert!(cfg.sgsn_addr.is_none());
	}
}
