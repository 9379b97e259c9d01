//! Level-triggered I/O readiness for the event loop, on top of poll(2).
//!
//! All suspension of the stack happens here: the loop sleeps until a file
//! descriptor becomes readable or the next protocol timer is due.

use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

/// Waits until one of `fds` becomes readable or the timeout passes.
/// Returns the indexes of the readable (or errored/hung-up) descriptors;
/// an empty result means the timeout fired.
pub fn wait_readable(fds: &[BorrowedFd<'_>], timeout: Option<Duration>) -> io::Result<Vec<usize>> {
	let mut pfds: Vec<PollFd<'_>> =
		fds.iter().map(|fd| PollFd::new(fd.as_fd(), PollFlags::POLLIN)).collect();

	let timeout = match timeout {
		None => PollTimeout::NONE,
		Some(d) => {
			let ms = d.as_millis().min(u128::from(u16::MAX)) as u16;
			PollTimeout::from(ms)
		}
	};

	loop {
		match poll(&mut pfds, timeout) {
			Ok(_) => break,
			Err(Errno::EINTR) => continue,
			Err(e) => return Err(io::Error::from(e)),
		}
	}

	let ready = pfds
		.iter()
		.enumerate()
		.filter(|(_, pfd)| {
			pfd.revents().is_some_and(|ev| {
				ev.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP)
			})
		})
		.map(|(i, _)| i)
		.collect();

	Ok(ready)
}

#[cfg(test)]
mod tests {
	use std::io::Write;
	use std::net::{TcpListener, TcpStream};
	use std::os::fd::AsFd;

	use super::*;

	#[test]
	fn timeout_returns_empty() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let ready =
			wait_readable(&[listener.as_fd()], Some(Duration::from_millis(10))).unwrap();
		assert!(ready.is_empty());
	}

	#[test]
	fn readable_socket_is_reported() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		let mut client = TcpStream::connect(addr).unwrap();
		let (mut server, _) = listener.accept().unwrap();

		client.write_all(b"ping").unwrap();
		client.flush().unwrap();

		let ready =
			wait_readable(&[server.as_fd()], Some(Duration::from_millis(500))).unwrap();
		assert_eq!(ready, vec![0]);

		// Drain so the test does not leak readable state.
		use std::io::Read;
		let mut buf = [0u8; 16];
		let _ = server.read(&mut buf).unwrap();
	}
}
