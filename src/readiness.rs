// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

//! The readiness primitive: which watched descriptors are readable or
//! writable right now, optionally blocking up to a timeout.

use std::os::fd::RawFd;

use crate::duration::Duration;
use crate::{Error, Result};

/// Which descriptors came back ready, split by direction — a task can be
/// subscribed for both on the same fd, so the two sets aren't mutually
/// exclusive.
#[derive(Debug, Default)]
pub struct ReadySet {
	pub readable: Vec<RawFd>,
	pub writable: Vec<RawFd>,
}

/// Abstraction over the blocking "which of these descriptors is ready"
/// syscall, so tests can substitute a fake without opening real file
/// descriptors.
pub trait Readiness {
	/// `timeout = None` blocks indefinitely, matching spec.md's
	/// `timeout = ∞`.
	fn poll(&mut self, reads: &[RawFd], writes: &[RawFd], timeout: Option<Duration>) -> Result<ReadySet>;
}

/// The production [`Readiness`], backed by `libc::poll`.
///
/// `poll(2)` is used instead of `select(2)` so descriptor numbers aren't
/// bounded by `FD_SETSIZE` — the same tradeoff `reifydb`'s I/O layer makes
/// when it has a choice between the two.
#[derive(Debug, Default)]
pub struct PollReadiness {
	fds: Vec<libc::pollfd>,
}

impl Readiness for PollReadiness {
	fn poll(&mut self, reads: &[RawFd], writes: &[RawFd], timeout: Option<Duration>) -> Result<ReadySet> {
		self.fds.clear();
		for &fd in reads {
			self.fds.push(libc::pollfd { fd, events: libc::POLLIN, revents: 0 });
		}
		for &fd in writes {
			self.fds.push(libc::pollfd { fd, events: libc::POLLOUT, revents: 0 });
		}

		if self.fds.is_empty() {
			// Nothing to watch. `poll(2)` with an empty set just sleeps
			// for the timeout, which is exactly what an idle cycle
			// waiting only on a future timer wants.
			if let Some(timeout) = timeout {
				std::thread::sleep(timeout.into());
			}
			return Ok(ReadySet::default());
		}

		let timeout_ms: i32 = match timeout {
			Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
			None => -1,
		};

		let rc = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms) };
		if rc < 0 {
			let err = std::io::Error::last_os_error();
			if err.kind() == std::io::ErrorKind::Interrupted {
				return Ok(ReadySet::default());
			}
			return Err(Error::Io(err));
		}

		let mut ready = ReadySet::default();
		for pfd in &self.fds {
			if pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
				ready.readable.push(pfd.fd);
			}
			if pfd.revents & (libc::POLLOUT | libc::POLLERR) != 0 {
				ready.writable.push(pfd.fd);
			}
		}
		Ok(ready)
	}
}
