// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

//! Test-only scaffolding: a hand-advanceable clock and a connected OS pipe,
//! for scenarios that need deterministic timing or a real readable
//! descriptor without depending on wall-clock sleeps.

use std::cell::Cell;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::clock::Clock;
use crate::duration::Duration;
use crate::scheduler::{Scheduler, SchedulerOps};

/// A [`Clock`] advanced entirely by the test, not the wall clock. Clones
/// share the same underlying time, so a test can hold one clone while the
/// `Scheduler` it installed holds another and both see the same `now()`.
#[derive(Clone)]
pub struct ManualClock {
	time: Rc<Cell<Duration>>,
}

impl ManualClock {
	pub fn new() -> Self {
		ManualClock { time: Rc::new(Cell::new(Duration::ZERO)) }
	}

	pub fn advance(&self, by: Duration) {
		self.time.set(self.time.get() + by);
	}
}

impl Default for ManualClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for ManualClock {
	fn now(&self) -> Duration {
		self.time.get()
	}
}

/// Installs `scheduler` as the current one for [`crate::spawn`],
/// [`crate::delay`], [`crate::stream_read`]/`stream_write`, and
/// [`crate::current_elapsed`] to reach, for as long as the returned guard
/// lives. Restores whatever was installed before on drop.
pub fn install(scheduler: Scheduler<ManualClock>) -> InstallGuard {
	let mut boxed = Box::new(scheduler);
	let ptr: *mut dyn SchedulerOps = boxed.as_mut();
	let previous = crate::api::set_current(ptr);
	InstallGuard { scheduler: boxed, previous: Some(previous) }
}

pub struct InstallGuard {
	scheduler: Box<Scheduler<ManualClock>>,
	previous: Option<Option<*mut dyn SchedulerOps>>,
}

impl InstallGuard {
	/// Drains the installed scheduler exactly like [`crate::run`] does
	/// for the ambient one. Only terminates on its own if nothing is
	/// waiting on a timer that a frozen `ManualClock` will never reach —
	/// for timer-driven scenarios, advance the clock between calls to
	/// [`InstallGuard::step`] instead.
	pub fn run(&mut self) -> crate::Result<()> {
		SchedulerOps::run(self.scheduler.as_mut())
	}

	/// Runs a single iteration of the scheduler's run loop. Lets a test
	/// interleave `clock.advance(..)` with forward progress, rather than
	/// looping to quiescence the way [`InstallGuard::run`] does — which
	/// would spin forever waiting on a timer a `ManualClock` never
	/// advances on its own.
	pub fn step(&mut self) -> crate::Result<()> {
		self.scheduler.cycle()
	}

	/// Whether the installed scheduler has any outstanding tasks, timers,
	/// or subscriptions left to process.
	pub fn is_idle(&self) -> bool {
		self.scheduler.is_idle()
	}
}

impl Drop for InstallGuard {
	fn drop(&mut self) {
		if let Some(previous) = self.previous.take() {
			crate::api::restore_current(previous);
		}
	}
}

/// A connected, non-blocking OS pipe: `write` is immediately readable from
/// `read` once data lands in the kernel buffer. Closes both ends on drop.
pub struct Pipe {
	pub read: RawFd,
	pub write: RawFd,
}

impl Pipe {
	pub fn new() -> std::io::Result<Self> {
		let mut fds = [0; 2];
		let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
		if rc != 0 {
			return Err(std::io::Error::last_os_error());
		}
		for fd in fds {
			let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
			unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
		}
		Ok(Pipe { read: fds[0], write: fds[1] })
	}
}

impl Drop for Pipe {
	fn drop(&mut self) {
		unsafe {
			libc::close(self.read);
			libc::close(self.write);
		}
	}
}
