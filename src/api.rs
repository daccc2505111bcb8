// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

//! Free-function public surface.
//!
//! Every function here reaches an implicit "current scheduler" the same
//! way `tokio::spawn`/`tokio::time::sleep` reach an implicit runtime,
//! rather than threading a context object through every user function —
//! spec.md never gives callers a scheduler handle to pass around.
//!
//! Exactly one [`Scheduler`] is live on this thread at a time. While
//! [`run`] (or a test's installed scheduler, see `test_support`) is
//! driving it, a raw pointer to it is published to a thread-local so
//! nested calls from inside a running task reach the very instance that's
//! resuming them — not some other lazily-created one. Outside of a `run`,
//! calls to [`spawn`] and friends lazily create and own a
//! `Scheduler<MonotonicClock>`, matching spec.md's "lazily created on
//! first use" and "drains outstanding work at shutdown even if `run` was
//! never called".

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::Once;

use crate::channel::Channel;
use crate::clock::MonotonicClock;
use crate::duration::Duration;
use crate::scheduler::{Scheduler, SchedulerOps};
use crate::subscription::Direction;
use crate::task::{self, Boxed, TaskHandle};
use crate::timer::TimerControl;

thread_local! {
	static OWNED: RefCell<Option<Scheduler<MonotonicClock>>> = const { RefCell::new(None) };
	static CURRENT_PTR: Cell<Option<*mut dyn SchedulerOps>> = const { Cell::new(None) };
}

static SHUTDOWN_HOOK: Once = Once::new();

extern "C" fn drain_at_shutdown() {
	run();
}

fn ensure_shutdown_hook() {
	SHUTDOWN_HOOK.call_once(|| unsafe {
		libc::atexit(drain_at_shutdown);
	});
}

pub(crate) fn with_scheduler_mut<R>(f: impl FnOnce(&mut dyn SchedulerOps) -> R) -> R {
	if let Some(ptr) = CURRENT_PTR.with(Cell::get) {
		// Safety: only installed for the dynamic extent of the
		// `Scheduler::run` call that owns the pointee (see `run`
		// below and `test_support::install`), and this crate is
		// single-threaded, so no other access can be in flight.
		return f(unsafe { &mut *ptr });
	}
	ensure_shutdown_hook();
	OWNED.with(|cell| {
		let mut guard = cell.borrow_mut();
		let scheduler = guard.get_or_insert_with(Scheduler::new);
		f(scheduler)
	})
}

pub(crate) fn with_scheduler<R>(f: impl FnOnce(&dyn SchedulerOps) -> R) -> R {
	with_scheduler_mut(|s| f(s))
}

/// Installs `ptr` as the current scheduler for the duration of `body`,
/// restoring whatever was installed before. Used by both [`run`] and
/// `test_support::install`.
pub(crate) fn install_and_run<R>(ptr: *mut dyn SchedulerOps, body: impl FnOnce() -> R) -> R {
	let previous = CURRENT_PTR.with(|c| c.replace(Some(ptr)));
	let result = body();
	CURRENT_PTR.with(|c| c.set(previous));
	result
}

/// Spawns `f` as a fresh task on the current scheduler, returning a handle
/// to observe its completion and typed return value.
pub fn spawn<F, T>(f: F) -> TaskHandle<T>
where
	F: FnOnce() -> T + 'static,
	T: 'static,
{
	let erased: Box<dyn FnOnce(Boxed) -> Boxed> = Box::new(move |_args: Boxed| Box::new(f()) as Boxed);
	let id = with_scheduler_mut(|s| s.spawn_closure(erased));
	TaskHandle::new(id)
}

/// Suspends the calling task until `duration` has elapsed.
pub fn delay(duration: Duration) {
	with_scheduler_mut(|s| s.request_delay(duration));
	let _ = task::suspend_current();
}

/// Suspends the calling task until `fd` is readable, returning
/// `(scheduler_start, now)` at the moment it woke.
pub fn stream_read(fd: RawFd) -> (Duration, Duration) {
	with_scheduler_mut(|s| s.request_subscribe(fd, Direction::Readable));
	let resume = task::suspend_current();
	*resume.downcast::<(Duration, Duration)>().expect("subscription resumed with a foreign value")
}

/// Suspends the calling task until `fd` is writable, returning
/// `(scheduler_start, now)` at the moment it woke.
pub fn stream_write(fd: RawFd) -> (Duration, Duration) {
	with_scheduler_mut(|s| s.request_subscribe(fd, Direction::Writable));
	let resume = task::suspend_current();
	*resume.downcast::<(Duration, Duration)>().expect("subscription resumed with a foreign value")
}

/// Creates a new channel. `capacity = 0` is a pure rendezvous: `send`
/// blocks until a `receive` is already waiting, and vice versa.
pub fn chan<T: 'static>(capacity: usize) -> Channel<T> {
	Channel::new(capacity)
}

/// Runs a fresh task once, `interval` from now, without rescheduling.
/// Supplements spec.md's literal §4.6 list — the scenarios spec.md itself
/// describes (a delayed greeting, a periodic counter) need a way to
/// schedule a callback that isn't already running inside a task.
pub fn defer<F>(interval: Duration, callback: F)
where
	F: FnOnce(Duration, Duration) + 'static,
{
	with_scheduler_mut(|s| s.request_defer(interval, Box::new(callback)));
}

/// Runs a fresh task every `interval`, as long as the callback keeps
/// returning [`TimerControl::Continue`] (or `true`, via its `From<bool>`
/// impl). The *next* firing is only scheduled once the current one's task
/// terminates — a still-suspended callback defers its own rescheduling,
/// matching spec.md §9's open question about recurrent timers whose
/// callback itself suspends.
pub fn repeat<F>(interval: Duration, callback: F)
where
	F: FnMut(Duration, Duration) -> TimerControl + 'static,
{
	let shared = Rc::new(RefCell::new(callback));
	with_scheduler_mut(|s| s.request_repeat(interval, shared));
}

/// Drives the current scheduler until every task has terminated, every
/// timer has fired without rescheduling, and no subscription remains.
/// Calling `run` again after it returns resumes draining whatever was
/// queued in the meantime — there is no "already finished" state.
///
/// Called from inside a task that's itself being driven by an active
/// `run()`, this reaches that very instance through `CURRENT_PTR` rather
/// than pulling a fresh scheduler out of `OWNED` — `OWNED` is empty for
/// the whole time the outer call is on the stack, so without this a
/// nested call would silently run a brand-new, trivially idle scheduler
/// instead of no-op'ing on the one actually executing. Reaching the same
/// instance is what lets its own `running` guard (see `Scheduler::run`)
/// turn the nested call into the no-op spec.md's re-entrancy note
/// describes.
pub fn run() {
	if let Some(ptr) = CURRENT_PTR.with(Cell::get) {
		// Safety: see `with_scheduler_mut` — only installed for the
		// dynamic extent of the outer `run()` call that owns the
		// pointee, and this crate is single-threaded.
		let result = unsafe { (*ptr).run() };
		if let Err(e) = result {
			tracing::error!(error = %e, "weft::run aborted");
		}
		return;
	}
	ensure_shutdown_hook();
	let mut scheduler = OWNED.with(|cell| cell.borrow_mut().take()).unwrap_or_default();
	let ptr: *mut dyn SchedulerOps = &mut scheduler;
	let result = install_and_run(ptr, || SchedulerOps::run(&mut scheduler));
	if let Err(e) = result {
		tracing::error!(error = %e, "weft::run aborted");
	}
	OWNED.with(|cell| *cell.borrow_mut() = Some(scheduler));
}

/// Milliseconds elapsed since the current scheduler started — what
/// [`crate::dprintfn`] prefixes every line with.
pub fn current_elapsed() -> Duration {
	with_scheduler(|s| s.current_elapsed())
}

/// Installs `ptr` as the current scheduler, returning whatever was
/// installed before so the caller can restore it later. Unlike
/// [`install_and_run`], this doesn't restore automatically — used by
/// `test_support::install`'s guard, which restores on `Drop` instead of at
/// the end of a single call.
pub(crate) fn set_current(ptr: *mut dyn SchedulerOps) -> Option<*mut dyn SchedulerOps> {
	CURRENT_PTR.with(|c| c.replace(Some(ptr)))
}

pub(crate) fn restore_current(previous: Option<*mut dyn SchedulerOps>) {
	CURRENT_PTR.with(|c| c.set(previous));
}

pub(crate) fn wake_task(id: task::TaskId, value: Boxed) {
	with_scheduler_mut(|s| s.wake_task(id, value));
}

pub(crate) fn park_current(id: task::TaskId) {
	with_scheduler_mut(|s| s.park_current(id));
}
