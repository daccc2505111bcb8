// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

//! The run loop: the one piece of state that owns every task, timer,
//! subscription, and ready-queue entry in the process.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::os::fd::RawFd;
use std::rc::Rc;

use tracing::{instrument, trace, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::config::SchedulerConfig;
use crate::duration::Duration;
use crate::error::Error;
use crate::readiness::{PollReadiness, Readiness};
use crate::subscription::{Direction, StreamSubscription, SubscriptionList};
use crate::task::{Boxed, Task, TaskId, TaskOutcome, TaskState};
use crate::timer::{Timer, TimerControl, TimerList};
use crate::Result;

/// The callback bound to a recurrent [`crate::repeat`] timer, kept alive
/// across firings independently of any single firing's `Task`.
type RecurringCallback = Rc<RefCell<dyn FnMut(Duration, Duration) -> TimerControl>>;

struct RecurringEntry {
	interval: Duration,
	callback: RecurringCallback,
}

/// Everything the public, type-erased entry points in `api.rs` need from a
/// scheduler without knowing its concrete `Clock`. A `Scheduler<C>`
/// implements this for any `C`, which is what lets the ambient
/// `thread_local!` in `api.rs` hold a `Scheduler<MonotonicClock>` in
/// production and a `Scheduler<ManualClock>` under test behind the same
/// `dyn` reference.
pub(crate) trait SchedulerOps {
	fn spawn_closure(&mut self, f: Box<dyn FnOnce(Boxed) -> Boxed>) -> TaskId;
	fn request_delay(&mut self, duration: Duration);
	fn request_subscribe(&mut self, fd: RawFd, direction: Direction);
	fn request_defer(&mut self, interval: Duration, callback: Box<dyn FnOnce(Duration, Duration)>);
	fn request_repeat(&mut self, interval: Duration, callback: RecurringCallback);
	fn park_current(&mut self, id: TaskId);
	fn wake_task(&mut self, id: TaskId, value: Boxed);
	fn task_is_terminated(&self, id: TaskId) -> bool;
	fn task_outcome(&mut self, id: TaskId) -> Option<TaskOutcome>;
	fn current_elapsed(&self) -> Duration;
	fn run(&mut self) -> Result<()>;
}

/// A single-threaded cooperative scheduler (spec §3).
///
/// Generic over the clock so tests can swap in a `ManualClock`; production
/// code gets `MonotonicClock` for free via the default type parameter.
pub struct Scheduler<C: Clock = MonotonicClock> {
	clock: C,
	readiness: Box<dyn Readiness>,
	config: SchedulerConfig,

	start: Duration,
	last_now: Duration,

	tasks: HashMap<TaskId, Task>,
	results: HashMap<TaskId, TaskOutcome>,
	ready: VecDeque<TaskId>,
	delayed: HashSet<TaskId>,
	timers: TimerList<C>,
	read_subs: SubscriptionList,
	write_subs: SubscriptionList,
	recurring: HashMap<TaskId, RecurringEntry>,

	/// Re-entrancy guard (spec §9's open question: `run()` called from
	/// within a running task is a no-op rather than a nested loop).
	running: bool,
}

impl<C: Clock + Default> Scheduler<C> {
	pub fn new() -> Self {
		Self::with_clock(C::default(), SchedulerConfig::default())
	}
}

impl<C: Clock + Default> Default for Scheduler<C> {
	fn default() -> Self {
		Self::new()
	}
}

impl<C: Clock> Scheduler<C> {
	pub fn with_clock(clock: C, config: SchedulerConfig) -> Self {
		let start = clock.now();
		Scheduler {
			clock,
			readiness: Box::new(PollReadiness::default()),
			config,
			start,
			last_now: start,
			tasks: HashMap::new(),
			results: HashMap::new(),
			ready: VecDeque::new(),
			delayed: HashSet::new(),
			timers: TimerList::new(),
			read_subs: SubscriptionList::new(),
			write_subs: SubscriptionList::new(),
			recurring: HashMap::new(),
			running: false,
		}
	}

	/// Swaps in a different readiness primitive — used by tests that
	/// drive subscriptions without real file descriptors.
	pub fn with_readiness(mut self, readiness: Box<dyn Readiness>) -> Self {
		self.readiness = readiness;
		self
	}

	fn subscriptions_mut(&mut self, direction: Direction) -> &mut SubscriptionList {
		match direction {
			Direction::Readable => &mut self.read_subs,
			Direction::Writable => &mut self.write_subs,
		}
	}

	pub(crate) fn is_idle(&self) -> bool {
		self.ready.is_empty() && self.timers.is_empty() && self.read_subs.is_empty() && self.write_subs.is_empty()
	}

	/// One iteration of the five-step run loop (spec §4.1). `pub(crate)`
	/// rather than private so `test_support::InstallGuard::step` can
	/// single-step a `ManualClock`-driven scheduler between manual
	/// clock advances, instead of looping to quiescence the way
	/// `run()` does.
	#[instrument(level = "trace", skip(self))]
	pub(crate) fn cycle(&mut self) -> Result<()> {
		// 1. Tick the clock.
		let now = self.clock.now();
		if now < self.last_now {
			return Err(Error::ClockRegression);
		}
		self.last_now = now;
		trace!(now = %now, ready = self.ready.len(), "cycle");

		// 2. Advance the ready queue. Snapshot the length so tasks
		// re-enqueued by this very pass aren't processed twice in
		// the same cycle.
		let snapshot = self.config.ready_batch_limit.unwrap_or(self.ready.len()).min(self.ready.len());
		for _ in 0..snapshot {
			let Some(id) = self.ready.pop_front() else { break };
			if self.delayed.contains(&id) {
				self.ready.push_back(id);
				continue;
			}
			let Some(mut task) = self.tasks.remove(&id) else { continue };
			let value = task.take_pending();
			if task.state() == TaskState::NotStarted {
				task.start(value)?;
			} else {
				task.resume(value)?;
			}
			self.settle(id, task, false);
		}

		// 3. Advance timers.
		loop {
			let due = matches!(self.timers.peek(), Some(t) if t.is_due(now));
			if !due {
				break;
			}
			let (timer, action) = self.timers.shift().expect("peek just confirmed an entry");
			action(self, timer);
		}

		// 4/5. Advance stream subscriptions, sleeping for the next timer's
		// deadline if there's nothing else to do in the meantime. Polling
		// isn't skipped just because there are no subscribed descriptors —
		// `PollReadiness::poll` with an empty fd set is exactly how a
		// cycle with only a pending timer waits for it without busy
		// spinning (spec §4.1 step 5: "if neither timers nor I/O made
		// progress, sleep for timeout").
		let reads = self.read_subs.descriptors();
		let writes = self.write_subs.descriptors();
		let waiting_on_timer_only = self.ready.is_empty() && self.timers.peek().is_some();
		if !reads.is_empty() || !writes.is_empty() || waiting_on_timer_only {
			let timeout = self.next_poll_timeout(now);
			let ready = self.readiness.poll(&reads, &writes, timeout)?;
			for fd in ready.readable {
				self.dispatch_descriptor(fd, Direction::Readable, now)?;
			}
			for fd in ready.writable {
				self.dispatch_descriptor(fd, Direction::Writable, now)?;
			}
		}

		Ok(())
	}

	fn next_poll_timeout(&self, now: Duration) -> Option<Duration> {
		if !self.ready.is_empty() {
			return Some(Duration::ZERO);
		}
		match self.timers.peek() {
			Some(t) => Some(std::cmp::min(t.left(now), self.config.max_select_timeout)),
			None => None,
		}
	}

	/// Dispatches every live subscription bound to `fd` and `direction`,
	/// in insertion order. A task still delayed for an unrelated reason
	/// (e.g. it's also mid-`send` on a channel) is skipped rather than
	/// double-resumed.
	fn dispatch_descriptor(&mut self, fd: RawFd, direction: Direction, now: Duration) -> Result<()> {
		let ids: Vec<TaskId> = self.subscriptions_mut(direction).for_descriptor(fd).iter().map(|s| s.task).collect();
		for id in ids {
			if self.delayed.contains(&id) {
				continue;
			}
			let Some(mut task) = self.tasks.remove(&id) else { continue };
			let value: Boxed = Box::new((self.start, now));
			if task.state() == TaskState::NotStarted {
				task.start(value)?;
			} else {
				task.resume(value)?;
			}
			if task.is_terminated() {
				self.subscriptions_mut(direction).remove(fd, id);
			}
			self.settle(id, task, true);
		}
		Ok(())
	}

	/// Files a just-resumed task back into the registry: terminated
	/// tasks are dropped (their outcome recorded, a recurrent timer
	/// rescheduled if one was waiting on them); live ones are kept.
	/// `subscription_owned` tasks are *not* re-added to the ready queue
	/// — per spec §4.4 they stay reachable only through their
	/// subscription until they terminate.
	fn settle(&mut self, id: TaskId, task: Task, subscription_owned: bool) {
		if task.is_terminated() {
			let outcome = task.into_outcome();
			if let Some(entry) = self.recurring.remove(&id) {
				self.handle_recurring_outcome(entry.interval, entry.callback, outcome);
			} else if let Some(outcome) = outcome {
				self.results.insert(id, outcome);
			}
			return;
		}
		self.tasks.insert(id, task);
		if !subscription_owned {
			self.ready.push_back(id);
		}
	}

	fn handle_recurring_outcome(&mut self, interval: Duration, callback: RecurringCallback, outcome: Option<TaskOutcome>) {
		let continues = match outcome {
			Some(Ok(boxed)) => match boxed.downcast::<TimerControl>() {
				Ok(control) => *control == TimerControl::Continue,
				Err(_) => {
					warn!("repeat callback returned an unexpected type, stopping");
					false
				}
			},
			Some(Err(fault)) => {
				warn!(%fault, "repeat callback panicked, stopping");
				false
			}
			None => false,
		};
		if continues {
			self.fire_repeat_at(self.last_now, interval, callback);
		}
	}

	fn fire_repeat_at(&mut self, since: Duration, interval: Duration, callback: RecurringCallback) {
		let seq = self.timers.next_sequence();
		let timer = Timer::recurrent(interval, since, seq);
		self.timers.add(
			timer,
			Box::new(move |sched: &mut Scheduler<C>, fired: Timer| sched.fire_recurring(fired, callback)),
		);
	}

	fn fire_recurring(&mut self, timer: Timer, callback: RecurringCallback) {
		let interval = timer.interval;
		let start = self.start;
		let now = timer.deadline();
		let cb = callback.clone();
		let mut task = Task::new(move |args: Boxed| {
			let (start, now) = *args.downcast::<(Duration, Duration)>().expect("timer resume args");
			(cb.borrow_mut())(start, now)
		});
		let id = task.id();
		let _ = task.start(Box::new((start, now)));
		if task.is_terminated() {
			let outcome = task.into_outcome();
			self.handle_recurring_outcome(interval, callback, outcome);
		} else {
			self.tasks.insert(id, task);
			self.ready.push_back(id);
			self.recurring.insert(id, RecurringEntry { interval, callback });
		}
	}

	/// Runs until every task has terminated, every timer has fired and
	/// not rescheduled, and no subscription remains (spec §4.1).
	/// Re-entrant calls (from inside a running task) are a no-op — the
	/// outer call already owns the loop.
	#[instrument(level = "debug", skip(self))]
	pub fn run(&mut self) -> Result<()> {
		if self.running {
			return Ok(());
		}
		self.running = true;
		let result = (|| {
			while !self.is_idle() {
				self.cycle()?;
			}
			Ok(())
		})();
		self.running = false;
		if let Err(e) = &result {
			tracing::error!(error = %e, "scheduler aborted");
		}
		result
	}
}

impl<C: Clock> SchedulerOps for Scheduler<C> {
	fn spawn_closure(&mut self, f: Box<dyn FnOnce(Boxed) -> Boxed>) -> TaskId {
		let task = Task::new_erased(f);
		let id = task.id();
		self.tasks.insert(id, task);
		self.ready.push_back(id);
		id
	}

	fn request_delay(&mut self, duration: Duration) {
		let id = crate::task::current_task_id();
		self.delayed.insert(id);
		let seq = self.timers.next_sequence();
		let timer = Timer::one_shot(duration, self.last_now, seq);
		self.timers.add(
			timer,
			Box::new(move |sched: &mut Scheduler<C>, _fired| {
				sched.delayed.remove(&id);
				if let Some(task) = sched.tasks.get_mut(&id) {
					task.set_pending(Box::new(()));
				}
			}),
		);
	}

	fn request_subscribe(&mut self, fd: RawFd, direction: Direction) {
		let id = crate::task::current_task_id();
		let list = self.subscriptions_mut(direction);
		list.remove(fd, id);
		list.add(fd, StreamSubscription { direction, task: id });
	}

	fn request_defer(&mut self, interval: Duration, callback: Box<dyn FnOnce(Duration, Duration)>) {
		let seq = self.timers.next_sequence();
		let timer = Timer::one_shot(interval, self.last_now, seq);
		self.timers.add(
			timer,
			Box::new(move |sched: &mut Scheduler<C>, fired: Timer| {
				let start = sched.start;
				let now = fired.deadline();
				let mut task = Task::new(move |args: Boxed| {
					let (start, now) = *args.downcast::<(Duration, Duration)>().expect("timer resume args");
					callback(start, now)
				});
				let id = task.id();
				let _ = task.start(Box::new((start, now)));
				sched.settle(id, task, false);
			}),
		);
	}

	fn request_repeat(&mut self, interval: Duration, callback: RecurringCallback) {
		let since = self.last_now;
		self.fire_repeat_at(since, interval, callback);
	}

	fn park_current(&mut self, id: TaskId) {
		self.delayed.insert(id);
	}

	fn wake_task(&mut self, id: TaskId, value: Boxed) {
		self.delayed.remove(&id);
		if let Some(task) = self.tasks.get_mut(&id) {
			task.set_pending(value);
		}
	}

	fn task_is_terminated(&self, id: TaskId) -> bool {
		self.results.contains_key(&id) || self.tasks.get(&id).map(Task::is_terminated).unwrap_or(false)
	}

	fn task_outcome(&mut self, id: TaskId) -> Option<TaskOutcome> {
		self.results.remove(&id)
	}

	fn current_elapsed(&self) -> Duration {
		self.clock.now().saturating_sub(self.start)
	}

	fn run(&mut self) -> Result<()> {
		Scheduler::run(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::MonotonicClock;

	#[test]
	fn a_freshly_built_scheduler_is_idle() {
		let scheduler: Scheduler<MonotonicClock> = Scheduler::new();
		assert!(scheduler.is_idle());
	}

	#[test]
	fn run_on_an_idle_scheduler_returns_immediately() {
		let mut scheduler: Scheduler<MonotonicClock> = Scheduler::new();
		assert!(scheduler.run().is_ok());
	}
}
