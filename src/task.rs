// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

//! Suspendable tasks.
//!
//! Each [`Task`] wraps a [`corosensei::Coroutine`] stackful coroutine — the
//! same mechanism the `snow-rt` actor scheduler in the reference pack uses
//! (`crates/snow-rt/src/actor/scheduler.rs`), minus its work-stealing: we
//! have exactly one OS thread and exactly one coroutine running at a time,
//! so there is no `Send` bound to fight and no thread-pinning to track.
//!
//! A coroutine's `Yielder` is only reachable from inside the closure that
//! owns it. Suspend primitives elsewhere in the crate (`delay`,
//! `stream_read`, channel operations) need to reach "the yielder of
//! whichever task is currently running" without that closure threading a
//! context argument through every call. We bridge this with a small cell:
//! the entry closure stashes a pointer to its own `Yielder` into a
//! `Rc<Cell<..>>` the `Task` also holds, and the scheduler points a
//! thread-local at that same cell immediately before resuming the task.
//! Because only one task is ever running, the thread-local is always
//! correct for whichever stack is currently executing.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use corosensei::{Coroutine, CoroutineResult, Yielder};

/// A type-erased value carried across a suspend point: either the resume
/// argument handed back into a suspended task, or its final return value.
pub type Boxed = Box<dyn Any>;

/// What a suspend site receives once the scheduler resumes it.
pub(crate) type Resume = Boxed;

type YielderPtr = NonNull<Yielder<Resume, ()>>;
type YielderCell = Rc<Cell<Option<YielderPtr>>>;

/// What's live for the duration of a single `Coroutine::resume` call: which
/// task it is (so suspend sites can register themselves in a wait queue by
/// id) and where to find its yielder (so they can actually suspend).
struct RunningContext {
	id: TaskId,
	yielder: YielderCell,
}

thread_local! {
	static CURRENT: RefCell<Option<RunningContext>> = const { RefCell::new(None) };
}

/// A user task faulted instead of returning. Captured as the task's
/// terminal value (spec: `UserFault`); never propagated as a
/// [`crate::Error`] and never unwinds into the scheduler.
#[derive(Debug, Clone)]
pub struct TaskFault(pub String);

impl std::fmt::Display for TaskFault {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "task panicked: {}", self.0)
	}
}

impl std::error::Error for TaskFault {}

pub(crate) type TaskOutcome = Result<Boxed, TaskFault>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
	pub(crate) fn next() -> TaskId {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	NotStarted,
	Suspended,
	Running,
	Terminated,
}

/// A suspendable unit of work with a resumable continuation and a
/// terminal state (spec §3).
pub struct Task {
	id: TaskId,
	state: TaskState,
	coroutine: Option<Coroutine<Resume, (), TaskOutcome>>,
	yielder: YielderCell,
	outcome: Option<TaskOutcome>,
	/// Set by whichever mechanism last woke this task (a timer firing, a
	/// channel peer, a descriptor becoming ready) for the next dispatch
	/// to deliver. `None` means "resume with a no-op value" — the
	/// default for a task that merely yielded to let others run.
	pending: Option<Boxed>,
}

impl std::fmt::Debug for Task {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Task").field("id", &self.id).field("state", &self.state).finish()
	}
}

impl Task {
	/// Wraps a zero-argument closure as a fresh `NotStarted` task.
	/// Arguments the closure needs are captured by the closure itself —
	/// idiomatic Rust prefers `move || ...` capture over a dynamically
	/// typed argument list.
	pub(crate) fn new<F, T>(f: F) -> Task
	where
		F: FnOnce(Boxed) -> T + 'static,
		T: 'static,
	{
		let yielder: YielderCell = Rc::new(Cell::new(None));
		let yielder_for_closure = yielder.clone();

		let coroutine = Coroutine::new(move |y: &Yielder<Resume, ()>, first: Resume| -> TaskOutcome {
			yielder_for_closure.set(Some(NonNull::from(y)));
			let result = panic::catch_unwind(AssertUnwindSafe(|| f(first)));
			yielder_for_closure.set(None);
			result.map(|value| Box::new(value) as Boxed).map_err(|payload| TaskFault(describe_panic(payload)))
		});

		Task { id: TaskId::next(), state: TaskState::NotStarted, coroutine: Some(coroutine), yielder, outcome: None, pending: None }
	}

	/// Like [`Task::new`], but for a closure whose return value is
	/// already type-erased — used at the `spawn` boundary in `api.rs`,
	/// where the user's concrete return type `T` has already been
	/// boxed up by the caller. Avoids re-boxing an already-boxed value,
	/// which `Task::new::<F, Boxed>` would otherwise do.
	pub(crate) fn new_erased(f: Box<dyn FnOnce(Boxed) -> Boxed>) -> Task {
		let yielder: YielderCell = Rc::new(Cell::new(None));
		let yielder_for_closure = yielder.clone();

		let coroutine = Coroutine::new(move |y: &Yielder<Resume, ()>, first: Resume| -> TaskOutcome {
			yielder_for_closure.set(Some(NonNull::from(y)));
			let result = panic::catch_unwind(AssertUnwindSafe(|| f(first)));
			yielder_for_closure.set(None);
			result.map_err(|payload| TaskFault(describe_panic(payload)))
		});

		Task { id: TaskId::next(), state: TaskState::NotStarted, coroutine: Some(coroutine), yielder, outcome: None, pending: None }
	}

	pub fn id(&self) -> TaskId {
		self.id
	}

	pub fn state(&self) -> TaskState {
		self.state
	}

	pub fn is_terminated(&self) -> bool {
		self.state == TaskState::Terminated
	}

	/// The task's return value, once terminated.
	pub fn return_value(&self) -> Option<&TaskOutcome> {
		self.outcome.as_ref()
	}

	/// Consumes the task for its terminal outcome, once it has one.
	pub(crate) fn into_outcome(self) -> Option<TaskOutcome> {
		self.outcome
	}

	/// Records the value the next dispatch should resume this task
	/// with, overwriting whatever was queued before. Used by the
	/// mechanism that wakes a parked task (timer fire, channel peer,
	/// descriptor readiness) before it's next reached by the ready
	/// queue's skip-and-requeue pass.
	pub(crate) fn set_pending(&mut self, value: Boxed) {
		self.pending = Some(value);
	}

	/// Takes the queued resume value, defaulting to a no-op `()` for a
	/// task that's simply due for its turn with nothing delivered.
	pub(crate) fn take_pending(&mut self) -> Boxed {
		self.pending.take().unwrap_or_else(|| Box::new(()))
	}

	/// Starts a `NotStarted` task with its initial resume value.
	pub(crate) fn start(&mut self, args: Boxed) -> Result<(), crate::Error> {
		debug_assert_eq!(self.state, TaskState::NotStarted);
		self.resume(args)
	}

	/// Starts a `NotStarted` task with its initial resume value, or
	/// resumes a `Suspended` one. Both map onto the same underlying
	/// `Coroutine::resume` call; the distinction only matters for the
	/// state transition we record.
	///
	/// Resuming a `Terminated` task is a programmer error (spec:
	/// `InvariantViolation`).
	pub(crate) fn resume(&mut self, value: Resume) -> Result<(), crate::Error> {
		if self.state == TaskState::Terminated {
			return Err(crate::Error::InvariantViolation("resumed a terminated task".into()));
		}

		let mut coroutine = self.coroutine.take().expect("coroutine missing on a non-terminated task");
		self.state = TaskState::Running;

		CURRENT.with(|cell| *cell.borrow_mut() = Some(RunningContext { id: self.id, yielder: self.yielder.clone() }));
		let result = coroutine.resume(value);
		CURRENT.with(|cell| *cell.borrow_mut() = None);

		match result {
			CoroutineResult::Yield(()) => {
				self.state = TaskState::Suspended;
				self.coroutine = Some(coroutine);
			}
			CoroutineResult::Return(outcome) => {
				self.state = TaskState::Terminated;
				self.outcome = Some(outcome);
			}
		}
		Ok(())
	}
}

fn describe_panic(payload: Box<dyn Any + Send>) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"task panicked with a non-string payload".to_string()
	}
}

/// A typed view onto a spawned task, handed back to callers of
/// [`crate::spawn`] so they don't have to downcast `Box<dyn Any>`
/// themselves.
///
/// Holds the task's id rather than the task itself — the scheduler owns
/// every `Task` for its whole lifetime, so a handle just asks the current
/// scheduler about `id` whenever it's queried.
pub struct TaskHandle<T> {
	id: TaskId,
	_marker: std::marker::PhantomData<T>,
}

impl<T> TaskHandle<T> {
	pub(crate) fn new(id: TaskId) -> Self {
		TaskHandle { id, _marker: std::marker::PhantomData }
	}

	pub fn id(&self) -> TaskId {
		self.id
	}
}

impl<T: 'static> TaskHandle<T> {
	/// Whether the task has run to completion (successfully or via a
	/// captured panic). `false` if the task is unknown to the current
	/// scheduler, e.g. it hasn't been spawned into one yet.
	pub fn is_terminated(&self) -> bool {
		crate::api::with_scheduler(|s| s.task_is_terminated(self.id))
	}

	/// The task's return value, once terminated and if it returned
	/// normally rather than panicking. `None` before termination, on a
	/// captured panic, or if the closure's return type doesn't match
	/// `T` — which can't happen through the public `spawn` signature,
	/// only if a caller fabricates a mismatched handle. Takes the
	/// outcome out of the scheduler's bookkeeping, so it only answers
	/// once per terminated task.
	pub fn get_return(self) -> Option<T> {
		crate::api::with_scheduler_mut(|s| s.task_outcome(self.id))
			.and_then(|outcome| outcome.ok())
			.and_then(|boxed| boxed.downcast::<T>().ok())
			.map(|boxed| *boxed)
	}
}

/// The id of whichever task is currently running. Panics if called outside
/// a task context.
pub(crate) fn current_task_id() -> TaskId {
	CURRENT.with(|cell| cell.borrow().as_ref().map(|ctx| ctx.id)).expect("called outside a task context")
}

/// Suspends the currently running task, returning whatever value the
/// scheduler resumes it with. Panics (as an `InvariantViolation` would
/// suggest) if called outside a task context — spec requires only the
/// currently Running task may call suspend primitives.
pub(crate) fn suspend_current() -> Boxed {
	let ptr = CURRENT
		.with(|cell| cell.borrow().as_ref().and_then(|ctx| ctx.yielder.get()))
		.expect("suspend primitive called outside a task context");
	// Safety: `ptr` was derived from `&Yielder` for the duration of the
	// enclosing `Coroutine::resume` call, which is still on the stack —
	// suspending *is* that call returning control to the scheduler and
	// later being resumed back into this exact frame.
	unsafe { ptr.as_ref().suspend(()) }
}
