// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

//! Bounded (and rendezvous, for capacity zero) channels between tasks.
//!
//! There is no lock discipline here — exactly one task ever runs at a time,
//! so every method below runs to completion without another task observing
//! the channel mid-mutation (spec §5).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::api;
use crate::task::{self, Boxed, TaskId};
use crate::{Error, Result};

/// What a blocked receiver is resumed with: either a value handed to it
/// directly (a rendezvous, or a buffer slot opening up) or notice that the
/// channel closed while it waited.
enum RecvSignal<T> {
	Delivered(T),
	Closed,
}

/// What a blocked sender is resumed with.
enum SendSignal {
	Completed,
	Aborted,
}

struct Inner<T> {
	capacity: usize,
	buffer: VecDeque<T>,
	senders: VecDeque<(TaskId, T)>,
	receivers: VecDeque<TaskId>,
	closed: bool,
}

/// A channel between tasks, created with [`crate::chan`].
///
/// Cloning a `Channel` shares the same underlying queue — every clone is a
/// handle onto one channel, the same way `std::rc::Rc` clones share one
/// allocation.
pub struct Channel<T> {
	inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Channel<T> {
	fn clone(&self) -> Self {
		Channel { inner: self.inner.clone() }
	}
}

impl<T: 'static> Channel<T> {
	pub(crate) fn new(capacity: usize) -> Self {
		Channel {
			inner: Rc::new(RefCell::new(Inner {
				capacity,
				buffer: VecDeque::new(),
				senders: VecDeque::new(),
				receivers: VecDeque::new(),
				closed: false,
			})),
		}
	}

	/// Sends `v`. Succeeds immediately if a receiver is already waiting
	/// or the buffer has room; otherwise the calling task blocks until a
	/// receiver takes the value, or the channel is closed out from under
	/// it.
	pub fn send(&self, v: T) -> Result<()> {
		{
			let mut inner = self.inner.borrow_mut();
			if inner.closed {
				return Err(Error::ChannelClosed);
			}
			if let Some(receiver) = inner.receivers.pop_front() {
				drop(inner);
				api::wake_task(receiver, Box::new(RecvSignal::Delivered(v)) as Boxed);
				return Ok(());
			}
			if inner.buffer.len() < inner.capacity {
				inner.buffer.push_back(v);
				return Ok(());
			}
			let id = task::current_task_id();
			inner.senders.push_back((id, v));
			api::park_current(id);
		}
		let resume = task::suspend_current();
		match *resume.downcast::<SendSignal>().expect("channel send resumed with a foreign signal") {
			SendSignal::Completed => Ok(()),
			SendSignal::Aborted => Err(Error::ChannelClosed),
		}
	}

	/// Receives a value, or `None` once the channel is closed and
	/// drained. Blocks the calling task if neither a value nor a
	/// waiting sender is available yet.
	pub fn receive(&self) -> Option<T> {
		loop {
			{
				let mut inner = self.inner.borrow_mut();
				if !inner.buffer.is_empty() {
					let v = inner.buffer.pop_front().unwrap();
					if let Some((sender, sv)) = inner.senders.pop_front() {
						inner.buffer.push_back(sv);
						drop(inner);
						api::wake_task(sender, Box::new(SendSignal::Completed) as Boxed);
					}
					return Some(v);
				}
				if inner.capacity == 0 {
					if let Some((sender, sv)) = inner.senders.pop_front() {
						drop(inner);
						api::wake_task(sender, Box::new(SendSignal::Completed) as Boxed);
						return Some(sv);
					}
				}
				if inner.closed {
					return None;
				}
				let id = task::current_task_id();
				inner.receivers.push_back(id);
				api::park_current(id);
			}
			let resume = task::suspend_current();
			match *resume.downcast::<RecvSignal<T>>().expect("channel receive resumed with a foreign signal") {
				RecvSignal::Delivered(v) => return Some(v),
				RecvSignal::Closed => continue,
			}
		}
	}

	/// Closes the channel. Idempotent is deliberately *not* offered —
	/// closing an already-closed channel is a programmer error (spec
	/// §4.5's invariant), reported as `Error::InvariantViolation`.
	pub fn close(&self) -> Result<()> {
		let mut inner = self.inner.borrow_mut();
		if inner.closed {
			return Err(Error::InvariantViolation("close on an already-closed channel".into()));
		}
		inner.closed = true;

		let senders: Vec<TaskId> = inner.senders.drain(..).map(|(id, _)| id).collect();
		let receivers: Vec<TaskId> = inner.receivers.drain(..).collect();
		drop(inner);

		for id in senders {
			api::wake_task(id, Box::new(SendSignal::Aborted) as Boxed);
		}
		for id in receivers {
			api::wake_task(id, Box::new(RecvSignal::<T>::Closed) as Boxed);
		}
		Ok(())
	}

	pub fn is_closed(&self) -> bool {
		self.inner.borrow().closed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rendezvous_channel_has_no_buffer_slot() {
		let ch: Channel<i32> = Channel::new(0);
		assert_eq!(ch.inner.borrow().capacity, 0);
		assert!(ch.inner.borrow().buffer.is_empty());
	}

	#[test]
	fn close_is_not_idempotent() {
		let ch: Channel<i32> = Channel::new(1);
		ch.close().unwrap();
		assert!(ch.close().is_err());
	}

	#[test]
	fn is_closed_reflects_close() {
		let ch: Channel<i32> = Channel::new(1);
		assert!(!ch.is_closed());
		ch.close().unwrap();
		assert!(ch.is_closed());
	}
}
