// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

use std::collections::HashMap;
use std::os::fd::RawFd;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Readable,
	Writable,
}

/// Binding of (descriptor, direction) to the task waiting on it. The task
/// itself lives in the scheduler's registry — subscriptions only reference
/// it by id, the same way channel wait queues do, so a task that's
/// simultaneously reachable from more than one structure (unusual, but not
/// forbidden) has exactly one owner.
#[derive(Clone, Copy)]
pub(crate) struct StreamSubscription {
	pub(crate) direction: Direction,
	pub(crate) task: TaskId,
}

/// A multiset of subscriptions indexed by descriptor, preserving
/// insertion order per descriptor so dispatch can honor FIFO fairness
/// among subscriptions on the same fd (spec §4.4).
#[derive(Default)]
pub(crate) struct SubscriptionList {
	by_descriptor: HashMap<RawFd, Vec<StreamSubscription>>,
}

impl SubscriptionList {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.by_descriptor.values().all(|v| v.is_empty())
	}

	pub(crate) fn add(&mut self, descriptor: RawFd, sub: StreamSubscription) {
		self.by_descriptor.entry(descriptor).or_default().push(sub);
	}

	/// The set of descriptors currently being watched, for handing to
	/// the readiness primitive.
	pub(crate) fn descriptors(&self) -> Vec<RawFd> {
		self.by_descriptor.iter().filter(|(_, subs)| !subs.is_empty()).map(|(fd, _)| *fd).collect()
	}

	/// Subscriptions bound to `fd`, in insertion order, for dispatch.
	pub(crate) fn for_descriptor(&self, fd: RawFd) -> &[StreamSubscription] {
		self.by_descriptor.get(&fd).map(|v| v.as_slice()).unwrap_or(&[])
	}

	/// Drops the subscription for `task` on `fd` (it either terminated
	/// or is being re-subscribed), pruning the descriptor if it's left
	/// empty.
	pub(crate) fn remove(&mut self, fd: RawFd, task: TaskId) {
		if let Some(subs) = self.by_descriptor.get_mut(&fd) {
			subs.retain(|s| s.task != task);
		}
		self.by_descriptor.retain(|_, subs| !subs.is_empty());
	}

	pub(crate) fn remove_task(&mut self, id: TaskId) {
		for subs in self.by_descriptor.values_mut() {
			subs.retain(|s| s.task != id);
		}
		self.by_descriptor.retain(|_, subs| !subs.is_empty());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::task::TaskId;

	fn fake_id() -> TaskId {
		TaskId::next()
	}

	#[test]
	fn dispatch_order_matches_insertion_order() {
		let mut list = SubscriptionList::new();
		let (a, b) = (fake_id(), fake_id());
		list.add(3, StreamSubscription { direction: Direction::Readable, task: a });
		list.add(3, StreamSubscription { direction: Direction::Readable, task: b });

		let subs = list.for_descriptor(3);
		assert_eq!(subs.len(), 2);
		assert_eq!(subs[0].task, a);
		assert_eq!(subs[1].task, b);
	}

	#[test]
	fn removing_a_descriptors_subscriptions_prunes_the_entry() {
		let mut list = SubscriptionList::new();
		let id = fake_id();
		list.add(5, StreamSubscription { direction: Direction::Writable, task: id });
		assert_eq!(list.descriptors(), vec![5]);
		list.remove(5, id);
		assert!(list.descriptors().is_empty());
	}
}
