// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

use thiserror::Error as ThisError;

/// The crate-wide error taxonomy.
///
/// `UserFault` from the design is deliberately absent here: a fault inside
/// a user task is captured as [`crate::TaskFault`] and stored as that
/// task's terminal value, it never becomes a `weft::Error` and never
/// unwinds past the scheduler.
#[derive(Debug, ThisError)]
pub enum Error {
	/// `send` was called on a channel after `close`.
	#[error("send on a closed channel")]
	ChannelClosed,

	/// A programmer error the runtime refuses to paper over: closing an
	/// already-closed channel, suspending outside a task context, or
	/// resuming a task that has already terminated. Fatal.
	#[error("invariant violated: {0}")]
	InvariantViolation(String),

	/// The readiness primitive reported an error. Fatal.
	#[error("I/O readiness fault: {0}")]
	Io(#[from] std::io::Error),

	/// The clock went backwards between two readings. Fatal.
	#[error("clock regressed")]
	ClockRegression,
}

impl Error {
	/// Fatal errors abort the process after being logged; `ChannelClosed`
	/// is the one variant a caller is expected to handle.
	pub fn is_fatal(&self) -> bool {
		!matches!(self, Error::ChannelClosed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn channel_closed_is_the_only_non_fatal_variant() {
		assert!(!Error::ChannelClosed.is_fatal());
		assert!(Error::InvariantViolation("x".into()).is_fatal());
		assert!(Error::ClockRegression.is_fatal());
	}

	#[test]
	fn display_renders_the_expected_messages() {
		assert_eq!(Error::ChannelClosed.to_string(), "send on a closed channel");
		assert_eq!(Error::InvariantViolation("double close".into()).to_string(), "invariant violated: double close");
		assert_eq!(Error::ClockRegression.to_string(), "clock regressed");
	}
}
