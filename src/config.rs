// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

use crate::duration::Duration;

/// Tunables for a [`crate::Scheduler`].
///
/// None of these change the semantics spec'd for the run loop — they only
/// bound the two places where an unbounded value would otherwise make the
/// runtime's behavior depend on how much work callers hand it in one go.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	/// Caps how many ready-queue entries a single cycle drains. `None`
	/// means "drain the whole snapshot taken at the start of the cycle",
	/// which is the default and matches the run loop as specified.
	pub ready_batch_limit: Option<usize>,

	/// Ceiling applied to the timeout passed to the readiness primitive.
	/// A timer far in the future would otherwise block the one OS
	/// thread for that entire span; capping it just means the cycle
	/// wakes up early, finds nothing due, and recomputes the timeout.
	pub max_select_timeout: Duration,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self { ready_batch_limit: None, max_select_timeout: Duration::from_secs(60) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_has_no_ready_batch_limit() {
		let config = SchedulerConfig::default();
		assert_eq!(config.ready_batch_limit, None);
	}

	#[test]
	fn default_select_timeout_is_one_minute() {
		let config = SchedulerConfig::default();
		assert_eq!(config.max_select_timeout, Duration::from_secs(60));
	}
}
