// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later

//! The user-facing diagnostic printer named in the external interfaces.
//!
//! This is distinct from the crate's internal `tracing` instrumentation:
//! `tracing` is the operator-facing logging layer for the scheduler's own
//! bookkeeping, `dprintfn!` is the deterministic, timestamp-prefixed
//! printer tasks use to produce the output the test scenarios assert on.

use std::io::Write;

use crate::duration::Duration;

/// Renders `"[%04d]: <rendered>"`, where `%04d` is `elapsed` as
/// milliseconds, zero-padded to four digits — split out from
/// [`dprintfn_at`] so the format itself is testable without capturing
/// real stdout.
fn render_line(elapsed: Duration, rendered: std::fmt::Arguments<'_>) -> String {
	format!("[{:04}]: {}", elapsed.as_millis(), rendered)
}

/// Writes `render_line(elapsed, rendered)` to stdout, followed by a
/// newline.
///
/// Prefer the [`dprintfn`] macro, which computes `elapsed` from the
/// currently running task's scheduler automatically.
pub fn dprintfn_at(elapsed: Duration, rendered: std::fmt::Arguments<'_>) {
	let stdout = std::io::stdout();
	let mut lock = stdout.lock();
	let _ = writeln!(lock, "{}", render_line(elapsed, rendered));
}

/// Prints a line prefixed with the milliseconds elapsed since the current
/// task's scheduler started, formatted like [`println!`].
#[macro_export]
macro_rules! dprintfn {
    ($($arg:tt)*) => {{
        let elapsed = $crate::current_elapsed();
        $crate::diag::dprintfn_at(elapsed, format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn render_line_matches_the_documented_format() {
		assert_eq!(render_line(Duration::from_millis(100), format_args!("B")), "[0100]: B");
		assert_eq!(render_line(Duration::from_millis(200), format_args!("A")), "[0200]: A");
	}

	#[test]
	fn render_line_pads_small_elapsed_values_to_four_digits() {
		assert_eq!(render_line(Duration::ZERO, format_args!("x")), "[0000]: x");
		assert_eq!(render_line(Duration::from_millis(7), format_args!("y")), "[0007]: y");
	}
}
