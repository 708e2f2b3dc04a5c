// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Wraparound-safe tick arithmetic
//!
//! The platform tick is a `u32` millisecond counter and rolls over after
//! about 49.7 days. All comparisons go through modular subtraction so an
//! interval straddling the rollover is measured correctly. Deadlines are
//! compared by the sign of the wrapped difference, which is valid as long
//! as the deadline lies less than 2^31 ms (~24.8 days) away.

/// Milliseconds from `since` to `now`, across rollover
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// True once `interval` ms have passed since `last`
///
/// An interval of 0 means "disabled" and never fires.
#[inline]
pub fn interval_elapsed(now: u32, last: u32, interval: u32) -> bool {
    interval != 0 && elapsed(now, last) >= interval
}

/// Deadline `delay` ms after `now`
#[inline]
pub fn deadline_after(now: u32, delay: u32) -> u32 {
    now.wrapping_add(delay)
}

/// True once `now` is at or past `deadline`
#[inline]
pub fn deadline_reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}
