// The relax strategies follow the shape of relax.rs from spin-rs, and the
// backoff steps follow crossbeam-utils' backoff.rs.
//
// Copyright (c) 2014 Mathijs van de Nes
// Copyright (c) 2019 The Crossbeam Project Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Strategies that determine what a contender does while it waits for its
//! turn at a duel.
//!
//! Every [`TwoPartyLock`] and every [`TreeLock`] is generic over one of these
//! policies. The policy is instantiated once per call to `acquire`, and its
//! [`relax`] method runs each time the wait condition is checked and found
//! to still hold.
//!
//! [`TwoPartyLock`]: crate::TwoPartyLock
//! [`TreeLock`]: crate::TreeLock
//! [`relax`]: Relax::relax

use crate::cfg::hint;

#[cfg(any(feature = "yield", test))]
use crate::cfg::thread;

/// A trait implemented by spinning relax strategies.
pub trait Relax {
    /// Initialize the state for the relaxing operation, if any.
    fn new() -> Self;

    /// Perform the relaxing operation during a period of contention.
    fn relax(&mut self);
}

/// A strategy that rapidly spins while informing the CPU that it should power
/// down non-essential components via [`core::hint::spin_loop`].
///
/// This is the plain busy-wait the tournament protocol is designed around.
/// Schedulers cannot tell spinning apart from useful work, so a contender that
/// is descheduled while holding a duel keeps its sibling burning CPU until it
/// runs again. Only use it among a bounded set of threads that each have a
/// processor to themselves.
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        hint::spin_loop();
    }
}

/// A strategy that yields the current time slice to the scheduler in favour of
/// other threads or processes.
///
/// Useful when there are more contenders than processors, for example in test
/// suites. It changes the latency profile of the lock: a yielding contender
/// notices its turn later than a spinning one.
#[cfg(any(feature = "yield", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub struct Yield;

#[cfg(any(feature = "yield", test))]
impl Relax for Yield {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline]
    fn relax(&mut self) {
        thread::yield_now();
    }
}

/// A strategy that rapidly spins, without telling the CPU to do any powering down.
///
/// You almost certainly want [`Spin`] instead. This exists for targets that
/// miscompile or lack spin hint intrinsics.
pub struct Loop;

impl Relax for Loop {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {}
}

/// A strategy that, as [`Spin`], will run a busy-wait spin-loop, except this
/// implementation will perform exponential backoff.
///
/// Backing off lowers the rate at which a waiting contender re-reads its
/// sibling's flag and the victim marker, which in turn lowers the coherence
/// traffic on that node. Measure before adopting it: a longer backoff also
/// delays the moment a contender notices its turn.
pub struct SpinBackoff {
    step: Step,
}

impl SpinBackoff {
    const SPIN_LIMIT: u32 = 6;
}

impl Relax for SpinBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        self.step.spin_to(Self::SPIN_LIMIT);
        self.step.step_to(Self::SPIN_LIMIT);
    }
}

/// A strategy that, as [`Yield`], will yield back to the OS scheduler, but only
/// after performing exponential backoff in a spin loop within a threshold.
#[cfg(feature = "yield")]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub struct YieldBackoff {
    step: Step,
}

#[cfg(feature = "yield")]
impl YieldBackoff {
    const SPIN_LIMIT: u32 = SpinBackoff::SPIN_LIMIT;
    const YIELD_LIMIT: u32 = 10;
}

#[cfg(feature = "yield")]
impl Relax for YieldBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        if self.step.0 <= Self::SPIN_LIMIT {
            self.step.spin_to(Self::SPIN_LIMIT);
        } else {
            thread::yield_now();
        }
        self.step.step_to(Self::YIELD_LIMIT);
    }
}

/// Keeps count of the number of steps taken.
struct Step(u32);

impl Step {
    /// Bounded backoff spinning.
    fn spin_to(&self, max: u32) {
        for _ in 0..1u32 << self.0.min(max) {
            hint::spin_loop();
        }
    }

    /// Bounded step increment.
    fn step_to(&mut self, end: u32) {
        if self.0 <= end {
            self.0 += 1;
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Relax, SpinBackoff, Step};

    #[test]
    fn step_saturates_past_limit() {
        let mut step = Step(0);
        for _ in 0..32 {
            step.step_to(SpinBackoff::SPIN_LIMIT);
        }
        assert_eq!(step.0, SpinBackoff::SPIN_LIMIT + 1);
    }

    #[test]
    fn spin_backoff_grows_then_stops() {
        let mut backoff = SpinBackoff::new();
        for _ in 0..16 {
            backoff.relax();
        }
        assert_eq!(backoff.step.0, SpinBackoff::SPIN_LIMIT + 1);
    }
}
