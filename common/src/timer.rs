use core::fmt::Debug;
use std::{
    cell::Cell,
    sync::OnceLock,
    time::Instant,
};

/// Fixed-width, free-running millisecond counter.
///
/// The counter increases monotonically and wraps back to zero once after
/// reaching [`Ticks::MAX`]. Zero is reserved by [`MonotonicTimer`] as its
/// "never fired" marker.
pub trait Ticks: Copy + Ord + Debug + Default {
    const ZERO: Self;
    const ONE: Self;
    const MAX: Self;

    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn saturating_sub(self, rhs: Self) -> Self;
    fn saturating_add(self, rhs: Self) -> Self;

    /// Milliseconds from `earlier` to `self`, assuming at most one wrap
    /// happened in between.
    fn elapsed_since(self, earlier: Self) -> Self {
        if self < earlier {
            // Distance to the top of the range, one step across the wrap,
            // then the distance from zero.
            Self::MAX
                .wrapping_sub(earlier)
                .wrapping_add(Self::ONE)
                .wrapping_add(self)
        } else {
            self.wrapping_sub(earlier)
        }
    }
}

macro_rules! impl_ticks {
    ($($ty:ty),*) => {
        $(
            impl Ticks for $ty {
                const ZERO: Self = 0;
                const ONE: Self = 1;
                const MAX: Self = <$ty>::MAX;

                fn wrapping_add(self, rhs: Self) -> Self {
                    <$ty>::wrapping_add(self, rhs)
                }

                fn wrapping_sub(self, rhs: Self) -> Self {
                    <$ty>::wrapping_sub(self, rhs)
                }

                fn saturating_sub(self, rhs: Self) -> Self {
                    <$ty>::saturating_sub(self, rhs)
                }

                fn saturating_add(self, rhs: Self) -> Self {
                    <$ty>::saturating_add(self, rhs)
                }
            }
        )*
    };
}

impl_ticks!(u16, u32, u64);

/// Counter width used by the greenhouse components.
pub type Millis = u32;

/// Source of the free-running counter.
pub trait Clock {
    type Ticks: Ticks;

    fn now(&self) -> Self::Ticks;
}

/// Wrapping 32-bit millisecond counter measured from process start.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Ticks = Millis;

    fn now(&self) -> Millis {
        static START: OnceLock<Instant> = OnceLock::new();
        let elapsed = START.get_or_init(Instant::now).elapsed().as_millis();
        // Truncation is the wrap.
        elapsed as Millis
    }
}

/// Hand-driven clock for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock<T: Ticks = Millis> {
    now: Cell<T>,
}

impl<T: Ticks> ManualClock<T> {
    pub fn new(start: T) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, now: T) {
        self.now.set(now);
    }

    pub fn advance(&self, ms: T) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl<T: Ticks> Clock for ManualClock<T> {
    type Ticks = T;

    fn now(&self) -> T {
        self.now.get()
    }
}

/// Answers "has more than `delay` elapsed since the last reset", correctly
/// across one counter wrap.
///
/// The timer never reads a clock itself; callers pass the current counter
/// value so the timer stays a plain state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonotonicTimer<T: Ticks = Millis> {
    delay: T,
    // ZERO means never fired.
    last_fire: T,
}

impl<T: Ticks> MonotonicTimer<T> {
    pub fn new(delay: T) -> Self {
        Self {
            delay,
            last_fire: T::ZERO,
        }
    }

    pub fn delay(&self) -> T {
        self.delay
    }

    /// Takes effect on the next check. The last firing instant is kept.
    pub fn set_delay(&mut self, delay: T) {
        self.delay = delay;
    }

    pub fn last_fire_time(&self) -> Option<T> {
        if self.last_fire == T::ZERO {
            None
        } else {
            Some(self.last_fire)
        }
    }

    pub fn has_fired(&self) -> bool {
        self.last_fire != T::ZERO
    }

    pub fn elapsed(&self, now: T) -> Option<T> {
        self.last_fire_time().map(|last| now.elapsed_since(last))
    }

    /// True when the timer never fired or strictly more than `delay` has
    /// elapsed since the last reset. Does not re-arm.
    pub fn is_it_time(&self, now: T) -> bool {
        match self.elapsed(now) {
            None => true,
            Some(elapsed) => elapsed > self.delay,
        }
    }

    /// Time left until [`is_it_time`](Self::is_it_time) turns true; zero
    /// when already due.
    pub fn remaining(&self, now: T) -> T {
        match self.elapsed(now) {
            None => T::ZERO,
            Some(elapsed) if elapsed > self.delay => T::ZERO,
            Some(elapsed) => self.delay.saturating_sub(elapsed).saturating_add(T::ONE),
        }
    }

    /// Records `now` as the firing instant. A reading of zero is stored as
    /// one so it cannot be confused with "never fired".
    pub fn reset(&mut self, now: T) {
        self.last_fire = if now == T::ZERO { T::ONE } else { now };
    }

    /// Returns the timer to its never-fired state.
    pub fn clear(&mut self) {
        self.last_fire = T::ZERO;
    }

    /// Resets and reports true when the timer was due.
    pub fn fire_if_due(&mut self, now: T) -> bool {
        if self.is_it_time(now) {
            self.reset(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_fired_is_always_due() {
        let timer = MonotonicTimer::<u32>::new(10_000);
        assert!(timer.is_it_time(0));
        assert!(timer.is_it_time(5));
        assert_eq!(timer.last_fire_time(), None);
    }

    #[test]
    fn fires_only_after_delay_is_exceeded() {
        let mut timer = MonotonicTimer::<u32>::new(10);
        timer.reset(100);

        assert!(!timer.is_it_time(105));
        assert!(!timer.is_it_time(110));
        assert!(timer.is_it_time(111));
    }

    #[test]
    fn handles_counter_wraparound() {
        let mut timer = MonotonicTimer::<u32>::new(10);
        timer.reset(u32::MAX - 5);

        // elapsed = 3
        assert!(!timer.is_it_time(u32::MAX - 2));
        // elapsed = 5 + 1 + 4 = 10, not strictly greater
        assert!(!timer.is_it_time(4));
        // elapsed = 5 + 1 + 6 = 12
        assert!(timer.is_it_time(6));
    }

    #[test]
    fn wrap_boundary_matches_linear_elapsed() {
        let mut timer = MonotonicTimer::<u16>::new(0);
        timer.reset(u16::MAX);

        assert_eq!(timer.elapsed(u16::MAX), Some(0));
        assert_eq!(timer.elapsed(0), Some(1));
        assert_eq!(timer.elapsed(1), Some(2));
        assert!(timer.is_it_time(0));
    }

    #[test]
    fn reset_at_zero_stores_one() {
        let mut timer = MonotonicTimer::<u32>::new(10);
        timer.reset(0);

        assert_eq!(timer.last_fire_time(), Some(1));
        assert!(timer.has_fired());
        assert!(!timer.is_it_time(11));
        assert!(timer.is_it_time(12));
    }

    #[test]
    fn set_delay_keeps_last_fire_time() {
        let mut timer = MonotonicTimer::<u32>::new(1_000);
        timer.reset(500);
        timer.set_delay(100);

        assert_eq!(timer.last_fire_time(), Some(500));
        assert!(timer.is_it_time(601));
        assert!(!timer.is_it_time(600));
    }

    #[test]
    fn remaining_counts_down_to_due() {
        let mut timer = MonotonicTimer::<u32>::new(100);
        assert_eq!(timer.remaining(42), 0);

        timer.reset(1_000);
        assert_eq!(timer.remaining(1_000), 101);
        assert_eq!(timer.remaining(1_100), 1);
        assert_eq!(timer.remaining(1_101), 0);
    }

    #[test]
    fn fire_if_due_rearms() {
        let mut timer = MonotonicTimer::<u32>::new(50);
        assert!(timer.fire_if_due(10));
        assert!(!timer.fire_if_due(60));
        assert!(timer.fire_if_due(61));
        assert_eq!(timer.last_fire_time(), Some(61));

        timer.clear();
        assert!(!timer.has_fired());
    }

    #[test]
    fn manual_clock_wraps() {
        let clock = ManualClock::<u16>::new(u16::MAX - 1);
        clock.advance(3);
        assert_eq!(clock.now(), 1);
    }

    #[test]
    fn remaining_saturates_at_maximum_delay() {
        let mut timer = MonotonicTimer::<u16>::new(u16::MAX);
        timer.reset(500);

        assert!(!timer.is_it_time(500));
        assert_eq!(timer.remaining(500), u16::MAX);
    }
}
