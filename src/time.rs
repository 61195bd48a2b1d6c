//! Deadlines over a monotonic microsecond clock

/// A free-running monotonic clock
pub trait Monotonic {
    /// Microseconds since an arbitrary epoch; never goes backwards
    fn now_us(&self) -> u64;
}

impl<T: Monotonic + ?Sized> Monotonic for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// A deadline measured against a [`Monotonic`] clock
pub struct Timeout<'t, T: Monotonic + ?Sized> {
    timer: &'t T,
    deadline: u64,
}

impl<'t, T: Monotonic + ?Sized> Timeout<'t, T> {
    /// Deadline `ms` milliseconds from now
    pub fn from_ms(timer: &'t T, ms: u32) -> Self {
        Self::from_us(timer, u64::from(ms) * 1000)
    }

    /// Deadline `us` microseconds from now
    pub fn from_us(timer: &'t T, us: u64) -> Self {
        Self {
            timer,
            deadline: timer.now_us().saturating_add(us),
        }
    }

    /// Has the deadline passed?
    pub fn is_expired(&self) -> bool {
        self.timer.now_us() >= self.deadline
    }

    /// Microseconds left before the deadline
    pub fn remaining_us(&self) -> u64 {
        self.deadline.saturating_sub(self.timer.now_us())
    }
}
