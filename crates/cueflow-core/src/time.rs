//! Time representation for the scheduling engine
//!
//! Uses rational numbers to avoid floating-point accumulation errors.
//! All offsets are represented as numerator/denominator pairs of
//! milliseconds, so predicted finish times compare exactly and the
//! commit sort orders have deterministic tie-breaks.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};
use std::time::Duration;

/// A point (or span length) on a local clock, in rational milliseconds.
///
/// Local time is unscaled: playback rate is applied only when converting
/// to and from wall-clock durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimePoint {
    /// Offset as a rational number (milliseconds)
    value: Rational64,
}

impl TimePoint {
    /// Create a TimePoint from whole milliseconds.
    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        Self {
            value: Rational64::new(millis, 1),
        }
    }

    /// Create a TimePoint from fractional milliseconds.
    /// Note: May introduce small precision errors.
    pub fn from_millis_f64(millis: f64) -> Self {
        const PRECISION: i64 = 1_000_000;
        Self {
            value: Rational64::new((millis * PRECISION as f64).round() as i64, PRECISION),
        }
    }

    /// Create a TimePoint from seconds as a float.
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self::from_millis_f64(seconds * 1000.0)
    }

    /// Convert to milliseconds as f64.
    #[inline]
    pub fn to_millis_f64(self) -> f64 {
        *self.value.numer() as f64 / *self.value.denom() as f64
    }

    /// Wall-clock duration of this span when played at `rate`.
    ///
    /// Negative spans and non-positive rates clamp to zero.
    pub fn to_wall(self, rate: f64) -> Duration {
        if rate <= 0.0 {
            return Duration::ZERO;
        }
        let millis = self.to_millis_f64() / rate;
        if millis <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(millis / 1000.0)
        }
    }

    /// Local time covered by a wall-clock duration at `rate`.
    pub fn from_wall(elapsed: Duration, rate: f64) -> Self {
        Self::from_millis_f64(elapsed.as_secs_f64() * 1000.0 * rate)
    }

    /// Divide this span by a (positive) factor.
    pub fn div_f64(self, factor: f64) -> Self {
        Self::from_millis_f64(self.to_millis_f64() / factor)
    }

    /// Zero offset constant.
    pub const ZERO: Self = Self {
        value: Rational64::new_raw(0, 1),
    };

    /// Check if this offset is zero.
    #[inline]
    pub fn is_zero(self) -> bool {
        *self.value.numer() == 0
    }

    /// The larger of two offsets.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }
}

impl Default for TimePoint {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for TimePoint {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            value: self.value + rhs.value,
        }
    }
}

impl AddAssign for TimePoint {
    fn add_assign(&mut self, rhs: Self) {
        self.value += rhs.value;
    }
}

impl Sub for TimePoint {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value - rhs.value,
        }
    }
}

impl Neg for TimePoint {
    type Output = Self;
    fn neg(self) -> Self {
        Self { value: -self.value }
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.to_millis_f64())
    }
}

/// A half-open span of local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    /// Start offset (inclusive)
    pub start: TimePoint,
    /// End offset (exclusive)
    pub end: TimePoint,
}

impl TimeSpan {
    /// Create a new span from start and end offsets.
    #[inline]
    pub fn new(start: TimePoint, end: TimePoint) -> Self {
        Self { start, end }
    }

    /// Length of the span.
    #[inline]
    pub fn duration(self) -> TimePoint {
        self.end - self.start
    }

    /// Check if an offset falls within this span.
    #[inline]
    pub fn contains(self, at: TimePoint) -> bool {
        at >= self.start && at < self.end
    }

    /// Check if two spans overlap.
    pub fn overlaps(self, other: Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Direction of playback traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// The opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
        }
    }
}

/// The three timed phases a clip traverses.
///
/// Forward playback runs Delay, Active, EndDelay in order; rewinding
/// traverses them in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Delay,
    Active,
    EndDelay,
}

impl Phase {
    /// Phases in forward traversal order.
    pub const FORWARD_ORDER: [Phase; 3] = [Phase::Delay, Phase::Active, Phase::EndDelay];

    /// Phases in backward traversal order.
    pub const BACKWARD_ORDER: [Phase; 3] = [Phase::EndDelay, Phase::Active, Phase::Delay];

    /// Traversal order for the given direction.
    pub fn order(direction: Direction) -> [Phase; 3] {
        match direction {
            Direction::Forward => Self::FORWARD_ORDER,
            Direction::Backward => Self::BACKWARD_ORDER,
        }
    }
}

/// A point within a phase, in forward orientation.
///
/// `Begin` is always the temporally earlier edge of the phase, regardless
/// of traversal direction; an `Offset` is measured from that edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhasePoint {
    Begin,
    End,
    Offset(TimePoint),
}

/// The two edges of a phase, in forward orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Boundary {
    Begin,
    End,
}

impl Boundary {
    /// The edge a traversal in `direction` reaches first.
    pub fn entry(direction: Direction) -> Self {
        match direction {
            Direction::Forward => Self::Begin,
            Direction::Backward => Self::End,
        }
    }

    /// The edge a traversal in `direction` reaches last.
    pub fn exit(direction: Direction) -> Self {
        match direction {
            Direction::Forward => Self::End,
            Direction::Backward => Self::Begin,
        }
    }
}
