//! Exact rational timestamps.
//!
//! Container timestamps arrive in a per-stream time base (for example `1/44100` or
//! `1/90000`) while captions are expressed in microseconds or milliseconds. Mixing the
//! two through floating point drifts after a few seeks, so every comparison here is done
//! by cross-multiplication in 128-bit integers.

use std::cmp::Ordering;
use std::fmt;

const US_PER_SEC: i64 = 1_000_000;

/// A timestamp of `num / den` seconds.
///
/// Two values are equal when they describe the same instant, regardless of base:
/// `1_000_000/1_000_000 == 1_000/1_000 == 1/1`.
#[derive(Clone, Copy, Debug)]
pub struct RationalTime {
    num: i64,
    den: i64,
}

impl RationalTime {
    pub const ZERO: RationalTime = RationalTime { num: 0, den: 1 };

    /// Build `num / den` seconds.
    ///
    /// A negative denominator is folded into the numerator so `den > 0` always holds.
    /// Returns `None` for a zero denominator.
    pub fn new(num: i64, den: i64) -> Option<Self> {
        match den.cmp(&0) {
            Ordering::Equal => None,
            Ordering::Greater => Some(Self { num, den }),
            Ordering::Less => Some(Self {
                num: num.checked_neg()?,
                den: den.checked_neg()?,
            }),
        }
    }

    pub fn from_us(us: i64) -> Self {
        Self { num: us, den: US_PER_SEC }
    }

    pub fn from_ms(ms: i64) -> Self {
        Self { num: ms, den: 1_000 }
    }

    pub fn from_secs(secs: i64) -> Self {
        Self { num: secs, den: 1 }
    }

    /// Convert a timestamp counted in `numer/denom` second ticks.
    ///
    /// `ts * numer / denom` seconds, kept as a fraction. A zero `denom` yields `ZERO`.
    pub fn from_time_base(ts: u64, numer: u32, denom: u32) -> Self {
        if denom == 0 {
            return Self::ZERO;
        }
        let num = i128::from(ts) * i128::from(numer);
        match i64::try_from(num) {
            Ok(num) => Self { num, den: i64::from(denom) },
            // Scale down to microseconds rather than overflow; only reachable for
            // timestamps hundreds of thousands of years long.
            Err(_) => {
                let us = num * i128::from(US_PER_SEC) / i128::from(denom);
                Self::from_us(i64::try_from(us).unwrap_or(i64::MAX))
            }
        }
    }

    /// Duration of `samples` sample-frames at `rate` Hz.
    pub fn from_samples(samples: u64, rate: u32) -> Self {
        Self::from_time_base(samples, 1, rate)
    }

    /// Sample-frames at `rate` Hz needed to cover this duration, rounded up.
    ///
    /// Zero for zero or negative durations.
    pub fn samples_ceil(&self, rate: u32) -> u64 {
        if self.num <= 0 {
            return 0;
        }
        let ticks = i128::from(self.num) * i128::from(rate);
        let den = i128::from(self.den);
        u64::try_from((ticks + den - 1) / den).unwrap_or(u64::MAX)
    }

    pub fn numerator(&self) -> i64 {
        self.num
    }

    pub fn denominator(&self) -> i64 {
        self.den
    }

    /// Whole microseconds, truncated toward zero.
    pub fn us(&self) -> i64 {
        let us = i128::from(self.num) * i128::from(US_PER_SEC) / i128::from(self.den);
        i64::try_from(us).unwrap_or(if us < 0 { i64::MIN } else { i64::MAX })
    }

    pub fn ms(&self) -> i64 {
        self.us() / 1_000
    }

    /// Exact sum, or `None` when the result does not fit in 64 bits.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        let num = i128::from(self.num) * i128::from(other.den)
            + i128::from(other.num) * i128::from(self.den);
        let den = i128::from(self.den) * i128::from(other.den);
        Self::reduce(num, den)
    }

    /// Exact difference, or `None` when the result does not fit in 64 bits.
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        let neg = Self {
            num: other.num.checked_neg()?,
            den: other.den,
        };
        self.checked_add(neg)
    }

    /// `|self - other|`, saturating to a very large duration on overflow.
    pub fn abs_diff(self, other: Self) -> Self {
        let diff = match self.checked_sub(other) {
            Some(d) => d,
            None => return Self { num: i64::MAX, den: 1 },
        };
        Self {
            num: diff.num.saturating_abs(),
            den: diff.den,
        }
    }

    fn reduce(num: i128, den: i128) -> Option<Self> {
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i128;
        let num = i64::try_from(num / g).ok()?;
        let den = i64::try_from(den / g).ok()?;
        Self::new(num, den)
    }

    fn cross(&self, other: &Self) -> (i128, i128) {
        (
            i128::from(self.num) * i128::from(other.den),
            i128::from(other.num) * i128::from(self.den),
        )
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Default for RationalTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for RationalTime {
    fn eq(&self, other: &Self) -> bool {
        let (lhs, rhs) = self.cross(other);
        lhs == rhs
    }
}

impl Eq for RationalTime {}

impl PartialOrd for RationalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RationalTime {
    // Both denominators are positive, so cross-multiplying preserves order.
    fn cmp(&self, other: &Self) -> Ordering {
        let (lhs, rhs) = self.cross(other);
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let us = self.us();
        let sign = if us < 0 { "-" } else { "" };
        let us = us.unsigned_abs();
        write!(f, "{sign}{}.{:06}s", us / 1_000_000, us % 1_000_000)
    }
}
