//! Fixed-point math utilities for deterministic simulation.
//!
//! All simulation state uses fixed-point arithmetic so that identical tick
//! inputs always produce identical trajectories. The integer part is wide
//! enough for squared products of positions and velocities on maps several
//! thousand units across.

use fixed::types::I48F16;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 48 bits for the integer part and 16 bits for the fractional part.
/// Precision: approximately 0.000015
pub type Fixed = I48F16;

/// Fixed-point 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Serde support for fixed-point numbers written as plain decimals.
///
/// Content tables are authored by hand, so `speed: 120.5` reads better than
/// a raw bit pattern. Values are rounded to the nearest representable
/// fixed-point number on load.
pub mod decimal_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as an `f64`.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_num::<f64>().serialize(serializer)
    }

    /// Deserialize a fixed-point number from an `f64`.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(value)
            .ok_or_else(|| serde::de::Error::custom(format!("{value} is out of fixed-point range")))
    }
}

/// Serde support for vectors written as a plain `(x, y)` decimal pair.
pub mod decimal_vec_serde {
    use super::{Fixed, Vec2Fixed};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a vector as an `(f64, f64)` tuple.
    pub fn serialize<S>(value: &Vec2Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (value.x.to_num::<f64>(), value.y.to_num::<f64>()).serialize(serializer)
    }

    /// Deserialize a vector from an `(f64, f64)` tuple.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec2Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (x, y) = <(f64, f64)>::deserialize(deserializer)?;
        match (Fixed::checked_from_num(x), Fixed::checked_from_num(y)) {
            (Some(x), Some(y)) => Ok(Vec2Fixed::new(x, y)),
            _ => Err(serde::de::Error::custom(format!("({x}, {y}) is out of fixed-point range"))),
        }
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer coordinates.
    #[must_use]
    pub fn from_ints(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Squared length.
    #[must_use]
    pub fn length_squared(self) -> Fixed {
        self.dot(self)
    }

    /// Length of the vector.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.length_squared())
    }

    /// Multiply both components by a scalar.
    #[must_use]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Linearly interpolate between two vectors.
    #[must_use]
    pub fn lerp(self, other: Self, t: Fixed) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == Fixed::ZERO {
            return Self::ZERO;
        }
        Self::new(self.x / len, self.y / len)
    }

    /// Rescale to the given length, keeping direction. Zero stays zero.
    #[must_use]
    pub fn with_length(self, length: Fixed) -> Self {
        self.normalize().scale(length)
    }

    /// Cap the vector's length at `max`.
    #[must_use]
    pub fn clamp_length(self, max: Fixed) -> Self {
        if self.length_squared() > max * max {
            self.with_length(max)
        } else {
            self
        }
    }

    /// Rotate by an angle given as its precomputed cosine and sine.
    #[must_use]
    pub fn rotate(self, cos: Fixed, sin: Fixed) -> Self {
        Self::new(
            self.x * cos - self.y * sin,
            self.x * sin + self.y * cos,
        )
    }

    /// True if both components are zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.x == Fixed::ZERO && self.y == Fixed::ZERO
    }
}

/// Integer square root (floor) of a `u128`.
fn isqrt_u128(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let bits = 128 - n.leading_zeros();
    let mut x = 1u128 << ((bits + 1) / 2);
    loop {
        let y = (x + n / x) >> 1;
        if y >= x {
            return x;
        }
        x = y;
    }
}

/// Computes the square root of a fixed-point number.
///
/// Works on the raw representation: `sqrt(v) * 2^F == isqrt(bits * 2^F)`,
/// so the result is exact to the last fractional bit and identical on every
/// run.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }
    let bits = value.to_bits() as u128;
    let root = isqrt_u128(bits << Fixed::FRAC_NBITS);
    Fixed::from_bits(root as i64)
}

/// Axis-aligned rectangle in world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Minimum corner.
    pub min: Vec2Fixed,
    /// Maximum corner.
    pub max: Vec2Fixed,
}

impl Rect {
    /// Create a rectangle from two corners in any order.
    #[must_use]
    pub fn from_corners(a: Vec2Fixed, b: Vec2Fixed) -> Self {
        Self {
            min: Vec2Fixed::new(a.x.min(b.x), a.y.min(b.y)),
            max: Vec2Fixed::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Create a rectangle centered on `center` with the given size.
    #[must_use]
    pub fn centered(center: Vec2Fixed, width: Fixed, height: Fixed) -> Self {
        let half_w = width / Fixed::from_num(2);
        let half_h = height / Fixed::from_num(2);
        Self {
            min: Vec2Fixed::new(center.x - half_w, center.y - half_h),
            max: Vec2Fixed::new(center.x + half_w, center.y + half_h),
        }
    }

    /// Width of the rectangle.
    #[must_use]
    pub fn width(&self) -> Fixed {
        self.max.x - self.min.x
    }

    /// Height of the rectangle.
    #[must_use]
    pub fn height(&self) -> Fixed {
        self.max.y - self.min.y
    }

    /// Check whether a point lies inside (edges inclusive).
    #[must_use]
    pub fn contains(&self, p: Vec2Fixed) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Check whether two rectangles overlap (touching edges do not count).
    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    /// Closest point of the rectangle to `p`.
    #[must_use]
    pub fn closest_point(&self, p: Vec2Fixed) -> Vec2Fixed {
        Vec2Fixed::new(
            p.x.clamp(self.min.x, self.max.x),
            p.y.clamp(self.min.y, self.max.y),
        )
    }

    /// Distance from `p` to the rectangle (zero when inside).
    #[must_use]
    pub fn distance_to(&self, p: Vec2Fixed) -> Fixed {
        self.closest_point(p).distance(p)
    }
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::AddAssign for Vec2Fixed {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Neg for Vec2Fixed {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}
