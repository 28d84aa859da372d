//! Geometry helpers for positions and velocities.
//!
//! Contains:
//! - `Vector3`: Cartesian coordinates in meters (positions) or meters/second (velocities)
//! - Distance calculations (squared distance to avoid sqrt when only comparing)

use serde::Deserialize;
use std::ops::{Add, Mul, Sub};

/// Cartesian vector in meters or meters/second. Missing components deserialize as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm.
    pub fn length(&self) -> f64 {
        distance_from_d2(self.x * self.x + self.y * self.y + self.z * self.z)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Squared Euclidean distance (avoids a sqrt when only comparing distances).
pub fn distance2(a: &Vector3, b: &Vector3) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

/// Convert squared distance back to distance.
pub fn distance_from_d2(d2: f64) -> f64 {
    d2.sqrt()
}

/// Euclidean distance in meters.
pub fn distance(a: &Vector3, b: &Vector3) -> f64 {
    distance_from_d2(distance2(a, b))
}
