//! Constant-velocity mobility for the entities of one simulation.
//!
//! Positions are not re-simulated on every tick. Each entity keeps the
//! position it had at its last update together with the velocity set at that
//! moment, and a query extrapolates linearly:
//!
//! ```text
//! p(t) = p(t0) + v * (t - t0)
//! ```
//!
//! Changing velocity (or teleporting the entity) re-anchors `t0` to the
//! current time so the extrapolation always starts from the latest change.

use super::geometry::{Vector3, distance};
use super::time::SimTime;

/// Index of an entity in its `MobilityModel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(usize);

impl EntityId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Position and velocity of a movable entity at its reference time.
#[derive(Debug, Clone, PartialEq)]
pub struct MobileEntity {
    pub position: Vector3,
    pub velocity: Vector3,
    /// Time at which `position` was last anchored.
    pub reference_time: SimTime,
}

impl MobileEntity {
    /// Linear extrapolation from the reference point. Also valid for times
    /// before the reference (extrapolates backwards along the same line).
    pub fn position_at(&self, t: SimTime) -> Vector3 {
        let dt = (t - self.reference_time).as_secs_f64();
        self.position + self.velocity * dt
    }
}

/// Arena owning every movable entity of a simulation.
#[derive(Debug, Default)]
pub struct MobilityModel {
    entities: Vec<MobileEntity>,
}

impl MobilityModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity anchored at `now`.
    pub fn add_entity(&mut self, position: Vector3, velocity: Vector3, now: SimTime) -> EntityId {
        self.entities.push(MobileEntity {
            position,
            velocity,
            reference_time: now,
        });
        EntityId(self.entities.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&MobileEntity> {
        self.entities.get(id.0)
    }

    /// Position of `id` at time `t`. `None` if the entity is not part of this model.
    pub fn position_at(&self, id: EntityId, t: SimTime) -> Option<Vector3> {
        self.entities.get(id.0).map(|e| e.position_at(t))
    }

    pub fn velocity(&self, id: EntityId) -> Option<Vector3> {
        self.entities.get(id.0).map(|e| e.velocity)
    }

    /// Distance between two entities at time `t`.
    pub fn distance_between(&self, a: EntityId, b: EntityId, t: SimTime) -> Option<f64> {
        Some(distance(&self.position_at(a, t)?, &self.position_at(b, t)?))
    }

    /// Change the velocity of `id`, anchoring its current position at `now`.
    /// Returns `false` if the entity is unknown.
    pub fn set_velocity(&mut self, id: EntityId, velocity: Vector3, now: SimTime) -> bool {
        let Some(entity) = self.entities.get_mut(id.0) else {
            return false;
        };
        entity.position = entity.position_at(now);
        entity.velocity = velocity;
        entity.reference_time = now;
        true
    }

    /// Move `id` to `position` at `now`, keeping its velocity.
    /// Returns `false` if the entity is unknown.
    pub fn set_position(&mut self, id: EntityId, position: Vector3, now: SimTime) -> bool {
        let Some(entity) = self.entities.get_mut(id.0) else {
            return false;
        };
        entity.position = position;
        entity.reference_time = now;
        true
    }
}
