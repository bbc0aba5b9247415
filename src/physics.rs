// Bare-bones bodies and trigger volumes: enough to move the player around a car
// and notice when it walks into a door.
use bevy::prelude::*;

use crate::schedule::{FrameSet, configure_frame_sets};

pub struct PhysicsPlugin;

impl Plugin for PhysicsPlugin {
    fn build(&self, app: &mut App) {
        configure_frame_sets(app);
        app.add_systems(Update, integrate_bodies.in_set(FrameSet::Physics));
    }
}

#[derive(Component, Debug, Clone, Copy)]
pub struct PhysicsBody {
    simulating: bool,
    pub velocity: Vec3,
}

impl Default for PhysicsBody {
    fn default() -> Self {
        Self {
            simulating: true,
            velocity: Vec3::ZERO,
        }
    }
}

impl PhysicsBody {
    /// A frozen body keeps no velocity, so it cannot drift once re-enabled.
    pub fn set_simulating(&mut self, simulating: bool) {
        self.simulating = simulating;
        if !simulating {
            self.velocity = Vec3::ZERO;
        }
    }

    pub fn is_simulating(&self) -> bool {
        self.simulating
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    /// Axis-aligned box.
    Cuboid { half_extents: Vec3 },
}

#[derive(Component, Debug, Clone, Copy)]
pub struct Collider {
    pub shape: ColliderShape,
    enabled: bool,
}

impl Collider {
    pub fn sphere(radius: f32) -> Self {
        Self {
            shape: ColliderShape::Sphere { radius },
            enabled: true,
        }
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self {
            shape: ColliderShape::Cuboid { half_extents },
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Geometric overlap, ignoring whether either volume is enabled.
    pub fn overlaps(&self, at: Vec3, other: &Collider, other_at: Vec3) -> bool {
        match (self.shape, other.shape) {
            (ColliderShape::Sphere { radius: a }, ColliderShape::Sphere { radius: b }) => {
                at.distance_squared(other_at) <= (a + b) * (a + b)
            }
            (ColliderShape::Sphere { radius }, ColliderShape::Cuboid { half_extents }) => {
                sphere_hits_box(at, radius, other_at, half_extents)
            }
            (ColliderShape::Cuboid { half_extents }, ColliderShape::Sphere { radius }) => {
                sphere_hits_box(other_at, radius, at, half_extents)
            }
            (
                ColliderShape::Cuboid { half_extents: a },
                ColliderShape::Cuboid { half_extents: b },
            ) => {
                let gap = (at - other_at).abs();
                gap.cmple(a + b).all()
            }
        }
    }
}

fn sphere_hits_box(center: Vec3, radius: f32, box_center: Vec3, half_extents: Vec3) -> bool {
    let closest = center.clamp(box_center - half_extents, box_center + half_extents);
    closest.distance_squared(center) <= radius * radius
}

pub(crate) fn integrate_bodies(time: Res<Time>, mut bodies: Query<(&mut Transform, &PhysicsBody)>) {
    let dt = time.delta_secs();
    for (mut transform, body) in &mut bodies {
        if body.is_simulating() {
            transform.translation += body.velocity * dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_touches_box_face() {
        let door = Collider::cuboid(Vec3::new(0.75, 1.5, 1.0));
        let player = Collider::sphere(0.5);
        let door_at = Vec3::new(9.0, 1.0, 0.0);

        assert!(player.overlaps(Vec3::new(7.8, 1.0, 0.0), &door, door_at));
        assert!(door.overlaps(door_at, &player, Vec3::new(7.8, 1.0, 0.0)));
        assert!(!player.overlaps(Vec3::new(7.6, 1.0, 0.0), &door, door_at));
    }

    #[test]
    fn disabled_colliders_still_overlap_geometrically() {
        let mut player = Collider::sphere(0.5);
        player.set_enabled(false);
        assert!(!player.is_enabled());
        assert!(player.overlaps(Vec3::ZERO, &Collider::sphere(0.5), Vec3::X));
    }

    #[test]
    fn freezing_a_body_drops_its_velocity() {
        let mut body = PhysicsBody {
            velocity: Vec3::X,
            ..default()
        };
        body.set_simulating(false);
        assert_eq!(body.velocity, Vec3::ZERO);
        body.set_simulating(true);
        assert!(body.is_simulating());
    }
}
