// Third-person follow camera. Arrow keys swing it a quarter turn around the
// player behind a fade, so the jump is never seen.
use std::f32::consts::{FRAC_PI_2, TAU};

use bevy::prelude::*;
use strum::IntoStaticStr;

use crate::fade::FadeOverlay;
use crate::player::{Player, TransitionGuard};
use crate::schedule::{FrameSet, configure_frame_sets};
use crate::transition::TransitionConfig;

pub struct CameraPlugin;

impl Plugin for CameraPlugin {
    fn build(&self, app: &mut App) {
        configure_frame_sets(app);
        app.init_resource::<CameraRig>()
            .add_systems(Update, snap_camera.in_set(FrameSet::Input))
            .add_systems(Update, follow_player.in_set(FrameSet::Camera));
    }
}

#[derive(Component)]
pub struct PlayerCamera;

#[derive(Resource, Debug, Clone)]
pub struct CameraRig {
    pub tracking_distance: f32,
    pub height: f32,
    /// Rotation about the player, radians in [0, TAU).
    pub yaw: f32,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            tracking_distance: 8.0,
            height: 5.0,
            yaw: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum SnapDirection {
    Left,
    Right,
}

impl CameraRig {
    pub fn snap(&mut self, direction: SnapDirection) {
        let turn = match direction {
            SnapDirection::Left => FRAC_PI_2,
            SnapDirection::Right => -FRAC_PI_2,
        };
        self.yaw = (self.yaw + turn).rem_euclid(TAU);
    }

    /// Camera position relative to the player.
    pub fn offset(&self) -> Vec3 {
        Quat::from_rotation_y(self.yaw) * Vec3::new(0.0, self.height, self.tracking_distance)
    }
}

fn snap_camera(
    keyboard: Res<ButtonInput<KeyCode>>,
    config: Res<TransitionConfig>,
    mut overlay: ResMut<FadeOverlay>,
    guards: Query<&TransitionGuard, With<Player>>,
) {
    let direction = if keyboard.just_pressed(KeyCode::ArrowLeft) {
        SnapDirection::Left
    } else if keyboard.just_pressed(KeyCode::ArrowRight) {
        SnapDirection::Right
    } else {
        return;
    };
    if guards.iter().any(TransitionGuard::is_moving_scenes) {
        return;
    }

    let snapped = overlay.run_during(
        move |world: &mut World| world.resource_mut::<CameraRig>().snap(direction),
        config.fade_rate(),
    );
    if let Err(e) = snapped {
        let name: &'static str = direction.into();
        debug!("camera snap {} ignored: {}", name, e);
    }
}

fn follow_player(
    rig: Res<CameraRig>,
    players: Query<&Transform, (With<Player>, Without<PlayerCamera>)>,
    mut cameras: Query<&mut Transform, With<PlayerCamera>>,
) {
    // Two players exist for a frame while a freshly loaded car still holds
    // its own copy; the camera waits until that resolves.
    let Ok(target) = players.single() else {
        return;
    };
    let focus = target.translation;
    for mut camera in &mut cameras {
        *camera = Transform::from_translation(focus + rig.offset()).looking_at(focus, Vec3::Y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fade::TRANSPARENT;
    use crate::testing::{headless_app, run_until};

    #[test]
    fn snapping_wraps_around() {
        let mut rig = CameraRig::default();
        rig.snap(SnapDirection::Right);
        assert!((rig.yaw - 3.0 * FRAC_PI_2).abs() < 1e-5);
        rig.snap(SnapDirection::Left);
        rig.snap(SnapDirection::Left);
        assert!((rig.yaw - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn arrow_key_snaps_behind_the_fade() {
        let mut app = headless_app();
        app.world_mut()
            .resource_mut::<FadeOverlay>()
            .fade_to(TRANSPARENT, 2.0)
            .unwrap();
        run_until(&mut app, |world| {
            world.resource::<FadeOverlay>().is_settled_at(TRANSPARENT)
        });

        app.world_mut()
            .resource_mut::<ButtonInput<KeyCode>>()
            .press(KeyCode::ArrowLeft);
        app.update();
        app.world_mut().resource_mut::<ButtonInput<KeyCode>>().clear();

        assert!(app.world().resource::<FadeOverlay>().is_busy());
        assert_eq!(app.world().resource::<CameraRig>().yaw, 0.0);

        run_until(&mut app, |world| {
            world.resource::<FadeOverlay>().is_settled_at(TRANSPARENT)
        });
        assert!((app.world().resource::<CameraRig>().yaw - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn camera_trails_the_player() {
        let mut app = headless_app();
        let player = app
            .world_mut()
            .spawn((Player, Transform::from_xyz(3.0, 1.0, 0.0)))
            .id();
        let camera = app
            .world_mut()
            .spawn((PlayerCamera, Transform::default()))
            .id();
        app.update();

        let rig = app.world().resource::<CameraRig>().clone();
        let focus = app.world().get::<Transform>(player).unwrap().translation;
        let at = app.world().get::<Transform>(camera).unwrap().translation;
        assert!((at - (focus + rig.offset())).length() < 1e-4);
    }
}
