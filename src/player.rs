// The travelling player: keyboard locomotion, the transition guard, and the
// trigger contacts that start a car-to-car transition.
use std::collections::HashSet;

use bevy::prelude::*;

use crate::camera::{CameraRig, PlayerCamera};
use crate::level::{Door, InLevel, Persistent};
use crate::physics::{Collider, PhysicsBody, integrate_bodies};
use crate::schedule::{FrameSet, configure_frame_sets};
use crate::transition::BeginTransition;

pub struct PlayerPlugin;

impl Plugin for PlayerPlugin {
    fn build(&self, app: &mut App) {
        configure_frame_sets(app);
        app.add_message::<BeginTransition>()
            .add_systems(Update, player_movement.in_set(FrameSet::Input))
            .add_systems(
                Update,
                touch_doors
                    .after(integrate_bodies)
                    .in_set(FrameSet::Physics),
            );
    }
}

#[derive(Component)]
pub struct Player;

/// Latched while the player is moving between levels. Movement input and
/// door contacts are ignored while it is set.
#[derive(Component, Debug, Default)]
pub struct TransitionGuard {
    pub(crate) moving_scenes: bool,
}

impl TransitionGuard {
    pub fn is_moving_scenes(&self) -> bool {
        self.moving_scenes
    }
}

pub const PLAYER_RADIUS: f32 = 0.5;
const MOVE_SPEED: f32 = 4.0;
const CAMERA_START_OFFSET: Vec3 = Vec3::new(0.0, 5.0, 8.0);

/// Spawns a player and its camera owned by `level`.
pub fn spawn_player_rig(commands: &mut Commands, level: Entity, start: Vec3) -> Entity {
    let player = commands
        .spawn((
            Player,
            Name::new("Player"),
            TransitionGuard::default(),
            PhysicsBody::default(),
            Collider::sphere(PLAYER_RADIUS),
            Transform::from_translation(start),
            Persistent,
            InLevel(level),
        ))
        .id();

    commands.spawn((
        PlayerCamera,
        Name::new("Player Camera"),
        Transform::from_translation(start + CAMERA_START_OFFSET).looking_at(start, Vec3::Y),
        Persistent,
        InLevel(level),
    ));

    player
}

fn player_movement(
    keyboard: Res<ButtonInput<KeyCode>>,
    rig: Res<CameraRig>,
    mut query: Query<(&mut PhysicsBody, &TransitionGuard), With<Player>>,
) {
    // Walk relative to where the camera is looking.
    let facing = Quat::from_rotation_y(rig.yaw);
    let forward = facing * Vec3::NEG_Z;
    let right = facing * Vec3::X;

    let mut movement = Vec3::ZERO;
    if keyboard.pressed(KeyCode::KeyW) {
        movement += forward;
    }
    if keyboard.pressed(KeyCode::KeyS) {
        movement -= forward;
    }
    if keyboard.pressed(KeyCode::KeyD) {
        movement += right;
    }
    if keyboard.pressed(KeyCode::KeyA) {
        movement -= right;
    }

    for (mut body, guard) in &mut query {
        if guard.is_moving_scenes() || !body.is_simulating() {
            continue;
        }
        body.velocity = movement.normalize_or_zero() * MOVE_SPEED;
    }
}

/// Starts a transition when the player first enters an unlocked door's
/// trigger. Staying inside the trigger does not fire again.
fn touch_doors(
    mut contacts: Local<HashSet<(Entity, Entity)>>,
    players: Query<(Entity, &Transform, &Collider, &TransitionGuard), With<Player>>,
    doors: Query<(Entity, &Transform, &Collider, &Door), Without<Player>>,
    mut begin: MessageWriter<BeginTransition>,
) {
    let mut touching = HashSet::new();

    for (player, player_at, player_collider, guard) in &players {
        for (door, door_at, door_collider, door_info) in &doors {
            if !player_collider.overlaps(player_at.translation, door_collider, door_at.translation)
            {
                continue;
            }
            touching.insert((player, door));

            let entered = !contacts.contains(&(player, door));
            let armed = player_collider.is_enabled()
                && door_collider.is_enabled()
                && !guard.is_moving_scenes()
                && !door_info.is_locked();
            if entered && armed {
                begin.write(BeginTransition { player, door });
            }
        }
    }

    *contacts = touching;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Resource, Default)]
    struct Begun(Vec<BeginTransition>);

    fn collect_begun(mut begun: ResMut<Begun>, mut messages: MessageReader<BeginTransition>) {
        begun.0.extend(messages.read().copied());
    }

    fn contact_app() -> App {
        let mut app = App::new();
        app.add_message::<BeginTransition>()
            .init_resource::<Begun>()
            .add_systems(Update, (touch_doors, collect_begun).chain());
        app
    }

    fn spawn_door(app: &mut App, target: &str, at: Vec3) -> Entity {
        app.world_mut()
            .spawn((
                Door {
                    target: target.to_string(),
                },
                Collider::cuboid(Vec3::new(0.75, 1.5, 1.0)),
                Transform::from_translation(at),
            ))
            .id()
    }

    fn spawn_player(app: &mut App, at: Vec3) -> Entity {
        app.world_mut()
            .spawn((
                Player,
                TransitionGuard::default(),
                Collider::sphere(PLAYER_RADIUS),
                Transform::from_translation(at),
            ))
            .id()
    }

    #[test]
    fn entering_a_door_begins_one_transition() {
        let mut app = contact_app();
        let door = spawn_door(&mut app, "CarB", Vec3::new(9.0, 1.0, 0.0));
        let player = spawn_player(&mut app, Vec3::ZERO);

        app.update();
        assert!(app.world().resource::<Begun>().0.is_empty());

        app.world_mut().get_mut::<Transform>(player).unwrap().translation =
            Vec3::new(8.5, 1.0, 0.0);
        app.update();
        app.update();
        app.update();

        assert_eq!(
            app.world().resource::<Begun>().0,
            vec![BeginTransition { player, door }]
        );
    }

    #[test]
    fn locked_doors_and_guarded_players_do_not_trigger() {
        let mut app = contact_app();
        spawn_door(&mut app, "", Vec3::new(9.0, 1.0, 0.0));
        spawn_door(&mut app, "CarB", Vec3::new(-9.0, 1.0, 0.0));
        let player = spawn_player(&mut app, Vec3::new(8.5, 1.0, 0.0));
        app.update();

        app.world_mut()
            .get_mut::<TransitionGuard>(player)
            .unwrap()
            .moving_scenes = true;
        app.world_mut().get_mut::<Transform>(player).unwrap().translation =
            Vec3::new(-8.5, 1.0, 0.0);
        app.update();

        assert!(app.world().resource::<Begun>().0.is_empty());
    }

    #[test]
    fn movement_is_ignored_while_moving_scenes() {
        let mut app = App::new();
        app.init_resource::<ButtonInput<KeyCode>>()
            .init_resource::<CameraRig>()
            .add_systems(Update, player_movement);
        let player = app
            .world_mut()
            .spawn((Player, TransitionGuard::default(), PhysicsBody::default()))
            .id();

        app.world_mut()
            .resource_mut::<ButtonInput<KeyCode>>()
            .press(KeyCode::KeyW);
        app.update();
        let velocity = app.world().get::<PhysicsBody>(player).unwrap().velocity;
        assert!((velocity - Vec3::NEG_Z * MOVE_SPEED).length() < 1e-5);

        {
            let mut entity = app.world_mut().entity_mut(player);
            entity.get_mut::<TransitionGuard>().unwrap().moving_scenes = true;
            entity.get_mut::<PhysicsBody>().unwrap().velocity = Vec3::ZERO;
        }
        app.update();
        assert_eq!(
            app.world().get::<PhysicsBody>(player).unwrap().velocity,
            Vec3::ZERO
        );
    }
}
