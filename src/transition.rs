// Moves the player through a door into the adjoining car: fade out, load the
// next car, hand the player over, place it by the matching door, unload the old
// car, fade back in.
use bevy::prelude::*;
use strum::IntoStaticStr;

use crate::error::{ConfigurationError, PairingError, TransitionError};
use crate::fade::{FadeOverlay, OPAQUE};
use crate::level::{
    ActiveLevel, ActiveLevelChanged, Door, InLevel, Level, LevelCatalog, LevelDoors, LevelLoader,
    LevelMembers, LevelOp, Persistent, resolve_pairing, set_active_level,
};
use crate::physics::{Collider, PhysicsBody};
use crate::player::{Player, TransitionGuard};
use crate::schedule::{FrameSet, configure_frame_sets};

pub struct TransitionPlugin;

impl Plugin for TransitionPlugin {
    fn build(&self, app: &mut App) {
        configure_frame_sets(app);
        app.init_resource::<TransitionConfig>()
            .add_message::<BeginTransition>()
            .add_message::<TransitionEnded>()
            .add_systems(
                Update,
                (begin_transitions, drive_transition)
                    .chain()
                    .in_set(FrameSet::Transition),
            );
    }
}

const MIN_FADE_SECONDS: f32 = 0.5;
const MAX_FADE_SECONDS: f32 = 3.0;

#[derive(Resource, Debug, Clone)]
pub struct TransitionConfig {
    /// Distance from the entry door toward the reference door where the
    /// player lands.
    pub spawn_offset: f32,
    /// Length of one fade, clamped to [0.5, 3.0] seconds.
    pub fade_seconds: f32,
    /// Longest any single step may wait before the transition is abandoned.
    pub step_timeout: f32,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            spawn_offset: 2.25,
            fade_seconds: 1.0,
            step_timeout: 10.0,
        }
    }
}

impl TransitionConfig {
    pub fn fade_rate(&self) -> f32 {
        1.0 / self.fade_seconds.clamp(MIN_FADE_SECONDS, MAX_FADE_SECONDS)
    }
}

/// Asks for `player` to go through `door`.
#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginTransition {
    pub player: Entity,
    pub door: Entity,
}

/// Outcome of a transition attempt, including refused ones.
#[derive(Message, Debug, Clone)]
pub struct TransitionEnded {
    pub player: Entity,
    pub outcome: Result<(), TransitionError>,
}

/// Where a running transition is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum TransitionStep {
    FadingOut,
    Loading(LevelOp),
    AwaitingMembership(Entity),
    Unloading(LevelOp),
}

impl TransitionStep {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// The one transition in flight.
#[derive(Resource, Debug)]
pub struct TransitionSession {
    pub player: Entity,
    pub door: Entity,
    pub origin: Entity,
    pub origin_name: String,
    pub target_name: String,
    /// Where the player stood when it touched the door.
    pub start: Vec3,
    pub step: TransitionStep,
    /// Seconds spent in the current step.
    pub waited: f32,
}

/// Spawn point `offset` along the XZ line from `entry` toward `reference`, at
/// the player's own `height`. The doors must be further apart than `offset`.
pub fn spawn_position(
    entry: Vec3,
    reference: Vec3,
    height: f32,
    offset: f32,
) -> Result<Vec3, PairingError> {
    let planar = Vec2::new(reference.x - entry.x, reference.z - entry.z);
    let distance = planar.length();
    if distance <= offset {
        return Err(PairingError::DoorsTooClose { distance, offset });
    }
    let step = planar / distance * offset;
    Ok(Vec3::new(entry.x + step.x, height, entry.z + step.y))
}

fn begin_transitions(
    mut commands: Commands,
    mut requests: MessageReader<BeginTransition>,
    session: Option<Res<TransitionSession>>,
    config: Res<TransitionConfig>,
    catalog: Res<LevelCatalog>,
    mut overlay: ResMut<FadeOverlay>,
    mut players: Query<
        (
            &mut TransitionGuard,
            &mut PhysicsBody,
            &mut Collider,
            &Transform,
            Option<&InLevel>,
        ),
        With<Player>,
    >,
    mut doors: Query<(&Door, &mut Collider), Without<Player>>,
    levels: Query<&Level>,
    mut ended: MessageWriter<TransitionEnded>,
) {
    let mut in_flight = session.is_some();

    for request in requests.read() {
        let Ok((mut guard, mut body, mut collider, at, membership)) =
            players.get_mut(request.player)
        else {
            warn!("transition requested for missing player {}", request.player);
            continue;
        };
        if guard.is_moving_scenes() || in_flight {
            debug!("ignoring door contact: {}", TransitionError::Reentrancy);
            ended.write(TransitionEnded {
                player: request.player,
                outcome: Err(TransitionError::Reentrancy),
            });
            continue;
        }
        let Ok((door, mut door_collider)) = doors.get_mut(request.door) else {
            warn!("transition requested through missing door {}", request.door);
            continue;
        };
        if door.is_locked() {
            debug!("door {} is locked", request.door);
            continue;
        }

        let origin = membership.and_then(|m| levels.get(m.0).ok().map(|level| (m.0, level)));
        let Some((origin, origin_level)) = origin else {
            refuse(&mut ended, request.player, ConfigurationError::PlayerOutsideLevel.into());
            continue;
        };
        if !catalog.contains(&door.target) {
            let err = ConfigurationError::UnknownTarget {
                level: origin_level.name.clone(),
                target: door.target.clone(),
            };
            refuse(&mut ended, request.player, err.into());
            continue;
        }
        if let Err(e) = overlay.enter_transition(config.fade_rate()) {
            refuse(&mut ended, request.player, e.into());
            continue;
        }

        door_collider.set_enabled(false);
        collider.set_enabled(false);
        body.set_simulating(false);
        guard.moving_scenes = true;
        in_flight = true;

        debug!(
            "transition {} -> {} started",
            origin_level.name, door.target
        );
        commands.insert_resource(TransitionSession {
            player: request.player,
            door: request.door,
            origin,
            origin_name: origin_level.name.clone(),
            target_name: door.target.clone(),
            start: at.translation,
            step: TransitionStep::FadingOut,
            waited: 0.0,
        });
    }
}

/// Refusals happen before anything was changed, so there is nothing to undo.
fn refuse(ended: &mut MessageWriter<TransitionEnded>, player: Entity, err: TransitionError) {
    warn!("transition refused: {}", err);
    ended.write(TransitionEnded {
        player,
        outcome: Err(err),
    });
}

enum Progress {
    Waiting,
    Next(TransitionStep),
    Finished,
}

fn drive_transition(
    mut commands: Commands,
    time: Res<Time>,
    config: Res<TransitionConfig>,
    catalog: Res<LevelCatalog>,
    session: Option<ResMut<TransitionSession>>,
    mut loader: ResMut<LevelLoader>,
    mut active: ResMut<ActiveLevel>,
    mut changes: MessageWriter<ActiveLevelChanged>,
    mut overlay: ResMut<FadeOverlay>,
    mut players: Query<
        (
            &mut Transform,
            Option<&InLevel>,
            &mut TransitionGuard,
            &mut PhysicsBody,
            &mut Collider,
        ),
        With<Player>,
    >,
    mut doors: Query<(&Door, &Transform, &mut Collider), Without<Player>>,
    registries: Query<&LevelDoors>,
    members: Query<&LevelMembers>,
    persistent: Query<(), With<Persistent>>,
    mut ended: MessageWriter<TransitionEnded>,
) {
    let Some(mut session) = session else {
        return;
    };
    session.waited += time.delta_secs();
    let step = session.step;

    let progress = match players.get_mut(session.player) {
        Err(_) => Err(TransitionError::Race { step: step.name() }),
        Ok((mut transform, membership, ..)) => match step {
            TransitionStep::FadingOut => {
                if overlay.is_settled_at(OPAQUE) {
                    loader
                        .load(&catalog, &session.target_name)
                        .map(|op| Progress::Next(TransitionStep::Loading(op)))
                        .map_err(TransitionError::from)
                } else {
                    Ok(Progress::Waiting)
                }
            }
            TransitionStep::Loading(op) => {
                if loader.is_done(op) {
                    match loader.loaded(&session.target_name) {
                        Some(level) => {
                            set_active_level(&mut active, &mut changes, level);
                            Ok(Progress::Next(TransitionStep::AwaitingMembership(level)))
                        }
                        None => Err(crate::error::LevelError::NotLoaded.into()),
                    }
                } else {
                    Ok(Progress::Waiting)
                }
            }
            TransitionStep::AwaitingMembership(level) => {
                if membership.map(|m| m.0) == Some(level) {
                    place_player(&session, level, &mut transform, &config, &registries, &doors)
                        .and_then(|()| {
                            let op = loader.unload(session.origin)?;
                            if let Err(e) = overlay.exit_transition(op, config.fade_rate()) {
                                loader.cancel(op);
                                return Err(e.into());
                            }
                            Ok(Progress::Next(TransitionStep::Unloading(op)))
                        })
                } else {
                    Ok(Progress::Waiting)
                }
            }
            TransitionStep::Unloading(op) => {
                if loader.is_done(op) {
                    Ok(Progress::Finished)
                } else {
                    Ok(Progress::Waiting)
                }
            }
        },
    };

    let progress = match progress {
        Ok(Progress::Waiting) if session.waited > config.step_timeout => {
            Err(TransitionError::Timeout { step: step.name() })
        }
        other => other,
    };

    match progress {
        Ok(Progress::Waiting) => {}
        Ok(Progress::Next(next)) => {
            debug!(
                "transition {} -> {}: {} -> {}",
                session.origin_name,
                session.target_name,
                step.name(),
                next.name()
            );
            session.step = next;
            session.waited = 0.0;
        }
        Ok(Progress::Finished) => {
            if let Ok((_, _, mut guard, mut body, mut collider)) = players.get_mut(session.player)
            {
                collider.set_enabled(true);
                body.set_simulating(true);
                guard.moving_scenes = false;
            }
            info!(
                "moved from {} to {}",
                session.origin_name, session.target_name
            );
            commands.remove_resource::<TransitionSession>();
            ended.write(TransitionEnded {
                player: session.player,
                outcome: Ok(()),
            });
        }
        Err(err) => {
            error!(
                "transition {} -> {} abandoned: {}",
                session.origin_name, session.target_name, err
            );
            // Undo the level work of the step that failed. Once the origin is
            // being unloaded the move has effectively happened, so keep it.
            let rolled_back = match step {
                TransitionStep::FadingOut | TransitionStep::Unloading(_) => false,
                TransitionStep::Loading(op) => {
                    loader.cancel(op);
                    false
                }
                TransitionStep::AwaitingMembership(level) => {
                    // Handed straight back rather than through a change message,
                    // which would treat the returning player as a native copy.
                    if let Ok(owned) = members.get(level) {
                        for &entity in owned.members() {
                            if persistent.contains(entity) {
                                commands.entity(entity).insert(InLevel(session.origin));
                            }
                        }
                    }
                    active.0 = Some(session.origin);
                    if let Err(e) = loader.unload(level) {
                        warn!("could not unload {}: {}", session.target_name, e);
                    }
                    true
                }
            };

            // The player may already be gone; only touch what still exists.
            if let Ok((mut transform, _, mut guard, mut body, mut collider)) =
                players.get_mut(session.player)
            {
                if rolled_back {
                    transform.translation = session.start;
                }
                collider.set_enabled(true);
                body.set_simulating(true);
                guard.moving_scenes = false;
            }
            if let Ok((_, _, mut door_collider)) = doors.get_mut(session.door) {
                door_collider.set_enabled(true);
            }
            overlay.recover(config.fade_rate());
            commands.remove_resource::<TransitionSession>();
            ended.write(TransitionEnded {
                player: session.player,
                outcome: Err(err),
            });
        }
    }
}

/// Finds the entry and reference doors in the new level and puts the player
/// between them, keeping its height.
fn place_player(
    session: &TransitionSession,
    level: Entity,
    transform: &mut Transform,
    config: &TransitionConfig,
    registries: &Query<&LevelDoors>,
    doors: &Query<(&Door, &Transform, &mut Collider), Without<Player>>,
) -> Result<(), TransitionError> {
    let registry = registries
        .get(level)
        .map_err(|_| TransitionError::Race {
            step: TransitionStep::AwaitingMembership(level).name(),
        })?;
    let candidates = registry.doors().iter().filter_map(|&entity| {
        doors
            .get(entity)
            .ok()
            .map(|(door, at, _)| (entity, door.target.as_str(), at.translation))
    });
    let pair = resolve_pairing(candidates, &session.origin_name)?;
    transform.translation = spawn_position(
        pair.entry_position,
        pair.reference_position,
        transform.translation.y,
        config.spawn_offset,
    )?;
    Ok(())
}
