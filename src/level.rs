// Levels ("train cars"): the registered level list, additive async loading and
// unloading, and which level owns each entity.
use std::collections::BTreeMap;

use bevy::prelude::*;

use crate::error::{ConfigurationError, LevelError, PairingError, TransitionError};
use crate::physics::Collider;
use crate::player::spawn_player_rig;
use crate::schedule::{FrameSet, configure_frame_sets};
use crate::transition::spawn_position;

pub struct LevelPlugin;

impl Plugin for LevelPlugin {
    fn build(&self, app: &mut App) {
        configure_frame_sets(app);
        app.init_resource::<LevelCatalog>()
            .init_resource::<LevelLoader>()
            .init_resource::<ActiveLevel>()
            .add_message::<ActiveLevelChanged>()
            .add_systems(
                Update,
                (advance_level_ops, apply_level_transfers)
                    .chain()
                    .in_set(FrameSet::Levels),
            );
    }
}

/// Door trigger volume, half extents.
const DOOR_TRIGGER: Vec3 = Vec3::new(0.75, 1.5, 1.0);
const DEFAULT_LATENCY_FRAMES: u32 = 2;

/// Root entity of a loaded level.
#[derive(Component, Debug)]
pub struct Level {
    pub name: String,
}

/// The doors of one level, filled in when the level is spawned.
#[derive(Component, Debug, Default)]
pub struct LevelDoors(Vec<Entity>);

impl LevelDoors {
    pub fn doors(&self) -> &[Entity] {
        &self.0
    }
}

/// A transition point. An empty target is a locked door.
#[derive(Component, Debug, Clone)]
pub struct Door {
    pub target: String,
}

impl Door {
    pub fn is_locked(&self) -> bool {
        self.target.is_empty()
    }
}

/// Level ownership. Despawning a level despawns everything in it.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
#[relationship(relationship_target = LevelMembers)]
pub struct InLevel(pub Entity);

#[derive(Component, Debug)]
#[relationship_target(relationship = InLevel, linked_spawn)]
pub struct LevelMembers(Vec<Entity>);

impl LevelMembers {
    pub fn members(&self) -> &[Entity] {
        &self.0
    }
}

/// Entities that follow the active level instead of being unloaded with it.
#[derive(Component, Debug, Default)]
pub struct Persistent;

#[derive(Debug, Clone)]
pub struct DoorBlueprint {
    pub target: String,
    pub position: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct LevelBlueprint {
    pub doors: Vec<DoorBlueprint>,
    /// Where a level-native player spawns, so the level can be played on its own.
    pub player_start: Option<Vec3>,
    /// Floor half extents on the XZ plane.
    pub floor: Vec2,
}

impl LevelBlueprint {
    pub fn with_door(mut self, target: impl Into<String>, position: Vec3) -> Self {
        self.doors.push(DoorBlueprint {
            target: target.into(),
            position,
        });
        self
    }

    pub fn with_player_start(mut self, position: Vec3) -> Self {
        self.player_start = Some(position);
        self
    }

    pub fn with_floor(mut self, half_extents: Vec2) -> Self {
        self.floor = half_extents;
        self
    }
}

/// The registered level list. Names match exactly, case included.
#[derive(Resource, Debug, Clone, Default)]
pub struct LevelCatalog {
    levels: BTreeMap<String, LevelBlueprint>,
}

impl LevelCatalog {
    pub fn register(&mut self, name: impl Into<String>, blueprint: LevelBlueprint) {
        self.levels.insert(name.into(), blueprint);
    }

    pub fn with_level(mut self, name: impl Into<String>, blueprint: LevelBlueprint) -> Self {
        self.register(name, blueprint);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LevelBlueprint> {
        self.levels.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.levels.contains_key(name)
    }

    /// Checks every unlocked door: its target must be registered and must
    /// resolve to exactly one return door plus one reference door that leave
    /// room for `spawn_offset`.
    pub fn validate(&self, spawn_offset: f32) -> Vec<TransitionError> {
        let mut problems = Vec::new();
        for (name, blueprint) in &self.levels {
            for door in blueprint.doors.iter().filter(|d| !d.target.is_empty()) {
                let Some(target) = self.levels.get(&door.target) else {
                    problems.push(
                        ConfigurationError::UnknownTarget {
                            level: name.clone(),
                            target: door.target.clone(),
                        }
                        .into(),
                    );
                    continue;
                };
                let candidates = target
                    .doors
                    .iter()
                    .enumerate()
                    .map(|(i, d)| (i, d.target.as_str(), d.position));
                let checked = resolve_pairing(candidates, name).and_then(|pair| {
                    spawn_position(pair.entry_position, pair.reference_position, 0.0, spawn_offset)
                });
                if let Err(e) = checked {
                    problems.push(e.into());
                }
            }
        }
        problems
    }
}

/// Entry and reference doors of a level, as seen from the origin level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoorPair<K> {
    pub entry: K,
    pub entry_position: Vec3,
    pub reference: K,
    pub reference_position: Vec3,
}

/// Picks the one door leading back to `origin` and the one other door of the
/// level. Anything but exactly one of each is an error.
pub fn resolve_pairing<'a, K: Copy + PartialEq>(
    doors: impl IntoIterator<Item = (K, &'a str, Vec3)>,
    origin: &str,
) -> Result<DoorPair<K>, PairingError> {
    let doors: Vec<(K, &str, Vec3)> = doors.into_iter().collect();

    let returns: Vec<_> = doors.iter().filter(|(_, t, _)| *t == origin).collect();
    let &&(entry, _, entry_position) = match returns.as_slice() {
        [] => {
            return Err(PairingError::NoReturnDoor {
                origin: origin.to_string(),
            });
        }
        [only] => only,
        many => {
            return Err(PairingError::AmbiguousReturnDoor {
                origin: origin.to_string(),
                count: many.len(),
            });
        }
    };

    let others: Vec<_> = doors.iter().filter(|(k, _, _)| *k != entry).collect();
    let &&(reference, _, reference_position) = match others.as_slice() {
        [] => return Err(PairingError::NoReferenceDoor),
        [only] => only,
        _ => return Err(PairingError::TooManyDoors { count: doors.len() }),
    };

    Ok(DoorPair {
        entry,
        entry_position,
        reference,
        reference_position,
    })
}

/// Handle to an in-flight or finished load/unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelOp(u64);

#[derive(Debug, Clone)]
enum LevelOpKind {
    Load(String),
    Unload { name: String, root: Entity },
}

#[derive(Debug)]
struct PendingOp {
    op: LevelOp,
    kind: LevelOpKind,
    frames_left: u32,
}

/// Loads and unloads levels over several frames.
#[derive(Resource, Debug)]
pub struct LevelLoader {
    /// Frames an operation takes. Never less than one, so an operation is
    /// never done in the frame it was requested.
    pub latency_frames: u32,
    next_op: u64,
    pending: Vec<PendingOp>,
    loaded: BTreeMap<String, Entity>,
}

impl Default for LevelLoader {
    fn default() -> Self {
        Self {
            latency_frames: DEFAULT_LATENCY_FRAMES,
            next_op: 0,
            pending: Vec::new(),
            loaded: BTreeMap::new(),
        }
    }
}

impl LevelLoader {
    /// Requests an additive load of a registered level.
    pub fn load(&mut self, catalog: &LevelCatalog, name: &str) -> Result<LevelOp, LevelError> {
        if !catalog.contains(name) {
            return Err(LevelError::Unregistered(name.to_string()));
        }
        let loading = self
            .pending
            .iter()
            .any(|p| matches!(&p.kind, LevelOpKind::Load(n) if n == name));
        if loading || self.loaded.contains_key(name) {
            return Err(LevelError::AlreadyLoaded(name.to_string()));
        }
        Ok(self.enqueue(LevelOpKind::Load(name.to_string())))
    }

    /// Requests the unload of a loaded level root.
    pub fn unload(&mut self, level: Entity) -> Result<LevelOp, LevelError> {
        let Some(name) = self.level_name(level).map(str::to_string) else {
            return Err(LevelError::NotLoaded);
        };
        let unloading = self
            .pending
            .iter()
            .any(|p| matches!(&p.kind, LevelOpKind::Unload { root, .. } if *root == level));
        if unloading {
            return Err(LevelError::UnloadPending(name));
        }
        Ok(self.enqueue(LevelOpKind::Unload { name, root: level }))
    }

    /// Drops an operation that has not finished. A cancelled op reads as done.
    /// Returns false if there was nothing left to cancel.
    pub fn cancel(&mut self, op: LevelOp) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.op != op);
        self.pending.len() != before
    }

    pub fn is_done(&self, op: LevelOp) -> bool {
        op.0 < self.next_op && !self.pending.iter().any(|p| p.op == op)
    }

    pub fn loaded(&self, name: &str) -> Option<Entity> {
        self.loaded.get(name).copied()
    }

    pub fn level_name(&self, level: Entity) -> Option<&str> {
        self.loaded
            .iter()
            .find(|(_, root)| **root == level)
            .map(|(name, _)| name.as_str())
    }

    fn enqueue(&mut self, kind: LevelOpKind) -> LevelOp {
        let op = LevelOp(self.next_op);
        self.next_op += 1;
        self.pending.push(PendingOp {
            op,
            kind,
            frames_left: self.latency_frames.max(1),
        });
        op
    }

    fn tick(&mut self) -> Vec<LevelOpKind> {
        let mut finished = Vec::new();
        self.pending.retain_mut(|pending| {
            pending.frames_left = pending.frames_left.saturating_sub(1);
            if pending.frames_left == 0 {
                finished.push(pending.kind.clone());
                false
            } else {
                true
            }
        });
        finished
    }
}

fn advance_level_ops(
    mut commands: Commands,
    mut loader: ResMut<LevelLoader>,
    catalog: Res<LevelCatalog>,
) {
    for finished in loader.tick() {
        match finished {
            LevelOpKind::Load(name) => {
                let Some(blueprint) = catalog.get(&name) else {
                    warn!("level '{}' was unregistered while loading", name);
                    continue;
                };
                let root = spawn_level(&mut commands, &name, blueprint);
                debug!("loaded level '{}'", name);
                loader.loaded.insert(name, root);
            }
            LevelOpKind::Unload { name, root } => {
                commands.entity(root).try_despawn();
                loader.loaded.remove(&name);
                debug!("unloaded level '{}'", name);
            }
        }
    }
}

fn spawn_level(commands: &mut Commands, name: &str, blueprint: &LevelBlueprint) -> Entity {
    let root = commands
        .spawn((
            Level {
                name: name.to_string(),
            },
            Name::new(name.to_string()),
        ))
        .id();

    let doors = blueprint
        .doors
        .iter()
        .map(|door| {
            commands
                .spawn((
                    Door {
                        target: door.target.clone(),
                    },
                    Collider::cuboid(DOOR_TRIGGER),
                    Transform::from_translation(door.position),
                    InLevel(root),
                ))
                .id()
        })
        .collect();
    commands.entity(root).insert(LevelDoors(doors));

    if let Some(start) = blueprint.player_start {
        spawn_player_rig(commands, root, start);
    }
    root
}

/// The level whose context new activity belongs to.
#[derive(Resource, Debug, Default)]
pub struct ActiveLevel(pub Option<Entity>);

#[derive(Message, Debug, Clone, Copy)]
pub struct ActiveLevelChanged {
    pub old: Option<Entity>,
    pub new: Entity,
}

pub fn set_active_level(
    active: &mut ActiveLevel,
    changes: &mut MessageWriter<ActiveLevelChanged>,
    level: Entity,
) {
    let old = active.0.replace(level);
    if old != Some(level) {
        changes.write(ActiveLevelChanged { old, new: level });
    }
}

/// What happens to a persistent entity when the active level changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelTransfer {
    /// Travels from the old level into the new one.
    Moved,
    /// The new level's own copy, superseded by the travelling one.
    Destroyed,
    Untouched,
}

pub fn level_transfer(owner: Entity, old: Option<Entity>, new: Entity) -> LevelTransfer {
    let Some(old) = old else {
        return LevelTransfer::Untouched;
    };
    if old == new {
        LevelTransfer::Untouched
    } else if owner == old {
        LevelTransfer::Moved
    } else if owner == new {
        LevelTransfer::Destroyed
    } else {
        LevelTransfer::Untouched
    }
}

fn apply_level_transfers(
    mut commands: Commands,
    mut changes: MessageReader<ActiveLevelChanged>,
    persistent: Query<(Entity, &InLevel), With<Persistent>>,
) {
    for change in changes.read() {
        for (entity, in_level) in &persistent {
            match level_transfer(in_level.0, change.old, change.new) {
                LevelTransfer::Moved => {
                    commands.entity(entity).insert(InLevel(change.new));
                }
                LevelTransfer::Destroyed => {
                    commands.entity(entity).try_despawn();
                }
                LevelTransfer::Untouched => {}
            }
        }
    }
}
