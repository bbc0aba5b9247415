// The train: five cars in a row, each with a door at either end. The end cars
// have one locked door.
use bevy::prelude::*;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::camera::PlayerCamera;
use crate::fade::{FadeOverlay, TRANSPARENT};
use crate::level::{
    ActiveLevel, ActiveLevelChanged, Door, InLevel, Level, LevelBlueprint, LevelCatalog,
    LevelLoader, LevelOp, set_active_level,
};
use crate::player::Player;
use crate::schedule::{FrameSet, configure_frame_sets};
use crate::transition::{TransitionConfig, TransitionEnded};

pub struct CarsPlugin;

impl Plugin for CarsPlugin {
    fn build(&self, app: &mut App) {
        configure_frame_sets(app);
        app.insert_resource(train_catalog())
            .add_systems(Startup, open_train)
            .add_systems(
                Update,
                reveal_first_car
                    .run_if(resource_exists::<OpeningLoad>)
                    .in_set(FrameSet::Transition),
            )
            .add_systems(Update, announce_arrivals.in_set(FrameSet::Camera));
    }
}

/// Cars from back to front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum Car {
    Caboose,
    Sleeper,
    Dining,
    Lounge,
    Engine,
}

impl Car {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

const DOOR_X: f32 = 9.0;
const DOOR_Y: f32 = 1.5;
const PLAYER_START: Vec3 = Vec3::new(0.0, 1.0, 0.0);
/// Floor half extents.
const CAR_FLOOR: Vec2 = Vec2::new(10.0, 3.0);

pub fn train_catalog() -> LevelCatalog {
    let cars: Vec<Car> = Car::iter().collect();
    let mut catalog = LevelCatalog::default();
    for (i, car) in cars.iter().enumerate() {
        let behind = i.checked_sub(1).map_or("", |j| cars[j].name());
        let ahead = cars.get(i + 1).map_or("", |c| c.name());
        catalog.register(
            car.name(),
            LevelBlueprint::default()
                .with_door(behind, Vec3::new(-DOOR_X, DOOR_Y, 0.0))
                .with_door(ahead, Vec3::new(DOOR_X, DOOR_Y, 0.0))
                .with_player_start(PLAYER_START)
                .with_floor(CAR_FLOOR),
        );
    }
    catalog
}

/// Load of the car the game opens in.
#[derive(Resource)]
struct OpeningLoad(LevelOp);

fn open_train(
    mut commands: Commands,
    catalog: Res<LevelCatalog>,
    config: Res<TransitionConfig>,
    mut loader: ResMut<LevelLoader>,
) {
    for problem in catalog.validate(config.spawn_offset) {
        error!("train layout: {}", problem);
    }

    let first = Car::Caboose.name();
    match loader.load(&catalog, first) {
        Ok(op) => commands.insert_resource(OpeningLoad(op)),
        Err(e) => error!("could not open the train: {}", e),
    }
}

/// Makes the opening car active and lifts the startup mask once it is in.
fn reveal_first_car(
    mut commands: Commands,
    opening: Res<OpeningLoad>,
    loader: Res<LevelLoader>,
    config: Res<TransitionConfig>,
    mut active: ResMut<ActiveLevel>,
    mut changes: MessageWriter<ActiveLevelChanged>,
    mut overlay: ResMut<FadeOverlay>,
) {
    if !loader.is_done(opening.0) {
        return;
    }
    commands.remove_resource::<OpeningLoad>();

    let Some(level) = loader.loaded(Car::Caboose.name()) else {
        error!("opening car vanished before it could be shown");
        return;
    };
    set_active_level(&mut active, &mut changes, level);
    if let Err(e) = overlay.fade_to(TRANSPARENT, config.fade_rate()) {
        warn!("opening fade skipped: {}", e);
    }
    info!("boarded the {}", Car::Caboose.name());
}

fn announce_arrivals(
    mut ended: MessageReader<TransitionEnded>,
    players: Query<&InLevel, With<Player>>,
    levels: Query<&Level>,
) {
    for arrival in ended.read().filter(|e| e.outcome.is_ok()) {
        let car = players
            .get(arrival.player)
            .ok()
            .and_then(|owner| levels.get(owner.0).ok());
        if let Some(car) = car {
            info!("boarded the {}", car.name);
        }
    }
}

/// Meshes, lights and the render camera. Left out of headless runs.
pub struct CarDressingPlugin;

impl Plugin for CarDressingPlugin {
    fn build(&self, app: &mut App) {
        configure_frame_sets(app);
        app.insert_resource(ClearColor(Color::srgb(0.05, 0.05, 0.08)))
            .insert_resource(GlobalAmbientLight {
                color: Color::srgb(0.9, 0.85, 0.7),
                brightness: 300.0,
                affects_lightmapped_meshes: false,
            })
            .add_systems(Startup, (setup_materials, spawn_sun))
            .add_systems(
                Update,
                (dress_levels, dress_doors, dress_players, dress_camera).in_set(FrameSet::Camera),
            );
    }
}

#[derive(Resource)]
struct CarMaterials {
    floor: Handle<StandardMaterial>,
    door: Handle<StandardMaterial>,
    locked: Handle<StandardMaterial>,
    player: Handle<StandardMaterial>,
}

fn setup_materials(mut commands: Commands, mut materials: ResMut<Assets<StandardMaterial>>) {
    let mut solid = |color: Color| {
        materials.add(StandardMaterial {
            base_color: color,
            perceptual_roughness: 0.9,
            ..default()
        })
    };
    commands.insert_resource(CarMaterials {
        floor: solid(Color::srgb(0.35, 0.22, 0.15)),
        door: solid(Color::srgb(0.8, 0.65, 0.3)),
        locked: solid(Color::srgb(0.45, 0.1, 0.1)),
        player: solid(Color::srgb(0.3, 0.5, 0.8)),
    });
}

fn spawn_sun(mut commands: Commands) {
    commands.spawn((
        DirectionalLight {
            illuminance: 8_000.0,
            ..default()
        },
        Transform::from_rotation(Quat::from_euler(EulerRot::XYZ, -1.0, 0.5, 0.0)),
    ));
}

fn dress_levels(
    mut commands: Commands,
    catalog: Res<LevelCatalog>,
    materials: Res<CarMaterials>,
    mut meshes: ResMut<Assets<Mesh>>,
    levels: Query<(Entity, &Level), Added<Level>>,
) {
    for (root, level) in &levels {
        let Some(blueprint) = catalog.get(&level.name) else {
            continue;
        };
        let size = blueprint.floor * 2.0;
        commands.spawn((
            Name::new(format!("{} floor", level.name)),
            Mesh3d(meshes.add(Cuboid::new(size.x, 0.2, size.y))),
            MeshMaterial3d(materials.floor.clone()),
            Transform::from_xyz(0.0, -0.1, 0.0),
            InLevel(root),
        ));
    }
}

fn dress_doors(
    mut commands: Commands,
    materials: Res<CarMaterials>,
    mut meshes: ResMut<Assets<Mesh>>,
    doors: Query<(Entity, &Door), Added<Door>>,
) {
    for (entity, door) in &doors {
        let material = if door.is_locked() {
            materials.locked.clone()
        } else {
            materials.door.clone()
        };
        commands.entity(entity).insert((
            Mesh3d(meshes.add(Cuboid::new(0.3, 3.0, 2.0))),
            MeshMaterial3d(material),
        ));
    }
}

fn dress_players(
    mut commands: Commands,
    materials: Res<CarMaterials>,
    mut meshes: ResMut<Assets<Mesh>>,
    players: Query<Entity, Added<Player>>,
) {
    for entity in &players {
        commands.entity(entity).insert((
            Mesh3d(meshes.add(Capsule3d::new(0.4, 1.0))),
            MeshMaterial3d(materials.player.clone()),
        ));
    }
}

/// Only one player camera renders. A freshly loaded car's own camera is
/// discarded a frame later, so it never gets one.
fn dress_camera(
    mut commands: Commands,
    rendering: Query<(), With<Camera3d>>,
    cameras: Query<Entity, With<PlayerCamera>>,
) {
    if !rendering.is_empty() {
        return;
    }
    if let Some(camera) = cameras.iter().next() {
        commands.entity(camera).insert(Camera3d::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fade::OPAQUE;
    use crate::testing::{headless_app, run_until};

    #[test]
    fn the_train_is_well_formed() {
        let catalog = train_catalog();
        assert!(catalog.validate(TransitionConfig::default().spawn_offset).is_empty());
        for car in Car::iter() {
            assert!(catalog.contains(car.name()));
        }
    }

    #[test]
    fn end_cars_have_a_locked_door() {
        let catalog = train_catalog();
        let locked = |car: Car| {
            catalog
                .get(car.name())
                .unwrap()
                .doors
                .iter()
                .filter(|d| d.target.is_empty())
                .count()
        };
        assert_eq!(locked(Car::Caboose), 1);
        assert_eq!(locked(Car::Engine), 1);
        assert_eq!(locked(Car::Dining), 0);
    }

    #[test]
    fn the_opening_car_is_revealed() {
        let mut app = headless_app();
        app.add_plugins(CarsPlugin);
        assert_eq!(app.world().resource::<FadeOverlay>().alpha(), OPAQUE);

        run_until(&mut app, |world| {
            world.resource::<FadeOverlay>().is_settled_at(TRANSPARENT)
        });

        let caboose = app
            .world()
            .resource::<LevelLoader>()
            .loaded(Car::Caboose.name())
            .unwrap();
        assert_eq!(app.world().resource::<ActiveLevel>().0, Some(caboose));
        assert!(!app.world().contains_resource::<OpeningLoad>());
    }
}
