// Main
mod camera;
mod cars;
mod error;
mod fade;
mod level;
mod physics;
mod player;
mod schedule;
#[cfg(test)]
mod testing;
mod transition;

use bevy::prelude::*;
use camera::CameraPlugin;
use cars::{CarDressingPlugin, CarsPlugin};
use fade::FadePlugin;
use level::LevelPlugin;
use physics::PhysicsPlugin;
use player::PlayerPlugin;
use transition::TransitionPlugin;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins((
            LevelPlugin,
            PhysicsPlugin,
            PlayerPlugin,
            CameraPlugin,
            FadePlugin,
            TransitionPlugin,
            CarsPlugin,
            CarDressingPlugin,
        ))
        .run();
}
