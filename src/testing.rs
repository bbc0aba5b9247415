// Headless app shared by the plugin tests.
use std::time::Duration;

use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;

use crate::camera::CameraPlugin;
use crate::fade::FadePlugin;
use crate::level::LevelPlugin;
use crate::physics::PhysicsPlugin;
use crate::player::PlayerPlugin;
use crate::transition::TransitionPlugin;

pub const FRAME: Duration = Duration::from_millis(100);
pub const MAX_FRAMES: usize = 500;

/// Every gameplay plugin, no window or renderer, and a fixed 100 ms frame.
pub fn headless_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .insert_resource(TimeUpdateStrategy::ManualDuration(FRAME))
        .init_resource::<ButtonInput<KeyCode>>()
        .add_plugins((
            LevelPlugin,
            PhysicsPlugin,
            PlayerPlugin,
            CameraPlugin,
            FadePlugin,
            TransitionPlugin,
        ));
    app
}

/// Updates until `done` holds, checking before each frame.
pub fn run_until(app: &mut App, done: impl Fn(&World) -> bool) {
    for _ in 0..MAX_FRAMES {
        if done(app.world()) {
            return;
        }
        app.update();
    }
    assert!(done(app.world()), "condition not met after {MAX_FRAMES} frames");
}
