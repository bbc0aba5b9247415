// Per-frame ordering shared by every plugin.
use bevy::prelude::*;

/// One frame runs these in order. Commands from an earlier set are applied
/// before the next set starts.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSet {
    /// Level load/unload progress and membership transfers.
    Levels,
    Input,
    /// Body integration and trigger contacts.
    Physics,
    Transition,
    Camera,
    Fade,
}

pub fn configure_frame_sets(app: &mut App) {
    app.configure_sets(
        Update,
        (
            FrameSet::Levels,
            FrameSet::Input,
            FrameSet::Physics,
            FrameSet::Transition,
            FrameSet::Camera,
            FrameSet::Fade,
        )
            .chain(),
    );
}
