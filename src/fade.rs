// Full-screen black mask that hides level swaps and camera snaps.
use bevy::prelude::*;

use crate::error::FadeError;
use crate::level::{LevelLoader, LevelOp};
use crate::schedule::{FrameSet, configure_frame_sets};

pub struct FadePlugin;

impl Plugin for FadePlugin {
    fn build(&self, app: &mut App) {
        configure_frame_sets(app);
        app.init_resource::<FadeOverlay>()
            .add_systems(Startup, spawn_fade_mask)
            .add_systems(
                Update,
                (drive_fade, sync_fade_mask).chain().in_set(FrameSet::Fade),
            );
    }
}

pub const OPAQUE: f32 = 1.0;
pub const TRANSPARENT: f32 = 0.0;

type FadeAction = Box<dyn FnOnce(&mut World) + Send + Sync>;

enum FadeTask {
    To {
        target: f32,
        rate: f32,
    },
    /// Holds until the level operation is done, then fades to `target`.
    After {
        op: LevelOp,
        target: f32,
        rate: f32,
    },
    /// Fades in, runs the action once opaque, fades out.
    During {
        rate: f32,
        action: Option<FadeAction>,
    },
}

/// The overlay's alpha and the one fade allowed to drive it at a time.
#[derive(Resource)]
pub struct FadeOverlay {
    alpha: f32,
    task: Option<FadeTask>,
}

impl Default for FadeOverlay {
    /// Starts opaque so the first level can be revealed.
    fn default() -> Self {
        Self {
            alpha: OPAQUE,
            task: None,
        }
    }
}

impl FadeOverlay {
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn is_busy(&self) -> bool {
        self.task.is_some()
    }

    /// True once no fade is running and alpha sits exactly at `alpha`.
    pub fn is_settled_at(&self, alpha: f32) -> bool {
        self.task.is_none() && self.alpha == alpha
    }

    /// True while a fade is parked waiting on a level operation.
    #[cfg(test)]
    pub fn is_waiting_on(&self, op: LevelOp) -> bool {
        matches!(self.task, Some(FadeTask::After { op: waiting, .. }) if waiting == op)
    }

    pub fn fade_to(&mut self, target: f32, rate: f32) -> Result<(), FadeError> {
        self.start(FadeTask::To {
            target: target.clamp(TRANSPARENT, OPAQUE),
            rate,
        })
    }

    /// Makes the mask black and clear, then fades it to opaque.
    pub fn enter_transition(&mut self, rate: f32) -> Result<(), FadeError> {
        self.start(FadeTask::To {
            target: OPAQUE,
            rate,
        })?;
        self.alpha = TRANSPARENT;
        Ok(())
    }

    /// Waits for `op` to finish, then fades to transparent.
    pub fn exit_transition(&mut self, op: LevelOp, rate: f32) -> Result<(), FadeError> {
        self.start(FadeTask::After {
            op,
            target: TRANSPARENT,
            rate,
        })
    }

    /// Fades in, runs `action` on the frame the mask is fully opaque, fades out.
    pub fn run_during(
        &mut self,
        action: impl FnOnce(&mut World) + Send + Sync + 'static,
        rate: f32,
    ) -> Result<(), FadeError> {
        self.start(FadeTask::During {
            rate,
            action: Some(Box::new(action)),
        })
    }

    /// Drops whatever fade is running (and any action it had not run yet) and
    /// heads back to transparent.
    pub fn recover(&mut self, rate: f32) {
        self.task = None;
        if let Err(e) = self.fade_to(TRANSPARENT, rate) {
            warn!("fade overlay could not recover: {}", e);
            self.alpha = TRANSPARENT;
        }
    }

    fn start(&mut self, task: FadeTask) -> Result<(), FadeError> {
        if self.task.is_some() {
            return Err(FadeError::Busy);
        }
        let rate = match &task {
            FadeTask::To { rate, .. }
            | FadeTask::After { rate, .. }
            | FadeTask::During { rate, .. } => *rate,
        };
        if !rate.is_finite() || rate <= 0.0 {
            return Err(FadeError::InvalidRate(rate));
        }
        self.task = Some(task);
        Ok(())
    }

    /// Moves alpha one frame along. Returns the `run_during` action on the
    /// frame the mask becomes opaque.
    fn advance(&mut self, dt: f32, is_done: impl Fn(LevelOp) -> bool) -> Option<FadeAction> {
        let task = self.task.take()?;
        match task {
            FadeTask::To { target, rate } => {
                self.alpha = step_alpha(self.alpha, target, rate * dt);
                if self.alpha != target {
                    self.task = Some(FadeTask::To { target, rate });
                }
                None
            }
            FadeTask::After { op, target, rate } => {
                self.task = Some(if is_done(op) {
                    FadeTask::To { target, rate }
                } else {
                    FadeTask::After { op, target, rate }
                });
                None
            }
            FadeTask::During { rate, mut action } => {
                if let Some(pending) = action.take() {
                    self.alpha = step_alpha(self.alpha, OPAQUE, rate * dt);
                    if self.alpha == OPAQUE {
                        self.task = Some(FadeTask::To {
                            target: TRANSPARENT,
                            rate,
                        });
                        return Some(pending);
                    }
                    action = Some(pending);
                }
                self.task = Some(FadeTask::During { rate, action });
                None
            }
        }
    }
}

/// One monotonic step toward `target`, landing on it exactly.
fn step_alpha(alpha: f32, target: f32, delta: f32) -> f32 {
    let next = if target > alpha {
        (alpha + delta).min(target)
    } else {
        (alpha - delta).max(target)
    };
    next.clamp(TRANSPARENT, OPAQUE)
}

#[derive(Component)]
pub struct FadeMask;

fn spawn_fade_mask(mut commands: Commands, overlay: Res<FadeOverlay>) {
    commands.spawn((
        FadeMask,
        Node {
            width: Val::Percent(100.0),
            height: Val::Percent(100.0),
            position_type: PositionType::Absolute,
            ..default()
        },
        BackgroundColor(Color::srgba(0.0, 0.0, 0.0, overlay.alpha())),
        Visibility::Inherited,
        GlobalZIndex(100),
    ));
}

fn drive_fade(
    mut commands: Commands,
    time: Res<Time>,
    mut overlay: ResMut<FadeOverlay>,
    loader: Res<LevelLoader>,
) {
    if !overlay.is_busy() {
        return;
    }
    if let Some(action) = overlay.advance(time.delta_secs(), |op| loader.is_done(op)) {
        commands.queue(move |world: &mut World| action(world));
    }
}

fn sync_fade_mask(
    overlay: Res<FadeOverlay>,
    mut masks: Query<(&mut BackgroundColor, &mut Visibility), With<FadeMask>>,
) {
    for (mut background, mut visibility) in &mut masks {
        background.0 = Color::srgba(0.0, 0.0, 0.0, overlay.alpha());
        *visibility = if overlay.alpha() == TRANSPARENT {
            Visibility::Hidden
        } else {
            Visibility::Inherited
        };
    }
}
