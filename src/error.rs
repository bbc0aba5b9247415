// Failure kinds for level loading, fading and car-to-car transitions.
use std::fmt;

/// Failures reported by the level loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelError {
    /// The name is not in the registered level list.
    Unregistered(String),
    /// A load was requested for a level that is loaded or already loading.
    AlreadyLoaded(String),
    /// An unload was requested for an entity that is not a loaded level.
    NotLoaded,
    /// An unload is already in flight for this level.
    UnloadPending(String),
}

impl fmt::Display for LevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelError::Unregistered(name) => write!(f, "level '{}' is not registered", name),
            LevelError::AlreadyLoaded(name) => write!(f, "level '{}' is already loaded", name),
            LevelError::NotLoaded => write!(f, "level is not loaded"),
            LevelError::UnloadPending(name) => {
                write!(f, "level '{}' is already being unloaded", name)
            }
        }
    }
}

impl std::error::Error for LevelError {}

/// Misuse of the fade overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FadeError {
    /// Another fade is still running on the overlay.
    Busy,
    /// Fade rates must be positive and finite.
    InvalidRate(f32),
}

impl fmt::Display for FadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FadeError::Busy => write!(f, "a fade is already in progress"),
            FadeError::InvalidRate(rate) => write!(f, "invalid fade rate {}", rate),
        }
    }
}

impl std::error::Error for FadeError {}

/// A door or car layout that cannot work, found before any transition runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    UnknownTarget { level: String, target: String },
    PlayerOutsideLevel,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::UnknownTarget { level, target } => write!(
                f,
                "a door in '{}' leads to unregistered level '{}'",
                level, target
            ),
            ConfigurationError::PlayerOutsideLevel => {
                write!(f, "the player does not belong to any level")
            }
        }
    }
}

/// The target level's doors do not pin down a single entry and reference door.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingError {
    NoReturnDoor { origin: String },
    AmbiguousReturnDoor { origin: String, count: usize },
    NoReferenceDoor,
    TooManyDoors { count: usize },
    DoorsTooClose { distance: f32, offset: f32 },
}

impl fmt::Display for PairingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingError::NoReturnDoor { origin } => {
                write!(f, "no door leads back to '{}'", origin)
            }
            PairingError::AmbiguousReturnDoor { origin, count } => {
                write!(f, "{} doors lead back to '{}', expected one", count, origin)
            }
            PairingError::NoReferenceDoor => write!(f, "no second door to orient the spawn"),
            PairingError::TooManyDoors { count } => {
                write!(f, "{} doors in the level, expected exactly two", count)
            }
            PairingError::DoorsTooClose { distance, offset } => write!(
                f,
                "doors are {:.2} apart, spawn offset {:.2} would not fit between them",
                distance, offset
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionError {
    Configuration(ConfigurationError),
    Pairing(PairingError),
    /// The player entity vanished while the named step was suspended.
    Race { step: &'static str },
    /// A transition is already running for this player.
    Reentrancy,
    /// The named step waited longer than the configured limit.
    Timeout { step: &'static str },
    Fade(FadeError),
    Level(LevelError),
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::Configuration(e) => write!(f, "configuration error: {}", e),
            TransitionError::Pairing(e) => write!(f, "pairing error: {}", e),
            TransitionError::Race { step } => {
                write!(f, "player was destroyed during step {}", step)
            }
            TransitionError::Reentrancy => write!(f, "a transition is already in progress"),
            TransitionError::Timeout { step } => write!(f, "step {} timed out", step),
            TransitionError::Fade(e) => write!(f, "fade error: {}", e),
            TransitionError::Level(e) => write!(f, "level error: {}", e),
        }
    }
}

impl std::error::Error for TransitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransitionError::Fade(e) => Some(e),
            TransitionError::Level(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for TransitionError {
    fn from(e: ConfigurationError) -> Self {
        TransitionError::Configuration(e)
    }
}

impl From<PairingError> for TransitionError {
    fn from(e: PairingError) -> Self {
        TransitionError::Pairing(e)
    }
}

impl From<FadeError> for TransitionError {
    fn from(e: FadeError) -> Self {
        TransitionError::Fade(e)
    }
}

impl From<LevelError> for TransitionError {
    fn from(e: LevelError) -> Self {
        TransitionError::Level(e)
    }
}
