use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::joints::Side;
use crate::pose::Step;

/// The motions the selector can blend between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionKind {
    Walk,
    Kick,
    #[default]
    Stand,
    SpecialAction,
    GetUp,
    Fall,
}

impl MotionKind {
    pub const COUNT: usize = 6;

    pub const ALL: [MotionKind; MotionKind::COUNT] = [
        MotionKind::Walk,
        MotionKind::Kick,
        MotionKind::Stand,
        MotionKind::SpecialAction,
        MotionKind::GetUp,
        MotionKind::Fall,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// How the walk request is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkMode {
    /// `speed` in m/s and rad/s
    #[default]
    Speed,
    /// `speed` is the size of the next step
    StepSize,
    /// Walk to `target`, relative to the robot
    Target,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KickRequest {
    pub name: String,
    pub kick_leg: Side,
}

impl KickRequest {
    pub fn new(name: impl Into<String>, kick_leg: Side) -> Self {
        Self {
            name: name.into(),
            kick_leg,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkRequest {
    pub mode: WalkMode,
    pub speed: Step,
    pub target: na::Isometry2<f64>,
    /// Kick executed by the swing leg while walking
    pub in_walk_kick: Option<KickRequest>,
}

impl Default for WalkRequest {
    fn default() -> Self {
        Self {
            mode: WalkMode::Speed,
            speed: Step::ZERO,
            target: na::Isometry2::identity(),
            in_walk_kick: None,
        }
    }
}

impl WalkRequest {
    /// A request that makes the walk generator come to a halt.
    pub fn stop() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecialActionRequest {
    pub id: String,
    /// Play the motion with left and right swapped
    pub mirror: bool,
}

/// External head control used while the active motion does not own the head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadRequest {
    pub pan: f64,
    pub tilt: f64,
    pub stiffness: f64,
}

impl Default for HeadRequest {
    fn default() -> Self {
        Self {
            pan: 0.0,
            tilt: 0.0,
            stiffness: 0.8,
        }
    }
}

/// Everything behavior asks of the motion layer for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionRequest {
    pub kind: MotionKind,
    pub walk: WalkRequest,
    pub kick: KickRequest,
    pub special_action: SpecialActionRequest,
}

impl Default for MotionRequest {
    fn default() -> Self {
        Self::stand()
    }
}

impl MotionRequest {
    fn with_kind(kind: MotionKind) -> Self {
        Self {
            kind,
            walk: WalkRequest::default(),
            kick: KickRequest::default(),
            special_action: SpecialActionRequest::default(),
        }
    }

    pub fn stand() -> Self {
        Self::with_kind(MotionKind::Stand)
    }

    pub fn walk_at(speed: Step) -> Self {
        let mut request = Self::with_kind(MotionKind::Walk);
        request.walk.speed = speed;
        request
    }

    pub fn walk_to(target: na::Isometry2<f64>) -> Self {
        let mut request = Self::with_kind(MotionKind::Walk);
        request.walk.mode = WalkMode::Target;
        request.walk.target = target;
        request
    }

    pub fn kick(name: impl Into<String>, kick_leg: Side) -> Self {
        let mut request = Self::with_kind(MotionKind::Kick);
        request.kick = KickRequest::new(name, kick_leg);
        request
    }

    pub fn special_action(id: impl Into<String>) -> Self {
        let mut request = Self::with_kind(MotionKind::SpecialAction);
        request.special_action.id = id.into();
        request
    }

    pub fn get_up() -> Self {
        Self::with_kind(MotionKind::GetUp)
    }

    pub fn fall() -> Self {
        Self::with_kind(MotionKind::Fall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_indices_match_all() {
        for (i, kind) in MotionKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_walk_to_sets_target_mode() {
        let request = MotionRequest::walk_to(na::Isometry2::new(na::Vector2::new(1.0, 0.0), 0.0));
        assert_eq!(request.kind, MotionKind::Walk);
        assert_eq!(request.walk.mode, WalkMode::Target);
        assert!(request.walk.speed.is_zero());
    }
}
