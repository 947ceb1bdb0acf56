//! Joint key-frame motions used for special actions and getting up.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::load_toml_dir;
use crate::error::{ConfigError, Result};
use crate::joints::{Joint, JointRequest, JointValues};

const BUILTIN_MOTIONS: [&str; 3] = [
    include_str!("../config/keyframes/get_up_back.toml"),
    include_str!("../config/keyframes/get_up_front.toml"),
    include_str!("../config/keyframes/sit_down.toml"),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointTarget {
    pub joint: Joint,
    pub angle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Time to reach the targets from the previous frame (s)
    pub duration: f64,
    /// Overrides the motion's stiffness for this frame
    #[serde(default)]
    pub stiffness: Option<f64>,
    /// Joints without a target keep the angle of the previous frame
    #[serde(default)]
    pub targets: Vec<JointTarget>,
}

fn default_version() -> u32 {
    1
}

fn default_stiffness() -> f64 {
    0.8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeMotion {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_stiffness")]
    pub stiffness: f64,
    pub frames: Vec<Keyframe>,
}

/// The joint on the other side, or the joint itself for the head.
fn mirrored_joint(joint: Joint) -> Joint {
    use Joint::*;
    match joint {
        HeadYaw => HeadYaw,
        HeadPitch => HeadPitch,
        LShoulderPitch => RShoulderPitch,
        LShoulderRoll => RShoulderRoll,
        LElbowYaw => RElbowYaw,
        LElbowRoll => RElbowRoll,
        RShoulderPitch => LShoulderPitch,
        RShoulderRoll => LShoulderRoll,
        RElbowYaw => LElbowYaw,
        RElbowRoll => LElbowRoll,
        LHipYawPitch => RHipYawPitch,
        LHipRoll => RHipRoll,
        LHipPitch => RHipPitch,
        LKneePitch => RKneePitch,
        LAnklePitch => RAnklePitch,
        LAnkleRoll => RAnkleRoll,
        RHipYawPitch => LHipYawPitch,
        RHipRoll => LHipRoll,
        RHipPitch => LHipPitch,
        RKneePitch => LKneePitch,
        RAnklePitch => LAnklePitch,
        RAnkleRoll => LAnkleRoll,
    }
}

/// Reflects a joint target at the sagittal plane: roll and yaw axes change sign.
fn mirror_target(target: &JointTarget) -> JointTarget {
    use Joint::*;
    let joint = mirrored_joint(target.joint);
    let angle = match joint {
        HeadYaw | LShoulderRoll | RShoulderRoll | LElbowYaw | RElbowYaw | LElbowRoll
        | RElbowRoll | LHipRoll | RHipRoll | LAnkleRoll | RAnkleRoll => -target.angle,
        _ => target.angle,
    };
    JointTarget { joint, angle }
}

impl KeyframeMotion {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let motion: Self = toml::from_str(content)?;
        motion.validate()?;
        Ok(motion)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("keyframe.name", "must not be empty"));
        }
        if self.frames.is_empty() {
            return Err(ConfigError::invalid(
                format!("keyframe motion {}", self.name),
                "needs at least one frame",
            ));
        }
        let stiffness_values =
            std::iter::once(self.stiffness).chain(self.frames.iter().filter_map(|f| f.stiffness));
        for stiffness in stiffness_values {
            if !(0.0..=1.0).contains(&stiffness) {
                return Err(ConfigError::invalid(
                    format!("keyframe motion {}", self.name),
                    "stiffness must be in [0, 1]",
                ));
            }
        }
        for (i, frame) in self.frames.iter().enumerate() {
            if !(frame.duration > 0.0) {
                return Err(ConfigError::invalid(
                    format!("keyframe motion {} frame {i}", self.name),
                    "duration must be positive",
                ));
            }
            if let Some(target) = frame.targets.iter().find(|t| !t.angle.is_finite()) {
                return Err(ConfigError::invalid(
                    format!("keyframe motion {} frame {i}", self.name),
                    format!("angle of {:?} is not finite", target.joint),
                ));
            }
        }
        Ok(())
    }

    pub fn total_duration(&self) -> f64 {
        self.frames.iter().map(|frame| frame.duration).sum()
    }

    /// The same motion with left and right swapped.
    pub fn mirrored(&self) -> Self {
        let mut motion = self.clone();
        for frame in &mut motion.frames {
            frame.targets = frame.targets.iter().map(mirror_target).collect();
        }
        motion
    }
}

/// All known key-frame motions, by name.
#[derive(Debug, Clone, Default)]
pub struct KeyframeLibrary {
    motions: BTreeMap<String, KeyframeMotion>,
    directory: Option<PathBuf>,
}

impl KeyframeLibrary {
    pub fn builtin() -> Result<Self> {
        let mut library = Self::default();
        for content in BUILTIN_MOTIONS {
            library.insert(KeyframeMotion::from_toml_str(content)?)?;
        }
        Ok(library)
    }

    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut library = Self {
            motions: BTreeMap::new(),
            directory: Some(dir.to_path_buf()),
        };
        for (path, motion) in load_toml_dir::<KeyframeMotion>(dir)? {
            debug!(path = %path.display(), name = %motion.name, "loaded key-frame motion");
            library.insert(motion)?;
        }
        info!(count = library.motions.len(), dir = %dir.display(), "key-frame library loaded");
        Ok(library)
    }

    /// Re-reads the directory the library was loaded from. The library is unchanged on error.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(dir) = &self.directory {
            *self = Self::load_dir(dir.clone())?;
        }
        Ok(())
    }

    pub fn insert(&mut self, motion: KeyframeMotion) -> Result<()> {
        motion.validate()?;
        if self.motions.contains_key(&motion.name) {
            return Err(ConfigError::DuplicateMotion(motion.name));
        }
        self.motions.insert(motion.name.clone(), motion);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&KeyframeMotion> {
        self.motions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.motions.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyframeOutput {
    pub request: JointRequest,
    pub is_finished: bool,
}

#[derive(Debug, Clone)]
struct Playback {
    motion: KeyframeMotion,
    frame: usize,
    frame_time: f64,
    frame_start: JointValues,
    frame_end: JointValues,
    finished: bool,
}

/// Plays a key-frame motion, interpolating linearly from the sensed posture.
#[derive(Debug, Clone, Default)]
pub struct KeyframePlayer {
    playback: Option<Playback>,
}

impl KeyframePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, motion: &KeyframeMotion, mirror: bool, start: &JointValues) {
        let motion = if mirror {
            motion.mirrored()
        } else {
            motion.clone()
        };
        info!(motion = %motion.name, mirror, "starting key-frame motion");
        let frame_end = Self::frame_targets(&motion, 0, start);
        self.playback = Some(Playback {
            motion,
            frame: 0,
            frame_time: 0.0,
            frame_start: *start,
            frame_end,
            finished: false,
        });
    }

    pub fn stop(&mut self) {
        self.playback = None;
    }

    pub fn is_running(&self) -> bool {
        self.playback.as_ref().is_some_and(|playback| !playback.finished)
    }

    pub fn motion_name(&self) -> Option<&str> {
        self.playback.as_ref().map(|playback| playback.motion.name.as_str())
    }

    fn frame_targets(motion: &KeyframeMotion, frame: usize, previous: &JointValues) -> JointValues {
        let mut targets = *previous;
        for target in &motion.frames[frame].targets {
            targets[target.joint] = target.angle;
        }
        targets
    }

    /// Advances by `dt`; `None` when no motion was started.
    pub fn update(&mut self, dt: f64) -> Option<KeyframeOutput> {
        let playback = self.playback.as_mut()?;
        if !playback.finished {
            playback.frame_time += dt;
            while playback.frame_time >= playback.motion.frames[playback.frame].duration {
                if playback.frame + 1 == playback.motion.frames.len() {
                    debug!(motion = %playback.motion.name, "key-frame motion finished");
                    playback.finished = true;
                    break;
                }
                playback.frame_time -= playback.motion.frames[playback.frame].duration;
                playback.frame += 1;
                playback.frame_start = playback.frame_end;
                playback.frame_end =
                    Self::frame_targets(&playback.motion, playback.frame, &playback.frame_start);
            }
        }

        let frame = &playback.motion.frames[playback.frame];
        let ratio = if playback.finished {
            1.0
        } else {
            (playback.frame_time / frame.duration).clamp(0.0, 1.0)
        };
        let angles = playback.frame_start.lerp(&playback.frame_end, ratio);
        let stiffness = frame.stiffness.unwrap_or(playback.motion.stiffness);
        Some(KeyframeOutput {
            request: JointRequest::new(angles, stiffness),
            is_finished: playback.finished,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_frames() -> KeyframeMotion {
        KeyframeMotion::from_toml_str(
            r#"
            name = "wave"
            stiffness = 0.6

            [[frames]]
            duration = 1.0
            targets = [
                { joint = "l_shoulder_pitch", angle = -1.0 },
                { joint = "l_shoulder_roll", angle = 0.5 },
            ]

            [[frames]]
            duration = 0.5
            stiffness = 0.9
            targets = [{ joint = "l_shoulder_roll", angle = 0.1 }]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_library() {
        let library = KeyframeLibrary::builtin().unwrap();
        let names: Vec<_> = library.names().collect();
        assert_eq!(names, vec!["get_up_back", "get_up_front", "sit_down"]);
    }

    #[test]
    fn test_interpolates_from_start_posture() {
        let motion = two_frames();
        let mut start = JointValues::default();
        start[Joint::LShoulderPitch] = 1.0;
        start[Joint::RKneePitch] = 0.3;

        let mut player = KeyframePlayer::new();
        player.start(&motion, false, &start);

        let output = player.update(0.5).unwrap();
        assert_relative_eq!(output.request.angles[Joint::LShoulderPitch], 0.0, epsilon = 1e-12);
        assert_relative_eq!(output.request.angles[Joint::LShoulderRoll], 0.25, epsilon = 1e-12);
        // untouched joints hold
        assert_relative_eq!(output.request.angles[Joint::RKneePitch], 0.3);
        assert_relative_eq!(output.request.stiffness[Joint::LShoulderPitch], 0.6);
        assert!(!output.is_finished);

        // second frame starts from the first frame's targets
        let output = player.update(0.75).unwrap();
        assert_relative_eq!(output.request.angles[Joint::LShoulderPitch], -1.0, epsilon = 1e-12);
        assert_relative_eq!(output.request.angles[Joint::LShoulderRoll], 0.3, epsilon = 1e-12);
        assert_relative_eq!(output.request.stiffness[Joint::LShoulderRoll], 0.9);

        let output = player.update(1.0).unwrap();
        assert!(output.is_finished);
        assert_relative_eq!(output.request.angles[Joint::LShoulderRoll], 0.1, epsilon = 1e-12);
        assert!(!player.is_running());
    }

    #[test]
    fn test_mirrored_motion() {
        let mirrored = two_frames().mirrored();
        let first = &mirrored.frames[0].targets;
        assert_eq!(first[0].joint, Joint::RShoulderPitch);
        assert_relative_eq!(first[0].angle, -1.0);
        assert_eq!(first[1].joint, Joint::RShoulderRoll);
        assert_relative_eq!(first[1].angle, -0.5);
    }

    #[test]
    fn test_idle_player() {
        let mut player = KeyframePlayer::new();
        assert!(player.update(0.01).is_none());
        assert!(player.motion_name().is_none());
    }

    #[test]
    fn test_invalid_motion_rejected() {
        let err = KeyframeMotion::from_toml_str("name = \"x\"\nframes = []").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = KeyframeMotion::from_toml_str(
            "name = \"x\"\n[[frames]]\nduration = 1.0\nstiffness = 1.5\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = KeyframeMotion::from_toml_str(
            "name = \"x\"\n[[frames]]\nduration = 1.0\ntargets = [{ joint = \"tail\", angle = 0.0 }]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut library = KeyframeLibrary::default();
        library.insert(two_frames()).unwrap();
        assert!(matches!(
            library.insert(two_frames()),
            Err(ConfigError::DuplicateMotion(name)) if name == "wave"
        ));
    }
}
