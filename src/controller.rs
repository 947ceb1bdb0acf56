use std::sync::Arc;

use nalgebra as na;
use tracing::{debug, info};

use crate::biped::{JointLimits, SensorData};
use crate::combinator::{Combinator, MotionInfo};
use crate::config::MotionConfig;
use crate::engines::{
    FallEngine, GetUpEngine, MotionEngine, MotionInput, MotionOutput, SpecialActionEngine,
    StandEngine, WalkEngine,
};
use crate::error::Result;
use crate::joints::JointRequest;
use crate::keyframe::KeyframeLibrary;
use crate::kick::{KickEngine, KickLibrary};
use crate::pose::Odometry;
use crate::request::{HeadRequest, MotionKind, MotionRequest};
use crate::selection::{MotionSelection, MotionSelector};
use crate::walk::WalkGenerator;

/// Everything the motion layer produces in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionCycle {
    pub joint_request: JointRequest,
    pub odometry: Odometry,
    /// Displacement still to come from the running step or motion
    pub upcoming_odometry_offset: na::Isometry2<f64>,
    pub info: MotionInfo,
}

/// The complete motion pipeline: selection, engines and combination.
///
/// Built once at startup and updated once per control cycle.
pub struct MotionControl {
    selector: MotionSelector,
    walk: WalkEngine,
    kick: KickEngine,
    stand: StandEngine,
    special_action: SpecialActionEngine,
    get_up: GetUpEngine,
    fall: FallEngine,
    combinator: Combinator,
    /// Selection of the last cycle, to detect engines that became active
    previous: MotionSelection,
    leaving_possible: bool,
    time: f64,
}

impl MotionControl {
    pub fn new(
        config: MotionConfig,
        kicks: Arc<KickLibrary>,
        keyframes: Arc<KeyframeLibrary>,
    ) -> Result<Self> {
        config.validate()?;
        let limits = JointLimits::default();
        let dims = config.dimensions;

        let walk = WalkEngine::new(
            WalkGenerator::new(config.walk, dims.clone(), limits.clone()),
            Arc::clone(&kicks),
        );
        let kick = KickEngine::new(kicks, config.kick, dims.clone(), limits.clone(), config.masses);
        let stand = StandEngine::new(config.stand, &dims);
        let special_action = SpecialActionEngine::new(Arc::clone(&keyframes));
        let get_up = GetUpEngine::new(config.get_up, keyframes)?;
        let fall = FallEngine::new(config.fall);

        let initial = MotionKind::Stand;
        Ok(Self {
            selector: MotionSelector::new(config.selection, initial),
            walk,
            kick,
            stand,
            special_action,
            get_up,
            fall,
            combinator: Combinator::new(config.combinator, limits),
            // nothing ran yet, so the initial motion is reset in the first cycle
            previous: MotionSelection {
                target: initial,
                ratios: [0.0; MotionKind::COUNT],
            },
            leaving_possible: true,
            time: 0.0,
        })
    }

    /// Loads the motion libraries named in `config`, falling back to the built-in ones.
    pub fn from_config(config: MotionConfig) -> Result<Self> {
        let kicks = match &config.kick.directory {
            Some(dir) => KickLibrary::load_dir(dir)?,
            None => KickLibrary::builtin()?,
        };
        let keyframes = match &config.keyframe_directory {
            Some(dir) => KeyframeLibrary::load_dir(dir)?,
            None => KeyframeLibrary::builtin()?,
        };
        info!(
            kicks = ?kicks.names().collect::<Vec<_>>(),
            keyframes = ?keyframes.names().collect::<Vec<_>>(),
            "motion libraries ready"
        );
        Self::new(config, Arc::new(kicks), Arc::new(keyframes))
    }

    /// Swaps in reloaded kick definitions; running kicks keep their copy.
    pub fn set_kicks(&mut self, kicks: Arc<KickLibrary>) {
        self.walk.set_kicks(Arc::clone(&kicks));
        self.kick.set_library(kicks);
    }

    pub fn set_keyframes(&mut self, keyframes: Arc<KeyframeLibrary>) {
        self.special_action.set_library(keyframes);
    }

    pub fn walk_engine(&self) -> &WalkEngine {
        &self.walk
    }

    pub fn selection(&self) -> &MotionSelection {
        &self.previous
    }

    pub fn odometry_mut(&mut self) -> &mut Odometry {
        self.combinator.odometry_mut()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    fn engine_mut(&mut self, kind: MotionKind) -> &mut dyn MotionEngine {
        match kind {
            MotionKind::Walk => &mut self.walk,
            MotionKind::Kick => &mut self.kick,
            MotionKind::Stand => &mut self.stand,
            MotionKind::SpecialAction => &mut self.special_action,
            MotionKind::GetUp => &mut self.get_up,
            MotionKind::Fall => &mut self.fall,
        }
    }

    /// Runs one control cycle.
    pub fn update(
        &mut self,
        sensors: &SensorData,
        request: &MotionRequest,
        head_request: &HeadRequest,
        dt: f64,
    ) -> MotionCycle {
        let selection = self.selector.update(request.kind, self.leaving_possible, dt);
        if selection.target != self.previous.target {
            info!(from = ?self.previous.target, to = ?selection.target, "motion switch");
        }

        let input = MotionInput {
            sensors,
            request,
            dt,
        };
        let mut outputs: [Option<MotionOutput>; MotionKind::COUNT] = Default::default();
        for kind in selection.active() {
            let newly_active = self.previous.ratio(kind) == 0.0;
            let engine = self.engine_mut(kind);
            debug_assert_eq!(engine.kind(), kind);
            if newly_active {
                debug!(?kind, "resetting engine");
                engine.reset(sensors);
            }
            outputs[kind.index()] = Some(engine.update(&input));
        }

        self.leaving_possible = outputs[selection.target.index()]
            .as_ref()
            .map_or(true, |output| output.is_leaving_possible);

        let combined =
            self.combinator
                .combine(&selection, &outputs, request, head_request, sensors, dt);
        self.previous = selection;
        self.time += dt;

        MotionCycle {
            joint_request: combined.request,
            odometry: *self.combinator.odometry(),
            upcoming_odometry_offset: combined.upcoming_offset,
            info: self.combinator.info().clone(),
        }
    }
}
