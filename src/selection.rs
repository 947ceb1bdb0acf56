//! Chooses which motion drives the joints and ramps between motions.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::request::MotionKind;

/// Time to blend into each motion (s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub walk: f64,
    pub kick: f64,
    pub stand: f64,
    pub special_action: f64,
    pub get_up: f64,
    pub fall: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            walk: 0.2,
            kick: 0.2,
            stand: 0.3,
            special_action: 0.3,
            get_up: 0.2,
            fall: 0.05,
        }
    }
}

impl SelectionConfig {
    pub fn interpolation_time(&self, kind: MotionKind) -> f64 {
        match kind {
            MotionKind::Walk => self.walk,
            MotionKind::Kick => self.kick,
            MotionKind::Stand => self.stand,
            MotionKind::SpecialAction => self.special_action,
            MotionKind::GetUp => self.get_up,
            MotionKind::Fall => self.fall,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for kind in MotionKind::ALL {
            let time = self.interpolation_time(kind);
            if !(time >= 0.0) || !time.is_finite() {
                return Err(ConfigError::invalid(
                    format!("selection.{kind:?}"),
                    "interpolation time must be a non-negative number",
                ));
            }
        }
        Ok(())
    }
}

/// Per-motion ratios of one cycle; they lie in `[0, 1]` and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSelection {
    pub target: MotionKind,
    pub ratios: [f64; MotionKind::COUNT],
}

impl MotionSelection {
    pub fn only(kind: MotionKind) -> Self {
        let mut ratios = [0.0; MotionKind::COUNT];
        ratios[kind.index()] = 1.0;
        Self {
            target: kind,
            ratios,
        }
    }

    pub fn ratio(&self, kind: MotionKind) -> f64 {
        self.ratios[kind.index()]
    }

    /// The motion with the largest share.
    pub fn dominant(&self) -> MotionKind {
        MotionKind::ALL
            .into_iter()
            .fold(self.target, |best, kind| {
                if self.ratio(kind) > self.ratio(best) {
                    kind
                } else {
                    best
                }
            })
    }

    pub fn is_transitioning(&self) -> bool {
        self.ratio(self.target) < 1.0
    }

    /// Motions with a nonzero ratio.
    pub fn active(&self) -> impl Iterator<Item = MotionKind> + '_ {
        MotionKind::ALL
            .into_iter()
            .filter(move |&kind| self.ratio(kind) > 0.0)
    }
}

pub struct MotionSelector {
    config: SelectionConfig,
    selection: MotionSelection,
}

impl MotionSelector {
    pub fn new(config: SelectionConfig, initial: MotionKind) -> Self {
        Self {
            config,
            selection: MotionSelection::only(initial),
        }
    }

    pub fn selection(&self) -> &MotionSelection {
        &self.selection
    }

    /// Switches to `requested` once the current target allows it (a fall always does) and
    /// moves the ratios towards the target.
    pub fn update(
        &mut self,
        requested: MotionKind,
        leaving_possible: bool,
        dt: f64,
    ) -> MotionSelection {
        let selection = &mut self.selection;
        if requested != selection.target && (leaving_possible || requested == MotionKind::Fall) {
            debug!(from = ?selection.target, to = ?requested, "switching motion");
            selection.target = requested;
        }

        let target = selection.target.index();
        let current = selection.ratios[target];
        if current < 1.0 {
            let time = self.config.interpolation_time(selection.target);
            let step = if time > 0.0 { dt / time } else { 1.0 };
            let next = (current + step).min(1.0);
            let scale = (1.0 - next) / (1.0 - current);
            for (i, ratio) in selection.ratios.iter_mut().enumerate() {
                *ratio = if i == target {
                    next
                } else if next >= 1.0 {
                    0.0
                } else {
                    *ratio * scale
                };
            }
        }
        *selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_normalized(selection: &MotionSelection) {
        assert_relative_eq!(selection.ratios.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(selection.ratios.iter().all(|ratio| (0.0..=1.0).contains(ratio)));
    }

    #[test]
    fn test_ramps_linearly_to_requested() {
        let mut selector = MotionSelector::new(SelectionConfig::default(), MotionKind::Stand);
        let selection = selector.update(MotionKind::Walk, true, 0.05);
        assert_eq!(selection.target, MotionKind::Walk);
        assert_relative_eq!(selection.ratio(MotionKind::Walk), 0.25, epsilon = 1e-12);
        assert_relative_eq!(selection.ratio(MotionKind::Stand), 0.75, epsilon = 1e-12);
        assert!(selection.is_transitioning());

        let mut last = selection;
        for _ in 0..3 {
            last = selector.update(MotionKind::Walk, false, 0.05);
            assert_normalized(&last);
        }
        assert_relative_eq!(last.ratio(MotionKind::Walk), 1.0);
        assert_eq!(last.ratio(MotionKind::Stand), 0.0);
        assert!(!last.is_transitioning());
    }

    #[test]
    fn test_waits_until_leaving_possible() {
        let mut selector = MotionSelector::new(SelectionConfig::default(), MotionKind::Walk);
        let selection = selector.update(MotionKind::Kick, false, 0.01);
        assert_eq!(selection.target, MotionKind::Walk);
        assert_eq!(selection.ratio(MotionKind::Walk), 1.0);

        let selection = selector.update(MotionKind::Kick, true, 0.01);
        assert_eq!(selection.target, MotionKind::Kick);
    }

    #[test]
    fn test_fall_preempts() {
        let mut selector = MotionSelector::new(SelectionConfig::default(), MotionKind::Kick);
        let selection = selector.update(MotionKind::Fall, false, 0.01);
        assert_eq!(selection.target, MotionKind::Fall);
        assert_relative_eq!(selection.ratio(MotionKind::Fall), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_three_way_blend_stays_normalized() {
        let mut selector = MotionSelector::new(SelectionConfig::default(), MotionKind::Stand);
        selector.update(MotionKind::Walk, true, 0.1);
        let selection = selector.update(MotionKind::Kick, true, 0.1);
        assert_normalized(&selection);
        assert_eq!(selection.active().count(), 3);
        assert_eq!(selection.dominant(), MotionKind::Kick);

        let mut last = selection;
        for _ in 0..5 {
            last = selector.update(MotionKind::Kick, false, 0.1);
            assert_normalized(&last);
        }
        assert_eq!(last, MotionSelection::only(MotionKind::Kick));
    }

    #[test]
    fn test_zero_interpolation_time_switches_at_once() {
        let config = SelectionConfig {
            walk: 0.0,
            ..Default::default()
        };
        let mut selector = MotionSelector::new(config, MotionKind::Stand);
        let selection = selector.update(MotionKind::Walk, true, 0.01);
        assert_eq!(selection, MotionSelection::only(MotionKind::Walk));
    }

    #[test]
    fn test_negative_time_rejected() {
        let config = SelectionConfig {
            kick: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
    }
}
