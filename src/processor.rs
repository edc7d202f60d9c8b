//! Per-frame gesture pipeline: classify, fuse, stabilize, drive abilities.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::abilities::{AbilityMachine, AbilityState, DEFAULT_FLASH_MS};
use crate::engine::EngineFrame;
use crate::fusion::{self, DEFAULT_ML_MIN_CONFIDENCE, EnabledGestures};
use crate::gestures::{Classifier, DEFAULT_CONTACT_THRESHOLD, GestureLabel, HandShape};
use crate::landmarks::{FramePose, Point};
use crate::stabilizer::{DEFAULT_COOLDOWN_MS, DEFAULT_WINDOW, Stabilizer};

const FPS_WINDOW_MS: f64 = 1000.0;

/// Tunables, read fresh on every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub confirm_frames: usize,
    pub cooldown_ms: u64,
    pub contact_threshold: f32,
    pub ml_min_confidence: f32,
    pub flash_ms: u64,
    /// Selected ability set, if any.
    pub agent: Option<String>,
    #[serde(skip)]
    pub enabled: EnabledGestures,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confirm_frames: DEFAULT_WINDOW,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            contact_threshold: DEFAULT_CONTACT_THRESHOLD,
            ml_min_confidence: DEFAULT_ML_MIN_CONFIDENCE,
            flash_ms: DEFAULT_FLASH_MS,
            agent: None,
            enabled: EnabledGestures::all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FrameEvent {
    GestureChanged { label: GestureLabel },
    AbilityReleased { origin: Point },
    Trigger { label: GestureLabel },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameEvents {
    pub timestamp_ms: f64,
    /// Frame had the same timestamp as the previous one and was ignored.
    pub skipped: bool,
    pub label: GestureLabel,
    pub events: Vec<FrameEvent>,
}

/// State dump for status queries and debug overlays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugSnapshot {
    pub label: GestureLabel,
    pub ability: AbilityState,
    pub fps: u32,
    pub hand_score: Option<f32>,
    pub shape: Option<HandShape>,
    pub history: Vec<GestureLabel>,
    pub last_trigger_ms: Option<f64>,
    pub frames: u64,
}

#[derive(Debug, Default)]
struct FpsCounter {
    window_start_ms: Option<f64>,
    count: u32,
    fps: u32,
}

impl FpsCounter {
    fn tick(&mut self, now_ms: f64) {
        let start = *self.window_start_ms.get_or_insert(now_ms);
        if now_ms - start >= FPS_WINDOW_MS {
            self.fps = self.count;
            self.count = 0;
            self.window_start_ms = Some(now_ms);
        }
        self.count += 1;
    }
}

pub struct FrameProcessor {
    classifier: Classifier,
    stabilizer: Stabilizer,
    abilities: AbilityMachine,
    last_label: GestureLabel,
    last_timestamp_ms: Option<f64>,
    last_shape: Option<HandShape>,
    hand_score: Option<f32>,
    fps: FpsCounter,
    frames: u64,
}

impl Default for FrameProcessor {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

impl FrameProcessor {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            classifier: Classifier::new(cfg.contact_threshold),
            stabilizer: Stabilizer::new(cfg.confirm_frames, cfg.cooldown_ms),
            abilities: AbilityMachine::new(cfg.flash_ms),
            last_label: GestureLabel::None,
            last_timestamp_ms: None,
            last_shape: None,
            hand_score: None,
            fps: FpsCounter::default(),
            frames: 0,
        }
    }

    /// Registers a callback for confirmed triggers of `label`.
    pub fn on_trigger(&mut self, label: GestureLabel, handler: impl FnMut() + Send + 'static) {
        self.stabilizer.on(label, handler);
    }

    pub fn process_frame(&mut self, frame: &EngineFrame, cfg: &PipelineConfig) -> FrameEvents {
        let now = frame.timestamp_ms;
        if self.last_timestamp_ms == Some(now) {
            return FrameEvents {
                timestamp_ms: now,
                skipped: true,
                label: self.last_label,
                events: Vec::new(),
            };
        }
        self.last_timestamp_ms = Some(now);
        self.frames += 1;
        self.fps.tick(now);
        self.apply_config(cfg);

        let mut events = Vec::new();

        // malformed landmark sets are treated exactly like a lost hand
        let pose = frame
            .landmarks
            .clone()
            .and_then(|pts| match FramePose::new(pts) {
                Ok(p) => Some(p),
                Err(e) => {
                    debug!("dropping malformed pose at {now:.1}ms: {e}");
                    None
                }
            });

        let label = match &pose {
            Some(pose) => {
                let shape = HandShape::measure(pose);
                let geometric = self.classifier.classify_shape(&shape);
                self.last_shape = Some(shape);
                self.hand_score = frame.handedness_score;

                let label = fusion::fuse(
                    geometric,
                    frame.gesture.as_ref(),
                    cfg.ml_min_confidence,
                    &cfg.enabled,
                );
                if let Some(release) = self.abilities.step(cfg.agent.as_deref(), label, pose, now) {
                    info!(
                        "ability released at ({:.3}, {:.3})",
                        release.origin.x, release.origin.y
                    );
                    events.push(FrameEvent::AbilityReleased {
                        origin: release.origin,
                    });
                }
                label
            }
            None => {
                self.last_shape = None;
                self.hand_score = None;
                self.abilities.select(cfg.agent.as_deref());
                self.abilities.hand_lost(now);
                GestureLabel::None
            }
        };

        if label != self.last_label {
            debug!("gesture {} -> {}", self.last_label, label);
            self.last_label = label;
            events.push(FrameEvent::GestureChanged { label });
        }

        if self.stabilizer.observe(label, now) {
            info!("trigger: {label}");
            events.push(FrameEvent::Trigger { label });
        }

        FrameEvents {
            timestamp_ms: now,
            skipped: false,
            label,
            events,
        }
    }

    fn apply_config(&mut self, cfg: &PipelineConfig) {
        self.classifier = Classifier::new(cfg.contact_threshold);
        self.stabilizer.retune(cfg.confirm_frames, cfg.cooldown_ms);
        self.abilities.set_flash_ms(cfg.flash_ms);
    }

    /// Drops all accumulated state. Pausing and resuming the frame loop
    /// never calls this.
    pub fn reset(&mut self) {
        self.stabilizer.reset();
        self.abilities.reset();
        self.last_label = GestureLabel::None;
        self.last_timestamp_ms = None;
        self.last_shape = None;
        self.hand_score = None;
    }

    pub fn snapshot(&self) -> DebugSnapshot {
        DebugSnapshot {
            label: self.last_label,
            ability: self.abilities.snapshot(),
            fps: self.fps.fps,
            hand_score: self.hand_score,
            shape: self.last_shape,
            history: self.stabilizer.history().collect(),
            last_trigger_ms: self.stabilizer.last_trigger_ms(),
            frames: self.frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::MlResult;
    use crate::landmarks::{Keypoint, fixtures};

    fn frame(t: f64, pose: Option<FramePose>) -> EngineFrame {
        EngineFrame {
            timestamp_ms: t,
            landmarks: pose.map(|p| p.points().to_vec()),
            gesture: None,
            handedness_score: Some(0.95),
        }
    }

    fn phoenix() -> PipelineConfig {
        PipelineConfig {
            agent: Some("phoenix".into()),
            ..PipelineConfig::default()
        }
    }

    fn triggers(ev: &FrameEvents) -> usize {
        ev.events
            .iter()
            .filter(|e| matches!(e, FrameEvent::Trigger { .. }))
            .count()
    }

    #[test]
    fn confirmed_gesture_triggers_after_window() {
        let cfg = PipelineConfig::default();
        let mut p = FrameProcessor::default();
        let out: Vec<_> = (0..4)
            .map(|i| p.process_frame(&frame(i as f64 * 16.0, Some(fixtures::fist())), &cfg))
            .collect();
        assert_eq!(out[0].events, vec![FrameEvent::GestureChanged {
            label: GestureLabel::Fist
        }]);
        assert_eq!(out.iter().map(triggers).collect::<Vec<_>>(), vec![0, 0, 1, 0]);
        assert_eq!(out[2].events, vec![FrameEvent::Trigger {
            label: GestureLabel::Fist
        }]);
    }

    #[test]
    fn repeated_timestamp_is_skipped() {
        let cfg = PipelineConfig {
            confirm_frames: 1,
            ..PipelineConfig::default()
        };
        let mut p = FrameProcessor::default();
        let f = frame(100.0, Some(fixtures::fist()));
        let first = p.process_frame(&f, &cfg);
        let again = p.process_frame(&f, &cfg);
        assert_eq!(triggers(&first), 1);
        assert!(again.skipped);
        assert!(again.events.is_empty());
        assert_eq!(p.snapshot().frames, 1);
    }

    #[test]
    fn lost_hand_resets_run_and_reports_change() {
        let cfg = PipelineConfig::default();
        let mut p = FrameProcessor::default();
        let seq = [
            Some(fixtures::fist()),
            Some(fixtures::fist()),
            None,
            Some(fixtures::fist()),
            Some(fixtures::fist()),
        ];
        let mut all = Vec::new();
        for (i, pose) in seq.into_iter().enumerate() {
            all.push(p.process_frame(&frame(i as f64, pose), &cfg));
        }
        assert_eq!(all.iter().map(triggers).sum::<usize>(), 0);
        assert_eq!(all[2].label, GestureLabel::None);
        assert_eq!(all[2].events, vec![FrameEvent::GestureChanged {
            label: GestureLabel::None
        }]);
    }

    #[test]
    fn malformed_pose_is_treated_as_absent() {
        let cfg = phoenix();
        let mut p = FrameProcessor::default();
        p.process_frame(&frame(0.0, Some(fixtures::snap())), &cfg);
        assert!(p.snapshot().ability.charged);

        let broken = EngineFrame {
            landmarks: Some(vec![Keypoint::new(0.5, 0.5); 5]),
            ..frame(1.0, None)
        };
        let out = p.process_frame(&broken, &cfg);
        assert_eq!(out.label, GestureLabel::None);
        assert!(!p.snapshot().ability.charged);
    }

    #[test]
    fn snap_then_palm_releases_mirrored_origin() {
        let cfg = phoenix();
        let mut p = FrameProcessor::default();
        p.process_frame(&frame(0.0, Some(fixtures::snap())), &cfg);
        let out = p.process_frame(&frame(16.0, Some(fixtures::open_palm())), &cfg);
        let released: Vec<_> = out
            .events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::AbilityReleased { origin } => Some(*origin),
                _ => None,
            })
            .collect();
        assert_eq!(released.len(), 1);
        assert!(released[0].x > 0.5, "mirrored x for a hand left of center");
        let snap = p.snapshot();
        assert!(!snap.ability.charged);
        assert!(snap.ability.flash_active);
    }

    #[test]
    fn ability_reacts_without_waiting_for_confirmation() {
        let cfg = phoenix();
        let mut p = FrameProcessor::default();
        p.process_frame(&frame(0.0, Some(fixtures::snap())), &cfg);
        assert!(p.snapshot().ability.charged);
    }

    #[test]
    fn disabled_gesture_never_reaches_abilities() {
        let mut cfg = phoenix();
        cfg.enabled.set(GestureLabel::Snap, false);
        let mut p = FrameProcessor::default();
        let out = p.process_frame(&frame(0.0, Some(fixtures::snap())), &cfg);
        assert_eq!(out.label, GestureLabel::None);
        assert!(!p.snapshot().ability.charged);
    }

    #[test]
    fn ml_label_feeds_the_stabilizer() {
        let cfg = PipelineConfig {
            confirm_frames: 1,
            ..PipelineConfig::default()
        };
        let mut p = FrameProcessor::default();
        let f = EngineFrame {
            gesture: Some(MlResult::new("Victory", 0.9)),
            ..frame(0.0, Some(fixtures::fist()))
        };
        let out = p.process_frame(&f, &cfg);
        assert_eq!(out.label, GestureLabel::Peace);
        assert_eq!(triggers(&out), 1);
    }

    #[test]
    fn reset_clears_pipeline_state() {
        let cfg = phoenix();
        let mut p = FrameProcessor::default();
        p.process_frame(&frame(0.0, Some(fixtures::snap())), &cfg);
        assert_eq!(p.snapshot().history, vec![GestureLabel::Snap]);
        p.reset();
        let snap = p.snapshot();
        assert_eq!(snap.label, GestureLabel::None);
        assert!(snap.history.is_empty());
        assert_eq!(snap.last_trigger_ms, None);
        assert!(!snap.ability.charged);
        // same timestamp is accepted again after a reset
        assert!(!p.process_frame(&frame(0.0, None), &cfg).skipped);
    }

    #[test]
    fn fps_counts_frames_per_second() {
        let cfg = PipelineConfig::default();
        let mut p = FrameProcessor::default();
        for i in 0..=60 {
            p.process_frame(&frame(i as f64 * 1000.0 / 60.0, None), &cfg);
        }
        assert_eq!(p.snapshot().fps, 60);
    }

    #[test]
    fn registered_trigger_handler_runs() {
        use std::sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        };
        let fired = Arc::new(AtomicBool::new(false));
        let f2 = fired.clone();
        let cfg = PipelineConfig {
            confirm_frames: 1,
            ..PipelineConfig::default()
        };
        let mut p = FrameProcessor::default();
        p.on_trigger(GestureLabel::Fist, move || f2.store(true, Ordering::SeqCst));
        p.process_frame(&frame(0.0, Some(fixtures::fist())), &cfg);
        assert!(fired.load(Ordering::SeqCst));
    }
}
