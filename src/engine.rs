//! Boundary to the external hand-landmark / gesture-recognition engine.
//!
//! The engine runs out of process (a browser tab, a MediaPipe script, a
//! recorded session) and streams one JSON object per video frame:
//!
//! ```json
//! {"timestamp_ms": 1532.4,
//!  "landmarks": [{"x": 0.51, "y": 0.88, "z": 0.0}, ...],
//!  "gesture": {"category": "Open_Palm", "confidence": 0.91},
//!  "handedness_score": 0.98}
//! ```
//!
//! `landmarks` and `gesture` may be null or missing when no hand is tracked.
//! `handedness_score` is optional; the presence gate only applies when it is sent.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use crate::fusion::MlResult;
use crate::landmarks::Keypoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMode {
    /// Landmarks only, no ML gesture categories.
    Landmarker,
    /// Landmarks plus the recognizer's gesture category.
    GestureRecognizer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub mode: ModelMode,
    pub min_hand_detection_confidence: f32,
    pub min_hand_presence_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            mode: ModelMode::Landmarker,
            min_hand_detection_confidence: 0.5,
            min_hand_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

/// One frame's detection result for the first tracked hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineFrame {
    pub timestamp_ms: f64,
    #[serde(default)]
    pub landmarks: Option<Vec<Keypoint>>,
    #[serde(default)]
    pub gesture: Option<MlResult>,
    /// Absent when the tracker reports no score; such hands are never gated.
    #[serde(default)]
    pub handedness_score: Option<f32>,
}

#[cfg(test)]
impl EngineFrame {
    pub fn empty(timestamp_ms: f64) -> Self {
        Self {
            timestamp_ms,
            ..Self::default()
        }
    }
}

pub trait InferenceEngine {
    fn name(&self) -> String;

    /// Next frame, or `None` once the engine has shut down.
    fn next_frame(&mut self) -> Result<Option<EngineFrame>>;

    fn reconfigure(&mut self, config: &VisionConfig);
}

/// Reads newline-delimited frames from a file, FIFO or stdin.
pub struct JsonLinesEngine<R> {
    name: String,
    reader: R,
    config: VisionConfig,
    line: String,
    line_no: usize,
}

impl JsonLinesEngine<Box<dyn BufRead + Send>> {
    /// `-` means stdin.
    pub fn open(source: &str, config: VisionConfig) -> Result<Self> {
        let reader: Box<dyn BufRead + Send> = if source == "-" {
            Box::new(BufReader::new(io::stdin()))
        } else {
            let path = Path::new(source);
            let f = File::open(path)
                .with_context(|| format!("failed to open frame source {}", path.display()))?;
            Box::new(BufReader::new(f))
        };
        info!("engine: reading frames from {source} ({:?} mode)", config.mode);
        Ok(Self::from_reader(source, reader, config))
    }
}

impl<R: BufRead> JsonLinesEngine<R> {
    pub fn from_reader(name: &str, reader: R, config: VisionConfig) -> Self {
        Self {
            name: name.to_string(),
            reader,
            config,
            line: String::new(),
            line_no: 0,
        }
    }

    /// Applies the engine-side confidence gates and mode to a decoded frame.
    fn gate(&self, mut frame: EngineFrame) -> EngineFrame {
        if self.config.mode == ModelMode::Landmarker {
            frame.gesture = None;
        }
        let below_presence = frame
            .handedness_score
            .is_some_and(|s| s < self.config.min_hand_presence_confidence);
        if frame.landmarks.is_some() && below_presence {
            debug!(
                "engine: hand score {:.2} below presence threshold",
                frame.handedness_score.unwrap_or_default()
            );
            frame.landmarks = None;
            frame.gesture = None;
        }
        frame
    }
}

impl<R: BufRead> InferenceEngine for JsonLinesEngine<R> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn next_frame(&mut self) -> Result<Option<EngineFrame>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<EngineFrame>(text) {
                Ok(frame) => return Ok(Some(self.gate(frame))),
                Err(e) => warn!("engine: skipping line {}: {e}", self.line_no),
            }
        }
    }

    fn reconfigure(&mut self, config: &VisionConfig) {
        if *config != self.config {
            info!("engine: reconfigured ({:?} mode)", config.mode);
            self.config = config.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = r#"
{"timestamp_ms": 0, "landmarks": null}
not json at all
{"timestamp_ms": 16.6, "landmarks": [{"x":0.1,"y":0.2}], "gesture": {"categoryName":"Victory","score":0.8}, "handedness_score": 0.9}

{"timestamp_ms": 33.3, "landmarks": [{"x":0.1,"y":0.2,"z":0.3}], "handedness_score": 0.2}
"#;

    fn engine(mode: ModelMode) -> JsonLinesEngine<&'static [u8]> {
        let cfg = VisionConfig {
            mode,
            ..VisionConfig::default()
        };
        JsonLinesEngine::from_reader("test", STREAM.as_bytes(), cfg)
    }

    #[test]
    fn reads_frames_and_skips_garbage() {
        let mut e = engine(ModelMode::GestureRecognizer);
        let f0 = e.next_frame().unwrap().unwrap();
        assert_eq!(f0, EngineFrame::empty(0.0));

        let f1 = e.next_frame().unwrap().unwrap();
        assert_eq!(f1.timestamp_ms, 16.6);
        assert_eq!(f1.landmarks.as_ref().map(Vec::len), Some(1));
        assert_eq!(f1.gesture, Some(MlResult::new("Victory", 0.8)));

        let f2 = e.next_frame().unwrap().unwrap();
        assert_eq!(f2.timestamp_ms, 33.3);
        assert!(f2.landmarks.is_none(), "low presence score hides the hand");

        assert!(e.next_frame().unwrap().is_none());
    }

    #[test]
    fn hand_without_score_is_kept() {
        let pts = vec![Keypoint { x: 0.5, y: 0.5, z: 0.0 }; 21];
        let line = serde_json::json!({"timestamp_ms": 1.0, "landmarks": pts}).to_string();
        let mut e = JsonLinesEngine::from_reader("test", line.as_bytes(), VisionConfig::default());
        let f = e.next_frame().unwrap().unwrap();
        assert_eq!(f.handedness_score, None);
        assert_eq!(f.landmarks.map(|l| l.len()), Some(21));
    }

    #[test]
    fn landmarker_mode_drops_ml_results() {
        let mut e = engine(ModelMode::Landmarker);
        e.next_frame().unwrap();
        let f1 = e.next_frame().unwrap().unwrap();
        assert!(f1.landmarks.is_some());
        assert!(f1.gesture.is_none());
    }

    #[test]
    fn reconfigure_switches_mode() {
        let mut e = engine(ModelMode::Landmarker);
        e.reconfigure(&VisionConfig {
            mode: ModelMode::GestureRecognizer,
            ..VisionConfig::default()
        });
        e.next_frame().unwrap();
        assert!(e.next_frame().unwrap().unwrap().gesture.is_some());
    }

    #[test]
    fn vision_config_reads_snake_case_mode() {
        let cfg: VisionConfig = toml::from_str("mode = \"gesture_recognizer\"").unwrap();
        assert_eq!(cfg.mode, ModelMode::GestureRecognizer);
        assert_eq!(cfg.min_tracking_confidence, 0.5);
    }
}
