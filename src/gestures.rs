//! Geometric gesture classification of a single frame pose.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::landmarks::{
    FramePose, INDEX_PIP, INDEX_TIP, MIDDLE_PIP, MIDDLE_TIP, PINKY_MCP, PINKY_PIP, PINKY_TIP,
    RING_PIP, RING_TIP, THUMB_MCP, THUMB_TIP, WRIST,
};

pub const DEFAULT_CONTACT_THRESHOLD: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GestureLabel {
    None,
    #[serde(rename = "Open_Palm")]
    OpenPalm,
    Fist,
    #[serde(rename = "Thumbs_Up")]
    ThumbsUp,
    Peace,
    Pinch,
    Pointing,
    Snap,
}

impl GestureLabel {
    pub const ALL: [GestureLabel; 8] = [
        GestureLabel::None,
        GestureLabel::OpenPalm,
        GestureLabel::Fist,
        GestureLabel::ThumbsUp,
        GestureLabel::Peace,
        GestureLabel::Pinch,
        GestureLabel::Pointing,
        GestureLabel::Snap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureLabel::None => "None",
            GestureLabel::OpenPalm => "Open_Palm",
            GestureLabel::Fist => "Fist",
            GestureLabel::ThumbsUp => "Thumbs_Up",
            GestureLabel::Peace => "Peace",
            GestureLabel::Pinch => "Pinch",
            GestureLabel::Pointing => "Pointing",
            GestureLabel::Snap => "Snap",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GestureLabel::None)
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GestureLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GestureLabel::ALL
            .iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown gesture: {s}"))
    }
}

/// Per-frame geometric measurements the classification rules run on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HandShape {
    pub snap_dist: f32,
    pub pinch_dist: f32,
    pub thumb_open: bool,
    /// index, middle, ring, pinky
    pub fingers_open: [bool; 4],
}

const FINGER_JOINTS: [(usize, usize); 4] = [
    (INDEX_TIP, INDEX_PIP),
    (MIDDLE_TIP, MIDDLE_PIP),
    (RING_TIP, RING_PIP),
    (PINKY_TIP, PINKY_PIP),
];

impl HandShape {
    pub fn measure(pose: &FramePose) -> Self {
        // a finger is open when its tip is further from the wrist than its pip joint
        let fingers_open =
            FINGER_JOINTS.map(|(tip, pip)| pose.dist(WRIST, tip) > pose.dist(WRIST, pip));
        // thumb: lateral spread away from the pinky knuckle
        let thumb_open = pose.dist(THUMB_TIP, PINKY_MCP) > pose.dist(THUMB_MCP, PINKY_MCP);

        Self {
            snap_dist: pose.dist(THUMB_TIP, MIDDLE_TIP),
            pinch_dist: pose.dist(THUMB_TIP, INDEX_TIP),
            thumb_open,
            fingers_open,
        }
    }

    pub fn open_count(&self) -> usize {
        self.fingers_open.iter().filter(|o| **o).count()
    }
}

struct Rule {
    label: GestureLabel,
    matches: fn(&HandShape, f32) -> bool,
}

/// Evaluated top to bottom, first match wins. Contact gestures come first so
/// the finger-openness heuristics can never mask them. When both contact
/// distances are equal and under the threshold neither contact rule matches.
const RULES: &[Rule] = &[
    Rule {
        label: GestureLabel::Snap,
        matches: |h, t| h.snap_dist < t && h.snap_dist < h.pinch_dist,
    },
    Rule {
        label: GestureLabel::Pinch,
        matches: |h, t| h.pinch_dist < t && h.pinch_dist < h.snap_dist,
    },
    Rule {
        label: GestureLabel::OpenPalm,
        matches: |h, _| h.thumb_open && h.open_count() == 4,
    },
    Rule {
        label: GestureLabel::Fist,
        matches: |h, _| !h.thumb_open && h.open_count() == 0,
    },
    Rule {
        label: GestureLabel::ThumbsUp,
        matches: |h, _| h.thumb_open && h.open_count() == 0,
    },
    Rule {
        label: GestureLabel::Peace,
        matches: |h, _| !h.thumb_open && h.fingers_open == [true, true, false, false],
    },
    Rule {
        label: GestureLabel::Pointing,
        matches: |h, _| !h.thumb_open && h.fingers_open == [true, false, false, false],
    },
];

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    contact_threshold: f32,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONTACT_THRESHOLD)
    }
}

impl Classifier {
    pub fn new(contact_threshold: f32) -> Self {
        Self { contact_threshold }
    }

    pub fn classify(&self, pose: &FramePose) -> GestureLabel {
        self.classify_shape(&HandShape::measure(pose))
    }

    pub fn classify_shape(&self, shape: &HandShape) -> GestureLabel {
        RULES
            .iter()
            .find(|r| (r.matches)(shape, self.contact_threshold))
            .map(|r| r.label)
            .unwrap_or(GestureLabel::None)
    }
}
