//! Merging the geometric label with an optional ML classifier result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::gestures::GestureLabel;

pub const DEFAULT_ML_MIN_CONFIDENCE: f32 = 0.5;

/// Top category reported by the external gesture recognizer for a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlResult {
    #[serde(alias = "categoryName")]
    pub category: String,
    #[serde(alias = "score")]
    pub confidence: f32,
}

#[cfg(test)]
impl MlResult {
    pub fn new(category: &str, confidence: f32) -> Self {
        Self {
            category: category.to_string(),
            confidence,
        }
    }
}

fn ml_category_label(category: &str) -> Option<GestureLabel> {
    match category {
        "Closed_Fist" => Some(GestureLabel::Fist),
        "Open_Palm" => Some(GestureLabel::OpenPalm),
        "Pointing_Up" => Some(GestureLabel::Pointing),
        "Victory" => Some(GestureLabel::Peace),
        "Thumb_Up" => Some(GestureLabel::ThumbsUp),
        _ => None,
    }
}

/// Which labels may leave the fusion stage. Missing entries count as enabled
/// and `None` can never be disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, bool>", into = "BTreeMap<String, bool>")]
pub struct EnabledGestures(BTreeMap<GestureLabel, bool>);

impl TryFrom<BTreeMap<String, bool>> for EnabledGestures {
    type Error = String;

    fn try_from(raw: BTreeMap<String, bool>) -> Result<Self, Self::Error> {
        let mut out = Self::default();
        for (name, on) in raw {
            out.set(name.parse()?, on);
        }
        Ok(out)
    }
}

impl From<EnabledGestures> for BTreeMap<String, bool> {
    fn from(e: EnabledGestures) -> Self {
        e.0.into_iter()
            .map(|(g, on)| (g.as_str().to_string(), on))
            .collect()
    }
}

impl EnabledGestures {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self, label: GestureLabel) -> bool {
        label.is_none() || self.0.get(&label).copied().unwrap_or(true)
    }

    pub fn set(&mut self, label: GestureLabel, enabled: bool) {
        if !label.is_none() {
            self.0.insert(label, enabled);
        }
    }

    /// Flips a label and returns its new state.
    pub fn toggle(&mut self, label: GestureLabel) -> bool {
        let next = !self.is_enabled(label);
        self.set(label, next);
        self.is_enabled(label)
    }

    pub fn disabled(&self) -> Vec<GestureLabel> {
        GestureLabel::ALL
            .into_iter()
            .filter(|g| !self.is_enabled(*g))
            .collect()
    }

    pub fn filter(&self, label: GestureLabel) -> GestureLabel {
        if self.is_enabled(label) {
            label
        } else {
            GestureLabel::None
        }
    }
}

/// A confident ML category replaces the geometric label, except that the
/// geometry-only contact gestures (Snap, Pinch) always win. The result is
/// then passed through the enabled-gesture filter.
pub fn fuse(
    geometric: GestureLabel,
    ml: Option<&MlResult>,
    min_confidence: f32,
    enabled: &EnabledGestures,
) -> GestureLabel {
    let mut label = geometric;
    if let Some(ml) = ml.filter(|m| m.confidence > min_confidence) {
        if let Some(mapped) = ml_category_label(&ml.category) {
            label = mapped;
        }
        if matches!(geometric, GestureLabel::Snap | GestureLabel::Pinch) {
            label = geometric;
        }
    }
    enabled.filter(label)
}
