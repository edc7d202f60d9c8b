//! Ability sets ("agents") and their charge/release state machine.

use serde::Serialize;

use crate::gestures::GestureLabel;
use crate::landmarks::{FramePose, INDEX_TIP, MIDDLE_TIP, Point, THUMB_TIP};

pub const DEFAULT_FLASH_MS: u64 = 2000;

#[derive(Debug, Clone, Serialize)]
pub struct AbilitySet {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub theme_color: &'static str,
    /// Gesture that arms the ability.
    pub charge: GestureLabel,
    /// Gesture that fires an armed ability.
    pub release: GestureLabel,
}

pub const ABILITY_SETS: &[AbilitySet] = &[AbilitySet {
    id: "phoenix",
    name: "Phoenix",
    description: "Duelist. Fire abilities. Snap to spawn fireball, Open Palm to Flash.",
    theme_color: "#ff9900",
    charge: GestureLabel::Snap,
    release: GestureLabel::OpenPalm,
}];

pub fn find(id: &str) -> Option<&'static AbilitySet> {
    ABILITY_SETS.iter().find(|a| a.id == id)
}

/// Read-only view of the machine for status and debug output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AbilityState {
    pub agent_id: Option<String>,
    pub charged: bool,
    pub flash_active: bool,
}

/// Emitted when an armed ability fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Release {
    pub origin: Point,
}

#[derive(Debug)]
pub struct AbilityMachine {
    agent: Option<&'static AbilitySet>,
    charged: bool,
    flash_ms: f64,
    flash_until_ms: Option<f64>,
}

impl Default for AbilityMachine {
    fn default() -> Self {
        Self::new(DEFAULT_FLASH_MS)
    }
}

impl AbilityMachine {
    pub fn new(flash_ms: u64) -> Self {
        Self {
            agent: None,
            charged: false,
            flash_ms: flash_ms as f64,
            flash_until_ms: None,
        }
    }

    pub fn set_flash_ms(&mut self, flash_ms: u64) {
        self.flash_ms = flash_ms as f64;
    }

    /// Switches the active set; any change drops the current progress.
    /// Unknown ids behave like no selection.
    pub fn select(&mut self, agent_id: Option<&str>) {
        let next = agent_id.and_then(find);
        if next.map(|a| a.id) != self.agent.map(|a| a.id) {
            self.agent = next;
            self.charged = false;
            self.flash_until_ms = None;
        }
    }

    /// Advances on one fused per-frame label of a tracked hand.
    pub fn step(
        &mut self,
        agent_id: Option<&str>,
        label: GestureLabel,
        pose: &FramePose,
        now_ms: f64,
    ) -> Option<Release> {
        self.select(agent_id);
        self.expire_flash(now_ms);

        let Some(agent) = self.agent else {
            self.charged = false;
            return None;
        };

        if label == agent.charge && !self.charged {
            self.charged = true;
            return None;
        }

        if label == agent.release && self.charged {
            self.charged = false;
            self.flash_until_ms = Some(now_ms + self.flash_ms);
            let c = pose.centroid(&[THUMB_TIP, INDEX_TIP, MIDDLE_TIP]);
            // display is mirrored horizontally
            return Some(Release {
                origin: Point { x: 1.0 - c.x, y: c.y },
            });
        }

        None
    }

    /// Charge does not survive a tracking gap.
    pub fn hand_lost(&mut self, now_ms: f64) {
        self.charged = false;
        self.expire_flash(now_ms);
    }

    fn expire_flash(&mut self, now_ms: f64) {
        if self.flash_until_ms.is_some_and(|until| now_ms >= until) {
            self.flash_until_ms = None;
        }
    }

    pub fn reset(&mut self) {
        self.charged = false;
        self.flash_until_ms = None;
    }

    pub fn snapshot(&self) -> AbilityState {
        AbilityState {
            agent_id: self.agent.map(|a| a.id.to_string()),
            charged: self.charged,
            flash_active: self.flash_until_ms.is_some(),
        }
    }
}
