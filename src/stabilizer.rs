//! Debounce + cooldown for per-frame gesture labels.
//!
//! A label only counts once it has been seen for `window` consecutive frames,
//! and a confirmed label fires at most once per `cooldown_ms`.

use std::collections::{HashMap, VecDeque};

use crate::gestures::GestureLabel;

pub const DEFAULT_WINDOW: usize = 3;
pub const DEFAULT_COOLDOWN_MS: u64 = 1000;

type Handler = Box<dyn FnMut() + Send>;

pub struct Stabilizer {
    window: usize,
    cooldown_ms: f64,
    history: VecDeque<GestureLabel>,
    last_trigger_ms: Option<f64>,
    handlers: HashMap<GestureLabel, Handler>,
}

impl std::fmt::Debug for Stabilizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stabilizer")
            .field("window", &self.window)
            .field("cooldown_ms", &self.cooldown_ms)
            .field("history", &self.history)
            .field("last_trigger_ms", &self.last_trigger_ms)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_COOLDOWN_MS)
    }
}

impl Stabilizer {
    pub fn new(window: usize, cooldown_ms: u64) -> Self {
        let window = window.max(1);
        Self {
            window,
            cooldown_ms: cooldown_ms as f64,
            history: VecDeque::with_capacity(window),
            last_trigger_ms: None,
            handlers: HashMap::new(),
        }
    }

    /// Registers the callback run when `label` triggers. Replaces any
    /// previous handler for the same label.
    pub fn on(&mut self, label: GestureLabel, handler: impl FnMut() + Send + 'static) {
        self.handlers.insert(label, Box::new(handler));
    }

    /// Changes window/cooldown in place, keeping history that still fits.
    pub fn retune(&mut self, window: usize, cooldown_ms: u64) {
        self.window = window.max(1);
        self.cooldown_ms = cooldown_ms as f64;
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    pub fn observe(&mut self, label: GestureLabel, now_ms: f64) -> bool {
        if label.is_none() {
            self.history.clear();
            return false;
        }

        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(label);

        let confirmed =
            self.history.len() == self.window && self.history.iter().all(|g| *g == label);
        if !confirmed {
            return false;
        }

        let cooled = self
            .last_trigger_ms
            .is_none_or(|last| now_ms - last > self.cooldown_ms);
        if !cooled {
            return false;
        }

        if let Some(handler) = self.handlers.get_mut(&label) {
            handler();
        }
        self.last_trigger_ms = Some(now_ms);
        true
    }

    pub fn history(&self) -> impl Iterator<Item = GestureLabel> + '_ {
        self.history.iter().copied()
    }

    pub fn last_trigger_ms(&self) -> Option<f64> {
        self.last_trigger_ms
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_trigger_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use crate::gestures::GestureLabel::{Fist, None as NoGesture, Peace};

    fn run(st: &mut Stabilizer, frames: &[(GestureLabel, f64)]) -> Vec<bool> {
        frames.iter().map(|(g, t)| st.observe(*g, *t)).collect()
    }

    #[test]
    fn three_identical_frames_trigger_once_then_cool_down() {
        let mut st = Stabilizer::default();
        let out = run(
            &mut st,
            &[(Fist, 0.0), (Fist, 16.0), (Fist, 33.0), (Fist, 50.0), (Fist, 900.0)],
        );
        assert_eq!(out, vec![false, false, true, false, false]);
        assert!(st.observe(Fist, 1034.0));
    }

    #[test]
    fn cooldown_boundary_is_exclusive() {
        let mut st = Stabilizer::default();
        run(&mut st, &[(Fist, 0.0), (Fist, 10.0), (Fist, 20.0)]);
        assert!(!st.observe(Fist, 1020.0));
        assert!(st.observe(Fist, 1020.5));
    }

    #[test]
    fn none_frame_resets_the_run() {
        let mut st = Stabilizer::default();
        let out = run(
            &mut st,
            &[(Fist, 0.0), (Fist, 1.0), (NoGesture, 2.0), (Fist, 3.0), (Fist, 4.0)],
        );
        assert!(out.iter().all(|t| !t));
        assert_eq!(st.history().count(), 2);
    }

    #[test]
    fn mixed_labels_do_not_confirm() {
        let mut st = Stabilizer::default();
        let out = run(
            &mut st,
            &[(Fist, 0.0), (Peace, 1.0), (Fist, 2.0), (Fist, 3.0), (Fist, 4.0)],
        );
        assert_eq!(out, vec![false, false, false, false, true]);
    }

    #[test]
    fn history_is_bounded_and_never_holds_none() {
        let mut st = Stabilizer::new(4, 1000);
        for (i, g) in [Fist, Peace, NoGesture, Peace, Fist, Fist, Fist, Fist, Fist]
            .into_iter()
            .enumerate()
        {
            st.observe(g, i as f64);
            assert!(st.history().count() <= 4);
            assert!(st.history().all(|h| !h.is_none()));
        }
    }

    #[test]
    fn handler_runs_on_trigger_and_missing_handler_is_silent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut st = Stabilizer::default();
        let h = hits.clone();
        st.on(Fist, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        run(&mut st, &[(Fist, 0.0), (Fist, 1.0), (Fist, 2.0)]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // no handler for Peace: still reports the trigger
        let out = run(&mut st, &[(Peace, 2000.0), (Peace, 2001.0), (Peace, 2002.0)]);
        assert_eq!(out, vec![false, false, true]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_forgets_cooldown() {
        let mut st = Stabilizer::default();
        run(&mut st, &[(Fist, 0.0), (Fist, 1.0), (Fist, 2.0)]);
        st.reset();
        assert_eq!(st.last_trigger_ms(), Option::None);
        let out = run(&mut st, &[(Fist, 3.0), (Fist, 4.0), (Fist, 5.0)]);
        assert_eq!(out, vec![false, false, true]);
    }

    #[test]
    fn window_of_one_triggers_immediately() {
        let mut st = Stabilizer::new(1, 100);
        assert!(st.observe(Peace, 0.0));
        assert!(!st.observe(Peace, 50.0));
        assert!(st.observe(Fist, 200.0));
    }
}
