use anyhow::Result;
use log::{error, info};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use super::dispatch::dispatch_trigger;
use crate::actions::ActionSink;
use crate::config::Profile;
use crate::engine::{InferenceEngine, VisionConfig};
use crate::fusion::EnabledGestures;
use crate::gestures::GestureLabel;
use crate::processor::{DebugSnapshot, FrameEvent, FrameEvents, FrameProcessor, PipelineConfig};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Externally owned settings, read by the frame loop once per frame.
#[derive(Debug, Clone)]
pub struct Controls {
    pub profile: Profile,
    pub agent: Option<String>,
    pub enabled: EnabledGestures,
    pub paused: bool,
    pub reset_requested: bool,
}

impl Controls {
    pub fn new(profile: Profile) -> Self {
        let mut c = Self {
            profile: Profile::default(),
            agent: None,
            enabled: EnabledGestures::all(),
            paused: false,
            reset_requested: false,
        };
        c.apply_profile(profile);
        c
    }

    /// Takes agent selection and gesture filter from the profile, dropping
    /// any runtime overrides.
    pub fn apply_profile(&mut self, profile: Profile) {
        self.agent = profile.pipeline.agent.clone();
        self.enabled = profile.gestures.clone();
        self.profile = profile;
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            agent: self.agent.clone(),
            enabled: self.enabled.clone(),
            ..self.profile.pipeline_config()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStatus {
    pub engine: String,
    pub running: bool,
    pub snapshot: Option<DebugSnapshot>,
    pub triggers: BTreeMap<GestureLabel, u64>,
}

struct FrameTick {
    config: PipelineConfig,
    vision: VisionConfig,
    reset: bool,
}

fn next_tick(controls: &Mutex<Controls>) -> Option<FrameTick> {
    let mut c = lock(controls);
    if c.paused {
        return None;
    }
    let reset = std::mem::take(&mut c.reset_requested);
    Some(FrameTick {
        config: c.pipeline_config(),
        vision: c.profile.vision.clone(),
        reset,
    })
}

/// Drives the processor from `engine` until the engine closes. Pausing
/// only stops frame consumption; processor state is kept.
pub fn run_pipeline(
    engine: &mut dyn InferenceEngine,
    processor: &mut FrameProcessor,
    controls: Arc<Mutex<Controls>>,
    status: Arc<Mutex<PipelineStatus>>,
    sink: &mut dyn ActionSink,
    mut on_frame: impl FnMut(&FrameEvents),
) -> Result<()> {
    {
        let mut st = lock(&status);
        st.engine = engine.name();
        st.running = true;
    }
    for label in GestureLabel::ALL.into_iter().filter(|g| !g.is_none()) {
        let status = status.clone();
        processor.on_trigger(label, move || {
            *lock(&status).triggers.entry(label).or_default() += 1;
        });
    }
    info!("pipeline: started on {}", engine.name());

    let result = loop {
        let Some(tick) = next_tick(&controls) else {
            thread::sleep(Duration::from_millis(20));
            continue;
        };
        if tick.reset {
            info!("pipeline: state reset");
            processor.reset();
        }
        engine.reconfigure(&tick.vision);

        let frame = match engine.next_frame() {
            Ok(Some(f)) => f,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let out = processor.process_frame(&frame, &tick.config);
        for ev in &out.events {
            if let FrameEvent::Trigger { label } = ev {
                let profile = lock(&controls).profile.clone();
                if let Err(e) = dispatch_trigger(*label, &profile, sink) {
                    error!("dispatch failed: {e}");
                }
            }
        }
        on_frame(&out);

        if !out.skipped {
            lock(&status).snapshot = Some(processor.snapshot());
        }
    };

    lock(&status).running = false;
    info!("pipeline: engine closed");
    result
}
