use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::abilities;
use crate::actions::{Action, ActionError};
use crate::engine::VisionConfig;
use crate::fusion::EnabledGestures;
use crate::gestures::GestureLabel;
use crate::processor::PipelineConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
    #[serde(default)]
    pub allow_commands: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub gestures: EnabledGestures,
    /// Gesture name -> action spec, see [`Action::parse`].
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("pipeline.confirm_frames must be at least 1")]
    ConfirmFrames,
    #[error("pipeline.cooldown_ms must be positive")]
    Cooldown,
    #[error("{0} must be in (0,1) normalized units")]
    OutOfRange(&'static str),
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),
    #[error("binding key '{0}' is not a gesture")]
    UnknownGesture(String),
    #[error("gesture {0} is bound more than once")]
    DuplicateBinding(GestureLabel),
    #[error("binding '{key}' has invalid action: {source}")]
    BadAction { key: String, source: ActionError },
}

impl Profile {
    pub fn parse(text: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Pipeline tunables with the enabled-gesture table folded in.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            enabled: self.gestures.clone(),
            ..self.pipeline.clone()
        }
    }

    /// Binding keys match gesture names case-insensitively, like `[gestures]`.
    pub fn binding(&self, label: GestureLabel) -> Option<Action> {
        self.bindings
            .iter()
            .find(|(k, _)| k.parse::<GestureLabel>() == Ok(label))
            .and_then(|(_, spec)| Action::parse(spec).ok())
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let p = &self.pipeline;
        if p.confirm_frames == 0 {
            return Err(ProfileError::ConfirmFrames);
        }
        if p.cooldown_ms == 0 {
            return Err(ProfileError::Cooldown);
        }
        let in_unit = |v: f32| v > 0.0 && v < 1.0;
        if !in_unit(p.contact_threshold) {
            return Err(ProfileError::OutOfRange("pipeline.contact_threshold"));
        }
        if !in_unit(p.ml_min_confidence) {
            return Err(ProfileError::OutOfRange("pipeline.ml_min_confidence"));
        }
        if !in_unit(self.vision.min_hand_presence_confidence) {
            return Err(ProfileError::OutOfRange(
                "vision.min_hand_presence_confidence",
            ));
        }
        if let Some(agent) = &p.agent {
            if abilities::find(agent).is_none() {
                return Err(ProfileError::UnknownAgent(agent.clone()));
            }
        }

        let mut bound = BTreeSet::new();
        for (k, v) in &self.bindings {
            let label: GestureLabel = k
                .parse()
                .map_err(|_| ProfileError::UnknownGesture(k.clone()))?;
            if label.is_none() {
                return Err(ProfileError::UnknownGesture(k.clone()));
            }
            if !bound.insert(label) {
                return Err(ProfileError::DuplicateBinding(label));
            }
            let action = Action::parse(v).map_err(|source| ProfileError::BadAction {
                key: k.clone(),
                source,
            })?;
            if matches!(action, Action::Command(_)) && !self.meta.allow_commands {
                return Err(ProfileError::BadAction {
                    key: k.clone(),
                    source: ActionError::CommandsDisabled,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

pub fn config_dir() -> PathBuf {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    home.join(".config").join("handctl")
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_from(config_dir())
    }

    /// Loads the active profile from `cfgdir`, installing the built-in
    /// default profile and active pointer on first use.
    pub fn load_from(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// On error the previous profile stays active.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profile_path(name);
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir.join(format!("{name}.toml"))
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self, frame_source: &str) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        let source_ok = frame_source == "-" || Path::new(frame_source).exists();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "frame_source": frame_source,
            "frame_source_present": source_ok,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "profile_name": self.profile.meta.name,
            "agents": abilities::ABILITY_SETS,
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input",
                "frame_source": "mkfifo the source path and point the tracker's JSON output at it"
            }
        })
    }
}

fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    Profile::parse(&txt).with_context(|| format!("failed to parse {}", path.display()))
}

fn check_in_input_group() -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines()
        .filter(|line| line.starts_with("input:"))
        .any(|line| {
            line.split(':')
                .nth(3)
                .unwrap_or("")
                .split(',')
                .any(|u| u == user)
        })
}
