use anyhow::{Result, anyhow};
use log::{info, warn};
use std::{
    process::{Command, ExitStatus},
    thread::{self, JoinHandle},
};

use crate::actions::{Action, ActionSink};
use crate::config::Profile;
use crate::gestures::GestureLabel;

/// Runs the action bound to a triggered gesture. Unbound gestures are a
/// no-op.
pub fn dispatch_trigger(
    label: GestureLabel,
    profile: &Profile,
    sink: &mut dyn ActionSink,
) -> Result<Option<Action>> {
    let Some(action) = profile.binding(label) else {
        return Ok(None);
    };

    match &action {
        Action::Log => info!("gesture {label} triggered"),
        Action::Mouse(b) => sink.click(*b)?,
        Action::Scroll(steps) => sink.scroll_vertical(*steps)?,
        Action::Key(keys) => sink.key_chord(keys)?,
        Action::Command(cmd) => {
            if !profile.meta.allow_commands {
                return Err(anyhow!("cmd: binding for {label} but allow_commands=false"));
            }
            spawn_reaped(cmd)?;
            info!("gesture {label}: spawned '{cmd}'");
        }
    }
    Ok(Some(action))
}

/// Runs `cmd` through `sh -c` and reaps it on a detached thread.
fn spawn_reaped(cmd: &str) -> Result<JoinHandle<Option<ExitStatus>>> {
    let mut child = Command::new("sh").arg("-c").arg(cmd).spawn()?;
    let pid = child.id();
    let cmd = cmd.to_string();
    Ok(thread::spawn(move || match child.wait() {
        Ok(status) => {
            if !status.success() {
                warn!("'{cmd}' (pid={pid}) exited with {status}");
            }
            Some(status)
        }
        Err(e) => {
            warn!("failed to wait for '{cmd}' (pid={pid}): {e}");
            None
        }
    }))
}
