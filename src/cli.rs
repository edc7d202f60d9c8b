use anyhow::{Context, Result, anyhow};
use pico_args::Arguments;
use serde::Deserialize;
use std::{
    env, fs,
    io::{self, Write},
    process::Command,
    sync::{Arc, Mutex},
};

use crate::actions::{Action, ActionSink, UinputSink};
use crate::config::{DaemonConfigState, Profile};
use crate::engine::JsonLinesEngine;
use crate::gestures::{Classifier, DEFAULT_CONTACT_THRESHOLD, HandShape};
use crate::ipc;
use crate::landmarks::{FramePose, Keypoint};
use crate::processor::FrameProcessor;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        let source = source_arg(&mut pargs)?;
        return ipc::run_daemon(source);
    }

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let source = source_arg(&mut pargs)?;
            let exe = std::env::current_exe()?;
            let child = Command::new(exe)
                .args(["--daemon", "--source", &source])
                .spawn()?;
            println!("handctl: started daemon (pid={}), frames from {source}", child.id());
            Ok(())
        }

        Some(op @ ("stop" | "status" | "reload" | "list" | "doctor" | "pause" | "resume"
        | "reset")) => {
            let op = if op == "stop" { "shutdown" } else { op };
            request(serde_json::json!({ "op": op }))
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl use <profile_name>"))?;
            request(serde_json::json!({"op":"use","profile":name}))
        }

        Some("agent") => {
            let id: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl agent <id|none>"))?;
            request(serde_json::json!({"op":"agent","agent":id}))
        }

        Some("toggle") => {
            let gesture: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl toggle <gesture>"))?;
            request(serde_json::json!({"op":"toggle","gesture":gesture}))
        }

        Some("replay") => {
            let agent: Option<String> = pargs.opt_value_from_str("--agent")?;
            let live = pargs.contains("--live");
            let source: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl replay <frames.jsonl|-> [--agent ID] [--live]"))?;
            replay(&source, agent, live)
        }

        Some("classify") => {
            let threshold: f32 = pargs
                .opt_value_from_str("--threshold")?
                .unwrap_or(DEFAULT_CONTACT_THRESHOLD);
            let path: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl classify <pose.json> [--threshold T]"))?;
            classify(&path, threshold)
        }

        Some("emit") => {
            // usage:
            //   handctl emit mouse:right
            //   handctl emit scroll:vertical@3
            //   handctl emit key:CTRL+EQUAL
            let spec: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit <action>"))?;
            let mut sink = UinputSink::new()?;
            match Action::parse(&spec)? {
                Action::Mouse(b) => sink.click(b)?,
                Action::Scroll(n) => sink.scroll_vertical(n)?,
                Action::Key(keys) => sink.key_chord(&keys)?,
                other => return Err(anyhow!("emit only supports input actions, got {other}")),
            }
            println!("ok: {spec}");
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn source_arg(pargs: &mut Arguments) -> Result<String> {
    Ok(pargs
        .opt_value_from_str("--source")?
        .unwrap_or_else(|| ipc::default_frame_source().display().to_string()))
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

/// Runs a recorded or piped frame stream through the pipeline in the
/// foreground and prints every frame that produced events.
fn replay(source: &str, agent: Option<String>, live: bool) -> Result<()> {
    let profile = match DaemonConfigState::load_or_install_default() {
        Ok(st) => st.profile,
        Err(e) => {
            log::warn!("using built-in defaults: {e:#}");
            Profile::default()
        }
    };
    let mut controls = ipc::Controls::new(profile);
    if agent.is_some() {
        controls.agent = agent.filter(|a| a != "none");
    }

    let mut engine = JsonLinesEngine::open(source, controls.profile.vision.clone())?;
    let mut processor = FrameProcessor::new(&controls.pipeline_config());
    let mut sink = if live {
        UinputSink::new_or_noop()
    } else {
        UinputSink::noop()
    };
    let controls = Arc::new(Mutex::new(controls));
    let status = Arc::new(Mutex::new(ipc::PipelineStatus::default()));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut write_err = None;
    ipc::run_pipeline(
        &mut engine,
        &mut processor,
        controls,
        status,
        &mut sink,
        |frame| {
            if frame.events.is_empty() || write_err.is_some() {
                return;
            }
            if let Err(e) = serde_json::to_writer(&mut out, frame)
                .map_err(io::Error::from)
                .and_then(|_| writeln!(out))
            {
                write_err = Some(e);
            }
        },
    )?;
    if let Some(e) = write_err {
        return Err(e.into());
    }

    let snap = processor.snapshot();
    eprintln!(
        "replayed {} frames, final gesture {}, charged {}",
        snap.frames, snap.label, snap.ability.charged
    );
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PoseFile {
    Points(Vec<Keypoint>),
    Frame { landmarks: Vec<Keypoint> },
}

fn classify(path: &str, threshold: f32) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let points = match serde_json::from_str::<PoseFile>(&text)? {
        PoseFile::Points(p) | PoseFile::Frame { landmarks: p } => p,
    };
    let pose = FramePose::new(points)?;
    let shape = HandShape::measure(&pose);
    let label = Classifier::new(threshold).classify(&pose);
    print_response(&serde_json::json!({ "label": label, "shape": shape }));
    Ok(())
}

fn print_help() {
    println!(
        r#"handctl: hand gesture pipeline daemon

USAGE:
  handctl help [command]                  Show general or command-specific help
  handctl start [--source PATH]           Start the daemon reading tracker frames from PATH
  handctl stop                            Stop the daemon
  handctl status                          Show pipeline state
  handctl reload                          Reload active profile
  handctl use <name>                      Switch active profile
  handctl list                            List profiles
  handctl doctor                          Diagnose permissions and frame source
  handctl agent <id|none>                 Select the ability set (e.g. phoenix)
  handctl toggle <gesture>                Enable/disable a gesture
  handctl pause | resume                  Stop/continue consuming frames
  handctl reset                           Clear gesture history and ability state
  handctl replay <file|-> [--agent ID]    Run a frame stream in the foreground
  handctl classify <pose.json>            Classify a single 21-point pose
  handctl emit <action>                   Perform an action (mouse:, scroll:, key:)

TIPS:
  - Frames are JSON lines: {{"timestamp_ms", "landmarks", "gesture", "handedness_score"}}
  - Profiles: ~/.config/handctl/profiles
  - Active profile pointer: ~/.config/handctl/active
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!(
            "usage: handctl start [--source PATH]\nStarts the background daemon. PATH is a file or FIFO of JSON frames (default ~/.local/run/handctl.frames)."
        ),
        "stop" => println!("usage: handctl stop\nStops the running daemon."),
        "status" => println!(
            "usage: handctl status\nShows current gesture, ability flags, fps, agent and disabled gestures."
        ),
        "reload" => println!(
            "usage: handctl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: handctl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => {
            println!("usage: handctl list\nLists available profiles; marks active with '*'.")
        }
        "doctor" => println!(
            "usage: handctl doctor\nChecks uinput permissions and the frame source."
        ),
        "agent" => println!(
            "usage: handctl agent <id|none>\nSelects the ability set driven by charge/release gestures."
        ),
        "toggle" => println!(
            "usage: handctl toggle <gesture>\nFlips whether a gesture may leave the classifier (Open_Palm, Fist, Thumbs_Up, Peace, Pinch, Pointing, Snap)."
        ),
        "pause" | "resume" => println!(
            "usage: handctl pause | handctl resume\nStops or continues frame consumption; gesture state is kept."
        ),
        "reset" => println!("usage: handctl reset\nClears gesture history, cooldown and ability state."),
        "replay" => println!(
            "usage: handctl replay <frames.jsonl|-> [--agent ID] [--live]\nPrints events as JSON lines. --live performs bound input actions."
        ),
        "classify" => println!(
            "usage: handctl classify <pose.json> [--threshold T]\nPrints the gesture and hand-shape measurements of one pose."
        ),
        "emit" => println!(
            "usage:\n  handctl emit mouse:<left|right|middle>\n  handctl emit scroll:vertical@<steps>\n  handctl emit key:CTRL+EQUAL"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
