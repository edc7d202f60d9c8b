use anyhow::Result;
use log::{error, info, warn};
use notify::{RecursiveMode, Watcher};
use serde_json::{Value, json};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    sync::{
        Arc, Mutex,
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use super::pipeline::{Controls, PipelineStatus, lock, run_pipeline};
use super::runtime::socket_path;
use crate::abilities;
use crate::actions::UinputSink;
use crate::config::DaemonConfigState;
use crate::engine::JsonLinesEngine;
use crate::gestures::GestureLabel;
use crate::processor::FrameProcessor;

pub fn run_daemon(source: String) -> Result<()> {
    let sock = socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    let cfg = DaemonConfigState::load_or_install_default()?;
    info!("daemon: active profile '{}'", cfg.active_name);

    let ctx = ServerCtx {
        controls: Arc::new(Mutex::new(Controls::new(cfg.profile.clone()))),
        status: Arc::new(Mutex::new(PipelineStatus::default())),
        cfg: Arc::new(Mutex::new(cfg)),
        source,
    };

    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();
    spawn_signal_listener(tx_req.clone())?;
    // keep the watcher alive for the daemon's lifetime
    let _watcher = watch_profiles(&ctx, tx_req.clone());

    GestureThread::start(&ctx);

    listener.set_nonblocking(true)?;
    loop {
        if let Ok((stream, _)) = listener.accept() {
            let ctx = ctx.clone();
            let tx = tx_req.clone();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, &ctx, &tx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => {
                    if let Err(e) = ctx.reload() {
                        error!("reload failed: {e:#}");
                    }
                }
                IpcMsg::Shutdown => {
                    info!("daemon: shutting down");
                    let _ = std::fs::remove_file(&sock);
                    return Ok(());
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn spawn_signal_listener(tx: Sender<IpcMsg>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: received signal {sig}");
            let _ = tx.send(IpcMsg::Shutdown);
        }
    });
    Ok(())
}

/// Reloads when a profile file changes on disk.
fn watch_profiles(ctx: &ServerCtx, tx: Sender<IpcMsg>) -> Option<notify::RecommendedWatcher> {
    let dir = lock(&ctx.cfg).profiles_dir.clone();
    let handler = move |res: notify::Result<notify::Event>| {
        let Ok(ev) = res else { return };
        let touched_profile = (ev.kind.is_modify() || ev.kind.is_create())
            && ev
                .paths
                .iter()
                .any(|p| p.extension().is_some_and(|e| e == "toml"));
        if touched_profile {
            let _ = tx.send(IpcMsg::Reload);
        }
    };
    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(w) => w,
        Err(e) => {
            warn!("profile watcher unavailable: {e}");
            return None;
        }
    };
    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        warn!("cannot watch {}: {e}", dir.display());
        return None;
    }
    Some(watcher)
}

fn handle_client(mut stream: UnixStream, ctx: &ServerCtx, tx_req: &Sender<IpcMsg>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: Value = serde_json::from_str(&line)?;
    let resp = handle_request(&req, ctx);
    writeln!(stream, "{resp}")?;

    if req.get("op").and_then(Value::as_str) == Some("shutdown") {
        let _ = tx_req.send(IpcMsg::Shutdown);
    }
    Ok(())
}

fn ok(data: Value) -> Value {
    json!({"ok": true, "data": data})
}

fn fail(msg: impl std::fmt::Display) -> Value {
    json!({"ok": false, "error": msg.to_string()})
}

pub(crate) fn handle_request(req: &Value, ctx: &ServerCtx) -> Value {
    let op = req.get("op").and_then(Value::as_str).unwrap_or("");
    let arg = |k: &str| req.get(k).and_then(Value::as_str).unwrap_or("").to_string();

    match op {
        "status" => {
            let active = lock(&ctx.cfg).active_name.clone();
            let st = lock(&ctx.status).clone();
            let c = lock(&ctx.controls);
            ok(json!({
                "active_profile": active,
                "engine": st.engine,
                "running": st.running,
                "paused": c.paused,
                "agent": c.agent,
                "disabled_gestures": c.enabled.disabled(),
                "frame_source": ctx.source,
                "socket": socket_path(),
                "pipeline": st.snapshot,
                "triggers": st.triggers,
            }))
        }
        "reload" => match ctx.reload() {
            Ok(name) => ok(json!({"active_profile": name})),
            Err(e) => fail(format!("{e:#}")),
        },
        "use" => {
            let name = arg("profile");
            let mut cfg = lock(&ctx.cfg);
            match cfg.set_active(&name) {
                Ok(()) => {
                    lock(&ctx.controls).apply_profile(cfg.profile.clone());
                    info!("switched active profile to {}", cfg.active_name);
                    ok(json!({"active_profile": cfg.active_name}))
                }
                Err(e) => fail(format!("{e:#}")),
            }
        }
        "list" => {
            let cfg = lock(&ctx.cfg);
            ok(json!({"profiles": cfg.list_profiles(), "active": cfg.active_name}))
        }
        "doctor" => ok(lock(&ctx.cfg).doctor_report(&ctx.source)),
        "agent" => {
            let id = arg("agent");
            let agent = match id.as_str() {
                "" | "none" => None,
                other => match abilities::find(other) {
                    Some(a) => Some(a.id.to_string()),
                    None => return fail(format!("unknown agent: {other}")),
                },
            };
            info!("agent selected: {}", agent.as_deref().unwrap_or("none"));
            lock(&ctx.controls).agent = agent.clone();
            ok(json!({"agent": agent}))
        }
        "toggle" => {
            let label = match arg("gesture").parse::<GestureLabel>() {
                Ok(g) if !g.is_none() => g,
                Ok(_) => return fail("None cannot be toggled"),
                Err(e) => return fail(e),
            };
            let enabled = lock(&ctx.controls).enabled.toggle(label);
            ok(json!({"gesture": label, "enabled": enabled}))
        }
        "pause" | "resume" => {
            let paused = op == "pause";
            lock(&ctx.controls).paused = paused;
            ok(json!({"paused": paused}))
        }
        "reset" => {
            lock(&ctx.controls).reset_requested = true;
            ok(json!("reset requested"))
        }
        "shutdown" => ok(json!("shutting down")),
        _ => fail(format!("unknown op: {op}")),
    }
}

#[derive(Clone)]
pub(crate) struct ServerCtx {
    controls: Arc<Mutex<Controls>>,
    status: Arc<Mutex<PipelineStatus>>,
    cfg: Arc<Mutex<DaemonConfigState>>,
    source: String,
}

impl ServerCtx {
    /// Re-reads the active profile and hands it to the frame loop. Returns
    /// the active profile name.
    fn reload(&self) -> Result<String> {
        let mut cfg = lock(&self.cfg);
        cfg.reload()?;
        lock(&self.controls).apply_profile(cfg.profile.clone());
        info!("profile '{}' reloaded", cfg.active_name);
        Ok(cfg.active_name.clone())
    }
}

enum IpcMsg {
    Reload,
    Shutdown,
}

struct GestureThread;

impl GestureThread {
    fn start(ctx: &ServerCtx) {
        let controls = ctx.controls.clone();
        let status = ctx.status.clone();
        let source = ctx.source.clone();
        thread::spawn(move || {
            let vision = lock(&controls).profile.vision.clone();
            // opening a FIFO blocks until the tracker connects
            let mut engine = match JsonLinesEngine::open(&source, vision) {
                Ok(e) => e,
                Err(e) => {
                    error!("gesture pipeline idle: {e:#}");
                    return;
                }
            };
            let mut sink = UinputSink::new_or_noop();
            let mut processor = FrameProcessor::new(&lock(&controls).pipeline_config());
            if let Err(e) = run_pipeline(
                &mut engine,
                &mut processor,
                controls,
                status,
                &mut sink,
                |_| {},
            ) {
                error!("gesture pipeline failed: {e:#}");
            }
        });
    }
}
