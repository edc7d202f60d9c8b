//! Actions bound to confirmed gestures and the virtual input device that
//! performs them.

use anyhow::Result;
use log::{info, warn};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("empty action")]
    Empty,
    #[error("unknown action kind in '{0}'")]
    UnknownKind(String),
    #[error("unknown mouse button: {0}")]
    UnknownButton(String),
    #[error("unsupported key token: {0}")]
    UnknownKey(String),
    #[error("invalid scroll spec '{0}', expected vertical@<steps>")]
    BadScroll(String),
    #[error("cmd: actions need allow_commands = true")]
    CommandsDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl FromStr for MouseButton {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(ActionError::UnknownButton(other.to_string())),
        }
    }
}

/// Key tokens the virtual keyboard registers.
const KEY_TOKENS: &[&str] = &[
    "CTRL", "CONTROL", "ALT", "SHIFT", "SUPER", "META", "WIN", "TAB", "MINUS", "-", "EQUAL", "=",
    "SPACE", "ENTER", "ESC", "LEFT", "RIGHT", "UP", "DOWN", "F", "Q", "E", "C", "X",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Mouse(MouseButton),
    Scroll(i32),
    /// Upper-cased chord tokens, pressed in order and released in reverse.
    Key(Vec<String>),
    /// Only logs the trigger.
    Log,
    Command(String),
}

impl Action {
    pub fn parse(spec: &str) -> Result<Self, ActionError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ActionError::Empty);
        }
        if spec == "log" {
            return Ok(Action::Log);
        }
        if let Some(rest) = spec.strip_prefix("mouse:") {
            return Ok(Action::Mouse(rest.parse()?));
        }
        if let Some(rest) = spec.strip_prefix("scroll:") {
            let (axis, steps) = rest.split_once('@').unwrap_or((rest, "+1"));
            if !axis.trim().eq_ignore_ascii_case("vertical") {
                return Err(ActionError::BadScroll(rest.to_string()));
            }
            let steps = steps
                .trim()
                .parse::<i32>()
                .map_err(|_| ActionError::BadScroll(rest.to_string()))?;
            return Ok(Action::Scroll(steps));
        }
        if let Some(rest) = spec.strip_prefix("key:") {
            let keys: Vec<String> = rest
                .split('+')
                .map(|s| s.trim().to_ascii_uppercase())
                .collect();
            if let Some(bad) = keys.iter().find(|k| !KEY_TOKENS.contains(&k.as_str())) {
                return Err(ActionError::UnknownKey(bad.clone()));
            }
            return Ok(Action::Key(keys));
        }
        if let Some(rest) = spec.strip_prefix("cmd:") {
            if rest.trim().is_empty() {
                return Err(ActionError::Empty);
            }
            return Ok(Action::Command(rest.trim().to_string()));
        }
        Err(ActionError::UnknownKind(spec.to_string()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Mouse(b) => write!(f, "mouse:{}", format!("{b:?}").to_ascii_lowercase()),
            Action::Scroll(n) => write!(f, "scroll:vertical@{n}"),
            Action::Key(keys) => write!(f, "key:{}", keys.join("+")),
            Action::Log => f.write_str("log"),
            Action::Command(c) => write!(f, "cmd:{c}"),
        }
    }
}

/// Performs input actions. Commands and logging are handled by the
/// dispatcher, not the sink.
pub trait ActionSink {
    fn click(&mut self, button: MouseButton) -> Result<()>;
    fn scroll_vertical(&mut self, steps: i32) -> Result<()>;
    fn key_chord(&mut self, keys: &[String]) -> Result<()>;
}

pub struct UinputSink {
    #[allow(dead_code)]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self::noop())
        }
    }

    pub fn noop() -> Self {
        Self { linux: None }
    }

    /// Falls back to a NO-OP sink when the virtual device can't be created.
    pub fn new_or_noop() -> Self {
        Self::new().unwrap_or_else(|e| {
            warn!("uinput unavailable ({e}); actions will be logged only");
            Self::noop()
        })
    }
}

impl ActionSink for UinputSink {
    fn click(&mut self, button: MouseButton) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.click(button)?;
        }
        let _ = button;
        Ok(())
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.scroll_vertical(steps)?;
        }
        let _ = steps;
        Ok(())
    }

    fn key_chord(&mut self, keys: &[String]) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            let mut codes = Vec::with_capacity(keys.len());
            for k in keys {
                codes.push(map_key(k)?);
            }
            for k in &codes {
                dev.key_send(*k, 1)?;
            }
            dev.sync()?;
            for k in codes.iter().rev() {
                dev.key_send(*k, 0)?;
            }
            dev.sync()?;
        }
        let _ = keys;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn map_key(tok: &str) -> Result<uinput::event::keyboard::Key> {
    use uinput::event::keyboard::Key as K;
    let k = match tok {
        "CTRL" | "CONTROL" => K::LeftControl,
        "ALT" => K::LeftAlt,
        "SHIFT" => K::LeftShift,
        "SUPER" | "META" | "WIN" => K::LeftMeta,
        "TAB" => K::Tab,
        "MINUS" | "-" => K::Minus,
        "EQUAL" | "=" => K::Equal,
        "SPACE" => K::Space,
        "ENTER" => K::Enter,
        "ESC" => K::Esc,
        "LEFT" => K::Left,
        "RIGHT" => K::Right,
        "UP" => K::Up,
        "DOWN" => K::Down,
        "F" => K::F,
        "Q" => K::Q,
        "E" => K::E,
        "C" => K::C,
        "X" => K::X,
        other => return Err(ActionError::UnknownKey(other.to_string()).into()),
    };
    Ok(k)
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::{controller::Mouse, keyboard::Key, relative};

        let mut builder = uinput::default()?
            .name("Handctl Virtual Input")?
            .event(relative::Position::X)?
            .event(relative::Position::Y)?
            .event(relative::Wheel::Vertical)?
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .event(Mouse::Middle)?;
        for key in [
            Key::LeftControl,
            Key::LeftAlt,
            Key::LeftShift,
            Key::LeftMeta,
            Key::Tab,
            Key::Minus,
            Key::Equal,
            Key::Space,
            Key::Enter,
            Key::Esc,
            Key::Left,
            Key::Right,
            Key::Up,
            Key::Down,
            Key::F,
            Key::Q,
            Key::E,
            Key::C,
            Key::X,
        ] {
            builder = builder.event(key)?;
        }
        let dev = builder.create()?;

        info!("uinput: created virtual device");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn key_send(&mut self, key: uinput::event::keyboard::Key, val: i32) -> Result<()> {
        self.dev.send(key, val)?;
        Ok(())
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        use uinput::event::controller::Mouse;
        let b = match button {
            MouseButton::Left => Mouse::Left,
            MouseButton::Right => Mouse::Right,
            MouseButton::Middle => Mouse::Middle,
        };
        self.dev.send(b, 1)?;
        self.sync()?;
        self.dev.send(b, 0)?;
        self.sync()
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        self.dev.send(Wheel::Vertical, steps)?;
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("mouse:right", Action::Mouse(MouseButton::Right))]
    #[case("mouse: Left ", Action::Mouse(MouseButton::Left))]
    #[case("scroll:vertical@-3", Action::Scroll(-3))]
    #[case("scroll:vertical", Action::Scroll(1))]
    #[case("key:ctrl+equal", Action::Key(vec!["CTRL".into(), "EQUAL".into()]))]
    #[case("log", Action::Log)]
    #[case("cmd:notify-send flash", Action::Command("notify-send flash".into()))]
    fn parses_binding_strings(#[case] spec: &str, #[case] expected: Action) {
        assert_eq!(Action::parse(spec).unwrap(), expected);
    }

    #[rstest]
    #[case("", ActionError::Empty)]
    #[case("mouse:back", ActionError::UnknownButton("back".into()))]
    #[case("key:CTRL+PAGEUP", ActionError::UnknownKey("PAGEUP".into()))]
    #[case("scroll:sideways@2", ActionError::BadScroll("sideways@2".into()))]
    #[case("scroll:vertical@lots", ActionError::BadScroll("vertical@lots".into()))]
    #[case("beep", ActionError::UnknownKind("beep".into()))]
    fn rejects_bad_binding_strings(#[case] spec: &str, #[case] expected: ActionError) {
        assert_eq!(Action::parse(spec).unwrap_err(), expected);
    }

    #[test]
    fn display_is_parseable() {
        for spec in ["mouse:middle", "scroll:vertical@2", "key:ALT+TAB", "log"] {
            let a = Action::parse(spec).unwrap();
            assert_eq!(Action::parse(&a.to_string()).unwrap(), a);
        }
    }

    #[test]
    fn noop_sink_accepts_everything() {
        let mut sink = UinputSink::noop();
        sink.click(MouseButton::Left).unwrap();
        sink.scroll_vertical(-2).unwrap();
        sink.key_chord(&["CTRL".into(), "EQUAL".into()]).unwrap();
    }
}
