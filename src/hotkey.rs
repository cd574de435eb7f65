//! Global hotkey capture
//!
//! Owns the OS-level key-hook registration and runs a dedicated background
//! task that forwards each press as a zero-payload signal into a channel.
//! The UI loop drains that channel on its own schedule; hotkey capture never
//! touches UI state directly.

use global_hotkey::{
    hotkey::{Code, HotKey, Modifiers},
    GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Hotkey setup failures. Non-fatal: the caller logs and runs without the
/// hotkey rather than aborting startup.
#[derive(Debug, Error)]
pub enum HotkeyError {
    #[error("invalid hotkey combination '{combination}': {reason}")]
    Parse { combination: String, reason: String },

    #[error("failed to register global hotkey '{combination}': {reason}")]
    Registration { combination: String, reason: String },
}

/// Live registration. Dropping it stops the listener task; the OS hook is
/// released when the manager drops with it.
pub struct RegistrationHandle {
    manager: GlobalHotKeyManager,
    hotkey: HotKey,
    task: JoinHandle<()>,
}

impl RegistrationHandle {
    /// Explicitly release the OS registration and stop the listener
    pub fn unregister(self) {
        let _ = self.manager.unregister(self.hotkey);
        self.task.abort();
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct HotkeyListener;

impl HotkeyListener {
    /// Register `combination` (e.g. "ctrl+alt+x") and forward every press
    /// into `tx`. Must be called from a context where the process can own
    /// the OS hook; the returned handle keeps it alive.
    pub fn register(
        combination: &str,
        tx: UnboundedSender<()>,
    ) -> Result<RegistrationHandle, HotkeyError> {
        let hotkey = parse_combination(combination)?;

        let manager = GlobalHotKeyManager::new().map_err(|e| HotkeyError::Registration {
            combination: combination.to_string(),
            reason: e.to_string(),
        })?;
        manager
            .register(hotkey)
            .map_err(|e| HotkeyError::Registration {
                combination: combination.to_string(),
                reason: e.to_string(),
            })?;

        info!(combination, "global hotkey registered");

        let id = hotkey.id();
        let receiver = GlobalHotKeyEvent::receiver().clone();
        let task = tokio::spawn(async move {
            loop {
                while let Ok(event) = receiver.try_recv() {
                    if event.id == id && event.state == HotKeyState::Pressed {
                        if tx.send(()).is_err() {
                            // Consumer went away; nothing left to signal
                            warn!("hotkey signal channel closed; listener idle");
                            return;
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        Ok(RegistrationHandle {
            manager,
            hotkey,
            task,
        })
    }
}

/// Parse a "+"-separated combination string into a hotkey
fn parse_combination(combination: &str) -> Result<HotKey, HotkeyError> {
    let parse_err = |reason: &str| HotkeyError::Parse {
        combination: combination.to_string(),
        reason: reason.to_string(),
    };

    let mut modifiers = Modifiers::empty();
    let mut code = None;

    for part in combination.split('+') {
        let part = part.trim().to_ascii_lowercase();
        match part.as_str() {
            "ctrl" | "control" => modifiers |= Modifiers::CONTROL,
            "alt" | "option" => modifiers |= Modifiers::ALT,
            "shift" => modifiers |= Modifiers::SHIFT,
            "super" | "meta" | "cmd" | "win" => modifiers |= Modifiers::META,
            "" => return Err(parse_err("empty key segment")),
            key => {
                if code.is_some() {
                    return Err(parse_err("more than one non-modifier key"));
                }
                code = Some(parse_key(key).ok_or_else(|| parse_err("unknown key"))?);
            }
        }
    }

    let code = code.ok_or_else(|| parse_err("no non-modifier key"))?;
    if modifiers.is_empty() {
        return Err(parse_err("a global hotkey needs at least one modifier"));
    }
    Ok(HotKey::new(Some(modifiers), code))
}

fn parse_key(key: &str) -> Option<Code> {
    let code = match key {
        "a" => Code::KeyA,
        "b" => Code::KeyB,
        "c" => Code::KeyC,
        "d" => Code::KeyD,
        "e" => Code::KeyE,
        "f" => Code::KeyF,
        "g" => Code::KeyG,
        "h" => Code::KeyH,
        "i" => Code::KeyI,
        "j" => Code::KeyJ,
        "k" => Code::KeyK,
        "l" => Code::KeyL,
        "m" => Code::KeyM,
        "n" => Code::KeyN,
        "o" => Code::KeyO,
        "p" => Code::KeyP,
        "q" => Code::KeyQ,
        "r" => Code::KeyR,
        "s" => Code::KeyS,
        "t" => Code::KeyT,
        "u" => Code::KeyU,
        "v" => Code::KeyV,
        "w" => Code::KeyW,
        "x" => Code::KeyX,
        "y" => Code::KeyY,
        "z" => Code::KeyZ,
        "0" => Code::Digit0,
        "1" => Code::Digit1,
        "2" => Code::Digit2,
        "3" => Code::Digit3,
        "4" => Code::Digit4,
        "5" => Code::Digit5,
        "6" => Code::Digit6,
        "7" => Code::Digit7,
        "8" => Code::Digit8,
        "9" => Code::Digit9,
        "space" => Code::Space,
        "enter" | "return" => Code::Enter,
        "tab" => Code::Tab,
        "escape" | "esc" => Code::Escape,
        "f1" => Code::F1,
        "f2" => Code::F2,
        "f3" => Code::F3,
        "f4" => Code::F4,
        "f5" => Code::F5,
        "f6" => Code::F6,
        "f7" => Code::F7,
        "f8" => Code::F8,
        "f9" => Code::F9,
        "f10" => Code::F10,
        "f11" => Code::F11,
        "f12" => Code::F12,
        _ => return None,
    };
    Some(code)
}
