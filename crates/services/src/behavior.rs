//! Document-level behavioral signals.
//!
//! The host forwards raw document events through [`ActiveListenerSet::dispatch`].
//! Listeners only exist while the session is `Active`; the set is emptied on
//! every exit from that phase.

use std::sync::{Mutex, PoisonError};

use proctor_core::model::{SessionStatus, ViolationChannel};
use tokio::sync::watch;

use crate::ledger::SignalSender;
use crate::session::phase::{PhaseCell, SessionEvent};

/// A key as reported by the host's keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    PrintScreen,
    Other,
}

/// Raw events the host observes on the assessment document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEvent {
    VisibilityChanged { hidden: bool },
    Copy,
    Cut,
    Paste,
    ContextMenu,
    KeyDown { key: Key, ctrl: bool },
    FullscreenChanged { active: bool },
}

impl DocumentEvent {
    /// Whether the event is an attempt to use the clipboard or context menu.
    #[must_use]
    pub fn is_clipboard_attempt(&self) -> bool {
        match self {
            Self::Copy | Self::Cut | Self::Paste | Self::ContextMenu => true,
            Self::KeyDown {
                key: Key::PrintScreen,
                ..
            } => true,
            Self::KeyDown {
                key: Key::Char(c),
                ctrl: true,
            } => matches!(c.to_ascii_lowercase(), 'c' | 'v' | 'x'),
            _ => false,
        }
    }
}

/// Reacts to document events while the session is active.
pub trait DocumentListener: Send + Sync {
    /// Handle one event. Returns `true` if the host must suppress the event's
    /// default action.
    fn on_event(&self, event: &DocumentEvent) -> bool;
}

/// Reports a tab switch whenever the document becomes hidden.
pub(crate) struct VisibilityListener {
    signals: SignalSender,
}

impl VisibilityListener {
    pub(crate) fn new(signals: SignalSender) -> Self {
        Self { signals }
    }
}

impl DocumentListener for VisibilityListener {
    fn on_event(&self, event: &DocumentEvent) -> bool {
        if let DocumentEvent::VisibilityChanged { hidden: true } = event {
            let _ = self.signals.send(ViolationChannel::TabSwitch);
        }
        false
    }
}

/// Blocks clipboard and context-menu use and reports each attempt.
pub(crate) struct ClipboardListener {
    signals: SignalSender,
}

impl ClipboardListener {
    pub(crate) fn new(signals: SignalSender) -> Self {
        Self { signals }
    }
}

impl DocumentListener for ClipboardListener {
    fn on_event(&self, event: &DocumentEvent) -> bool {
        if !event.is_clipboard_attempt() {
            return false;
        }
        let _ = self.signals.send(ViolationChannel::ClipboardAttempt);
        true
    }
}

/// Surfaces fullscreen changes as notices. Never counted, never re-forced.
pub(crate) struct FullscreenListener {
    phase: PhaseCell,
}

impl FullscreenListener {
    pub(crate) fn new(phase: PhaseCell) -> Self {
        Self { phase }
    }
}

impl DocumentListener for FullscreenListener {
    fn on_event(&self, event: &DocumentEvent) -> bool {
        if let DocumentEvent::FullscreenChanged { active } = event {
            let notice = if *active {
                SessionEvent::FullscreenRestored
            } else {
                tracing::info!(
                    session_id = %self.phase.session_id(),
                    "learner left fullscreen"
                );
                SessionEvent::FullscreenExited
            };
            self.phase.emit(notice);
        }
        false
    }
}

/// Listeners attached for the duration of the `Active` phase.
pub struct ActiveListenerSet {
    phase: watch::Receiver<SessionStatus>,
    listeners: Mutex<Vec<Box<dyn DocumentListener>>>,
}

impl ActiveListenerSet {
    #[must_use]
    pub fn new(phase: watch::Receiver<SessionStatus>) -> Self {
        Self {
            phase,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Attach `listener` if the session is currently `Active`.
    ///
    /// Returns `false` and drops the listener otherwise.
    pub fn register_while_active(&self, listener: Box<dyn DocumentListener>) -> bool {
        let mut listeners = self.lock();
        if *self.phase.borrow() != SessionStatus::Active {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Detach every listener. Returns how many were attached.
    pub fn detach_all(&self) -> usize {
        let mut listeners = self.lock();
        let count = listeners.len();
        listeners.clear();
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every attached listener.
    ///
    /// Returns whether the host must suppress the default action. Events
    /// arriving outside `Active` are ignored.
    pub fn dispatch(&self, event: &DocumentEvent) -> bool {
        let listeners = self.lock();
        if *self.phase.borrow() != SessionStatus::Active {
            return false;
        }
        listeners
            .iter()
            .fold(false, |suppress, listener| listener.on_event(event) || suppress)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn DocumentListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
