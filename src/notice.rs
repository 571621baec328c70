use crate::constants::{BANNER_TTL_MS, NOTICE_HISTORY};
use crate::controller::error::ConsoleError;

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Transient, dismissible.
    Banner,
    /// Blocks the console until the user reloads.
    Modal,
    /// Attached to the input that caused it.
    Inline,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Error,
}

#[derive(Serialize, Debug, Clone)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip)]
    raised: Instant,
}

impl Notice {
    fn is_live(&self, now: Instant) -> bool {
        match self.kind {
            NoticeKind::Banner => now.duration_since(self.raised) < Duration::from_millis(BANNER_TTL_MS),
            _ => true,
        }
    }
}

/// Where every user-visible signal goes. Nothing that fails is allowed to
/// skip this board.
#[derive(Debug)]
pub struct NoticeBoard {
    tx: broadcast::Sender<Notice>,
    history: Mutex<VecDeque<Notice>>,
    next_id: AtomicU64,
    modal: watch::Sender<bool>,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeBoard {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_HISTORY);
        let (modal, _) = watch::channel(false);
        NoticeBoard {
            tx,
            history: Mutex::new(VecDeque::with_capacity(NOTICE_HISTORY)),
            next_id: AtomicU64::new(1),
            modal,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Flips to true while the blocking dialog is up.
    pub fn blocking(&self) -> watch::Receiver<bool> {
        self.modal.subscribe()
    }

    pub fn is_blocked(&self) -> bool {
        *self.modal.borrow()
    }

    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        info!(%message, "notice");
        self.publish(NoticeKind::Banner, Severity::Success, message);
    }

    pub fn failure(&self, err: &ConsoleError) {
        let kind = err.notice_kind();
        error!(?err, "notice");
        if kind == NoticeKind::Modal {
            self.modal.send_replace(true);
        }
        self.publish(kind, Severity::Error, err.describe());
    }

    /// Dismisses the blocking dialog and any modal notices.
    pub fn clear_modal(&self) {
        self.modal.send_replace(false);
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|n| n.kind != NoticeKind::Modal);
    }

    /// Notices still worth showing: modals, inline messages and unexpired
    /// banners.
    pub fn active(&self) -> Vec<Notice> {
        let now = Instant::now();
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|n| n.is_live(now))
            .cloned()
            .collect()
    }

    fn publish(&self, kind: NoticeKind, severity: Severity, message: String) {
        let notice = Notice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            severity,
            message,
            raised: Instant::now(),
        };
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() == NOTICE_HISTORY {
                history.pop_front();
            }
            history.push_back(notice.clone());
        }
        // no subscribers is fine, the history still has it
        let _ = self.tx.send(notice);
    }
}
