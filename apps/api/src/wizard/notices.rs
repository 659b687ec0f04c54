use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-facing message raised by the wizard, e.g. a failed save.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Subscriber for out-of-band notices. The wizard never reports failures by
/// any other channel than this and its return values.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Collects notices until the next response drains them.
#[derive(Default)]
pub struct NoticeBuffer {
    pending: Mutex<Vec<Notice>>,
}

impl NoticeBuffer {
    pub fn drain(&self) -> Vec<Notice> {
        match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Notifier for NoticeBuffer {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!("Notice: {}", notice.message),
            NoticeLevel::Error => error!("Notice: {}", notice.message),
        }
        match self.pending.lock() {
            Ok(mut pending) => pending.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_notices_in_order_and_empties_buffer() {
        let buffer = NoticeBuffer::default();
        buffer.notify(Notice::info("Draft restored from local backup"));
        buffer.notify(Notice::error("Save failed"));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].level, NoticeLevel::Info);
        assert_eq!(drained[1].message, "Save failed");
        assert!(buffer.drain().is_empty());
    }
}
