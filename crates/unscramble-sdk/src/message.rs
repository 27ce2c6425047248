//! 提示消息 - 只有一个显示位，到时自动消失

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::events::{EventManager, SyncEvent};

pub const LOADED_SERVER_DATA: &str = "LOADED SERVER DATA!";
pub const SAVED_LOCAL_DATA: &str = "SAVED LOCAL DATA!";
pub const LOGIN_SUCCESS: &str = "LOGIN SUCCESS!";
pub const RESET_TO_LEVEL_ONE: &str = "RESET TO LV.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientMessage {
    pub id: u64,
    pub text: String,
}

/// 提示消息槽
///
/// 新消息直接顶替旧消息；旧消息的定时器到点后发现 id 不符，不做任何事。
pub struct TransientMessages {
    current: Arc<Mutex<Option<TransientMessage>>>,
    next_id: AtomicU64,
    dismiss_after: Duration,
    events: Arc<EventManager>,
}

impl TransientMessages {
    pub fn new(dismiss_after: Duration, events: Arc<EventManager>) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
            dismiss_after,
            events,
        }
    }

    /// 显示消息，并在 `dismiss_after` 后自动消失
    ///
    /// 需要在 tokio 运行时内调用。
    pub fn show(&self, text: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.current.lock() = Some(TransientMessage {
            id,
            text: text.to_string(),
        });
        debug!("显示提示: #{} {}", id, text);
        self.events.emit(SyncEvent::MessageShown {
            id,
            text: text.to_string(),
        });

        let current = self.current.clone();
        let events = self.events.clone();
        let delay = self.dismiss_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let dismissed = {
                let mut slot = current.lock();
                if slot.as_ref().map(|m| m.id) == Some(id) {
                    *slot = None;
                    true
                } else {
                    false
                }
            };
            if dismissed {
                events.emit(SyncEvent::MessageDismissed { id });
            }
        });
        id
    }

    /// 当前显示的消息
    pub fn current(&self) -> Option<TransientMessage> {
        self.current.lock().clone()
    }

    /// 立即清除
    pub fn clear(&self) {
        let cleared = self.current.lock().take();
        if let Some(message) = cleared {
            self.events.emit(SyncEvent::MessageDismissed { id: message.id });
        }
    }
}
