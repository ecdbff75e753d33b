//! 인메모리 알림 전송기.
//!
//! 테스트에서 전송된 알림을 검증하기 위한 전송기입니다.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{Notification, NotificationResult, NotificationSender};

/// 전송된 알림을 메모리에 쌓아두는 전송기.
#[derive(Debug, Default)]
pub struct MemorySender {
    sent: Mutex<Vec<Notification>>,
    fail_all: Mutex<bool>,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이후 모든 전송을 실패시킴 (매니저의 실패 무시 동작 검증용).
    pub fn set_fail_all(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }

    /// 지금까지 전송된 알림 전체.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// 전송된 알림 건수.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSender for MemorySender {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        if *self.fail_all.lock().unwrap() {
            return Err(crate::types::NotificationError::SendFailed(
                "주입된 실패".to_string(),
            ));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "memory"
    }
}
