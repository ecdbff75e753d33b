//! 알림 팬아웃 매니저.
//!
//! 등록된 모든 전송기에 알림을 전달합니다. 전송 실패는 로그만 남기고
//! 트레이딩 경로로 전파하지 않습니다. 알림이 거래를 막아서는 안 됩니다.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::types::{Notification, NotificationEvent, NotificationSender};

/// 알림 팬아웃 매니저.
#[derive(Default)]
pub struct NotificationManager {
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 전송기 등록.
    pub fn register(&mut self, sender: Arc<dyn NotificationSender>) {
        self.senders.push(sender);
    }

    /// 등록된 전송기 수.
    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    /// 이벤트를 기본 우선순위로 모든 전송기에 전달.
    pub async fn notify(&self, event: NotificationEvent) {
        self.dispatch(Notification::new(event)).await;
    }

    /// 알림을 모든 전송기에 전달. 실패는 무시하고 기록만 남김.
    pub async fn dispatch(&self, notification: Notification) {
        for sender in &self.senders {
            if !sender.is_enabled() {
                debug!(sender = sender.name(), "비활성화된 전송기 건너뜀");
                continue;
            }
            if let Err(e) = sender.send(&notification).await {
                warn!(
                    sender = sender.name(),
                    error = %e,
                    "알림 전송 실패, 무시하고 계속"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySender;
    use bot_core::DiscrepancyKind;

    fn escalation_event() -> NotificationEvent {
        NotificationEvent::DiscrepancyEscalated {
            symbol: "BTCUSDT".to_string(),
            kind: DiscrepancyKind::SideMismatch,
            detail: "수동 확인 필요".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_all_senders() {
        let a = Arc::new(MemorySender::new());
        let b = Arc::new(MemorySender::new());

        let mut manager = NotificationManager::new();
        manager.register(a.clone());
        manager.register(b.clone());

        manager.notify(escalation_event()).await;

        assert_eq!(a.sent_count(), 1);
        assert_eq!(b.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_sender_failure_does_not_block_others() {
        let failing = Arc::new(MemorySender::new());
        failing.set_fail_all(true);
        let healthy = Arc::new(MemorySender::new());

        let mut manager = NotificationManager::new();
        manager.register(failing.clone());
        manager.register(healthy.clone());

        manager.notify(escalation_event()).await;

        assert_eq!(failing.sent_count(), 0);
        assert_eq!(healthy.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_manager_is_noop() {
        let manager = NotificationManager::new();
        manager.notify(escalation_event()).await;
    }
}
