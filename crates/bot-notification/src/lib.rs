//! 트레이딩 알림.
//!
//! 이 crate는 다음을 제공합니다:
//! - 포지션·불일치 알림 이벤트 모델과 우선순위
//! - `NotificationSender` trait
//! - Telegram Bot API 전송기
//! - 실패를 전파하지 않는 팬아웃 매니저

pub mod manager;
pub mod memory;
pub mod telegram;
pub mod types;

// 주요 타입 재내보내기
pub use manager::NotificationManager;
pub use memory::MemorySender;
pub use telegram::{TelegramConfig, TelegramSender};
pub use types::{
    Notification, NotificationError, NotificationEvent, NotificationPriority, NotificationResult,
    NotificationSender,
};
