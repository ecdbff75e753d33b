//! 알림 이벤트 모델 및 전송기 trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bot_core::{DiscrepancyKind, Side};

// =============================================================================
// 에러 타입
// =============================================================================

/// 알림 전송 에러.
///
/// 알림 실패는 절대 트레이딩 경로로 전파되지 않습니다. 매니저가
/// 로그만 남기고 계속 진행합니다.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(#[from] reqwest::Error),

    /// 전송 한도 초과 (재시도 대기 초)
    #[error("전송 한도 초과, {0}초 후 재시도")]
    RateLimited(u64),

    /// 전송 실패
    #[error("전송 실패: {0}")]
    SendFailed(String),
}

/// Result 타입 별칭.
pub type NotificationResult<T> = std::result::Result<T, NotificationError>;

// =============================================================================
// 우선순위
// =============================================================================

/// 알림 우선순위.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Critical,
}

// =============================================================================
// 이벤트
// =============================================================================

/// 알림 이벤트.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationEvent {
    /// 포지션 진입 완료
    PositionOpened {
        symbol: String,
        owner: String,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: u32,
    },
    /// 포지션 청산 완료
    PositionClosed {
        symbol: String,
        owner: String,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        exit_price: Decimal,
        reason: String,
    },
    /// 포지션 수정 (부분 청산, 손절/익절 변경)
    PositionModified {
        symbol: String,
        owner: String,
        detail: String,
    },
    /// 포지션 실패 상태 전환
    PositionFailed {
        symbol: String,
        owner: String,
        reason: String,
    },
    /// 불일치 발견 및 자동 해결
    DiscrepancyFound {
        symbol: String,
        kind: DiscrepancyKind,
        detail: String,
    },
    /// 자동 해결 불가, 운영자 확인 필요
    DiscrepancyEscalated {
        symbol: String,
        kind: DiscrepancyKind,
        detail: String,
    },
    /// 정합성 확인 반복 실패
    ReconciliationFailure {
        consecutive_failures: u32,
        reason: String,
    },
}

impl NotificationEvent {
    /// 이벤트 기본 우선순위.
    ///
    /// 자동 해결된 불일치와 일상적 진입/청산은 Low/Normal,
    /// 에스컬레이션과 실패 전환은 High/Critical.
    pub fn default_priority(&self) -> NotificationPriority {
        match self {
            Self::PositionOpened { .. } | Self::PositionClosed { .. } => {
                NotificationPriority::Normal
            }
            Self::PositionModified { .. } | Self::DiscrepancyFound { .. } => {
                NotificationPriority::Low
            }
            Self::PositionFailed { .. } | Self::DiscrepancyEscalated { .. } => {
                NotificationPriority::High
            }
            Self::ReconciliationFailure { .. } => NotificationPriority::Critical,
        }
    }
}

// =============================================================================
// 알림
// =============================================================================

/// 전송 대상 알림 (이벤트 + 우선순위 + 시각).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub priority: NotificationPriority,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// 이벤트 기본 우선순위로 알림 생성.
    pub fn new(event: NotificationEvent) -> Self {
        let priority = event.default_priority();
        Self {
            event,
            priority,
            timestamp: Utc::now(),
        }
    }

    /// 우선순위 재지정.
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }
}

// =============================================================================
// 전송기 trait
// =============================================================================

/// 알림 전송기 trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 알림 전송.
    async fn send(&self, notification: &Notification) -> NotificationResult<()>;

    /// 전송 활성화 여부.
    fn is_enabled(&self) -> bool;

    /// 전송기 이름 (로그 표기용).
    fn name(&self) -> &str;
}
