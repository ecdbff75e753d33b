//! 에러 타입 정의.
//!
//! 호출자가 복구할 수 있는 조건(중복 진입, 포지션 없음)은 동기적으로
//! 반환되고, 시스템 드리프트를 의미하는 조건(자동 해결 불가 불일치,
//! 반복된 거래소 장애)은 알림 경로로도 반드시 노출됩니다.
//! "포지션 없음"이 정상 흐름인 조회는 에러가 아니라 `None`을 돌려줍니다.

use thiserror::Error;

use crate::domain::PositionStatus;

/// 포지션 관리 에러.
#[derive(Debug, Error)]
pub enum PositionError {
    /// 같은 복합 키에 이미 열린 포지션이 있음 (중복 진입 시도)
    #[error("이미 활성 포지션이 존재합니다: {key}")]
    DuplicateActivePosition { key: String },

    /// 존재하지 않는 복합 키에 대한 청산/수정 요청
    #[error("포지션을 찾을 수 없습니다: {key}")]
    PositionNotFound { key: String },

    /// 허용되지 않은 상태 전환 (보통 두 호출자 간 경합을 의미)
    #[error("허용되지 않은 상태 전환: {key} {from} → {to}")]
    InvalidTransition {
        key: String,
        from: PositionStatus,
        to: PositionStatus,
    },

    /// 잘못된 복합 키 형식
    #[error("잘못된 포지션 키 형식: {raw}")]
    KeyFormat { raw: String },

    /// 일시적 거래소 장애 (성공도 실패도 가정하지 말 것)
    #[error("거래소 접근 불가: {reason}")]
    ExchangeUnavailable { reason: String },

    /// 정합성 확인이 안전하게 자동 해결하지 못한 불일치
    #[error("자동 해결 불가 불일치: {symbol}")]
    UnresolvedDiscrepancy { symbol: String },

    /// 체결 확인 타임아웃 (OPENING → FAILED)
    #[error("체결 확인 타임아웃: {key}")]
    FillTimeout { key: String },

    /// 잘못된 부분 청산 비율 (0 < fraction <= 1 이어야 함)
    #[error("잘못된 청산 비율: {value}")]
    InvalidFraction { value: rust_decimal::Decimal },

    /// 포지션 저장소 에러 (파일 입출력, 직렬화)
    #[error("포지션 저장소 오류: {reason}")]
    Store { reason: String },
}

/// Result 타입 별칭.
pub type Result<T> = std::result::Result<T, PositionError>;

impl From<std::io::Error> for PositionError {
    fn from(err: std::io::Error) -> Self {
        Self::Store {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PositionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_identify_key() {
        let err = PositionError::DuplicateActivePosition {
            key: "BTCUSDT_TFPE".to_string(),
        };
        assert!(err.to_string().contains("BTCUSDT_TFPE"));

        let err = PositionError::InvalidTransition {
            key: "ETHUSDT_MANUAL".to_string(),
            from: PositionStatus::Closed,
            to: PositionStatus::Active,
        };
        let msg = err.to_string();
        assert!(msg.contains("CLOSED"));
        assert!(msg.contains("ACTIVE"));
    }
}
