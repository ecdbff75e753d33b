//! 불일치(discrepancy) 도메인 타입.
//!
//! 정합성 확인 중 발견된 시스템-거래소 간 차이를 분류하고,
//! 해결 결과와 함께 이력으로 남기기 위한 타입입니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// 불일치 종류
// =============================================================================

/// 불일치 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    /// 거래소에는 있지만 시스템에는 없음
    MissingInSystem,
    /// 시스템에는 ACTIVE인데 거래소에는 없음
    MissingOnExchange,
    /// 양쪽 다 존재하지만 수량이 허용 오차를 초과하여 다름
    SizeMismatch,
    /// 양쪽 다 존재하지만 순 방향이 다름
    SideMismatch,
    /// 거래소 포지션의 소유자를 안전하게 판별할 수 없음
    UnresolvedOwner,
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingInSystem => "MISSING_IN_SYSTEM",
            Self::MissingOnExchange => "MISSING_ON_EXCHANGE",
            Self::SizeMismatch => "SIZE_MISMATCH",
            Self::SideMismatch => "SIDE_MISMATCH",
            Self::UnresolvedOwner => "UNRESOLVED_OWNER",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// 해결 결과
// =============================================================================

/// 불일치 해결 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// 아직 처리되지 않음
    None,
    /// 자동 해결됨
    AutoResolved,
    /// 운영자 확인 필요 (에스컬레이션)
    Escalated,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::AutoResolved => "AUTO_RESOLVED",
            Self::Escalated => "ESCALATED",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// 불일치 레코드
// =============================================================================

/// 정합성 확인 중 발견된 하나의 불일치.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscrepancyRecord {
    /// 고유 ID
    pub id: Uuid,
    /// 심볼
    pub symbol: String,
    /// 복합 키 (소유자를 판별할 수 있는 경우)
    pub composite_key: Option<String>,
    /// 불일치 종류
    pub kind: DiscrepancyKind,
    /// 발견 시각
    pub detected_at: DateTime<Utc>,
    /// 해결 결과
    pub resolution: Resolution,
    /// 사람이 읽을 수 있는 상세 설명
    pub detail: String,
}

impl DiscrepancyRecord {
    /// 새 불일치 레코드 생성 (해결 결과 NONE).
    pub fn new(symbol: impl Into<String>, kind: DiscrepancyKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            composite_key: None,
            kind,
            detected_at: Utc::now(),
            resolution: Resolution::None,
            detail: String::new(),
        }
    }

    /// 복합 키 설정.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.composite_key = Some(key.into());
        self
    }

    /// 상세 설명 설정.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// 자동 해결로 표시.
    pub fn auto_resolved(mut self) -> Self {
        self.resolution = Resolution::AutoResolved;
        self
    }

    /// 에스컬레이션으로 표시.
    pub fn escalated(mut self) -> Self {
        self.resolution = Resolution::Escalated;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discrepancy_builder() {
        let record = DiscrepancyRecord::new("BTCUSDT", DiscrepancyKind::SizeMismatch)
            .with_key("BTCUSDT_TFPE")
            .with_detail("시스템 0.01, 거래소 0.02")
            .auto_resolved();

        assert_eq!(record.symbol, "BTCUSDT");
        assert_eq!(record.composite_key.as_deref(), Some("BTCUSDT_TFPE"));
        assert_eq!(record.resolution, Resolution::AutoResolved);
    }

    #[test]
    fn test_kind_serde_screaming_snake() {
        let json = serde_json::to_string(&DiscrepancyKind::MissingInSystem).unwrap();
        assert_eq!(json, "\"MISSING_IN_SYSTEM\"");

        let kind: DiscrepancyKind = serde_json::from_str("\"UNRESOLVED_OWNER\"").unwrap();
        assert_eq!(kind, DiscrepancyKind::UnresolvedOwner);
    }
}
