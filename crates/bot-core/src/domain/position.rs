//! 포지션 도메인 타입 정의.
//!
//! 전략별·수동 포지션을 하나의 일관된 모델로 표현합니다.
//! 같은 심볼이라도 소유자(owner)가 다르면 독립된 포지션으로 취급하며,
//! 복합 키(`"{symbol}_{owner}"`)가 저장소 내 유일한 식별자입니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::key;

// =============================================================================
// 방향 (Side)
// =============================================================================

/// 포지션 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// 롱 (매수)
    Long,
    /// 숏 (매도)
    Short,
}

impl Side {
    /// 반대 방향 반환 (청산 주문용).
    pub fn flip(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// 부호 반환 (롱 +1, 숏 -1).
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => -Decimal::ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

// =============================================================================
// 소유자 (Owner)
// =============================================================================

/// 포지션 소유자.
///
/// 전략 식별자 또는 수동 거래를 나타내는 센티널 `MANUAL`입니다.
/// 직렬화 시 단순 문자열로 표현되며, `"MANUAL"`은 항상 `Owner::Manual`로
/// 역직렬화됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Owner {
    /// 수동 거래 (봇 외부에서 열린 포지션)
    Manual,
    /// 전략 식별자 (예: "TFPE", "ZLMACD")
    Strategy(String),
}

/// 수동 소유자 센티널 문자열.
pub const MANUAL_OWNER: &str = "MANUAL";

impl Owner {
    /// 전략 소유자 생성.
    pub fn strategy(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == MANUAL_OWNER {
            Self::Manual
        } else {
            Self::Strategy(name)
        }
    }

    /// 수동 소유자 여부.
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }

    /// 문자열 표현 반환.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Manual => MANUAL_OWNER,
            Self::Strategy(name) => name,
        }
    }
}

impl From<String> for Owner {
    fn from(value: String) -> Self {
        Self::strategy(value)
    }
}

impl From<Owner> for String {
    fn from(owner: Owner) -> Self {
        owner.as_str().to_string()
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Owner {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::strategy(s))
    }
}

// =============================================================================
// 포지션 상태
// =============================================================================

/// 포지션 생명주기 상태.
///
/// 전환 규칙은 `state_machine` 모듈에서 중앙 집중적으로 강제됩니다.
/// 직렬화 표현은 대문자 문자열 하나뿐이며, 저장소의 load/flush 경계에서만
/// 바이트로 변환됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    /// 주문 대기중
    Pending,
    /// 주문 제출, 체결 확인 대기중
    Opening,
    /// 활성 포지션
    Active,
    /// 수정됨 (부분 청산 또는 크기 보정)
    Modified,
    /// 청산 진행중
    Closing,
    /// 청산 완료 (종료 상태)
    Closed,
    /// 체결 실패 또는 타임아웃 (종료 상태, CLOSED와 구분)
    Failed,
}

impl PositionStatus {
    /// 열린 상태 여부 (거래소 노출이 있다고 믿는 상태).
    ///
    /// 정합성 확인과 중복 진입 방지의 기준 집합입니다.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Opening | Self::Active | Self::Modified)
    }

    /// 종료 상태 여부.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// 문자열 표현 반환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Opening => "OPENING",
            Self::Active => "ACTIVE",
            Self::Modified => "MODIFIED",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// 포지션 레코드
// =============================================================================

/// 하나의 보유 노출(exposure)을 나타내는 레코드.
///
/// 같은 심볼에 여러 소유자가 동시에 포지션을 가질 수 있습니다.
/// 이는 엣지 케이스가 아니라 데이터 모델의 핵심 불변식입니다.
/// `quantity`는 항상 양수이며 방향은 `side`가 담당합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    /// 거래소 네이티브 심볼 (예: "BTCUSDT")
    pub symbol: String,
    /// 소유자 (전략 또는 MANUAL)
    pub owner: Owner,
    /// 방향
    pub side: Side,
    /// 수량 (항상 양수)
    pub quantity: Decimal,
    /// 진입가
    pub entry_price: Decimal,
    /// 레버리지
    pub leverage: u32,
    /// 생명주기 상태
    pub status: PositionStatus,
    /// 수동 포지션 여부 (생성 시 한 번 결정, 이후 불변)
    pub is_manual: bool,
    /// 진입 시각
    pub opened_at: DateTime<Utc>,
    /// 마지막 정합성 확인 시각
    pub last_synced_at: DateTime<Utc>,
    /// 손절가 (선택)
    pub stop_loss: Option<Decimal>,
    /// 익절가 (선택)
    pub take_profit: Option<Decimal>,
    /// 초기 수량 (부분 청산 추적용)
    pub initial_quantity: Decimal,
    /// 부분 청산 횟수
    pub partial_closes: u32,
    /// 청산가 (CLOSED 이후)
    pub exit_price: Option<Decimal>,
    /// 청산 사유 (CLOSED 이후)
    pub close_reason: Option<String>,
    /// 청산 시각 (CLOSED 이후)
    pub closed_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    /// 새 포지션 레코드 생성 (PENDING 상태).
    pub fn open(
        symbol: impl Into<String>,
        owner: Owner,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: u32,
    ) -> Self {
        let now = Utc::now();
        let is_manual = owner.is_manual();
        Self {
            symbol: symbol.into(),
            owner,
            side,
            quantity,
            entry_price,
            leverage,
            status: PositionStatus::Pending,
            is_manual,
            opened_at: now,
            last_synced_at: now,
            stop_loss: None,
            take_profit: None,
            initial_quantity: quantity,
            partial_closes: 0,
            exit_price: None,
            close_reason: None,
            closed_at: None,
        }
    }

    /// 손절가 설정.
    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.stop_loss = Some(price);
        self
    }

    /// 익절가 설정.
    pub fn with_take_profit(mut self, price: Decimal) -> Self {
        self.take_profit = Some(price);
        self
    }

    /// 복합 키 반환.
    pub fn composite_key(&self) -> String {
        key::make_key(&self.symbol, &self.owner)
    }

    /// 부호 있는 수량 (롱 양수, 숏 음수).
    pub fn signed_quantity(&self) -> Decimal {
        self.side.sign() * self.quantity
    }

    /// 미실현 손익률 (%).
    ///
    /// 진입가가 0이면 None을 반환합니다 (레코드 손상 방어).
    pub fn unrealized_pnl_pct(&self, current_price: Decimal) -> Option<Decimal> {
        if self.entry_price.is_zero() {
            return None;
        }
        let raw = (current_price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED;
        Some(match self.side {
            Side::Long => raw,
            Side::Short => -raw,
        })
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_owner_manual_sentinel() {
        assert_eq!(Owner::strategy("MANUAL"), Owner::Manual);
        assert!(Owner::Manual.is_manual());
        assert!(!Owner::strategy("TFPE").is_manual());
        assert_eq!(Owner::strategy("TFPE").as_str(), "TFPE");
    }

    #[test]
    fn test_owner_serde_as_plain_string() {
        let json = serde_json::to_string(&Owner::strategy("ZLMACD")).unwrap();
        assert_eq!(json, "\"ZLMACD\"");

        let owner: Owner = serde_json::from_str("\"MANUAL\"").unwrap();
        assert_eq!(owner, Owner::Manual);
    }

    #[test]
    fn test_status_serde_uppercase() {
        let json = serde_json::to_string(&PositionStatus::Active).unwrap();
        assert_eq!(json, "\"ACTIVE\"");

        let status: PositionStatus = serde_json::from_str("\"CLOSED\"").unwrap();
        assert_eq!(status, PositionStatus::Closed);
    }

    #[test]
    fn test_status_classification() {
        assert!(PositionStatus::Active.is_open());
        assert!(PositionStatus::Opening.is_open());
        assert!(PositionStatus::Modified.is_open());
        assert!(!PositionStatus::Pending.is_open());
        assert!(!PositionStatus::Closing.is_open());
        assert!(PositionStatus::Closed.is_terminal());
        assert!(PositionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_signed_quantity() {
        let long = PositionRecord::open(
            "BTCUSDT",
            Owner::strategy("TFPE"),
            Side::Long,
            dec!(0.01),
            dec!(50000),
            10,
        );
        let short = PositionRecord::open(
            "BTCUSDT",
            Owner::strategy("ZLMACD"),
            Side::Short,
            dec!(0.02),
            dec!(50000),
            8,
        );
        assert_eq!(long.signed_quantity(), dec!(0.01));
        assert_eq!(short.signed_quantity(), dec!(-0.02));
    }

    #[test]
    fn test_unrealized_pnl_pct() {
        let long = PositionRecord::open(
            "ETHUSDT",
            Owner::strategy("TFPE"),
            Side::Long,
            dec!(1),
            dec!(2000),
            5,
        );
        assert_eq!(long.unrealized_pnl_pct(dec!(2200)), Some(dec!(10)));

        let short = PositionRecord::open(
            "ETHUSDT",
            Owner::Manual,
            Side::Short,
            dec!(1),
            dec!(2000),
            5,
        );
        assert_eq!(short.unrealized_pnl_pct(dec!(2200)), Some(dec!(-10)));
    }

    #[test]
    fn test_record_serde_round_trip() {
        let record = PositionRecord::open(
            "BTCUSDT",
            Owner::strategy("TFPE"),
            Side::Long,
            dec!(0.01),
            dec!(50000),
            10,
        )
        .with_stop_loss(dec!(48000))
        .with_take_profit(dec!(55000));

        let json = serde_json::to_string(&record).unwrap();
        let restored: PositionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.composite_key(), "BTCUSDT_TFPE");
        assert_eq!(restored.status, PositionStatus::Pending);
        assert_eq!(restored.stop_loss, Some(dec!(48000)));
        assert!(!restored.is_manual);
    }

    #[test]
    fn test_manual_flag_set_at_creation() {
        let record = PositionRecord::open(
            "ETHUSDT",
            Owner::Manual,
            Side::Long,
            dec!(0.5),
            dec!(2000),
            3,
        );
        assert!(record.is_manual);
        assert_eq!(record.composite_key(), "ETHUSDT_MANUAL");
    }
}
