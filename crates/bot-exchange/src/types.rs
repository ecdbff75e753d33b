//! 거래소 중립 와이어 타입.

use bot_core::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// 포지션 스냅샷
// =============================================================================

/// 거래소가 보고하는 포지션 스냅샷.
///
/// 수량은 항상 양수이며 방향은 `side`로 표현합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangePosition {
    /// 심볼
    pub symbol: String,
    /// 방향
    pub side: Side,
    /// 수량 (절대값)
    pub quantity: Decimal,
    /// 평균 진입가
    pub entry_price: Decimal,
    /// 레버리지
    pub leverage: u32,
    /// 마크 가격
    pub mark_price: Option<Decimal>,
    /// 미실현 손익
    pub unrealized_pnl: Option<Decimal>,
    /// 조회 시각
    pub fetched_at: DateTime<Utc>,
}

impl ExchangePosition {
    pub fn new(symbol: impl Into<String>, side: Side, quantity: Decimal, entry_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            leverage: 1,
            mark_price: None,
            unrealized_pnl: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_mark_price(mut self, price: Decimal) -> Self {
        self.mark_price = Some(price);
        self
    }

    /// 부호 있는 수량 (Long 양수, Short 음수).
    pub fn signed_quantity(&self) -> Decimal {
        self.quantity * self.side.sign()
    }
}

// =============================================================================
// 주문
// =============================================================================

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// 주문 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// 심볼
    pub symbol: String,
    /// 방향 (청산 시 포지션 반대 방향)
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 수량
    pub quantity: Decimal,
    /// 지정가 (Limit 주문만)
    pub price: Option<Decimal>,
    /// 청산 전용 주문 여부 (포지션을 늘리지 않음)
    pub reduce_only: bool,
    /// 클라이언트 주문 ID (멱등성 보장용)
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// 시장가 진입 주문.
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    /// 시장가 청산 주문 (reduce-only).
    pub fn market_close(symbol: impl Into<String>, position_side: Side, quantity: Decimal) -> Self {
        Self {
            reduce_only: true,
            ..Self::market(symbol, position_side.flip(), quantity)
        }
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }
}

/// 체결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillStatus {
    Filled,
    PartiallyFilled,
    Rejected,
}

/// 주문 결과.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    /// 거래소 주문 ID
    pub order_id: String,
    /// 심볼
    pub symbol: String,
    /// 체결 수량
    pub filled_quantity: Decimal,
    /// 평균 체결가
    pub avg_price: Decimal,
    /// 체결 상태
    pub status: FillStatus,
}

// =============================================================================
// 계좌
// =============================================================================

/// 계좌 잔고 요약.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    /// 총 자산
    pub total: Decimal,
    /// 주문 가능 금액
    pub available: Decimal,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
}
