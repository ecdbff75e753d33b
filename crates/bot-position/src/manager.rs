//! 포지션 매니저 파사드.
//!
//! 전략·수동 호출자가 포지션을 열고 닫는 유일한 진입점입니다.
//! 저장소의 원자적 등록으로 중복 진입을 차단하고, 주문 제출과 체결
//! 확인, 상태 전환, 알림 발행을 한 흐름으로 묶습니다.

use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use bot_core::{
    make_key, Owner, PositionError, PositionRecord, PositionStatus, Result, Side,
    TransitionRecord,
};
use bot_exchange::{ExchangeGateway, FillStatus, OrderRequest};
use bot_notification::{NotificationEvent, NotificationManager};

use crate::config::PositionConfig;
use crate::store::PositionStore;

/// 진입 요청.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub owner: Owner,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl OpenRequest {
    pub fn new(
        symbol: impl Into<String>,
        owner: Owner,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            owner,
            side,
            quantity,
            entry_price,
            leverage,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: Decimal) -> Self {
        self.take_profit = Some(price);
        self
    }
}

/// 포지션 매니저.
pub struct PositionManager {
    store: Arc<PositionStore>,
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<NotificationManager>,
    config: PositionConfig,
}

impl PositionManager {
    pub fn new(
        store: Arc<PositionStore>,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<NotificationManager>,
        config: PositionConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            config,
        }
    }

    /// 저장소 핸들 (정합성 엔진 공유용).
    pub fn store(&self) -> Arc<PositionStore> {
        self.store.clone()
    }

    // =========================================================================
    // 진입
    // =========================================================================

    /// 포지션 진입.
    ///
    /// 같은 복합 키에 열린 레코드가 있으면 덮어쓰지 않고
    /// `DuplicateActivePosition`으로 거부합니다. 주문 제출 후 체결
    /// 확인이 타임아웃되면 레코드는 FAILED로 남고 `FillTimeout`을
    /// 반환합니다.
    pub async fn open_position(&self, request: OpenRequest) -> Result<PositionRecord> {
        let mut record = PositionRecord::open(
            &request.symbol,
            request.owner.clone(),
            request.side,
            request.quantity,
            request.entry_price,
            request.leverage,
        );
        record.stop_loss = request.stop_loss;
        record.take_profit = request.take_profit;
        let key = record.composite_key();

        // 원자적 중복 진입 차단
        self.store.insert_new(record).await?;
        self.store
            .transition(&key, PositionStatus::Opening, "주문 제출")
            .await?;

        let order = OrderRequest::market(&request.symbol, request.side, request.quantity)
            .with_client_order_id(&key);

        let fill = match tokio::time::timeout(
            self.config.fill_timeout,
            self.gateway.place_order(&order),
        )
        .await
        {
            Ok(Ok(fill)) => fill,
            Ok(Err(e)) => {
                self.fail_position(&key, &request, &format!("주문 제출 실패: {e}"))
                    .await;
                return Err(PositionError::ExchangeUnavailable {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.fail_position(&key, &request, "체결 확인 타임아웃").await;
                return Err(PositionError::FillTimeout { key });
            }
        };

        if fill.status == FillStatus::Rejected {
            self.fail_position(&key, &request, "주문 거부").await;
            return Err(PositionError::ExchangeUnavailable {
                reason: format!("주문 거부: {}", fill.order_id),
            });
        }

        // 실제 체결 값으로 레코드 보정
        self.store
            .update(&key, |r| {
                if fill.filled_quantity > Decimal::ZERO {
                    r.quantity = fill.filled_quantity;
                    r.initial_quantity = fill.filled_quantity;
                }
                if fill.avg_price > Decimal::ZERO {
                    r.entry_price = fill.avg_price;
                }
            })
            .await?;
        let record = self
            .store
            .transition(&key, PositionStatus::Active, "체결 확인")
            .await?;

        info!(key = %key, quantity = %record.quantity, "포지션 진입 완료");
        self.notifier
            .notify(NotificationEvent::PositionOpened {
                symbol: record.symbol.clone(),
                owner: record.owner.as_str().to_string(),
                side: record.side,
                quantity: record.quantity,
                entry_price: record.entry_price,
                leverage: record.leverage,
            })
            .await;

        Ok(record)
    }

    async fn fail_position(&self, key: &str, request: &OpenRequest, reason: &str) {
        warn!(key = %key, reason = %reason, "포지션 진입 실패 처리");
        if let Err(e) = self
            .store
            .transition(key, PositionStatus::Failed, reason)
            .await
        {
            warn!(key = %key, error = %e, "FAILED 전환 실패");
        }
        self.notifier
            .notify(NotificationEvent::PositionFailed {
                symbol: request.symbol.clone(),
                owner: request.owner.as_str().to_string(),
                reason: reason.to_string(),
            })
            .await;
    }

    // =========================================================================
    // 청산
    // =========================================================================

    /// 포지션 청산 (전량 또는 부분).
    ///
    /// `fraction == 1`이면 전량 청산: 레코드를 CLOSING으로 선점한 뒤
    /// reduce-only 주문을 제출합니다. 경합한 두 번째 호출자는
    /// `InvalidTransition` 또는 `PositionNotFound`로 집니다. 주문
    /// 실패 시 ACTIVE로 롤백됩니다.
    ///
    /// `fraction < 1`이면 부분 청산: 수량을 줄이고 MODIFIED로
    /// 전환합니다.
    ///
    /// 소유자를 생략하면 해당 심볼의 수동이 아닌 첫 레코드를
    /// 대상으로 합니다. 수동 포지션은 `Owner::Manual`을 명시한
    /// 호출로만 청산할 수 있습니다.
    pub async fn close_position(
        &self,
        symbol: &str,
        owner: Option<&Owner>,
        reason: &str,
        exit_price: Option<Decimal>,
        fraction: Decimal,
    ) -> Result<PositionRecord> {
        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            return Err(PositionError::InvalidFraction { value: fraction });
        }

        let key = match owner {
            Some(owner) => make_key(symbol, owner),
            None => self.resolve_strategy_key(symbol).await?,
        };

        if fraction < Decimal::ONE {
            self.partial_close(&key, reason, fraction).await
        } else {
            self.full_close(&key, reason, exit_price).await
        }
    }

    /// 소유자 미지정 청산의 대상 키 결정 (수동 레코드 제외).
    async fn resolve_strategy_key(&self, symbol: &str) -> Result<String> {
        warn!(symbol = %symbol, "소유자 미지정 청산 요청");
        let candidates: Vec<String> = self
            .store
            .list_active(None)
            .await
            .iter()
            .filter(|r| r.symbol == symbol && !r.owner.is_manual())
            .map(|r| r.composite_key())
            .collect();
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| PositionError::PositionNotFound {
                key: make_key(symbol, &Owner::Manual),
            })
    }

    async fn full_close(
        &self,
        key: &str,
        reason: &str,
        exit_price: Option<Decimal>,
    ) -> Result<PositionRecord> {
        // 경합 차단: CLOSING 선점에 성공한 호출자만 주문을 제출.
        // 주문 수량은 선점 시점의 레코드에서 읽음 (스냅샷 아님)
        let claimed = self
            .store
            .transition(key, PositionStatus::Closing, reason)
            .await?;

        let order = OrderRequest::market_close(&claimed.symbol, claimed.side, claimed.quantity);
        let fill = match self.gateway.place_order(&order).await {
            Ok(fill) => fill,
            Err(e) => {
                // 주문 실패: 레코드를 되살려 다음 시도를 허용
                warn!(key = %key, error = %e, "청산 주문 실패, ACTIVE 롤백");
                self.store
                    .transition(key, PositionStatus::Active, "청산 주문 실패 롤백")
                    .await?;
                return Err(PositionError::ExchangeUnavailable {
                    reason: e.to_string(),
                });
            }
        };

        let exit = exit_price.or(if fill.avg_price > Decimal::ZERO {
            Some(fill.avg_price)
        } else {
            None
        });
        let closed = self.store.close(key, reason, exit).await?;

        self.notifier
            .notify(NotificationEvent::PositionClosed {
                symbol: closed.symbol.clone(),
                owner: closed.owner.as_str().to_string(),
                side: closed.side,
                quantity: closed.quantity,
                entry_price: closed.entry_price,
                exit_price: exit.unwrap_or(closed.entry_price),
                reason: reason.to_string(),
            })
            .await;

        Ok(closed)
    }

    async fn partial_close(
        &self,
        key: &str,
        reason: &str,
        fraction: Decimal,
    ) -> Result<PositionRecord> {
        // 경합 차단: 하나의 쓰기 락 안에서 수량 차감과 MODIFIED 전환을
        // 선점한 호출자만 주문을 제출. 경합한 호출자는 차감된 수량을
        // 기준으로 예약하므로 수량이 음수가 될 수 없음
        let claim = self
            .store
            .reserve_partial_close(key, fraction, reason)
            .await?;

        let order =
            OrderRequest::market_close(&claim.record.symbol, claim.record.side, claim.close_quantity);
        if let Err(e) = self.gateway.place_order(&order).await {
            warn!(key = %key, error = %e, "부분 청산 주문 실패, 예약 롤백");
            self.store
                .cancel_partial_close(key, &claim, "부분 청산 주문 실패 롤백")
                .await;
            return Err(PositionError::ExchangeUnavailable {
                reason: e.to_string(),
            });
        }

        let updated = claim.record;
        let detail = format!(
            "부분 청산 {} ({fraction} 비율), 잔여 {}",
            claim.close_quantity, updated.quantity
        );
        info!(key = %key, detail = %detail, "부분 청산 완료");
        self.notifier
            .notify(NotificationEvent::PositionModified {
                symbol: updated.symbol.clone(),
                owner: updated.owner.as_str().to_string(),
                detail,
            })
            .await;

        Ok(updated)
    }

    // =========================================================================
    // 조회
    // =========================================================================

    /// 열린 포지션 목록.
    pub async fn get_active_positions(&self, owner: Option<&Owner>) -> Vec<PositionRecord> {
        self.store.list_active(owner).await
    }

    /// 포지션 조회 (소유자 생략 시 호환 경로).
    pub async fn get_position(&self, symbol: &str, owner: Option<&Owner>) -> Option<PositionRecord> {
        self.store.get(symbol, owner).await
    }

    /// 상태 전환 이력.
    pub async fn transition_history(&self, key: &str) -> Vec<TransitionRecord> {
        self.store.transition_history(key).await
    }

    /// 현재 포지션을 보유한 전략 소유자 목록 (수동 제외).
    pub async fn active_strategies(&self) -> Vec<String> {
        let owners: BTreeSet<String> = self
            .store
            .list_active(None)
            .await
            .iter()
            .filter(|r| !r.owner.is_manual())
            .map(|r| r.owner.as_str().to_string())
            .collect();
        owners.into_iter().collect()
    }
}
