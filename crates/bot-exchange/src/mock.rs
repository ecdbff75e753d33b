//! 테스트용 모의 거래소 게이트웨이.
//!
//! 의존 crate의 통합 테스트에서도 쓰이므로 `cfg(test)` 없이 제공됩니다.
//! 포지션 목록, 체결 가격, 호출별 실패 주입을 프로그래밍할 수 있고
//! 제출된 주문을 모두 기록합니다.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::gateway::ExchangeGateway;
use crate::types::{AccountBalance, ExchangePosition, FillStatus, OrderFill, OrderRequest};

#[derive(Debug, Default)]
struct MockState {
    positions: HashMap<String, ExchangePosition>,
    mark_prices: HashMap<String, Decimal>,
    fetch_failures: VecDeque<ExchangeError>,
    order_failures: VecDeque<ExchangeError>,
    orders: Vec<OrderRequest>,
    balance: Option<AccountBalance>,
    next_order_id: u64,
    apply_fills: bool,
    order_delay: Option<std::time::Duration>,
}

/// 모의 거래소 게이트웨이.
#[derive(Debug)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// 빈 포지션 장부로 시작. 주문 체결이 장부에 반영됩니다.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                apply_fills: true,
                ..Default::default()
            }),
        }
    }

    /// 거래소 포지션 설정 (같은 심볼은 덮어씀).
    pub fn set_position(&self, position: ExchangePosition) {
        let mut state = self.state.lock().unwrap();
        state.positions.insert(position.symbol.clone(), position);
    }

    /// 거래소 포지션 제거.
    pub fn remove_position(&self, symbol: &str) {
        self.state.lock().unwrap().positions.remove(symbol);
    }

    /// 체결 가격 설정.
    pub fn set_mark_price(&self, symbol: impl Into<String>, price: Decimal) {
        self.state
            .lock()
            .unwrap()
            .mark_prices
            .insert(symbol.into(), price);
    }

    /// 다음 포지션 조회를 지정된 에러로 실패시킴 (호출마다 하나 소비).
    pub fn fail_next_fetch(&self, error: ExchangeError) {
        self.state.lock().unwrap().fetch_failures.push_back(error);
    }

    /// 다음 주문 제출을 지정된 에러로 실패시킴.
    pub fn fail_next_order(&self, error: ExchangeError) {
        self.state.lock().unwrap().order_failures.push_back(error);
    }

    /// 계좌 잔고 설정.
    pub fn set_balance(&self, balance: AccountBalance) {
        self.state.lock().unwrap().balance = Some(balance);
    }

    /// 주문 체결의 장부 반영 여부 (기본 true).
    pub fn set_apply_fills(&self, apply: bool) {
        self.state.lock().unwrap().apply_fills = apply;
    }

    /// 주문 처리 전 지연 (체결 확인 타임아웃 검증용).
    pub fn set_order_delay(&self, delay: std::time::Duration) {
        self.state.lock().unwrap().order_delay = Some(delay);
    }

    /// 기록된 주문 전체.
    pub fn recorded_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().orders.clone()
    }

    fn apply_fill(state: &mut MockState, request: &OrderRequest, fill_price: Decimal) {
        if request.reduce_only {
            // 청산: 수량 차감, 전량 청산 시 제거
            if let Some(pos) = state.positions.get_mut(&request.symbol) {
                pos.quantity -= request.quantity;
                if pos.quantity <= Decimal::ZERO {
                    state.positions.remove(&request.symbol);
                }
            }
        } else {
            match state.positions.get_mut(&request.symbol) {
                Some(pos) if pos.side == request.side => {
                    pos.quantity += request.quantity;
                }
                _ => {
                    let mut pos = ExchangePosition::new(
                        request.symbol.clone(),
                        request.side,
                        request.quantity,
                        fill_price,
                    );
                    pos.mark_price = Some(fill_price);
                    state.positions.insert(request.symbol.clone(), pos);
                }
            }
        }
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    fn exchange_name(&self) -> &str {
        "mock"
    }

    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fetch_failures.pop_front() {
            return Err(error);
        }
        Ok(state.positions.values().cloned().collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderFill, ExchangeError> {
        let delay = self.state.lock().unwrap().order_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.order_failures.pop_front() {
            return Err(error);
        }

        state.orders.push(request.clone());
        state.next_order_id += 1;
        let order_id = format!("mock-{}", state.next_order_id);

        let fill_price = state
            .mark_prices
            .get(&request.symbol)
            .copied()
            .or_else(|| {
                state
                    .positions
                    .get(&request.symbol)
                    .map(|p| p.entry_price)
            })
            .unwrap_or(Decimal::ZERO);

        if state.apply_fills {
            Self::apply_fill(&mut state, request, fill_price);
        }

        Ok(OrderFill {
            order_id,
            symbol: request.symbol.clone(),
            filled_quantity: request.quantity,
            avg_price: fill_price,
            status: FillStatus::Filled,
        })
    }

    async fn fetch_balance(&self) -> Result<AccountBalance, ExchangeError> {
        let state = self.state.lock().unwrap();
        Ok(state.balance.clone().unwrap_or(AccountBalance {
            total: Decimal::ZERO,
            available: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }))
    }
}
