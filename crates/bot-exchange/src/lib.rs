//! 거래소 게이트웨이 추상화.
//!
//! 이 crate는 다음을 제공합니다:
//! - 거래소 중립 와이어 타입 (포지션, 주문, 잔고)
//! - `ExchangeGateway` trait 및 에러 계약
//! - 일시적 에러 재시도 유틸리티
//! - 테스트용 모의 게이트웨이

pub mod error;
pub mod gateway;
pub mod mock;
pub mod retry;
pub mod types;

// 주요 타입 재내보내기
pub use error::ExchangeError;
pub use gateway::ExchangeGateway;
pub use mock::MockGateway;
pub use retry::{with_retry, RetryConfig};
pub use types::{
    AccountBalance, ExchangePosition, FillStatus, OrderFill, OrderRequest, OrderType,
};
