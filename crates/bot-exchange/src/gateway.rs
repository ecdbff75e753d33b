//! 거래소 게이트웨이 추상화.
//!
//! 포지션 관리와 정합성 확인이 거래소 중립적으로 동작하도록 하는
//! 인터페이스입니다. 에러 계약이 핵심입니다: 모든 `ExchangeError`는
//! "결과를 알 수 없음"을 의미하며, 호출자는 주문이 접수되었다고도
//! 접수되지 않았다고도 가정하지 않습니다. 실제 상태는 다음 정합성
//! 확인에서 거래소 스냅샷으로 확정됩니다.

use async_trait::async_trait;

use crate::error::ExchangeError;
use crate::types::{AccountBalance, ExchangePosition, OrderFill, OrderRequest};

/// 거래소 게이트웨이 trait.
///
/// # 구현 예시
///
/// ```ignore
/// pub struct BinanceFuturesGateway {
///     client: reqwest::Client,
/// }
///
/// #[async_trait]
/// impl ExchangeGateway for BinanceFuturesGateway {
///     async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
///         // REST API 호출 및 변환
///     }
///
///     // ... 나머지 메서드 구현
/// }
/// ```
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// 거래소 이름 (로그·알림 표기용).
    fn exchange_name(&self) -> &str;

    /// 현재 보유 포지션 전체 조회.
    ///
    /// 수량이 0인 포지션은 포함하지 않습니다. 포지션이 없으면 빈 벡터.
    ///
    /// # Errors
    ///
    /// - `ExchangeError::Network`: 네트워크 연결 실패
    /// - `ExchangeError::RateLimit`: 요청 한도 초과
    /// - `ExchangeError::Api`: 거래소 API 에러
    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;

    /// 특정 심볼 포지션 조회. 없으면 `None`.
    async fn fetch_position(
        &self,
        symbol: &str,
    ) -> Result<Option<ExchangePosition>, ExchangeError> {
        let positions = self.fetch_positions().await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }

    /// 주문 제출.
    ///
    /// # Errors
    ///
    /// 에러 반환 시 주문 접수 여부를 알 수 없습니다. 재제출하지 말고
    /// 정합성 확인으로 실제 상태를 확인해야 합니다.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderFill, ExchangeError>;

    /// 계좌 잔고 조회.
    async fn fetch_balance(&self) -> Result<AccountBalance, ExchangeError>;
}
