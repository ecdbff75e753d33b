//! 거래소 에러 타입.
//!
//! 모든 거래소 에러는 "주문·조회 결과를 알 수 없음"을 의미합니다.
//! 호출자는 에러를 성공으로도 실패로도 간주하지 않고, 다음 정합성
//! 확인에서 실제 상태를 확인해야 합니다. 맹목적 재제출 금지.

use thiserror::Error;

/// 거래소 접근 에러.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// 네트워크 연결 실패 (일시적)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// Rate Limit 초과 (일시적, 지정된 시간 후 재시도)
    #[error("Rate Limit 초과: {retry_after_ms}ms 후 재시도")]
    RateLimit { retry_after_ms: u64 },

    /// 인증 실패 (API 키 오류 등, 재시도 무의미)
    #[error("인증 실패: {0}")]
    Authentication(String),

    /// 거래소 API 에러
    #[error("API 에러 (code {code}): {message}")]
    Api { code: i64, message: String },

    /// 응답 파싱 실패
    #[error("응답 파싱 실패: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// 일시적 에러 여부. 일시적 에러만 재시도 대상입니다.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimit { .. } => true,
            // 거래소 내부 에러(5xx 계열)는 일시적으로 간주
            Self::Api { code, .. } => (500..600).contains(code),
            Self::Authentication(_) | Self::Parse(_) => false,
        }
    }

    /// 에러에 지정된 재시도 대기 시간 (ms).
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}
