//! 환경변수 기반 정합성 확인 설정.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// 정합성 확인 설정.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// 활성 포지션 존재 시 확인 주기
    pub fast_interval: Duration,
    /// 포지션 없을 때 확인 주기
    pub slow_interval: Duration,
    /// 수량 비교 허용 오차 (거래소 최소 주문 단위 수준)
    pub quantity_tolerance: Decimal,
    /// 이 횟수 연속 조회 실패 시 에스컬레이션
    pub max_consecutive_failures: u32,
    /// 불일치 이력 보관 한도
    pub history_limit: usize,
    /// 불일치 이력 저장 파일 경로 (None이면 메모리 전용)
    pub history_path: Option<PathBuf>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(60),
            slow_interval: Duration::from_secs(300),
            quantity_tolerance: dec!(0.0001),
            max_consecutive_failures: 5,
            history_limit: 100,
            history_path: Some(PathBuf::from("state/discrepancies.json")),
        }
    }
}

impl ReconcileConfig {
    /// 환경변수에서 설정을 생성합니다. 미설정 항목은 기본값 사용.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let history_path = match std::env::var("RECONCILE_HISTORY_PATH") {
            Ok(p) if p.is_empty() => None,
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => Some(PathBuf::from("state/discrepancies.json")),
        };

        Self {
            fast_interval: Duration::from_secs(env_var_parse("RECONCILE_FAST_INTERVAL_SECS", 60)),
            slow_interval: Duration::from_secs(env_var_parse("RECONCILE_SLOW_INTERVAL_SECS", 300)),
            quantity_tolerance: env_var_parse("RECONCILE_QTY_TOLERANCE", dec!(0.0001)),
            max_consecutive_failures: env_var_parse("RECONCILE_MAX_FAILURES", 5),
            history_limit: env_var_parse("RECONCILE_HISTORY_LIMIT", 100),
            history_path,
        }
    }

    /// 테스트용 메모리 전용 설정.
    pub fn in_memory() -> Self {
        Self {
            history_path: None,
            ..Default::default()
        }
    }
}

/// 환경변수 파싱 (실패 시 기본값)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.fast_interval, Duration::from_secs(60));
        assert_eq!(config.slow_interval, Duration::from_secs(300));
        assert_eq!(config.quantity_tolerance, dec!(0.0001));
        assert_eq!(config.history_limit, 100);
    }
}
