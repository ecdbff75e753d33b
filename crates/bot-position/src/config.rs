//! 환경변수 기반 포지션 관리 설정.

use std::path::PathBuf;
use std::time::Duration;

use bot_core::Owner;

/// 포지션 관리 설정.
#[derive(Debug, Clone)]
pub struct PositionConfig {
    /// 포지션 저장 파일 경로 (None이면 메모리 전용)
    pub store_path: Option<PathBuf>,
    /// 체결 확인 타임아웃
    pub fill_timeout: Duration,
    /// 변경 시마다 즉시 저장 여부
    pub flush_on_mutation: bool,
    /// 청산 포지션 보존 기간
    pub closed_retention: Duration,
    /// 상태 전환 이력 보관 한도
    pub history_cap: usize,
    /// 소유자 미지정 레거시 호출의 기본 소유자
    pub default_owner: Owner,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            store_path: Some(PathBuf::from("state/positions.json")),
            fill_timeout: Duration::from_secs(10),
            flush_on_mutation: true,
            closed_retention: Duration::from_secs(30 * 24 * 3600),
            history_cap: 1000,
            default_owner: Owner::Manual,
        }
    }
}

impl PositionConfig {
    /// 환경변수에서 설정을 생성합니다. 미설정 항목은 기본값 사용.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let store_path = match std::env::var("POSITION_STORE_PATH") {
            Ok(p) if p.is_empty() => None,
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => Some(PathBuf::from("state/positions.json")),
        };

        Self {
            store_path,
            fill_timeout: Duration::from_secs(env_var_parse("POSITION_FILL_TIMEOUT_SECS", 10)),
            flush_on_mutation: env_var_bool("POSITION_FLUSH_ON_MUTATION", true),
            closed_retention: Duration::from_secs(
                env_var_parse::<u64>("POSITION_CLOSED_RETENTION_DAYS", 30) * 24 * 3600,
            ),
            history_cap: env_var_parse("POSITION_HISTORY_CAP", 1000),
            default_owner: Owner::strategy(
                std::env::var("POSITION_DEFAULT_OWNER").unwrap_or_else(|_| "MANUAL".to_string()),
            ),
        }
    }

    /// 테스트용 메모리 전용 설정.
    pub fn in_memory() -> Self {
        Self {
            store_path: None,
            flush_on_mutation: false,
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

/// 환경변수에서 bool 값 파싱
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
