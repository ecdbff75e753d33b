//! 복합 포지션 키 유틸리티.
//!
//! 같은 심볼에 대해 서로 다른 전략과 수동 거래가 독립 포지션을 가질 수
//! 있도록 `"{symbol}_{owner}"` 형식의 복합 키를 생성·파싱합니다.
//!
//! 소유자 접미사가 없는 레거시 키(심볼만 있는 경우)는 지정된 기본
//! 소유자에게 귀속시키는 하위 호환 정책을 따릅니다. 이는 조용한 데이터
//! 손실이 아니라 감사 가능한 정책이므로, 모든 레거시 파싱은 경고
//! 로그를 남깁니다.

use std::collections::HashMap;

use tracing::{error, warn};

use crate::domain::Owner;
use crate::error::{PositionError, Result};

/// 심볼과 소유자를 구분하는 예약 구분자.
pub const SEPARATOR: char = '_';

/// 복합 키 생성.
///
/// # Examples
///
/// ```
/// use bot_core::domain::Owner;
/// use bot_core::key::make_key;
///
/// assert_eq!(make_key("BTCUSDT", &Owner::strategy("TFPE")), "BTCUSDT_TFPE");
/// assert_eq!(make_key("ETHUSDT", &Owner::Manual), "ETHUSDT_MANUAL");
/// ```
pub fn make_key(symbol: &str, owner: &Owner) -> String {
    format!("{}{}{}", symbol, SEPARATOR, owner.as_str())
}

/// 복합 키 파싱. 레거시 키는 `Owner::Manual`에 귀속됩니다.
///
/// # Errors
///
/// 빈 키, 심볼 또는 소유자 부분이 비어 있는 키는
/// `PositionError::KeyFormat`을 반환합니다.
pub fn parse_key(key: &str) -> Result<(String, Owner)> {
    parse_key_with_default(key, &Owner::Manual)
}

/// 기본 소유자를 지정한 복합 키 파싱.
///
/// 구분자가 없는 레거시 키는 `default_owner`에 귀속되며 경고 로그를
/// 남깁니다. 첫 번째 구분자에서만 분할하므로 소유자 이름에는 구분자가
/// 포함될 수 있지만 심볼에는 포함될 수 없습니다.
pub fn parse_key_with_default(key: &str, default_owner: &Owner) -> Result<(String, Owner)> {
    if key.is_empty() {
        return Err(PositionError::KeyFormat {
            raw: key.to_string(),
        });
    }

    match key.split_once(SEPARATOR) {
        None => {
            // 레거시 키 (심볼만 있는 경우): 감사 가능하도록 반드시 기록
            warn!(
                key = %key,
                default_owner = %default_owner,
                "레거시 포지션 키 감지, 기본 소유자에 귀속"
            );
            Ok((key.to_string(), default_owner.clone()))
        }
        Some((symbol, owner)) => {
            if symbol.is_empty() || owner.is_empty() {
                return Err(PositionError::KeyFormat {
                    raw: key.to_string(),
                });
            }
            Ok((symbol.to_string(), Owner::strategy(owner)))
        }
    }
}

/// 레거시 키(소유자 접미사 없음) 여부.
pub fn is_legacy_key(key: &str) -> bool {
    !key.contains(SEPARATOR)
}

/// 키 목록을 심볼별로 그룹핑.
///
/// 파싱할 수 없는 키는 에러 로그를 남기고 건너뜁니다.
pub fn group_by_symbol(keys: &[String]) -> HashMap<String, Vec<Owner>> {
    let mut grouped: HashMap<String, Vec<Owner>> = HashMap::new();

    for key in keys {
        match parse_key(key) {
            Ok((symbol, owner)) => {
                grouped.entry(symbol).or_default().push(owner);
            }
            Err(e) => {
                error!(key = %key, error = %e, "그룹핑 중 잘못된 키, 건너뜀");
            }
        }
    }

    grouped
}

// =============================================================================
// 테스트
// =============================================================================
