//! 포지션 상태 머신.
//!
//! 허용된 전환 화이트리스트를 검증하고, 모든 전환(강제 전환 포함)을
//! 바운디드 이력으로 기록합니다. 화이트리스트에 없는 전환 요청은
//! 저장 상태를 바꾸지 않고 `InvalidTransition`으로 거부됩니다.
//!
//! CLOSING → ACTIVE 전환은 청산 주문 실패 시 롤백 경로로 허용됩니다.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::PositionStatus;
use crate::error::{PositionError, Result};

/// 전환 이력 기본 보관 한도.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// 허용된 상태 전환 화이트리스트.
const ALLOWED: &[(PositionStatus, PositionStatus)] = &[
    (PositionStatus::Pending, PositionStatus::Opening),
    (PositionStatus::Pending, PositionStatus::Failed),
    (PositionStatus::Opening, PositionStatus::Active),
    (PositionStatus::Opening, PositionStatus::Failed),
    (PositionStatus::Active, PositionStatus::Modified),
    (PositionStatus::Active, PositionStatus::Closing),
    (PositionStatus::Active, PositionStatus::Closed),
    (PositionStatus::Modified, PositionStatus::Active),
    (PositionStatus::Modified, PositionStatus::Modified),
    (PositionStatus::Modified, PositionStatus::Closing),
    (PositionStatus::Modified, PositionStatus::Closed),
    (PositionStatus::Closing, PositionStatus::Closed),
    (PositionStatus::Closing, PositionStatus::Failed),
    // 청산 주문 실패 시 롤백
    (PositionStatus::Closing, PositionStatus::Active),
];

/// 전환 허용 여부.
pub fn is_allowed(from: PositionStatus, to: PositionStatus) -> bool {
    ALLOWED.contains(&(from, to))
}

// =============================================================================
// 전환 이력
// =============================================================================

/// 하나의 상태 전환 기록.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// 복합 키
    pub key: String,
    /// 이전 상태
    pub from: PositionStatus,
    /// 새 상태
    pub to: PositionStatus,
    /// 전환 시각
    pub at: DateTime<Utc>,
    /// 강제 전환 여부 (화이트리스트 우회)
    pub forced: bool,
    /// 전환 사유
    pub reason: String,
}

// =============================================================================
// 상태 머신
// =============================================================================

/// 포지션 상태 전환 검증기 겸 이력 기록기.
#[derive(Debug)]
pub struct PositionStateMachine {
    history: VecDeque<TransitionRecord>,
    history_limit: usize,
}

impl Default for PositionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStateMachine {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(limit.min(64)),
            history_limit: limit.max(1),
        }
    }

    /// 상태 전환 시도.
    ///
    /// 허용된 전환이면 이력에 기록하고 새 상태를 반환합니다.
    ///
    /// # Errors
    ///
    /// 화이트리스트에 없는 전환은 `PositionError::InvalidTransition`을
    /// 반환하며 이력에 기록되지 않습니다.
    pub fn transition(
        &mut self,
        key: &str,
        from: PositionStatus,
        to: PositionStatus,
        reason: &str,
    ) -> Result<PositionStatus> {
        if !is_allowed(from, to) {
            warn!(
                key = %key,
                from = %from,
                to = %to,
                "허용되지 않은 상태 전환 거부"
            );
            return Err(PositionError::InvalidTransition {
                key: key.to_string(),
                from,
                to,
            });
        }

        debug!(key = %key, from = %from, to = %to, reason = %reason, "상태 전환");
        self.record(key, from, to, false, reason);
        Ok(to)
    }

    /// 강제 상태 전환 (화이트리스트 우회).
    ///
    /// 정합성 확인이 실제 거래소 상태에 맞추어 레코드를 재조정할 때만
    /// 사용합니다. 항상 forced 표시와 함께 이력에 남습니다.
    pub fn force(
        &mut self,
        key: &str,
        from: PositionStatus,
        to: PositionStatus,
        reason: &str,
    ) -> PositionStatus {
        warn!(key = %key, from = %from, to = %to, reason = %reason, "강제 상태 전환");
        self.record(key, from, to, true, reason);
        to
    }

    fn record(&mut self, key: &str, from: PositionStatus, to: PositionStatus, forced: bool, reason: &str) {
        if self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(TransitionRecord {
            key: key.to_string(),
            from,
            to,
            at: Utc::now(),
            forced,
            reason: reason.to_string(),
        });
    }

    /// 특정 키의 전환 이력 (오래된 순).
    pub fn history(&self, key: &str) -> Vec<&TransitionRecord> {
        self.history.iter().filter(|r| r.key == key).collect()
    }

    /// 최근 전환 이력 (최신 순, 최대 limit건).
    pub fn recent(&self, limit: usize) -> Vec<&TransitionRecord> {
        self.history.iter().rev().take(limit).collect()
    }

    /// 전체 이력 건수.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

// =============================================================================
// 테스트
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_lifecycle() {
        let mut sm = PositionStateMachine::new();
        let key = "BTCUSDT_TFPE";

        let mut status = PositionStatus::Pending;
        for next in [
            PositionStatus::Opening,
            PositionStatus::Active,
            PositionStatus::Modified,
            PositionStatus::Closing,
            PositionStatus::Closed,
        ] {
            status = sm.transition(key, status, next, "test").unwrap();
        }
        assert_eq!(status, PositionStatus::Closed);
        assert_eq!(sm.history(key).len(), 5);
    }

    #[test]
    fn test_terminal_states_reject_all_transitions() {
        let mut sm = PositionStateMachine::new();
        for from in [PositionStatus::Closed, PositionStatus::Failed] {
            for to in [
                PositionStatus::Pending,
                PositionStatus::Opening,
                PositionStatus::Active,
                PositionStatus::Modified,
                PositionStatus::Closing,
                PositionStatus::Closed,
                PositionStatus::Failed,
            ] {
                assert!(
                    sm.transition("BTCUSDT_TFPE", from, to, "test").is_err(),
                    "{from} → {to} 가 허용되어서는 안 됨"
                );
            }
        }
        assert!(sm.is_empty(), "거부된 전환은 이력에 남지 않아야 함");
    }

    #[test]
    fn test_closing_rollback_to_active() {
        let mut sm = PositionStateMachine::new();
        let status = sm
            .transition(
                "ETHUSDT_MANUAL",
                PositionStatus::Closing,
                PositionStatus::Active,
                "청산 주문 실패",
            )
            .unwrap();
        assert_eq!(status, PositionStatus::Active);
    }

    #[test]
    fn test_repeated_partial_close_stays_modified() {
        let mut sm = PositionStateMachine::new();
        let status = sm
            .transition(
                "BTCUSDT_TFPE",
                PositionStatus::Modified,
                PositionStatus::Modified,
                "partial close",
            )
            .unwrap();
        assert_eq!(status, PositionStatus::Modified);
    }

    #[test]
    fn test_invalid_transition_reports_states() {
        let mut sm = PositionStateMachine::new();
        let err = sm
            .transition(
                "BTCUSDT_TFPE",
                PositionStatus::Pending,
                PositionStatus::Active,
                "test",
            )
            .unwrap_err();
        match err {
            PositionError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, PositionStatus::Pending);
                assert_eq!(to, PositionStatus::Active);
            }
            other => panic!("예상 밖 에러: {other}"),
        }
    }

    #[test]
    fn test_force_bypasses_whitelist_and_marks_record() {
        let mut sm = PositionStateMachine::new();
        let status = sm.force(
            "BTCUSDT_TFPE",
            PositionStatus::Active,
            PositionStatus::Failed,
            "reconcile",
        );
        assert_eq!(status, PositionStatus::Failed);

        let history = sm.history("BTCUSDT_TFPE");
        assert_eq!(history.len(), 1);
        assert!(history[0].forced);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut sm = PositionStateMachine::with_history_limit(10);
        for i in 0..25 {
            let _ = sm.transition(
                &format!("SYM{i}_TFPE"),
                PositionStatus::Pending,
                PositionStatus::Opening,
                "test",
            );
        }
        assert_eq!(sm.len(), 10);
        // 가장 오래된 기록부터 밀려나야 함
        assert_eq!(sm.recent(1)[0].key, "SYM24_TFPE");
    }
}
