//! 포지션 정합성 확인.
//!
//! 이 crate는 다음을 제공합니다:
//! - 거래소-시스템 포지션 비교 및 불일치 분류 엔진
//! - 안전한 자동 해결과 에스컬레이션 정책
//! - 바운디드 불일치 이력 로그
//! - 포지션 유무에 따라 주기가 달라지는 제어 루프

pub mod config;
pub mod engine;
pub mod history;

// 주요 타입 재내보내기
pub use config::ReconcileConfig;
pub use engine::{ReconcileReport, ReconciliationEngine, StrategyRoster};
pub use history::DiscrepancyLog;
