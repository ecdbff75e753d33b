//! 포지션 도메인 모델 및 상태 머신.
//!
//! 이 crate는 다음을 제공합니다:
//! - 포지션·불일치 도메인 타입
//! - `"{symbol}_{owner}"` 복합 키 생성 및 파싱
//! - 전환 화이트리스트 기반 포지션 상태 머신
//! - 공통 에러 타입
//!
//! # 예제
//!
//! ```rust,ignore
//! use bot_core::{make_key, Owner, PositionRecord, Side};
//! use rust_decimal_macros::dec;
//!
//! let record = PositionRecord::open(
//!     "BTCUSDT",
//!     Owner::strategy("TFPE"),
//!     Side::Long,
//!     dec!(0.01),
//!     dec!(50000),
//!     10,
//! );
//! assert_eq!(record.composite_key(), "BTCUSDT_TFPE");
//! ```

pub mod domain;
pub mod error;
pub mod key;
pub mod state_machine;

// 주요 타입 재내보내기
pub use domain::{
    DiscrepancyKind, DiscrepancyRecord, Owner, PositionRecord, PositionStatus, Resolution, Side,
    MANUAL_OWNER,
};
pub use error::{PositionError, Result};
pub use key::{group_by_symbol, is_legacy_key, make_key, parse_key, parse_key_with_default};
pub use state_machine::{PositionStateMachine, TransitionRecord};
