//! 포지션 저장소 및 관리 파사드.
//!
//! 이 crate는 다음을 제공합니다:
//! - JSON 파일 영속화를 포함한 포지션 저장소
//! - 진입·청산·조회를 묶는 포지션 매니저
//! - 환경변수 기반 설정

pub mod config;
pub mod manager;
pub mod store;

// 주요 타입 재내보내기
pub use config::PositionConfig;
pub use manager::{OpenRequest, PositionManager};
pub use store::{PartialCloseClaim, PositionStore};
