//! 도메인 모델.

pub mod discrepancy;
pub mod position;

pub use discrepancy::{DiscrepancyKind, DiscrepancyRecord, Resolution};
pub use position::{Owner, PositionRecord, PositionStatus, Side, MANUAL_OWNER};
