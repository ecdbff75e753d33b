//! 포지션 영속 저장소.
//!
//! 모든 열린 포지션 레코드를 복합 키로 관리하고 JSON 파일에 영속화
//! 합니다. 확인-후-변경 시퀀스는 전부 하나의 쓰기 락 안에서 수행되어
//! 중복 진입 경합이 원천적으로 불가능합니다. 상태 전환도 같은 락
//! 안에서 상태 머신을 거칩니다.
//!
//! 저장 파일은 이 저장소만 씁니다. 청산·실패로 종료된 레코드는
//! 삭제되지 않고 아카이브로 이동하며, 같은 키의 새 진입은 새 레코드
//! 인스턴스입니다.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use bot_core::{
    is_legacy_key, make_key, parse_key_with_default, Owner, PositionError, PositionRecord,
    PositionStateMachine, PositionStatus, Result, TransitionRecord,
};

use crate::config::PositionConfig;

/// 저장 파일 포맷 버전.
const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct StoreFile<'a> {
    version: u32,
    updated_at: DateTime<Utc>,
    records: &'a HashMap<String, PositionRecord>,
    archive: &'a Vec<PositionRecord>,
}

/// 로드 전용 포맷. 레코드 단위로 손상을 격리하기 위해 값은 지연 파싱.
#[derive(Debug, Deserialize)]
struct RawStoreFile {
    #[allow(dead_code)]
    version: u32,
    records: HashMap<String, serde_json::Value>,
    #[serde(default)]
    archive: Vec<serde_json::Value>,
}

#[derive(Debug)]
struct StoreInner {
    records: HashMap<String, PositionRecord>,
    archive: Vec<PositionRecord>,
    machine: PositionStateMachine,
}

/// 부분 청산 예약 결과.
///
/// 주문 제출 전 쓰기 락 안에서 차감된 수량과 예약 직전 상태를 담습니다.
/// 주문이 실패하면 `cancel_partial_close`에 그대로 돌려줍니다.
#[derive(Debug, Clone)]
pub struct PartialCloseClaim {
    /// 차감 반영 후 레코드 스냅샷
    pub record: PositionRecord,
    /// 청산 주문에 제출할 수량
    pub close_quantity: Decimal,
    /// 예약 직전 상태 (롤백 대상)
    pub prior_status: PositionStatus,
}

/// 포지션 저장소.
#[derive(Debug)]
pub struct PositionStore {
    inner: RwLock<StoreInner>,
    path: Option<PathBuf>,
    flush_on_mutation: bool,
    default_owner: Owner,
}

impl PositionStore {
    pub fn new(config: &PositionConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                records: HashMap::new(),
                archive: Vec::new(),
                machine: PositionStateMachine::with_history_limit(config.history_cap),
            }),
            path: config.store_path.clone(),
            flush_on_mutation: config.flush_on_mutation,
            default_owner: config.default_owner.clone(),
        }
    }

    /// 메모리 전용 저장소 (테스트용).
    pub fn in_memory() -> Self {
        Self::new(&PositionConfig::in_memory())
    }

    // =========================================================================
    // 영속화
    // =========================================================================

    /// 시작 시 저장 파일 로드.
    ///
    /// 개별 손상 레코드는 에러 로그 후 건너뜁니다 (fail-open).
    /// 파일 자체를 읽을 수 없으면 에러입니다 (fail-closed).
    ///
    /// # Returns
    ///
    /// 로드된 열린 레코드 수.
    pub async fn load(&self) -> Result<usize> {
        let Some(path) = &self.path else {
            return Ok(0);
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "저장 파일 없음, 빈 상태로 시작");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let raw: RawStoreFile = serde_json::from_slice(&bytes)?;
        let mut inner = self.inner.write().await;

        for (key, value) in raw.records {
            match serde_json::from_value::<PositionRecord>(value) {
                Ok(mut record) => {
                    // 소유자 접미사 없는 레거시 키는 설정된 기본 소유자로 재키잉
                    let key = if is_legacy_key(&key) {
                        match parse_key_with_default(&key, &self.default_owner) {
                            Ok((_, owner)) => {
                                record.is_manual = owner.is_manual();
                                record.owner = owner;
                                record.composite_key()
                            }
                            Err(e) => {
                                error!(key = %key, error = %e, "잘못된 저장 키 건너뜀");
                                continue;
                            }
                        }
                    } else {
                        key
                    };
                    inner.records.insert(key, record);
                }
                Err(e) => {
                    error!(key = %key, error = %e, "손상된 포지션 레코드 건너뜀");
                }
            }
        }
        for value in raw.archive {
            match serde_json::from_value::<PositionRecord>(value) {
                Ok(record) => inner.archive.push(record),
                Err(e) => {
                    error!(error = %e, "손상된 아카이브 레코드 건너뜀");
                }
            }
        }

        let loaded = inner.records.len();
        info!(loaded, archived = inner.archive.len(), "포지션 저장 파일 로드 완료");
        Ok(loaded)
    }

    /// 현재 상태를 저장 파일에 기록 (임시 파일 작성 후 원자적 교체).
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let inner = self.inner.read().await;
        let file = StoreFile {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            records: &inner.records,
            archive: &inner.archive,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        drop(inner);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "포지션 저장 완료");
        Ok(())
    }

    async fn flush_if_configured(&self) {
        if self.flush_on_mutation {
            if let Err(e) = self.flush().await {
                // 저장 실패가 거래 경로를 막아서는 안 됨
                error!(error = %e, "포지션 저장 실패");
            }
        }
    }

    // =========================================================================
    // 쓰기 경로
    // =========================================================================

    /// 새 레코드 등록 (원자적 중복 진입 차단).
    ///
    /// # Errors
    ///
    /// 같은 복합 키에 종료되지 않은 레코드가 있으면
    /// `DuplicateActivePosition`.
    pub async fn insert_new(&self, record: PositionRecord) -> Result<()> {
        let key = record.composite_key();
        {
            let mut inner = self.inner.write().await;
            if let Some(existing) = inner.records.get(&key) {
                if !existing.status.is_terminal() {
                    return Err(PositionError::DuplicateActivePosition { key });
                }
            }
            inner.records.insert(key, record);
        }
        self.flush_if_configured().await;
        Ok(())
    }

    /// 정합성 확인이 거래소 실상태로부터 구체화한 레코드 등록.
    ///
    /// 상태 머신에 강제 전환(PENDING → 지정 상태)으로 기록됩니다.
    pub async fn adopt(&self, mut record: PositionRecord, reason: &str) -> Result<()> {
        let key = record.composite_key();
        {
            let mut inner = self.inner.write().await;
            if let Some(existing) = inner.records.get(&key) {
                if !existing.status.is_terminal() {
                    return Err(PositionError::DuplicateActivePosition { key });
                }
            }
            record.status =
                inner
                    .machine
                    .force(&key, PositionStatus::Pending, PositionStatus::Active, reason);
            record.last_synced_at = Utc::now();
            inner.records.insert(key.clone(), record);
        }
        warn!(key = %key, reason = %reason, "거래소 포지션을 시스템 레코드로 구체화");
        self.flush_if_configured().await;
        Ok(())
    }

    /// 상태 전환 (화이트리스트 검증 포함).
    ///
    /// 종결 상태로 전환되면 레코드를 아카이브로 이동합니다.
    pub async fn transition(
        &self,
        key: &str,
        to: PositionStatus,
        reason: &str,
    ) -> Result<PositionRecord> {
        let result = {
            let mut inner = self.inner.write().await;
            let record = inner
                .records
                .get(key)
                .cloned()
                .ok_or_else(|| PositionError::PositionNotFound {
                    key: key.to_string(),
                })?;

            inner.machine.transition(key, record.status, to, reason)?;

            let record = inner.records.get_mut(key).unwrap();
            record.status = to;
            let snapshot = record.clone();
            if to.is_terminal() {
                let archived = inner.records.remove(key).unwrap();
                inner.archive.push(archived);
            }
            snapshot
        };
        self.flush_if_configured().await;
        Ok(result)
    }

    /// 강제 상태 전환 (정합성 확인 전용, 화이트리스트 우회).
    pub async fn force_status(
        &self,
        key: &str,
        to: PositionStatus,
        reason: &str,
    ) -> Result<PositionRecord> {
        let result = {
            let mut inner = self.inner.write().await;
            let from = inner
                .records
                .get(key)
                .map(|r| r.status)
                .ok_or_else(|| PositionError::PositionNotFound {
                    key: key.to_string(),
                })?;

            inner.machine.force(key, from, to, reason);
            let record = inner.records.get_mut(key).unwrap();
            record.status = to;
            let snapshot = record.clone();
            if to.is_terminal() {
                let archived = inner.records.remove(key).unwrap();
                inner.archive.push(archived);
            }
            snapshot
        };
        self.flush_if_configured().await;
        Ok(result)
    }

    /// 쓰기 락 안에서 레코드 수정.
    pub async fn update<F>(&self, key: &str, f: F) -> Result<PositionRecord>
    where
        F: FnOnce(&mut PositionRecord),
    {
        let result = {
            let mut inner = self.inner.write().await;
            let record = inner
                .records
                .get_mut(key)
                .ok_or_else(|| PositionError::PositionNotFound {
                    key: key.to_string(),
                })?;
            f(record);
            record.clone()
        };
        self.flush_if_configured().await;
        Ok(result)
    }

    /// 청산 완료 처리.
    ///
    /// 상태 머신으로 CLOSED 전환을 검증하고 청산 정보를 기록한 뒤
    /// 아카이브로 이동합니다.
    pub async fn close(
        &self,
        key: &str,
        reason: &str,
        exit_price: Option<Decimal>,
    ) -> Result<PositionRecord> {
        let result = {
            let mut inner = self.inner.write().await;
            let record = inner
                .records
                .get(key)
                .cloned()
                .ok_or_else(|| PositionError::PositionNotFound {
                    key: key.to_string(),
                })?;

            inner
                .machine
                .transition(key, record.status, PositionStatus::Closed, reason)?;

            let mut archived = inner.records.remove(key).unwrap();
            archived.status = PositionStatus::Closed;
            archived.exit_price = exit_price;
            archived.close_reason = Some(reason.to_string());
            archived.closed_at = Some(Utc::now());
            inner.archive.push(archived.clone());
            archived
        };
        info!(key = %key, reason = %reason, "포지션 청산 기록");
        self.flush_if_configured().await;
        Ok(result)
    }

    /// 부분 청산 예약.
    ///
    /// 하나의 쓰기 락 안에서 상태 전환 검증, 청산 수량 계산·차감,
    /// MODIFIED 전환을 수행합니다. 주문 제출 전에 호출해 레코드를
    /// 선점하므로 같은 키의 경합 호출자는 차감된 수량을 보게 되고,
    /// CLOSING 등으로 이미 선점된 레코드는 `InvalidTransition`으로
    /// 거부됩니다.
    pub async fn reserve_partial_close(
        &self,
        key: &str,
        fraction: Decimal,
        reason: &str,
    ) -> Result<PartialCloseClaim> {
        let claim = {
            let mut inner = self.inner.write().await;
            let prior_status = inner
                .records
                .get(key)
                .map(|r| r.status)
                .ok_or_else(|| PositionError::PositionNotFound {
                    key: key.to_string(),
                })?;

            inner
                .machine
                .transition(key, prior_status, PositionStatus::Modified, reason)?;

            let record = inner.records.get_mut(key).unwrap();
            let close_quantity = record.quantity * fraction;
            record.quantity -= close_quantity;
            record.partial_closes += 1;
            record.status = PositionStatus::Modified;
            PartialCloseClaim {
                record: record.clone(),
                close_quantity,
                prior_status,
            }
        };
        self.flush_if_configured().await;
        Ok(claim)
    }

    /// 부분 청산 예약 취소 (주문 실패 시).
    ///
    /// 레코드가 아직 예약 상태(MODIFIED)일 때만 수량을 복원하고 예약
    /// 직전 상태로 되돌립니다. 그 사이 다른 경로가 레코드를 선점했으면
    /// 복원하지 않고 정합성 확인에 맡깁니다.
    pub async fn cancel_partial_close(&self, key: &str, claim: &PartialCloseClaim, reason: &str) {
        {
            let mut inner = self.inner.write().await;
            let Some(status) = inner.records.get(key).map(|r| r.status) else {
                warn!(key = %key, "예약 취소 대상 레코드 없음");
                return;
            };
            if status != PositionStatus::Modified {
                warn!(key = %key, status = %status, "레코드가 이미 다른 경로에 선점됨, 예약 취소 생략");
                return;
            }
            if let Err(e) =
                inner
                    .machine
                    .transition(key, PositionStatus::Modified, claim.prior_status, reason)
            {
                warn!(key = %key, error = %e, "예약 취소 전환 실패");
                return;
            }
            let record = inner.records.get_mut(key).unwrap();
            record.quantity += claim.close_quantity;
            record.partial_closes = record.partial_closes.saturating_sub(1);
            record.status = claim.prior_status;
        }
        self.flush_if_configured().await;
    }

    /// 보존 기간이 지난 아카이브 레코드 정리.
    ///
    /// # Returns
    ///
    /// 정리된 레코드 수.
    pub async fn prune_closed(&self, retention: std::time::Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(30));
        let pruned = {
            let mut inner = self.inner.write().await;
            let before = inner.archive.len();
            inner
                .archive
                .retain(|r| r.closed_at.map(|t| t >= cutoff).unwrap_or(true));
            before - inner.archive.len()
        };
        if pruned > 0 {
            info!(pruned, "보존 기간 경과 아카이브 정리");
            self.flush_if_configured().await;
        }
        pruned
    }

    // =========================================================================
    // 읽기 경로
    // =========================================================================

    /// 복합 키로 레코드 조회.
    pub async fn get_by_key(&self, key: &str) -> Option<PositionRecord> {
        self.inner.read().await.records.get(key).cloned()
    }

    /// 심볼과 소유자로 레코드 조회.
    ///
    /// 소유자를 생략하면 해당 심볼의 첫 번째 열린 레코드를 키 정렬
    /// 순서로 반환합니다 (단일 전략 시절 호환 경로, 경고 로그).
    pub async fn get(&self, symbol: &str, owner: Option<&Owner>) -> Option<PositionRecord> {
        let inner = self.inner.read().await;
        match owner {
            Some(owner) => inner.records.get(&make_key(symbol, owner)).cloned(),
            None => {
                warn!(symbol = %symbol, "소유자 미지정 포지션 조회, 첫 레코드 반환");
                let mut keys: Vec<&String> = inner
                    .records
                    .iter()
                    .filter(|(_, r)| r.symbol == symbol && r.status.is_open())
                    .map(|(k, _)| k)
                    .collect();
                keys.sort();
                keys.first().and_then(|k| inner.records.get(*k)).cloned()
            }
        }
    }

    /// 열린 포지션 목록 (OPENING/ACTIVE/MODIFIED).
    pub async fn list_active(&self, owner: Option<&Owner>) -> Vec<PositionRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<PositionRecord> = inner
            .records
            .values()
            .filter(|r| r.status.is_open())
            .filter(|r| owner.map(|o| &r.owner == o).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.composite_key().cmp(&b.composite_key()));
        records
    }

    /// 열린 포지션 수.
    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .records
            .values()
            .filter(|r| r.status.is_open())
            .count()
    }

    /// 아카이브된 레코드 (최신순).
    pub async fn archived(&self, limit: usize) -> Vec<PositionRecord> {
        let inner = self.inner.read().await;
        inner.archive.iter().rev().take(limit).cloned().collect()
    }

    /// 특정 키의 상태 전환 이력.
    pub async fn transition_history(&self, key: &str) -> Vec<TransitionRecord> {
        self.inner
            .read()
            .await
            .machine
            .history(key)
            .into_iter()
            .cloned()
            .collect()
    }
}

// =============================================================================
// 테스트
// =============================================================================
