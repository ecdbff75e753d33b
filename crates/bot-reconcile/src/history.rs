//! 불일치 이력 로그.
//!
//! 발견된 모든 불일치를 해결 결과와 함께 바운디드 큐로 보관하고
//! JSON 파일에 영속화합니다. 운영자 조회 명령의 데이터 소스입니다.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use bot_core::{DiscrepancyRecord, Result};

#[derive(Debug, Serialize)]
struct LogFile<'a> {
    version: u32,
    updated_at: DateTime<Utc>,
    entries: &'a VecDeque<DiscrepancyRecord>,
}

#[derive(Debug, Deserialize)]
struct RawLogFile {
    #[allow(dead_code)]
    version: u32,
    entries: Vec<serde_json::Value>,
}

/// 바운디드 불일치 이력.
#[derive(Debug)]
pub struct DiscrepancyLog {
    entries: RwLock<VecDeque<DiscrepancyRecord>>,
    limit: usize,
    path: Option<PathBuf>,
}

impl DiscrepancyLog {
    pub fn new(limit: usize, path: Option<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(limit.min(128))),
            limit: limit.max(1),
            path,
        }
    }

    /// 메모리 전용 로그 (테스트용).
    pub fn in_memory(limit: usize) -> Self {
        Self::new(limit, None)
    }

    /// 시작 시 이력 파일 로드. 손상 항목은 건너뜁니다.
    pub async fn load(&self) -> Result<usize> {
        let Some(path) = &self.path else {
            return Ok(0);
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let raw: RawLogFile = serde_json::from_slice(&bytes)?;
        let mut entries = self.entries.write().await;
        for value in raw.entries {
            match serde_json::from_value::<DiscrepancyRecord>(value) {
                Ok(record) => {
                    if entries.len() >= self.limit {
                        entries.pop_front();
                    }
                    entries.push_back(record);
                }
                Err(e) => error!(error = %e, "손상된 불일치 이력 항목 건너뜀"),
            }
        }

        let loaded = entries.len();
        info!(loaded, "불일치 이력 로드 완료");
        Ok(loaded)
    }

    /// 이력 파일 기록 (임시 파일 작성 후 원자적 교체).
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let entries = self.entries.read().await;
        let file = LogFile {
            version: 1,
            updated_at: Utc::now(),
            entries: &entries,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        drop(entries);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "불일치 이력 저장 완료");
        Ok(())
    }

    /// 불일치 기록 추가 (한도 초과 시 가장 오래된 항목 제거).
    pub async fn append(&self, record: DiscrepancyRecord) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.limit {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// 이력 조회 (최신순).
    pub async fn query(&self, symbol: Option<&str>, limit: usize) -> Vec<DiscrepancyRecord> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .filter(|r| symbol.map(|s| r.symbol == s).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    /// 보관 중인 항목 수.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
