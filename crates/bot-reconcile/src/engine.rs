//! 정합성 확인 엔진.
//!
//! 거래소 실포지션과 시스템 레코드를 비교해 불일치를 분류하고,
//! 안전하게 자동 해결할 수 있는 것만 자동 해결합니다. 수량은 거래소가
//! 항상 기준이며, 소유자 귀속이 모호하면 추측하지 않고 에스컬레이션
//! 합니다. 조회 실패는 그 회차를 통째로 중단하며 저장 상태를 바꾸지
//! 않습니다.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use bot_core::{
    DiscrepancyKind, DiscrepancyRecord, Owner, PositionError, PositionRecord, PositionStatus,
    Result, Side,
};
use bot_exchange::{with_retry, ExchangeGateway, ExchangePosition, RetryConfig};
use bot_notification::{NotificationEvent, NotificationManager};
use bot_position::PositionStore;

use crate::config::ReconcileConfig;
use crate::history::DiscrepancyLog;

/// 순 수량의 방향 (+1 롱, -1 숏, 0 없음).
fn net_sign(value: Decimal) -> i8 {
    if value > Decimal::ZERO {
        1
    } else if value < Decimal::ZERO {
        -1
    } else {
        0
    }
}

// =============================================================================
// 전략 로스터
// =============================================================================

/// 심볼별로 거래가 설정된 전략 목록.
///
/// 시스템에 없는 거래소 포지션의 소유자 귀속 판단에 사용됩니다.
#[derive(Debug, Clone, Default)]
pub struct StrategyRoster {
    by_symbol: HashMap<String, Vec<String>>,
}

impl StrategyRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 전략을 심볼에 배정.
    pub fn assign(&mut self, strategy: impl Into<String>, symbol: impl Into<String>) {
        let strategy = strategy.into();
        let entry = self.by_symbol.entry(symbol.into()).or_default();
        if !entry.contains(&strategy) {
            entry.push(strategy);
        }
    }

    /// 심볼에 설정된 전략 목록.
    pub fn strategies_for(&self, symbol: &str) -> &[String] {
        self.by_symbol
            .get(symbol)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

// =============================================================================
// 확인 결과
// =============================================================================

/// 한 회차의 정합성 확인 결과.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub started_at: DateTime<Utc>,
    /// 비교한 심볼 수
    pub checked_symbols: usize,
    /// 이번 회차에 새로 발견된 불일치
    pub discrepancies: Vec<DiscrepancyRecord>,
    /// 자동 해결 건수
    pub auto_resolved: u32,
    /// 에스컬레이션 건수
    pub escalated: u32,
}

impl ReconcileReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            checked_symbols: 0,
            discrepancies: Vec::new(),
            auto_resolved: 0,
            escalated: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

// =============================================================================
// 엔진
// =============================================================================

/// 정합성 확인 엔진.
pub struct ReconciliationEngine {
    store: Arc<PositionStore>,
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<NotificationManager>,
    roster: StrategyRoster,
    log: Arc<DiscrepancyLog>,
    config: ReconcileConfig,
    retry: RetryConfig,
    consecutive_failures: AtomicU32,
    /// 미해결 에스컬레이션 중복 방지 ("{symbol}:{kind}")
    open_escalations: Mutex<HashSet<String>>,
    stopped: AtomicBool,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<PositionStore>,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<NotificationManager>,
        roster: StrategyRoster,
        config: ReconcileConfig,
    ) -> Self {
        let log = Arc::new(DiscrepancyLog::new(
            config.history_limit,
            config.history_path.clone(),
        ));
        Self {
            store,
            gateway,
            notifier,
            roster,
            log,
            config,
            retry: RetryConfig::fast(),
            consecutive_failures: AtomicU32::new(0),
            open_escalations: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// 불일치 이력 로그 핸들.
    pub fn log(&self) -> Arc<DiscrepancyLog> {
        self.log.clone()
    }

    // =========================================================================
    // 확인 회차
    // =========================================================================

    /// 정합성 확인 한 회차 수행.
    ///
    /// `symbols`를 지정하면 해당 심볼만 비교합니다. 거래소 조회가
    /// 실패하면 저장 상태를 변경하지 않고 회차를 중단합니다.
    pub async fn reconcile(&self, symbols: Option<&[String]>) -> Result<ReconcileReport> {
        let gateway = self.gateway.clone();
        let exchange_positions = match with_retry(&self.retry, || {
            let gateway = gateway.clone();
            async move { gateway.fetch_positions().await }
        })
        .await
        {
            Ok(positions) => positions,
            Err(e) => return Err(self.record_fetch_failure(e).await),
        };
        self.consecutive_failures.store(0, Ordering::Relaxed);

        let mut report = ReconcileReport::new();

        // 거래소 순 수량 및 대표 스냅샷
        let mut exchange_net: HashMap<String, Decimal> = HashMap::new();
        let mut snapshots: HashMap<String, ExchangePosition> = HashMap::new();
        for position in exchange_positions {
            *exchange_net.entry(position.symbol.clone()).or_default() +=
                position.signed_quantity();
            snapshots.entry(position.symbol.clone()).or_insert(position);
        }

        // 시스템 레코드 (ACTIVE/MODIFIED만, OPENING은 주문 진행 중이므로 제외)
        let mut system: HashMap<String, Vec<PositionRecord>> = HashMap::new();
        for record in self.store.list_active(None).await {
            if matches!(record.status, PositionStatus::Active | PositionStatus::Modified) {
                system.entry(record.symbol.clone()).or_default().push(record);
            }
        }

        let mut universe: BTreeSet<String> = exchange_net
            .keys()
            .chain(system.keys())
            .cloned()
            .collect();
        if let Some(filter) = symbols {
            // 양쪽 다 비어 있는 필터 심볼도 확인해 묵은 에스컬레이션을 해제
            universe.retain(|s| filter.iter().any(|f| f == s));
            universe.extend(filter.iter().cloned());
        }

        for symbol in &universe {
            report.checked_symbols += 1;
            let ex_net = exchange_net.get(symbol).copied().unwrap_or(Decimal::ZERO);
            let records = system.get(symbol).cloned().unwrap_or_default();
            self.check_symbol(symbol, ex_net, snapshots.get(symbol), &records, &mut report)
                .await?;
        }

        if !report.discrepancies.is_empty() {
            if let Err(e) = self.log.flush().await {
                warn!(error = %e, "불일치 이력 저장 실패");
            }
        }

        info!(
            checked = report.checked_symbols,
            found = report.discrepancies.len(),
            auto_resolved = report.auto_resolved,
            escalated = report.escalated,
            "정합성 확인 완료"
        );
        Ok(report)
    }

    /// 운영자 강제 확인 (타이머와 무관하게 즉시 수행).
    ///
    /// # Errors
    ///
    /// 회차 후에도 해당 심볼에 미해결 에스컬레이션이 남아 있으면
    /// `UnresolvedDiscrepancy`. 주기 회차에서 이미 알림된 불일치도
    /// 운영자 요청에는 동기적으로 다시 보고됩니다.
    pub async fn force_reconcile(&self, symbol: &str) -> Result<ReconcileReport> {
        info!(symbol = %symbol, "강제 정합성 확인");
        let symbols = [symbol.to_string()];
        let report = self.reconcile(Some(&symbols)).await?;

        let prefix = format!("{symbol}:");
        let unresolved = self
            .open_escalations
            .lock()
            .await
            .iter()
            .any(|k| k.starts_with(&prefix));
        if unresolved {
            return Err(PositionError::UnresolvedDiscrepancy {
                symbol: symbol.to_string(),
            });
        }
        Ok(report)
    }

    async fn record_fetch_failure(&self, error: bot_exchange::ExchangeError) -> PositionError {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            error = %error,
            consecutive_failures = failures,
            "거래소 포지션 조회 실패, 회차 중단"
        );

        // 임계값 도달 시 한 번만 에스컬레이션 (연결 장애는 불일치가 아님)
        if failures == self.config.max_consecutive_failures {
            self.notifier
                .notify(NotificationEvent::ReconciliationFailure {
                    consecutive_failures: failures,
                    reason: error.to_string(),
                })
                .await;
        }

        PositionError::ExchangeUnavailable {
            reason: error.to_string(),
        }
    }

    // =========================================================================
    // 심볼별 비교
    // =========================================================================

    async fn check_symbol(
        &self,
        symbol: &str,
        ex_net: Decimal,
        snapshot: Option<&ExchangePosition>,
        records: &[PositionRecord],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let sys_net: Decimal = records.iter().map(|r| r.signed_quantity()).sum();
        let tolerance = self.config.quantity_tolerance;

        if ex_net.abs() > tolerance && records.is_empty() {
            return self
                .handle_missing_in_system(symbol, ex_net, snapshot, report)
                .await;
        }

        if ex_net.abs() <= tolerance && !records.is_empty() {
            return self.handle_missing_on_exchange(symbol, records, report).await;
        }

        if records.is_empty() {
            // 양쪽 다 없음 (필터로만 도달 가능)
            self.clear_escalations(symbol).await;
            return Ok(());
        }

        // 양쪽 존재: 방향 비교가 수량 비교보다 우선
        if net_sign(ex_net) != net_sign(sys_net) {
            self.escalate(
                symbol,
                DiscrepancyKind::SideMismatch,
                format!("시스템 순 {sys_net}, 거래소 순 {ex_net}"),
                report,
            )
            .await;
            return Ok(());
        }

        let delta = ex_net - sys_net;
        if delta.abs() > tolerance {
            return self
                .handle_size_mismatch(symbol, ex_net, delta, snapshot, records, report)
                .await;
        }

        // 허용 오차 내 일치: 동기화 시각 갱신
        for record in records {
            let key = record.composite_key();
            self.store
                .update(&key, |r| r.last_synced_at = Utc::now())
                .await?;
        }
        self.clear_escalations(symbol).await;
        debug!(symbol = %symbol, "정합 일치");
        Ok(())
    }

    /// 거래소에만 존재: 소유자 귀속을 판단해 구체화하거나 에스컬레이션.
    async fn handle_missing_in_system(
        &self,
        symbol: &str,
        ex_net: Decimal,
        snapshot: Option<&ExchangePosition>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let candidates = self.roster.strategies_for(symbol);

        match candidates.len() {
            // 설정된 전략 없음: 수동 포지션으로 귀속
            0 => {
                self.materialize(symbol, Owner::Manual, ex_net, snapshot, report)
                    .await
            }
            // 유일 후보: 해당 전략으로 귀속
            1 => {
                let owner = Owner::strategy(candidates[0].clone());
                self.materialize(symbol, owner, ex_net, snapshot, report).await
            }
            // 복수 후보: 추측하지 않음
            _ => {
                self.escalate(
                    symbol,
                    DiscrepancyKind::UnresolvedOwner,
                    format!("후보 전략 {}개, 귀속 불가", candidates.len()),
                    report,
                )
                .await;
                Ok(())
            }
        }
    }

    /// 거래소 포지션을 시스템 레코드로 구체화 (자동 해결).
    async fn materialize(
        &self,
        symbol: &str,
        owner: Owner,
        net: Decimal,
        snapshot: Option<&ExchangePosition>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let side = if net > Decimal::ZERO {
            Side::Long
        } else {
            Side::Short
        };
        let (entry_price, leverage) = snapshot
            .map(|s| (s.entry_price, s.leverage))
            .unwrap_or((Decimal::ZERO, 1));

        let record = PositionRecord::open(symbol, owner.clone(), side, net.abs(), entry_price, leverage);
        let key = record.composite_key();
        match self
            .store
            .adopt(record, "reconciliation_materialized_from_exchange")
            .await
        {
            Ok(()) => {}
            // 같은 키에 진행 중 레코드가 있으면 다음 회차로 미룸
            Err(PositionError::DuplicateActivePosition { key }) => {
                warn!(key = %key, "구체화 대상 키에 진행 중 레코드 존재, 건너뜀");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let detail = format!("거래소 포지션 {net}을(를) {}에 귀속", owner.as_str());
        self.resolve(
            symbol,
            DiscrepancyRecord::new(symbol, DiscrepancyKind::MissingInSystem)
                .with_key(key)
                .with_detail(detail),
            report,
        )
        .await;
        Ok(())
    }

    /// 시스템에만 존재: 외부 청산으로 간주하고 레코드를 닫음.
    async fn handle_missing_on_exchange(
        &self,
        symbol: &str,
        records: &[PositionRecord],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        for record in records {
            let key = record.composite_key();
            self.store
                .close(&key, "reconciliation_detected_external_close", None)
                .await?;

            self.resolve(
                symbol,
                DiscrepancyRecord::new(symbol, DiscrepancyKind::MissingOnExchange)
                    .with_key(key.clone())
                    .with_detail(format!("거래소에 없는 포지션 {key} 청산 처리")),
                report,
            )
            .await;
        }
        Ok(())
    }

    /// 수량 불일치: 단일 레코드면 거래소 기준으로 보정, 복수면
    /// 유일 귀속 가능한 경우에만 차이를 구체화.
    async fn handle_size_mismatch(
        &self,
        symbol: &str,
        ex_net: Decimal,
        delta: Decimal,
        snapshot: Option<&ExchangePosition>,
        records: &[PositionRecord],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        if records.len() == 1 {
            let key = records[0].composite_key();
            let old_qty = records[0].quantity;
            self.store
                .update(&key, |r| {
                    r.quantity = ex_net.abs();
                    r.last_synced_at = Utc::now();
                })
                .await?;

            self.resolve(
                symbol,
                DiscrepancyRecord::new(symbol, DiscrepancyKind::SizeMismatch)
                    .with_key(key)
                    .with_detail(format!("수량 보정 {old_qty} → {}", ex_net.abs())),
                report,
            )
            .await;
            return Ok(());
        }

        // 복수 레코드: 거래소가 더 많고 레코드 없는 유일 후보 전략이
        // 있으면 차이를 그 전략으로 구체화
        if net_sign(delta) == net_sign(ex_net) {
            let holders: HashSet<&str> = records
                .iter()
                .filter(|r| !r.owner.is_manual())
                .map(|r| r.owner.as_str())
                .collect();
            let vacant: Vec<&String> = self
                .roster
                .strategies_for(symbol)
                .iter()
                .filter(|s| !holders.contains(s.as_str()))
                .collect();

            if vacant.len() == 1 {
                let owner = Owner::strategy(vacant[0].clone());
                return self.materialize(symbol, owner, delta, snapshot, report).await;
            }
        }

        self.escalate(
            symbol,
            DiscrepancyKind::UnresolvedOwner,
            format!("레코드 {}개, 수량 차이 {delta} 귀속 불가", records.len()),
            report,
        )
        .await;
        Ok(())
    }

    // =========================================================================
    // 해결·에스컬레이션 기록
    // =========================================================================

    async fn resolve(&self, symbol: &str, record: DiscrepancyRecord, report: &mut ReconcileReport) {
        let record = record.auto_resolved();
        info!(
            symbol = %symbol,
            kind = %record.kind,
            detail = %record.detail,
            "불일치 자동 해결"
        );

        self.notifier
            .notify(NotificationEvent::DiscrepancyFound {
                symbol: symbol.to_string(),
                kind: record.kind,
                detail: record.detail.clone(),
            })
            .await;

        self.log.append(record.clone()).await;
        report.auto_resolved += 1;
        report.discrepancies.push(record);
        self.clear_escalations(symbol).await;
    }

    async fn escalate(
        &self,
        symbol: &str,
        kind: DiscrepancyKind,
        detail: String,
        report: &mut ReconcileReport,
    ) {
        // 같은 불일치가 회차마다 반복 알림되지 않도록 중복 제거
        let dedup_key = format!("{symbol}:{kind}");
        {
            let mut open = self.open_escalations.lock().await;
            if !open.insert(dedup_key) {
                debug!(symbol = %symbol, kind = %kind, "미해결 에스컬레이션 유지");
                return;
            }
        }

        warn!(symbol = %symbol, kind = %kind, detail = %detail, "불일치 에스컬레이션");
        let record = DiscrepancyRecord::new(symbol, kind)
            .with_detail(detail.clone())
            .escalated();

        self.notifier
            .notify(NotificationEvent::DiscrepancyEscalated {
                symbol: symbol.to_string(),
                kind,
                detail,
            })
            .await;

        self.log.append(record.clone()).await;
        report.escalated += 1;
        report.discrepancies.push(record);
    }

    async fn clear_escalations(&self, symbol: &str) {
        let prefix = format!("{symbol}:");
        self.open_escalations
            .lock()
            .await
            .retain(|k| !k.starts_with(&prefix));
    }

    // =========================================================================
    // 제어 루프
    // =========================================================================

    /// 주기적 정합성 확인 루프.
    ///
    /// 활성 포지션이 있으면 `fast_interval`, 없으면 `slow_interval`
    /// 주기로 수행합니다. `stop()` 호출로 깨끗하게 종료됩니다.
    pub async fn run(self: Arc<Self>) {
        info!(
            fast_secs = self.config.fast_interval.as_secs(),
            slow_secs = self.config.slow_interval.as_secs(),
            "정합성 확인 루프 시작"
        );

        while !self.stopped.load(Ordering::Relaxed) {
            if let Err(e) = self.reconcile(None).await {
                warn!(error = %e, "정합성 확인 회차 실패");
            }

            let interval = if self.store.active_count().await > 0 {
                self.config.fast_interval
            } else {
                self.config.slow_interval
            };
            tokio::time::sleep(interval).await;
        }

        info!("정합성 확인 루프 종료");
    }

    /// 루프 종료 요청.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}
