//! 정합성 확인 통합 시나리오 테스트.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use bot_core::{
    DiscrepancyKind, Owner, PositionError, PositionRecord, PositionStatus, Resolution, Side,
};
use bot_exchange::{ExchangeError, ExchangePosition, MockGateway};
use bot_notification::{MemorySender, NotificationEvent, NotificationManager};
use bot_position::PositionStore;
use bot_reconcile::{ReconcileConfig, ReconciliationEngine, StrategyRoster};

struct Fixture {
    engine: ReconciliationEngine,
    store: Arc<PositionStore>,
    gateway: Arc<MockGateway>,
    sender: Arc<MemorySender>,
}

fn fixture_with(roster: StrategyRoster, config: ReconcileConfig) -> Fixture {
    let store = Arc::new(PositionStore::in_memory());
    let gateway = Arc::new(MockGateway::new());
    let sender = Arc::new(MemorySender::new());
    let mut notifier = NotificationManager::new();
    notifier.register(sender.clone());

    let engine = ReconciliationEngine::new(
        store.clone(),
        gateway.clone(),
        Arc::new(notifier),
        roster,
        config,
    );

    Fixture {
        engine,
        store,
        gateway,
        sender,
    }
}

fn fixture(roster: StrategyRoster) -> Fixture {
    fixture_with(roster, ReconcileConfig::in_memory())
}

async fn seed_active(
    store: &PositionStore,
    symbol: &str,
    owner: Owner,
    side: Side,
    quantity: Decimal,
) -> String {
    let record = PositionRecord::open(symbol, owner, side, quantity, dec!(50000), 10);
    let key = record.composite_key();
    store.insert_new(record).await.unwrap();
    store
        .transition(&key, PositionStatus::Opening, "test")
        .await
        .unwrap();
    store
        .transition(&key, PositionStatus::Active, "test")
        .await
        .unwrap();
    key
}

async fn system_net(store: &PositionStore, symbol: &str) -> Decimal {
    store
        .list_active(None)
        .await
        .iter()
        .filter(|r| r.symbol == symbol)
        .map(|r| r.signed_quantity())
        .sum()
}

#[tokio::test]
async fn external_close_is_detected_and_record_closed() {
    let fx = fixture(StrategyRoster::new());
    let key = seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.02),
    )
    .await;
    // 거래소에는 포지션 없음 (외부에서 청산됨)

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.auto_resolved, 1);
    assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::MissingOnExchange);

    // 레코드는 외부 청산 사유로 닫혀 아카이브됨
    assert!(fx.store.get_by_key(&key).await.is_none());
    let archived = fx.store.archived(10).await;
    assert_eq!(
        archived[0].close_reason.as_deref(),
        Some("reconciliation_detected_external_close")
    );

    // 합 불변식: 확인 후 시스템 순 수량 == 거래소 순 수량
    assert_eq!(system_net(&fx.store, "BTCUSDT").await, Decimal::ZERO);

    // 소유자 장부가 갱신되었으므로 반드시 알림
    assert!(fx.sender.sent().iter().any(|n| matches!(
        n.event,
        NotificationEvent::DiscrepancyFound { .. }
    )));
}

#[tokio::test]
async fn exchange_only_position_materialized_to_unique_strategy() {
    let mut roster = StrategyRoster::new();
    roster.assign("TFPE", "BTCUSDT");
    let fx = fixture(roster);

    fx.gateway.set_position(
        ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.02), dec!(50000)).with_leverage(10),
    );

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.auto_resolved, 1);
    assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::MissingInSystem);
    assert_eq!(report.discrepancies[0].resolution, Resolution::AutoResolved);

    let record = fx.store.get_by_key("BTCUSDT_TFPE").await.unwrap();
    assert_eq!(record.status, PositionStatus::Active);
    assert_eq!(record.quantity, dec!(0.02));
    assert_eq!(record.entry_price, dec!(50000));
    assert!(!record.is_manual);

    assert_eq!(system_net(&fx.store, "BTCUSDT").await, dec!(0.02));
}

#[tokio::test]
async fn exchange_only_position_without_strategy_becomes_manual() {
    let fx = fixture(StrategyRoster::new());
    fx.gateway
        .set_position(ExchangePosition::new("ETHUSDT", Side::Short, dec!(1.5), dec!(3000)));

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.auto_resolved, 1);

    let record = fx.store.get_by_key("ETHUSDT_MANUAL").await.unwrap();
    assert!(record.is_manual);
    assert_eq!(record.side, Side::Short);
    assert_eq!(record.quantity, dec!(1.5));
}

#[tokio::test]
async fn ambiguous_owner_is_escalated_not_guessed() {
    let mut roster = StrategyRoster::new();
    roster.assign("TFPE", "BTCUSDT");
    roster.assign("ZLMACD", "BTCUSDT");
    let fx = fixture(roster);

    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.02), dec!(50000)));

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::UnresolvedOwner);

    // 시스템 레코드는 생성되지 않음
    assert!(fx.store.list_active(None).await.is_empty());
    assert!(fx.sender.sent().iter().any(|n| matches!(
        n.event,
        NotificationEvent::DiscrepancyEscalated { .. }
    )));
}

#[tokio::test]
async fn unresolved_escalation_is_not_repeated() {
    let mut roster = StrategyRoster::new();
    roster.assign("TFPE", "BTCUSDT");
    roster.assign("ZLMACD", "BTCUSDT");
    let fx = fixture(roster);

    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.02), dec!(50000)));

    let first = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(first.escalated, 1);

    // 변화 없는 두 번째 회차: 새 불일치 0건, 알림도 반복되지 않음
    let sent_before = fx.sender.sent_count();
    let second = fx.engine.reconcile(None).await.unwrap();
    assert!(second.is_clean());
    assert_eq!(fx.sender.sent_count(), sent_before);
    assert_eq!(fx.engine.log().len().await, 1);
}

#[tokio::test]
async fn size_mismatch_corrects_store_to_exchange_value() {
    let fx = fixture(StrategyRoster::new());
    let key = seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.01),
    )
    .await;
    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.02), dec!(50000)));

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.auto_resolved, 1);
    assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::SizeMismatch);

    // 거래소가 기준
    let record = fx.store.get_by_key(&key).await.unwrap();
    assert_eq!(record.quantity, dec!(0.02));
    assert_eq!(system_net(&fx.store, "BTCUSDT").await, dec!(0.02));
}

#[tokio::test]
async fn side_mismatch_is_escalated_without_mutation() {
    let fx = fixture(StrategyRoster::new());
    let key = seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.02),
    )
    .await;
    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Short, dec!(0.02), dec!(50000)));

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::SideMismatch);

    // 자동 수정 금지
    let record = fx.store.get_by_key(&key).await.unwrap();
    assert_eq!(record.side, Side::Long);
    assert_eq!(record.quantity, dec!(0.02));
}

#[tokio::test]
async fn opposing_records_netting_zero_escalate_side_mismatch() {
    let fx = fixture(StrategyRoster::new());
    seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.02),
    )
    .await;
    seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("ZLMACD"),
        Side::Short,
        dec!(0.02),
    )
    .await;
    // 시스템 순 수량은 0이지만 거래소는 롱 노출
    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.02), dec!(50000)));

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::SideMismatch);

    // 방향 불일치는 자동 수정하지 않음
    assert_eq!(fx.store.list_active(None).await.len(), 2);
    assert_eq!(system_net(&fx.store, "BTCUSDT").await, Decimal::ZERO);
}

#[tokio::test]
async fn multi_record_delta_with_unique_vacant_strategy_is_materialized() {
    let mut roster = StrategyRoster::new();
    roster.assign("TFPE", "BTCUSDT");
    roster.assign("ZLMACD", "BTCUSDT");
    roster.assign("GRID", "BTCUSDT");
    let fx = fixture(roster);

    seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.01),
    )
    .await;
    seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("ZLMACD"),
        Side::Long,
        dec!(0.01),
    )
    .await;
    // GRID 몫까지 포함한 거래소 순 수량
    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.05), dec!(50000)));

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.auto_resolved, 1);

    let record = fx.store.get_by_key("BTCUSDT_GRID").await.unwrap();
    assert_eq!(record.quantity, dec!(0.03));
    assert_eq!(system_net(&fx.store, "BTCUSDT").await, dec!(0.05));
}

#[tokio::test]
async fn multi_record_delta_without_unique_owner_is_escalated() {
    let mut roster = StrategyRoster::new();
    roster.assign("TFPE", "BTCUSDT");
    roster.assign("ZLMACD", "BTCUSDT");
    let fx = fixture(roster);

    seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.01),
    )
    .await;
    seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("ZLMACD"),
        Side::Long,
        dec!(0.01),
    )
    .await;
    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.05), dec!(50000)));

    let report = fx.engine.reconcile(None).await.unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::UnresolvedOwner);

    // 어느 레코드도 수정되지 않음
    assert_eq!(system_net(&fx.store, "BTCUSDT").await, dec!(0.02));
}

#[tokio::test]
async fn matched_positions_yield_clean_pass_and_stamp_sync() {
    let fx = fixture(StrategyRoster::new());
    let key = seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.02),
    )
    .await;
    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.02), dec!(50000)));

    let before = fx.store.get_by_key(&key).await.unwrap().last_synced_at;
    let report = fx.engine.reconcile(None).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.checked_symbols, 1);

    let after = fx.store.get_by_key(&key).await.unwrap().last_synced_at;
    assert!(after >= before);

    // 멱등성: 반복 회차에도 불일치 없음
    assert!(fx.engine.reconcile(None).await.unwrap().is_clean());
}

#[tokio::test]
async fn fetch_failure_aborts_pass_without_mutation() {
    let fx = fixture(StrategyRoster::new());
    let key = seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.02),
    )
    .await;

    // 재시도 불가 에러로 즉시 실패
    fx.gateway
        .fail_next_fetch(ExchangeError::Authentication("키 만료".into()));

    let err = fx.engine.reconcile(None).await.unwrap_err();
    assert!(matches!(err, PositionError::ExchangeUnavailable { .. }));

    // 저장 상태 무변경 (빈 거래소 응답으로 오판해 청산하지 않음)
    let record = fx.store.get_by_key(&key).await.unwrap();
    assert_eq!(record.status, PositionStatus::Active);
    assert!(fx.engine.log().is_empty().await);
}

#[tokio::test]
async fn consecutive_fetch_failures_escalate_once_and_reset() {
    let config = ReconcileConfig {
        max_consecutive_failures: 2,
        ..ReconcileConfig::in_memory()
    };
    let fx = fixture_with(StrategyRoster::new(), config);

    fx.gateway
        .fail_next_fetch(ExchangeError::Authentication("키 만료".into()));
    fx.engine.reconcile(None).await.unwrap_err();
    assert!(fx.sender.sent().is_empty());

    // 임계값 도달: 연결 장애 에스컬레이션 1회
    fx.gateway
        .fail_next_fetch(ExchangeError::Authentication("키 만료".into()));
    fx.engine.reconcile(None).await.unwrap_err();
    let failures: Vec<_> = fx
        .sender
        .sent()
        .into_iter()
        .filter(|n| matches!(n.event, NotificationEvent::ReconciliationFailure { .. }))
        .collect();
    assert_eq!(failures.len(), 1);

    // 성공하면 카운터 리셋, 이후 실패는 다시 1부터
    fx.engine.reconcile(None).await.unwrap();
    fx.gateway
        .fail_next_fetch(ExchangeError::Authentication("키 만료".into()));
    fx.engine.reconcile(None).await.unwrap_err();
    let failures: Vec<_> = fx
        .sender
        .sent()
        .into_iter()
        .filter(|n| matches!(n.event, NotificationEvent::ReconciliationFailure { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn force_reconcile_targets_single_symbol() {
    let fx = fixture(StrategyRoster::new());
    seed_active(
        &fx.store,
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.02),
    )
    .await;
    seed_active(
        &fx.store,
        "ETHUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(1),
    )
    .await;
    // 둘 다 거래소에 없지만 BTCUSDT만 확인

    let report = fx.engine.force_reconcile("BTCUSDT").await.unwrap();
    assert_eq!(report.checked_symbols, 1);
    assert_eq!(report.auto_resolved, 1);

    // ETHUSDT는 손대지 않음
    assert!(fx.store.get_by_key("ETHUSDT_TFPE").await.is_some());
}

#[tokio::test]
async fn force_reconcile_surfaces_unresolved_discrepancy() {
    let mut roster = StrategyRoster::new();
    roster.assign("TFPE", "BTCUSDT");
    roster.assign("ZLMACD", "BTCUSDT");
    let fx = fixture(roster);

    fx.gateway
        .set_position(ExchangePosition::new("BTCUSDT", Side::Long, dec!(0.02), dec!(50000)));

    // 귀속 불가 불일치는 운영자 요청에 동기적으로 실패로 보고
    let err = fx.engine.force_reconcile("BTCUSDT").await.unwrap_err();
    assert!(matches!(
        err,
        PositionError::UnresolvedDiscrepancy { ref symbol } if symbol.as_str() == "BTCUSDT"
    ));

    // 미해결 상태가 유지되는 한 반복 요청도 실패 (알림 중복 제거와 무관)
    let err = fx.engine.force_reconcile("BTCUSDT").await.unwrap_err();
    assert!(matches!(err, PositionError::UnresolvedDiscrepancy { .. }));

    // 불일치가 사라지면 에스컬레이션이 해제되고 성공
    fx.gateway.remove_position("BTCUSDT");
    let report = fx.engine.force_reconcile("BTCUSDT").await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn pending_and_opening_records_are_left_alone() {
    let fx = fixture(StrategyRoster::new());
    let record = PositionRecord::open(
        "BTCUSDT",
        Owner::strategy("TFPE"),
        Side::Long,
        dec!(0.02),
        dec!(50000),
        10,
    );
    let key = record.composite_key();
    fx.store.insert_new(record).await.unwrap();
    fx.store
        .transition(&key, PositionStatus::Opening, "주문 제출")
        .await
        .unwrap();

    // 주문 진행 중 레코드는 외부 청산으로 오판하지 않음
    let report = fx.engine.reconcile(None).await.unwrap();
    assert!(report.is_clean());
    assert!(fx.store.get_by_key(&key).await.is_some());
}
