// tests/integration_tests.rs
use std::sync::Arc;

use summa::adapters::MemoryAdapter;
use summa::account::{Account, HolderType, SystemAccount};
use summa::currency::Currency;
use summa::entry::EntryType;
use summa::error::SummaError;
use summa::event::AggregateType;
use summa::hold::Settlement;
use summa::hooks::{HookContext, HookEvent, HookRegistry, Plugin};
use summa::transaction::LegPlan;
use summa::{EngineConfig, LedgerAdapter, SummaEngine};
use uuid::Uuid;

async fn setup() -> (SummaEngine, Uuid) {
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.create_currency(Currency::new("USD", 2)).await.unwrap();
    let engine = SummaEngine::new(adapter, EngineConfig::default());
    (engine, Uuid::now_v7())
}

async fn open_account(engine: &SummaEngine, ledger_id: Uuid) -> Account {
    let account = Account::new(ledger_id, Uuid::now_v7(), HolderType::Individual, "USD");
    engine.accounts().create_account(account).await.unwrap()
}

async fn clearing_account(engine: &SummaEngine, ledger_id: Uuid) -> SystemAccount {
    let sys = SystemAccount::new(ledger_id, "@clearing", "USD").unwrap();
    engine.adapter().create_system_account(sys).await.unwrap()
}

#[tokio::test]
async fn credit_then_debit_matches_scenario_1() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 25_000, "USD", "dep-1", serde_json::json!({}), None)
        .await
        .unwrap();
    let outcome = engine
        .transactions()
        .debit(ledger_id, account.id, clearing.id, 10_000, "USD", "wd-1", serde_json::json!({}), None)
        .await
        .unwrap();

    let updated = engine.adapter().get_account(ledger_id, account.id).await.unwrap();
    assert_eq!(updated.balance, 15_000);
    assert_eq!(updated.available_balance(), 15_000);
    assert!(!outcome.replayed);
}

#[tokio::test]
async fn duplicate_reference_is_rejected() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 5_000, "USD", "dup-ref", serde_json::json!({}), None)
        .await
        .unwrap();

    let err = engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 5_000, "USD", "dup-ref", serde_json::json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SummaError::Conflict(_)));
}

#[tokio::test]
async fn idempotent_transfer_replays_instead_of_double_posting() {
    let (engine, ledger_id) = setup().await;
    let source = open_account(&engine, ledger_id).await;
    let destination = open_account(&engine, ledger_id).await;
    engine
        .transactions()
        .credit(
            ledger_id,
            source.id,
            clearing_account(&engine, ledger_id).await.id,
            50_000,
            "USD",
            "fund-source",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();

    let key = Some("idem-key-1".to_string());
    let first = engine
        .transactions()
        .transfer(
            ledger_id,
            source.id,
            destination.id,
            10_000,
            "USD",
            "USD",
            "transfer-1",
            key.clone(),
            serde_json::json!({}),
        )
        .await
        .unwrap();
    assert!(!first.replayed);

    // Spec §4.3 step 1: the same idempotency key replayed against the SAME
    // reference returns the cached response instead of posting again.
    let second = engine
        .transactions()
        .transfer(
            ledger_id,
            source.id,
            destination.id,
            10_000,
            "USD",
            "USD",
            "transfer-1",
            key,
            serde_json::json!({}),
        )
        .await
        .unwrap();
    assert!(second.replayed);
    assert_eq!(second.transaction.id, first.transaction.id);

    let dest_after = engine.adapter().get_account(ledger_id, destination.id).await.unwrap();
    assert_eq!(dest_after.balance, 10_000);
}

#[tokio::test]
async fn idempotency_key_reused_with_different_reference_conflicts() {
    let (engine, ledger_id) = setup().await;
    let source = open_account(&engine, ledger_id).await;
    let destination = open_account(&engine, ledger_id).await;
    engine
        .transactions()
        .credit(
            ledger_id,
            source.id,
            clearing_account(&engine, ledger_id).await.id,
            50_000,
            "USD",
            "fund-source-2",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();

    let key = Some("idem-key-2".to_string());
    engine
        .transactions()
        .transfer(
            ledger_id,
            source.id,
            destination.id,
            10_000,
            "USD",
            "USD",
            "transfer-2a",
            key.clone(),
            serde_json::json!({}),
        )
        .await
        .unwrap();

    let err = engine
        .transactions()
        .transfer(
            ledger_id,
            source.id,
            destination.id,
            10_000,
            "USD",
            "USD",
            "transfer-2b",
            key,
            serde_json::json!({}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SummaError::Conflict(_)));
}

#[tokio::test]
async fn hold_lifecycle_commit_settles_to_multiple_destinations() {
    let (engine, ledger_id) = setup().await;
    let payer = open_account(&engine, ledger_id).await;
    let merchant = open_account(&engine, ledger_id).await;
    let fee_account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .credit(ledger_id, payer.id, clearing.id, 20_000, "USD", "fund-payer", serde_json::json!({}), None)
        .await
        .unwrap();

    let hold = engine
        .holds()
        .create_hold(ledger_id, payer.id, 10_000, "USD", "hold-1", serde_json::json!({}), None)
        .await
        .unwrap();

    let after_hold = engine.adapter().get_account(ledger_id, payer.id).await.unwrap();
    assert_eq!(after_hold.balance, 20_000);
    assert_eq!(after_hold.available_balance(), 10_000);

    engine
        .holds()
        .commit_hold(
            ledger_id,
            hold.id,
            vec![Settlement::exact(merchant.id, 7_000), Settlement::exact(fee_account.id, 3_000)],
        )
        .await
        .unwrap();

    let payer_after = engine.adapter().get_account(ledger_id, payer.id).await.unwrap();
    let merchant_after = engine.adapter().get_account(ledger_id, merchant.id).await.unwrap();
    let fee_after = engine.adapter().get_account(ledger_id, fee_account.id).await.unwrap();
    assert_eq!(payer_after.balance, 10_000);
    assert_eq!(payer_after.pending_debit, 0);
    assert_eq!(merchant_after.balance, 7_000);
    assert_eq!(fee_after.balance, 3_000);
}

#[tokio::test]
async fn hold_commit_with_remainder_destination_gets_leftover() {
    let (engine, ledger_id) = setup().await;
    let payer = open_account(&engine, ledger_id).await;
    let merchant = open_account(&engine, ledger_id).await;
    let fee_account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .credit(ledger_id, payer.id, clearing.id, 20_000, "USD", "fund-payer-2", serde_json::json!({}), None)
        .await
        .unwrap();

    let hold = engine
        .holds()
        .create_hold(ledger_id, payer.id, 10_000, "USD", "hold-2", serde_json::json!({}), None)
        .await
        .unwrap();

    engine
        .holds()
        .commit_hold(
            ledger_id,
            hold.id,
            vec![Settlement::exact(merchant.id, 7_000), Settlement::remainder(fee_account.id)],
        )
        .await
        .unwrap();

    let merchant_after = engine.adapter().get_account(ledger_id, merchant.id).await.unwrap();
    let fee_after = engine.adapter().get_account(ledger_id, fee_account.id).await.unwrap();
    assert_eq!(merchant_after.balance, 7_000);
    assert_eq!(fee_after.balance, 3_000);
}

#[tokio::test]
async fn voided_hold_releases_full_reservation() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;
    engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 5_000, "USD", "fund", serde_json::json!({}), None)
        .await
        .unwrap();

    let hold = engine
        .holds()
        .create_hold(ledger_id, account.id, 5_000, "USD", "hold-void", serde_json::json!({}), None)
        .await
        .unwrap();

    engine.holds().void_hold(ledger_id, hold.id, "customer cancelled").await.unwrap();

    let after = engine.adapter().get_account(ledger_id, account.id).await.unwrap();
    assert_eq!(after.pending_debit, 0);
    assert_eq!(after.available_balance(), 5_000);

    let err = engine
        .holds()
        .void_hold(ledger_id, hold.id, "second attempt")
        .await
        .unwrap_err();
    assert!(matches!(err, SummaError::Conflict(_)));
}

#[tokio::test]
async fn expired_holds_release_past_due_reservations() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;
    engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 5_000, "USD", "fund", serde_json::json!({}), None)
        .await
        .unwrap();

    let past = chrono::Utc::now() - chrono::Duration::seconds(5);
    engine
        .holds()
        .create_hold(ledger_id, account.id, 2_000, "USD", "hold-expiring", serde_json::json!({}), Some(past))
        .await
        .unwrap();

    let expired = engine.holds().expire_holds(ledger_id).await.unwrap();
    assert_eq!(expired.len(), 1);

    let after = engine.adapter().get_account(ledger_id, account.id).await.unwrap();
    assert_eq!(after.pending_debit, 0);
}

#[tokio::test]
async fn frozen_account_rejects_new_transactions() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;
    let admin = Uuid::now_v7();

    engine.accounts().freeze_account(ledger_id, account.id, admin, "suspected fraud").await.unwrap();

    let err = engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 100, "USD", "blocked-credit", serde_json::json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SummaError::AccountFrozen(_)));
}

#[tokio::test]
async fn multi_transfer_splits_one_source_across_destinations() {
    let (engine, ledger_id) = setup().await;
    let source = open_account(&engine, ledger_id).await;
    let a = open_account(&engine, ledger_id).await;
    let b = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .credit(ledger_id, source.id, clearing.id, 10_000, "USD", "fund-source", serde_json::json!({}), None)
        .await
        .unwrap();

    engine
        .transactions()
        .multi_transfer(
            ledger_id,
            source.id,
            vec![(a.id, 4_000), (b.id, 6_000)],
            "USD",
            "split-1",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();

    let a_after = engine.adapter().get_account(ledger_id, a.id).await.unwrap();
    let b_after = engine.adapter().get_account(ledger_id, b.id).await.unwrap();
    let source_after = engine.adapter().get_account(ledger_id, source.id).await.unwrap();
    assert_eq!(a_after.balance, 4_000);
    assert_eq!(b_after.balance, 6_000);
    assert_eq!(source_after.balance, 0);
}

#[tokio::test]
async fn journal_posts_a_multi_leg_entry_that_nets_to_zero() {
    let (engine, ledger_id) = setup().await;
    let revenue = open_account(&engine, ledger_id).await;
    let tax = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .journal(
            ledger_id,
            vec![
                LegPlan::new(clearing.id, EntryType::Debit, 1_000, "USD", true),
                LegPlan::new(revenue.id, EntryType::Credit, 900, "USD", false),
                LegPlan::new(tax.id, EntryType::Credit, 100, "USD", false),
            ],
            "journal-1",
            Some("revenue recognition".to_string()),
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();

    let revenue_after = engine.adapter().get_account(ledger_id, revenue.id).await.unwrap();
    let tax_after = engine.adapter().get_account(ledger_id, tax.id).await.unwrap();
    assert_eq!(revenue_after.balance, 900);
    assert_eq!(tax_after.balance, 100);
}

#[tokio::test]
async fn unbalanced_journal_is_rejected_before_any_leg_applies() {
    let (engine, ledger_id) = setup().await;
    let a = open_account(&engine, ledger_id).await;
    let b = open_account(&engine, ledger_id).await;

    let err = engine
        .transactions()
        .journal(
            ledger_id,
            vec![
                LegPlan::new(a.id, EntryType::Debit, 1_000, "USD", true),
                LegPlan::new(b.id, EntryType::Credit, 900, "USD", false),
            ],
            "journal-unbalanced",
            None,
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SummaError::InvalidArgument(_)));

    let a_after = engine.adapter().get_account(ledger_id, a.id).await.unwrap();
    let b_after = engine.adapter().get_account(ledger_id, b.id).await.unwrap();
    assert_eq!(a_after.balance, 0);
    assert_eq!(b_after.balance, 0);
}

#[tokio::test]
async fn refund_reverses_original_transaction_legs() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    let original = engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 8_000, "USD", "purchase-1", serde_json::json!({}), None)
        .await
        .unwrap();

    engine
        .transactions()
        .refund(ledger_id, original.transaction.id, Some(3_000), "refund-1", None)
        .await
        .unwrap();

    let after = engine.adapter().get_account(ledger_id, account.id).await.unwrap();
    assert_eq!(after.balance, 5_000);
}

#[tokio::test]
async fn refund_cannot_exceed_original_amount() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    let original = engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 1_000, "USD", "purchase-2", serde_json::json!({}), None)
        .await
        .unwrap();

    let err = engine
        .transactions()
        .refund(ledger_id, original.transaction.id, Some(5_000), "refund-2", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SummaError::InvalidArgument(_)));
}

#[tokio::test]
async fn adjust_moves_funds_against_the_adjustment_account() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let adjustment = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .adjust(ledger_id, account.id, adjustment.id, 1_500, "USD", "manual-credit", serde_json::json!({}), None)
        .await
        .unwrap();
    let after_credit = engine.adapter().get_account(ledger_id, account.id).await.unwrap();
    assert_eq!(after_credit.balance, 1_500);

    engine
        .transactions()
        .adjust(ledger_id, account.id, adjustment.id, -500, "USD", "manual-debit", serde_json::json!({}), None)
        .await
        .unwrap();
    let after_debit = engine.adapter().get_account(ledger_id, account.id).await.unwrap();
    assert_eq!(after_debit.balance, 1_000);
}

#[tokio::test]
async fn zero_sum_audit_passes_after_balanced_postings() {
    let (engine, ledger_id) = setup().await;
    let a = open_account(&engine, ledger_id).await;
    let b = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .credit(ledger_id, a.id, clearing.id, 7_000, "USD", "c1", serde_json::json!({}), None)
        .await
        .unwrap();
    engine
        .transactions()
        .transfer(ledger_id, a.id, b.id, 2_000, "USD", "USD", "t1", None, serde_json::json!({}))
        .await
        .unwrap();

    let result = engine.auditor().validate(ledger_id).await.unwrap();
    assert!(result.balanced);
    assert_eq!(result.drift, 0);
}

#[tokio::test]
async fn zero_sum_audit_counts_pending_hot_account_entries() {
    let (engine, ledger_id) = setup().await;
    let a = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    // The clearing leg here is a system account, so its own balance mutation
    // is deferred to the hot-account batch pass (spec §4.7) — the audit must
    // still see the books as balanced in the meantime (invariant HA1).
    engine
        .transactions()
        .credit(ledger_id, a.id, clearing.id, 3_000, "USD", "hot-1", serde_json::json!({}), None)
        .await
        .unwrap();

    let result = engine.auditor().validate(ledger_id).await.unwrap();
    assert!(result.balanced);
    assert_eq!(result.drift, 0);
}

#[tokio::test]
async fn event_chain_for_account_is_tamper_evident() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;

    engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 4_000, "USD", "ev-1", serde_json::json!({}), None)
        .await
        .unwrap();

    let mut events = engine
        .adapter()
        .get_events(ledger_id, AggregateType::Account, account.id)
        .await
        .unwrap();
    assert!(events.len() >= 2); // account.created + account.transaction_posted
    assert_eq!(events[1].event_type, "account.transaction_posted");
    // credit() posts two legs (the account + its counter-account), and the
    // posted event's payload carries every leg of the transaction, not just
    // the ones touching this particular aggregate.
    assert_eq!(events[1].event_data["entries"].as_array().unwrap().len(), 2);

    let verification = summa::event::verify_chain(&events, None, None);
    assert!(verification.ok);

    events[0].event_data = serde_json::json!({ "tampered": true });
    let broken = summa::event::verify_chain(&events, None, None);
    assert!(!broken.ok);
    assert_eq!(broken.broken_at_version, Some(1));
}

#[tokio::test]
async fn closing_an_account_with_nonzero_balance_is_rejected() {
    let (engine, ledger_id) = setup().await;
    let account = open_account(&engine, ledger_id).await;
    let clearing = clearing_account(&engine, ledger_id).await;
    let admin = Uuid::now_v7();

    engine
        .transactions()
        .credit(ledger_id, account.id, clearing.id, 100, "USD", "fund-before-close", serde_json::json!({}), None)
        .await
        .unwrap();

    let err = engine
        .accounts()
        .close_account(ledger_id, account.id, admin, "customer request")
        .await
        .unwrap_err();
    assert!(matches!(err, SummaError::Conflict(_)));
}

struct AccountLifecycleRecorder {
    created: std::sync::atomic::AtomicUsize,
    frozen: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl Plugin for AccountLifecycleRecorder {
    fn name(&self) -> &str {
        "account-lifecycle-recorder"
    }

    fn interests(&self) -> &[HookEvent] {
        &[HookEvent::AccountCreated, HookEvent::AccountFrozen]
    }

    async fn after(&self, ctx: &HookContext) {
        match ctx.event {
            HookEvent::AccountCreated => {
                self.created.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            HookEvent::AccountFrozen => {
                self.frozen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn account_lifecycle_dispatches_hooks_to_registered_plugins() {
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.create_currency(Currency::new("USD", 2)).await.unwrap();
    let plugin = Arc::new(AccountLifecycleRecorder {
        created: std::sync::atomic::AtomicUsize::new(0),
        frozen: std::sync::atomic::AtomicUsize::new(0),
    });
    let engine = SummaEngine::new(adapter, EngineConfig::default())
        .with_hooks(HookRegistry::new(vec![plugin.clone()]));
    let ledger_id = Uuid::now_v7();

    let account = engine
        .accounts()
        .create_account(Account::new(ledger_id, Uuid::now_v7(), HolderType::Individual, "USD"))
        .await
        .unwrap();
    engine
        .accounts()
        .freeze_account(ledger_id, account.id, Uuid::now_v7(), "policy review")
        .await
        .unwrap();

    assert_eq!(plugin.created.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(plugin.frozen.load(std::sync::atomic::Ordering::SeqCst), 1);
}
