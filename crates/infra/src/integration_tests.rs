//! End-to-end tests for the movement pipeline.
//!
//! Handler → unit of work → in-memory store (+ outbox) → event bus → relay
//!
//! Verifies:
//! - balances, ledger entries and links after each movement
//! - business rejections leave no trace
//! - failed or empty commits surface as `UnknownError` and persist nothing
//! - committed events reach the bus and the outbox

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::Value as JsonValue;

    use ledgerbank_accounts::{
        AccountRecord, AccountType, BalanceDirection, Channel, FeePolicy, Iban, LedgerEntryView,
        LinkRole, MovementType, NewAccount, PaymentCategory, TransactionStatus,
    };
    use ledgerbank_core::{BranchId, MAX_AMOUNT, exact_amount};
    use ledgerbank_events::{EventBus, EventEnvelope, InMemoryEventBus};

    use crate::config::{LedgerConfig, TRANSFER_FEE_RATE};
    use crate::movements::{
        AccountAdministration, Actor, DepositCommand, DepositHandler, MovementErrorCode,
        TransferCommand, TransferHandler, TransferKind, WithdrawalCommand, WithdrawalHandler,
    };
    use crate::outbox::{
        BusPublisher, OutboundPublisher, OutboxMessage, OutboxRelay, OutboxStore, PublishError,
    };
    use crate::store::{
        AccountStore, ChangeSet, CommitOutcome, InMemoryLedgerStore, InMemoryUnit, StoreError,
        TransactionCoordinator, UnitOfWork,
    };

    const A: &str = "DE89370400440532013000";
    const B: &str = "NL91ABNA0417164300";
    const C: &str = "GB82WEST12345698765432";

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Ledger {
        store: InMemoryLedgerStore,
        bus: Bus,
        admin: AccountAdministration<InMemoryLedgerStore, Bus>,
        deposits: DepositHandler<InMemoryLedgerStore, Bus>,
        withdrawals: WithdrawalHandler<InMemoryLedgerStore, Bus>,
        transfers: TransferHandler<InMemoryLedgerStore, Bus>,
    }

    fn ledger() -> Ledger {
        let store = InMemoryLedgerStore::new();
        let coordinator = Arc::new(store.clone());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        Ledger {
            admin: AccountAdministration::new(coordinator.clone(), bus.clone()),
            deposits: DepositHandler::new(coordinator.clone(), bus.clone()),
            withdrawals: WithdrawalHandler::new(coordinator.clone(), bus.clone()),
            transfers: TransferHandler::new(coordinator, bus.clone(), FeePolicy::standard()),
            store,
            bus,
        }
    }

    fn actor() -> Actor {
        Actor::new("ada", "Ada Lovelace")
    }

    fn new_account(iban: &str, balance: Decimal) -> NewAccount {
        NewAccount {
            iban: iban.to_string(),
            account_number: "12345678".to_string(),
            account_type: Some(AccountType::Checking),
            branch_id: Some(BranchId::new()),
            currency: Some("EUR".to_string()),
            holder_name: format!("Holder of {iban}"),
            opening_balance: Some(balance),
            minimum_allowed_balance: Some(dec!(0)),
            debt: None,
            is_active: true,
        }
    }

    async fn open(ledger: &Ledger, iban: &str, balance: Decimal) -> AccountRecord {
        ledger
            .admin
            .open(new_account(iban, balance))
            .await
            .unwrap()
            .account
    }

    async fn balance_of(store: &InMemoryLedgerStore, iban: &str) -> Decimal {
        store
            .get_by_iban(&Iban::parse(iban).unwrap())
            .await
            .unwrap()
            .unwrap()
            .balance()
            .amount()
    }

    fn deposit(iban: &str, amount: Decimal) -> DepositCommand {
        DepositCommand {
            iban: iban.to_string(),
            amount,
            currency: "EUR".to_string(),
            description: "cash in".to_string(),
            channel: Channel::Branch,
            payment_category: PaymentCategory::General,
        }
    }

    fn withdrawal(iban: &str, amount: Decimal) -> WithdrawalCommand {
        WithdrawalCommand {
            iban: iban.to_string(),
            amount,
            currency: "EUR".to_string(),
            description: "cash out".to_string(),
            channel: Channel::Atm,
            payment_category: PaymentCategory::General,
        }
    }

    fn transfer(from: &str, to: &str, amount: Decimal) -> TransferCommand {
        TransferCommand {
            from_iban: from.to_string(),
            to_iban: to.to_string(),
            amount,
            currency: "EUR".to_string(),
            description: "rent".to_string(),
            channel: Channel::InternetBanking,
            payment_category: PaymentCategory::Rent,
            kind: TransferKind::Standard,
            recipient_name: None,
        }
    }

    #[tokio::test]
    async fn deposit_credits_account_and_journals_entry() {
        let ledger = ledger();
        let account = open(&ledger, C, dec!(50.00)).await;

        let receipt = ledger
            .deposits
            .handle(deposit(C, dec!(25.50)), &actor())
            .await
            .unwrap();

        let entry = &receipt.entry;
        assert!(receipt.rows_affected > 0);
        assert_eq!(entry.movement_type(), MovementType::Deposit);
        assert_eq!(entry.to().map(Iban::as_str), Some(C));
        assert!(entry.from().is_none());
        assert_eq!(entry.fee().amount(), dec!(0));
        assert_eq!(entry.status(), TransactionStatus::Completed);
        assert_eq!(entry.sender_name(), Some("Ada Lovelace"));
        assert_eq!(
            entry.recipient_available_balance().map(|m| m.amount()),
            Some(dec!(75.50))
        );

        // Read-after-write returns exactly the snapshot.
        assert_eq!(balance_of(&ledger.store, C).await, dec!(75.50));

        let journal = ledger.store.ledger_entries_for(account.id).await.unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].status(), TransactionStatus::Completed);

        let links = ledger.store.links_for(account.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].role, LinkRole::Recipient);
        assert_eq!(links[0].ledger_entry_id, entry.entry_id());
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_charges_fee() {
        let ledger = ledger();
        let a = open(&ledger, A, dec!(1000.00)).await;
        let b = open(&ledger, B, dec!(500.00)).await;

        let receipt = ledger
            .transfers
            .handle(transfer(A, B, dec!(200.00)), &actor())
            .await
            .unwrap();
        let entry = &receipt.entry;

        assert_eq!(balance_of(&ledger.store, A).await, dec!(795.00));
        assert_eq!(balance_of(&ledger.store, B).await, dec!(700.00));
        assert_eq!(entry.movement_type(), MovementType::Transfer);
        assert_eq!(entry.amount().amount(), dec!(200.00));
        assert_eq!(entry.fee().amount(), dec!(5.00));
        assert_eq!(entry.sender_available_balance().map(|m| m.amount()), Some(dec!(795.00)));
        assert_eq!(entry.recipient_available_balance().map(|m| m.amount()), Some(dec!(700.00)));
        assert_eq!(entry.status(), TransactionStatus::Completed);
        assert_eq!(entry.sender_name(), Some("Ada Lovelace"));
        assert_eq!(entry.recipient_name(), Some(format!("Holder of {B}").as_str()));

        // One entry, two links pointing at it.
        let sender_links = ledger.store.links_for(a.id).unwrap();
        let recipient_links = ledger.store.links_for(b.id).unwrap();
        assert_eq!(sender_links.len(), 1);
        assert_eq!(recipient_links.len(), 1);
        assert_eq!(sender_links[0].role, LinkRole::Sender);
        assert_eq!(recipient_links[0].role, LinkRole::Recipient);
        assert_eq!(sender_links[0].ledger_entry_id, recipient_links[0].ledger_entry_id);

        let stored = ledger
            .store
            .get_ledger_entry(entry.entry_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&stored, entry);

        let view = LedgerEntryView::for_party(entry, &Iban::parse(A).unwrap()).unwrap();
        assert_eq!(view.amount, dec!(-200.00));
        assert_eq!(view.available_balance, Some(dec!(795.00)));
    }

    #[tokio::test]
    async fn configured_fee_rate_is_charged() {
        let ledger = ledger();
        open(&ledger, A, dec!(1000.00)).await;
        open(&ledger, B, dec!(0.00)).await;

        let config =
            LedgerConfig::from_lookup(|key| (key == TRANSFER_FEE_RATE).then(|| "0.01".to_string()))
                .unwrap();
        let transfers = TransferHandler::from_config(
            Arc::new(ledger.store.clone()),
            ledger.bus.clone(),
            &config,
        );

        let receipt = transfers
            .handle(transfer(A, B, dec!(200.00)), &actor())
            .await
            .unwrap();
        assert_eq!(receipt.entry.fee().amount(), dec!(2.00));
        assert_eq!(balance_of(&ledger.store, A).await, dec!(798.00));
    }

    #[tokio::test]
    async fn fast_transfer_is_journaled_as_fast() {
        let ledger = ledger();
        open(&ledger, A, dec!(100.00)).await;
        open(&ledger, B, dec!(0.00)).await;

        let mut command = transfer(A, B, dec!(10.00));
        command.kind = TransferKind::Fast;
        command.recipient_name = Some("Grace".to_string());
        let receipt = ledger.transfers.handle(command, &actor()).await.unwrap();

        assert_eq!(receipt.entry.movement_type(), MovementType::Fast);
        assert_eq!(receipt.entry.fee().amount(), dec!(0.25));
        assert_eq!(receipt.entry.recipient_name(), Some("Grace"));
        assert_eq!(balance_of(&ledger.store, A).await, dec!(89.75));
    }

    #[tokio::test]
    async fn transfer_blocked_when_fee_is_not_covered() {
        let ledger = ledger();
        let a = open(&ledger, A, dec!(100.00)).await;
        open(&ledger, B, dec!(0.00)).await;
        let outbox_before = ledger.store.outbox().unwrap().len();

        let err = ledger
            .transfers
            .handle(transfer(A, B, dec!(100.00)), &actor())
            .await
            .unwrap_err();

        assert_eq!(err.code, MovementErrorCode::InsufficientFunds);
        assert_eq!(balance_of(&ledger.store, A).await, dec!(100.00));
        assert_eq!(balance_of(&ledger.store, B).await, dec!(0.00));
        assert!(ledger.store.ledger_entries_for(a.id).await.unwrap().is_empty());
        assert_eq!(ledger.store.outbox().unwrap().len(), outbox_before);
    }

    #[tokio::test]
    async fn withdrawal_debits_or_reports_insufficient_funds() {
        let ledger = ledger();
        open(&ledger, C, dec!(40.00)).await;

        let err = ledger
            .withdrawals
            .handle(withdrawal(C, dec!(40.01)), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::InsufficientFunds);
        assert_eq!(balance_of(&ledger.store, C).await, dec!(40.00));

        let receipt = ledger
            .withdrawals
            .handle(withdrawal(C, dec!(40.00)), &actor())
            .await
            .unwrap();
        assert_eq!(receipt.entry.movement_type(), MovementType::Withdrawal);
        assert_eq!(receipt.entry.from().map(Iban::as_str), Some(C));
        assert_eq!(
            receipt.entry.sender_available_balance().map(|m| m.amount()),
            Some(dec!(0.00))
        );
        assert_eq!(balance_of(&ledger.store, C).await, dec!(0.00));
    }

    #[tokio::test]
    async fn same_account_transfer_rejected_before_lookup() {
        let ledger = ledger();
        // Neither account exists: a lookup would have produced NotFound.
        let err = ledger
            .transfers
            .handle(
                transfer("gb82 west 1234 5698 7654 32", C, dec!(1.00)),
                &actor(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn non_positive_amounts_rejected_everywhere() {
        let ledger = ledger();
        let a = open(&ledger, A, dec!(10.00)).await;
        open(&ledger, B, dec!(10.00)).await;

        for amount in [dec!(0), dec!(-5.00)] {
            let deposit_err = ledger
                .deposits
                .handle(deposit(A, amount), &actor())
                .await
                .unwrap_err();
            let withdrawal_err = ledger
                .withdrawals
                .handle(withdrawal(A, amount), &actor())
                .await
                .unwrap_err();
            let transfer_err = ledger
                .transfers
                .handle(transfer(A, B, amount), &actor())
                .await
                .unwrap_err();
            for err in [deposit_err, withdrawal_err, transfer_err] {
                assert_eq!(err.code, MovementErrorCode::BadRequest);
            }
        }

        assert_eq!(balance_of(&ledger.store, A).await, dec!(10.00));
        assert!(ledger.store.ledger_entries_for(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_inactive_and_foreign_currency_accounts_are_rejected() {
        let ledger = ledger();
        open(&ledger, A, dec!(100.00)).await;
        open(&ledger, B, dec!(100.00)).await;

        let err = ledger
            .deposits
            .handle(deposit(C, dec!(1.00)), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::NotFound);

        let err = ledger
            .transfers
            .handle(transfer(A, C, dec!(1.00)), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::NotFound);

        let mut usd = deposit(A, dec!(1.00));
        usd.currency = "USD".to_string();
        let err = ledger.deposits.handle(usd, &actor()).await.unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);

        let err = ledger
            .deposits
            .handle(deposit("not-an-iban", dec!(1.00)), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);

        ledger.admin.deactivate(B).await.unwrap();
        let err = ledger
            .transfers
            .handle(transfer(A, B, dec!(1.00)), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);
        assert_eq!(balance_of(&ledger.store, A).await, dec!(100.00));
    }

    #[tokio::test]
    async fn account_administration_is_validated_and_idempotent() {
        let ledger = ledger();
        let opened = open(&ledger, A, dec!(0)).await;
        assert!(opened.is_active);
        assert_eq!(opened.version, 0);

        let err = ledger.admin.open(new_account(A, dec!(5))).await.unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);

        let mut invalid = new_account(B, dec!(-1));
        invalid.currency = None;
        let err = ledger.admin.open(invalid).await.unwrap_err();
        assert_eq!(err.code, MovementErrorCode::ValidationError);
        assert!(err.messages.len() >= 2);

        let first = ledger.admin.deactivate(A).await.unwrap();
        assert!(!first.account.is_active);
        assert_eq!(first.account.version, 1);
        let second = ledger.admin.deactivate(A).await.unwrap();
        assert_eq!(second.rows_affected, 0);
        let reactivated = ledger.admin.activate(A).await.unwrap();
        assert!(reactivated.account.is_active);

        let types: Vec<String> = ledger
            .store
            .outbox()
            .unwrap()
            .into_iter()
            .map(|m| m.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                "ledger.account.opened",
                "ledger.account.deactivated",
                "ledger.account.activated"
            ]
        );

        let err = ledger.admin.activate(C).await.unwrap_err();
        assert_eq!(err.code, MovementErrorCode::NotFound);
    }

    #[tokio::test]
    async fn committed_events_reach_bus_and_outbox_then_relay() {
        let ledger = ledger();
        let subscription = ledger.bus.subscribe();
        open(&ledger, A, dec!(10.00)).await;
        ledger
            .deposits
            .handle(deposit(A, dec!(5.00)), &actor())
            .await
            .unwrap();

        let received: Vec<String> = subscription
            .drain()
            .into_iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(received, vec!["ledger.account.opened", "ledger.entry.created"]);

        let outbox = ledger.store.outbox().unwrap();
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[1].sequence, 2);
        assert!(outbox.iter().all(|m| !m.is_published()));

        let downstream: Bus = Arc::new(InMemoryEventBus::new());
        let downstream_sub = downstream.subscribe();
        let relay = OutboxRelay::new(
            ledger.store.clone(),
            BusPublisher::new(downstream.clone()),
            10,
            std::time::Duration::from_millis(10),
        );

        let report = relay.relay_once().await.unwrap();
        assert_eq!(report.published, 2);
        assert!(!report.stalled);
        assert_eq!(downstream_sub.drain().len(), 2);
        assert!(ledger.store.fetch_unpublished(10).await.unwrap().is_empty());

        let again = relay.relay_once().await.unwrap();
        assert_eq!(again.fetched, 0);
    }

    struct FailSecond {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OutboundPublisher for FailSecond {
        async fn publish(&self, _message: &OutboxMessage) -> Result<(), PublishError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(PublishError::Unavailable("broker down".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn relay_stops_at_first_failure_and_retries_later() {
        let ledger = ledger();
        open(&ledger, A, dec!(1)).await;
        open(&ledger, B, dec!(1)).await;
        open(&ledger, C, dec!(1)).await;

        let relay = OutboxRelay::new(
            ledger.store.clone(),
            FailSecond {
                calls: AtomicUsize::new(0),
            },
            10,
            std::time::Duration::from_millis(10),
        );

        let first = relay.relay_once().await.unwrap();
        assert_eq!(first.published, 1);
        assert!(first.stalled);

        let second = relay.relay_once().await.unwrap();
        assert_eq!(second.fetched, 2);
        assert_eq!(second.published, 2);
        assert!(ledger.store.fetch_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn relay_run_stops_on_shutdown() {
        let ledger = ledger();
        open(&ledger, A, dec!(1)).await;
        let downstream: Bus = Arc::new(InMemoryEventBus::new());
        let relay = OutboxRelay::new(
            ledger.store.clone(),
            BusPublisher::new(downstream),
            10,
            std::time::Duration::from_millis(5),
        );

        relay
            .run(tokio::time::sleep(std::time::Duration::from_millis(50)))
            .await;
        assert!(ledger.store.fetch_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_unit_is_rejected_as_conflict() {
        let ledger = ledger();
        open(&ledger, A, dec!(100.00)).await;
        let iban = Iban::parse(A).unwrap();

        let mut first = ledger.store.begin_atomic().await.unwrap();
        let mut second = ledger.store.begin_atomic().await.unwrap();
        let mut from_first = first.load_account(&iban).await.unwrap().unwrap();
        let mut from_second = second.load_account(&iban).await.unwrap().unwrap();

        from_first.update_balance(dec!(60), BalanceDirection::Debit).unwrap();
        from_second.update_balance(dec!(70), BalanceDirection::Debit).unwrap();
        first.changes().update_account(from_first);
        second.changes().update_account(from_second);

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert_eq!(balance_of(&ledger.store, A).await, dec!(40.00));
    }

    /// Commits nothing and reports a backend fault, as a crashed commit would.
    struct FailingCommit {
        inner: InMemoryLedgerStore,
    }

    struct FailingUnit {
        inner: InMemoryUnit,
    }

    #[async_trait]
    impl TransactionCoordinator for FailingCommit {
        type Unit = FailingUnit;

        async fn begin_atomic(&self) -> Result<Self::Unit, StoreError> {
            Ok(FailingUnit {
                inner: self.inner.begin_atomic().await?,
            })
        }
    }

    #[async_trait]
    impl UnitOfWork for FailingUnit {
        async fn load_account(
            &mut self,
            iban: &Iban,
        ) -> Result<Option<ledgerbank_accounts::BankAccount>, StoreError> {
            self.inner.load_account(iban).await
        }

        async fn account_exists(&mut self, iban: &Iban) -> Result<bool, StoreError> {
            self.inner.account_exists(iban).await
        }

        fn changes(&mut self) -> &mut ChangeSet {
            self.inner.changes()
        }

        async fn commit(self) -> Result<CommitOutcome, StoreError> {
            self.inner.rollback().await?;
            Err(StoreError::Backend("connection reset during commit".to_string()))
        }

        async fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    /// Swallows the change set and reports zero rows.
    struct ZeroRows {
        inner: InMemoryLedgerStore,
    }

    struct ZeroRowUnit {
        inner: InMemoryUnit,
    }

    #[async_trait]
    impl TransactionCoordinator for ZeroRows {
        type Unit = ZeroRowUnit;

        async fn begin_atomic(&self) -> Result<Self::Unit, StoreError> {
            Ok(ZeroRowUnit {
                inner: self.inner.begin_atomic().await?,
            })
        }
    }

    #[async_trait]
    impl UnitOfWork for ZeroRowUnit {
        async fn load_account(
            &mut self,
            iban: &Iban,
        ) -> Result<Option<ledgerbank_accounts::BankAccount>, StoreError> {
            self.inner.load_account(iban).await
        }

        async fn account_exists(&mut self, iban: &Iban) -> Result<bool, StoreError> {
            self.inner.account_exists(iban).await
        }

        fn changes(&mut self) -> &mut ChangeSet {
            self.inner.changes()
        }

        async fn commit(self) -> Result<CommitOutcome, StoreError> {
            self.inner.rollback().await?;
            Ok(CommitOutcome::default())
        }

        async fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn failed_commit_leaves_both_accounts_untouched() {
        let ledger = ledger();
        let a = open(&ledger, A, dec!(1000.00)).await;
        open(&ledger, B, dec!(500.00)).await;

        let failing = TransferHandler::new(
            Arc::new(FailingCommit {
                inner: ledger.store.clone(),
            }),
            ledger.bus.clone(),
            FeePolicy::standard(),
        );
        let err = failing
            .handle(transfer(A, B, dec!(200.00)), &actor())
            .await
            .unwrap_err();

        assert_eq!(err.code, MovementErrorCode::UnknownError);
        assert!(err.messages[0].contains("connection reset"));
        assert_eq!(balance_of(&ledger.store, A).await, dec!(1000.00));
        assert_eq!(balance_of(&ledger.store, B).await, dec!(500.00));
        assert!(ledger.store.ledger_entries_for(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_row_commit_is_unknown_error() {
        let ledger = ledger();
        open(&ledger, C, dec!(50.00)).await;

        let handler = DepositHandler::new(
            Arc::new(ZeroRows {
                inner: ledger.store.clone(),
            }),
            ledger.bus.clone(),
        );
        let err = handler
            .handle(deposit(C, dec!(25.50)), &actor())
            .await
            .unwrap_err();

        assert_eq!(err.code, MovementErrorCode::UnknownError);
        assert_eq!(balance_of(&ledger.store, C).await, dec!(50.00));
    }

    #[tokio::test]
    async fn sub_cent_amounts_are_rejected_by_every_handler() {
        let ledger = ledger();
        let a = open(&ledger, A, dec!(10.00)).await;
        let b = open(&ledger, B, dec!(0.01)).await;

        for amount in [dec!(0.005), dec!(1.005)] {
            let errors = [
                ledger
                    .transfers
                    .handle(transfer(A, B, amount), &actor())
                    .await
                    .unwrap_err(),
                ledger
                    .deposits
                    .handle(deposit(B, amount), &actor())
                    .await
                    .unwrap_err(),
                ledger
                    .withdrawals
                    .handle(withdrawal(A, amount), &actor())
                    .await
                    .unwrap_err(),
            ];
            for err in errors {
                assert_eq!(err.code, MovementErrorCode::BadRequest, "{amount}: {err}");
            }
        }

        assert_eq!(balance_of(&ledger.store, A).await, dec!(10.00));
        assert_eq!(balance_of(&ledger.store, B).await, dec!(0.01));
        assert!(ledger.store.ledger_entries_for(a.id).await.unwrap().is_empty());
        assert!(ledger.store.ledger_entries_for(b.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trailing_zeros_are_not_extra_precision() {
        let ledger = ledger();
        open(&ledger, C, dec!(0)).await;

        let receipt = ledger
            .deposits
            .handle(deposit(C, dec!(1.5000)), &actor())
            .await
            .unwrap();
        assert_eq!(receipt.entry.amount().amount(), dec!(1.50));
        assert_eq!(balance_of(&ledger.store, C).await, dec!(1.50));
    }

    #[tokio::test]
    async fn out_of_range_amounts_are_rejected_without_panicking() {
        let ledger = ledger();
        open(&ledger, A, dec!(100.00)).await;
        open(&ledger, B, MAX_AMOUNT).await;
        open(&ledger, C, dec!(0)).await;

        let err = ledger
            .deposits
            .handle(deposit(C, Decimal::MAX), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);

        let err = ledger
            .transfers
            .handle(transfer(A, C, Decimal::MAX), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);

        // Valid amount, but the credit would push B past the largest balance.
        let err = ledger
            .deposits
            .handle(deposit(B, dec!(0.01)), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);
        let err = ledger
            .transfers
            .handle(transfer(A, B, dec!(1.00)), &actor())
            .await
            .unwrap_err();
        assert_eq!(err.code, MovementErrorCode::BadRequest);

        assert_eq!(balance_of(&ledger.store, A).await, dec!(100.00));
        assert_eq!(balance_of(&ledger.store, B).await, MAX_AMOUNT);
        assert_eq!(balance_of(&ledger.store, C).await, dec!(0.00));
    }

    fn opening_balance() -> impl Strategy<Value = Decimal> {
        prop_oneof![
            4 => (0i64..10_000_000i64).prop_map(|cents| Decimal::new(cents, 2)),
            1 => Just(MAX_AMOUNT),
        ]
    }

    /// Any scale from 0 to 4 places, plus magnitudes at and past the limit.
    fn requested_amount() -> impl Strategy<Value = Decimal> {
        prop_oneof![
            6 => (1i64..10_000_000i64, 0u32..=4u32).prop_map(|(m, scale)| Decimal::new(m, scale)),
            2 => (0u32..=4u32).prop_map(|scale| Decimal::new(i64::MAX, scale)),
            1 => Just(MAX_AMOUNT),
            1 => Just(Decimal::MAX),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn transfers_conserve_money_or_reject_cleanly(
            sender_before in opening_balance(),
            recipient_before in opening_balance(),
            amount in requested_amount(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let ledger = ledger();
                open(&ledger, A, sender_before).await;
                open(&ledger, B, recipient_before).await;

                let result = ledger
                    .transfers
                    .handle(transfer(A, B, amount), &actor())
                    .await;

                let sender_after = balance_of(&ledger.store, A).await;
                let recipient_after = balance_of(&ledger.store, B).await;
                match result {
                    Ok(receipt) => {
                        let moved = receipt.entry.amount().amount();
                        let fee = receipt.entry.fee().amount();
                        prop_assert_eq!(moved, amount);
                        prop_assert_eq!(recipient_after - recipient_before, moved);
                        prop_assert_eq!(sender_before - sender_after, moved + fee);
                        prop_assert_eq!(
                            sender_before + recipient_before,
                            sender_after + recipient_after + fee
                        );
                        prop_assert!(sender_after >= Decimal::ZERO);
                    }
                    Err(err) => {
                        if exact_amount(amount).is_err() {
                            prop_assert_eq!(err.code, MovementErrorCode::BadRequest);
                        } else {
                            prop_assert!(matches!(
                                err.code,
                                MovementErrorCode::InsufficientFunds | MovementErrorCode::BadRequest
                            ), "{}", err);
                        }
                        prop_assert_eq!(sender_after, sender_before);
                        prop_assert_eq!(recipient_after, recipient_before);
                    }
                }
                Ok(())
            })?;
        }
    }
}
