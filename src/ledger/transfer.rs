//! Transfers between two accounts
//!
//! A transfer is two ledger entries sharing a correlation token: an expense
//! leg (debit) on the origin and an income leg (credit) on the destination.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::ledger::transaction::TransactionLedger;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_positive_amount, validate_transaction_description};

/// Both legs of a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub token: String,
    pub debit: Transaction,
    pub credit: Transaction,
}

impl Transfer {
    /// Pair two legs, checking they form one transfer
    pub fn from_legs(legs: Vec<Transaction>) -> LedgerResult<Self> {
        let mut debit = None;
        let mut credit = None;
        let mut token = None;
        for leg in legs {
            let leg_token = leg.transfer_token().map(str::to_string).ok_or_else(|| {
                LedgerError::Validation(format!("transaction {} is not a transfer leg", leg.id))
            })?;
            if token.get_or_insert_with(|| leg_token.clone()) != &leg_token {
                return Err(LedgerError::Validation(
                    "legs belong to different transfers".to_string(),
                ));
            }
            let slot = match leg.leg_role() {
                Some(LegRole::Debit) => &mut debit,
                _ => &mut credit,
            };
            if slot.replace(leg).is_some() {
                return Err(LedgerError::Validation(format!(
                    "transfer {} has two legs with the same role",
                    leg_token
                )));
            }
        }

        match (token, debit, credit) {
            (Some(token), Some(debit), Some(credit)) => Ok(Self {
                token,
                debit,
                credit,
            }),
            (Some(token), _, _) => Err(LedgerError::Validation(format!(
                "transfer {} is missing a leg",
                token
            ))),
            (None, _, _) => Err(LedgerError::Validation("transfer has no legs".to_string())),
        }
    }

    pub fn amount(&self) -> &BigDecimal {
        &self.debit.amount
    }

    pub fn origin_account_id(&self) -> &str {
        &self.debit.account_id
    }

    pub fn destination_account_id(&self) -> &str {
        &self.credit.account_id
    }
}

/// What a deleted transfer looked like; enough to recreate it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub token: String,
    pub origin_account_id: String,
    pub destination_account_id: String,
    pub amount: BigDecimal,
    pub date: NaiveDate,
    pub description: String,
}

impl TransferSnapshot {
    /// Rebuild the transfer's shape from either of its legs
    pub fn from_leg(leg: &Transaction) -> Option<Self> {
        let TransactionLink::TransferLeg {
            token,
            role,
            counterparty_account_id,
        } = &leg.link
        else {
            return None;
        };
        let (origin, destination) = match role {
            LegRole::Debit => (leg.account_id.clone(), counterparty_account_id.clone()),
            LegRole::Credit => (counterparty_account_id.clone(), leg.account_id.clone()),
        };
        Some(Self {
            token: token.clone(),
            origin_account_id: origin,
            destination_account_id: destination,
            amount: leg.amount.clone(),
            date: leg.date,
            description: leg.description.clone(),
        })
    }
}

/// Creates and deletes both legs of a transfer together.
///
/// Both account locks are held for the whole operation and both legs go out
/// in one commit with both balances. On storage without multi-account
/// commits each leg is its own commit, so a failure between them is
/// compensated or reported as [`LedgerError::PartialFailure`].
pub struct TransferCoordinator<S: LedgerStorage> {
    ledger: TransactionLedger<S>,
}

impl<S: LedgerStorage + Clone> Clone for TransferCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: LedgerStorage> TransferCoordinator<S> {
    pub fn new(ledger: TransactionLedger<S>) -> Self {
        Self { ledger }
    }

    #[tracing::instrument(skip(self, amount, description), fields(amount = %amount))]
    pub async fn create_transfer(
        &self,
        origin_account_id: &str,
        destination_account_id: &str,
        amount: BigDecimal,
        date: NaiveDate,
        description: &str,
    ) -> LedgerResult<Transfer> {
        if origin_account_id == destination_account_id {
            return Err(LedgerError::Validation(
                "transfer origin and destination must differ".to_string(),
            ));
        }
        validate_positive_amount(&amount)?;
        validate_transaction_description(description)?;

        let _guard = self
            .ledger
            .locks
            .acquire([origin_account_id, destination_account_id])
            .await?;
        self.ledger.account_required(origin_account_id).await?;
        self.ledger.account_required(destination_account_id).await?;

        let token = Uuid::new_v4().to_string();
        let debit = leg(
            &token,
            LegRole::Debit,
            origin_account_id,
            destination_account_id,
            &amount,
            date,
            description,
        );
        let credit = leg(
            &token,
            LegRole::Credit,
            destination_account_id,
            origin_account_id,
            &amount,
            date,
            description,
        );

        let (debit, credit) = if self.ledger.storage.multi_account_commits() {
            self.ledger
                .write_locked(&[debit.clone(), credit.clone()], &[], WriteBatch::new())
                .await?;
            (debit, credit)
        } else {
            self.create_leg_by_leg(&token, debit, credit).await?
        };

        tracing::info!(
            %token,
            origin = origin_account_id,
            destination = destination_account_id,
            "transfer created"
        );
        Ok(Transfer {
            token,
            debit,
            credit,
        })
    }

    /// One commit per leg; a failed credit leg is compensated by removing the
    /// debit leg again
    async fn create_leg_by_leg(
        &self,
        token: &str,
        debit: Transaction,
        credit: Transaction,
    ) -> LedgerResult<(Transaction, Transaction)> {
        let debit = self.ledger.insert_locked(debit, WriteBatch::new()).await?;
        match self.ledger.insert_locked(credit, WriteBatch::new()).await {
            Ok(credit) => Ok((debit, credit)),
            Err(err) => Err(self.compensate_create(token, &debit, err).await),
        }
    }

    /// Undo the debit leg after the credit leg failed
    async fn compensate_create(
        &self,
        token: &str,
        debit: &Transaction,
        cause: LedgerError,
    ) -> LedgerError {
        tracing::warn!(%token, error = %cause, "credit leg failed, removing debit leg");
        match self.ledger.remove_locked(debit).await {
            Ok(()) => cause,
            Err(compensation) => {
                tracing::error!(
                    %token,
                    transaction_id = %debit.id,
                    error = %compensation,
                    "could not remove debit leg after failed transfer"
                );
                LedgerError::PartialFailure {
                    token: token.to_string(),
                    operation: TransferOperation::Create,
                    surviving_role: LegRole::Debit,
                    surviving_transaction_id: debit.id.clone(),
                    reason: format!("{}; compensation failed: {}", cause, compensation),
                }
            }
        }
    }

    /// Delete both legs and return what the transfer looked like.
    ///
    /// When the legs have to be removed one commit at a time and only one
    /// goes, the error names the one left behind; calling again with the same
    /// token removes it.
    #[tracing::instrument(skip(self))]
    pub async fn delete_transfer(&self, token: &str) -> LedgerResult<TransferSnapshot> {
        let legs = self.legs(token).await?;
        let accounts: BTreeSet<String> = legs
            .iter()
            .flat_map(|leg| {
                let snapshot = TransferSnapshot::from_leg(leg);
                snapshot
                    .map(|s| vec![s.origin_account_id, s.destination_account_id])
                    .unwrap_or_default()
            })
            .collect();
        let _guard = self.ledger.locks.acquire(accounts).await?;

        // Re-read under the locks
        let mut legs = self.legs(token).await?;
        legs.sort_by_key(|leg| leg.leg_role() != Some(LegRole::Debit));
        let snapshot = legs
            .first()
            .and_then(TransferSnapshot::from_leg)
            .ok_or_else(|| LedgerError::TransferNotFound(token.to_string()))?;

        if self.ledger.storage.multi_account_commits() {
            self.ledger
                .write_locked(&[], &legs, WriteBatch::new())
                .await?;
        } else {
            self.delete_leg_by_leg(token, &legs).await?;
        }

        tracing::info!(%token, legs = legs.len(), "transfer deleted");
        Ok(snapshot)
    }

    /// One commit per leg, debit first. If the second commit fails the error
    /// names the leg left behind.
    async fn delete_leg_by_leg(&self, token: &str, legs: &[Transaction]) -> LedgerResult<()> {
        let mut remaining = legs.iter();
        if let Some(first) = remaining.next() {
            self.ledger.remove_locked(first).await?;
        }
        if let Some(second) = remaining.next() {
            if let Err(err) = self.ledger.remove_locked(second).await {
                let role = second.leg_role().unwrap_or(LegRole::Credit);
                tracing::warn!(
                    %token,
                    surviving_transaction_id = %second.id,
                    surviving_role = %role,
                    error = %err,
                    "transfer delete left one leg behind"
                );
                return Err(LedgerError::PartialFailure {
                    token: token.to_string(),
                    operation: TransferOperation::Delete,
                    surviving_role: role,
                    surviving_transaction_id: second.id.clone(),
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Capture a transfer without touching it
    pub async fn snapshot(&self, token: &str) -> LedgerResult<TransferSnapshot> {
        let legs = self.legs(token).await?;
        legs.iter()
            .find(|leg| leg.leg_role() == Some(LegRole::Debit))
            .or_else(|| legs.first())
            .and_then(TransferSnapshot::from_leg)
            .ok_or_else(|| LedgerError::TransferNotFound(token.to_string()))
    }

    /// Recreate a deleted transfer. The new transfer gets a fresh token.
    pub async fn undo_delete(&self, snapshot: &TransferSnapshot) -> LedgerResult<Transfer> {
        tracing::info!(previous_token = %snapshot.token, "recreating deleted transfer");
        self.create_transfer(
            &snapshot.origin_account_id,
            &snapshot.destination_account_id,
            snapshot.amount.clone(),
            snapshot.date,
            &snapshot.description,
        )
        .await
    }

    pub async fn get_transfer(&self, token: &str) -> LedgerResult<Transfer> {
        Transfer::from_legs(self.legs(token).await?)
    }

    /// Complete transfers touching an account, oldest first
    pub async fn list_for_account(&self, account_id: &str) -> LedgerResult<Vec<Transfer>> {
        let entries = self
            .ledger
            .list(&TransactionQuery::new().account(account_id))
            .await?;
        let mut seen = BTreeSet::new();
        let mut transfers = Vec::new();
        for token in entries.iter().filter_map(Transaction::transfer_token) {
            if !seen.insert(token.to_string()) {
                continue;
            }
            match self.get_transfer(token).await {
                Ok(transfer) => transfers.push(transfer),
                Err(LedgerError::Validation(reason)) => {
                    tracing::warn!(%token, %reason, "skipping incomplete transfer");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(transfers)
    }

    async fn legs(&self, token: &str) -> LedgerResult<Vec<Transaction>> {
        let legs = self
            .ledger
            .list(&TransactionQuery::new().transfer_token(token))
            .await?;
        if legs.is_empty() {
            return Err(LedgerError::TransferNotFound(token.to_string()));
        }
        if legs.len() > 2 {
            return Err(LedgerError::Validation(format!(
                "transfer {} has {} legs",
                token,
                legs.len()
            )));
        }
        Ok(legs)
    }
}

fn leg(
    token: &str,
    role: LegRole,
    account_id: &str,
    counterparty_account_id: &str,
    amount: &BigDecimal,
    date: NaiveDate,
    description: &str,
) -> Transaction {
    let kind = match role {
        LegRole::Debit => TransactionKind::Expense,
        LegRole::Credit => TransactionKind::Income,
    };
    Transaction::from_new(
        NewTransaction::new(account_id, kind, amount.clone(), date, description),
        TransactionLink::TransferLeg {
            token: token.to_string(),
            role,
            counterparty_account_id: counterparty_account_id.to_string(),
        },
    )
}
