//! Double-entry bookkeeping on top of the journal: transfers and view
//! conversions. Every operation here runs inside a caller-owned storage
//! transaction and leaves balanced entries behind.

use alloy_primitives::Address;

use clearhouse_common::{
    account::{AccountId, AccountType},
    api::ledger::{EntryRecord, TransactionRecord, TransferAllocation},
    units,
};

use super::{
    error::BrokerError,
    model::{Entry, LedgerTransaction, TransactionType},
    storage::StoreTx,
};

/// Move funds between two wallet accounts, one journal pair per asset.
///
/// The debit side is checked against the source's unified balance: a
/// transfer may consume the balance exactly, never beyond it.
pub fn transfer(
    tx: &StoreTx<'_>,
    from: Address,
    to: &AccountId,
    allocations: &[TransferAllocation],
    session_key: Option<Address>,
) -> Result<Vec<LedgerTransaction>, BrokerError> {
    if allocations.is_empty() {
        return Err(BrokerError::InvalidRequest(
            "transfer requires at least one allocation".to_string(),
        ));
    }
    let from_account = AccountId::from_wallet(from);
    if &from_account == to {
        return Err(BrokerError::InvalidRequest(
            "cannot transfer to self".to_string(),
        ));
    }

    let mut transactions = Vec::with_capacity(allocations.len());
    for allocation in allocations {
        if !units::is_positive(&allocation.amount) {
            return Err(BrokerError::InvalidAmount(allocation.amount.to_string()));
        }
        let balance = tx.balance(&from_account, &from_account, &allocation.asset)?;
        if balance < allocation.amount {
            return Err(BrokerError::InsufficientBalance);
        }

        tx.record(
            &from_account,
            AccountType::Wallet,
            &allocation.asset,
            &from_account,
            &(-&allocation.amount),
            session_key,
        )?;
        tx.record(
            to,
            AccountType::Wallet,
            &allocation.asset,
            to,
            &allocation.amount,
            None,
        )?;
        transactions.push(tx.record_transaction(
            TransactionType::Transfer,
            &from_account,
            to,
            &allocation.asset,
            &allocation.amount,
        )?);
    }
    Ok(transactions)
}

pub fn transaction_view(tx: &LedgerTransaction) -> TransactionRecord {
    TransactionRecord {
        id: tx.id,
        tx_type: tx.tx_type.as_str().to_string(),
        from_account: tx.from_account.clone(),
        to_account: tx.to_account.clone(),
        asset: tx.asset.clone(),
        amount: tx.amount.clone(),
        created_at: tx.created_at,
    }
}

pub fn entry_view(entry: &Entry) -> EntryRecord {
    EntryRecord {
        id: entry.id,
        account_id: entry.account_id.clone(),
        account_type: entry.account_type,
        asset: entry.asset.clone(),
        wallet: entry.wallet.clone(),
        credit: entry.credit.clone(),
        debit: entry.debit.clone(),
        session_key: entry.session_key,
        created_at: entry.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::Store;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn dec(raw: &str) -> BigDecimal {
        BigDecimal::from_str(raw).unwrap()
    }

    fn fund(tx: &StoreTx<'_>, wallet: Address, asset: &str, amount: &str) {
        let account = AccountId::from_wallet(wallet);
        tx.record(
            &account,
            AccountType::Wallet,
            asset,
            &account,
            &dec(amount),
            None,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn transfer_moves_exactly_the_requested_amount() {
        let store = Store::in_memory().unwrap();
        let a = Address::repeat_byte(0x0A);
        let b = Address::repeat_byte(0x0B);
        let to = AccountId::from_wallet(b);

        let transactions = store
            .transaction(|tx| {
                fund(tx, a, "usdc", "1000");
                transfer(
                    tx,
                    a,
                    &to,
                    &[TransferAllocation {
                        asset: "usdc".into(),
                        amount: dec("500"),
                    }],
                    None,
                )
            })
            .await
            .unwrap();

        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].tx_type, TransactionType::Transfer);

        let (from_balance, to_balance) = store
            .transaction(|tx| {
                let from = AccountId::from_wallet(a);
                Ok((
                    tx.balance(&from, &from, "usdc")?,
                    tx.balance(&to, &to, "usdc")?,
                ))
            })
            .await
            .unwrap();
        assert_eq!(from_balance, dec("500"));
        assert_eq!(to_balance, dec("500"));
    }

    #[tokio::test]
    async fn transfer_boundaries() {
        let store = Store::in_memory().unwrap();
        let a = Address::repeat_byte(0x0A);
        let b = AccountId::from_wallet(Address::repeat_byte(0x0B));

        // Zero and negative amounts are rejected.
        for bad in ["0", "-1"] {
            let result = store
                .transaction(|tx| {
                    fund(tx, a, "usdc", "10");
                    transfer(
                        tx,
                        a,
                        &b,
                        &[TransferAllocation {
                            asset: "usdc".into(),
                            amount: dec(bad),
                        }],
                        None,
                    )
                })
                .await;
            assert!(matches!(result, Err(BrokerError::InvalidAmount(_))));
        }

        // The exact balance is spendable; one unit above is not. The failed
        // attempt must roll back, leaving the full balance intact.
        store
            .transaction(|tx| {
                fund(tx, a, "usdc", "10");
                Ok(())
            })
            .await
            .unwrap();
        let over = store
            .transaction(|tx| {
                transfer(
                    tx,
                    a,
                    &b,
                    &[TransferAllocation {
                        asset: "usdc".into(),
                        amount: dec("10.000001"),
                    }],
                    None,
                )
            })
            .await;
        assert!(matches!(over, Err(BrokerError::InsufficientBalance)));

        store
            .transaction(|tx| {
                transfer(
                    tx,
                    a,
                    &b,
                    &[TransferAllocation {
                        asset: "usdc".into(),
                        amount: dec("10"),
                    }],
                    None,
                )
            })
            .await
            .unwrap();

        let from_balance = store
            .transaction(|tx| {
                let from = AccountId::from_wallet(a);
                tx.balance(&from, &from, "usdc")
            })
            .await
            .unwrap();
        assert_eq!(from_balance, dec("0"));
    }

    #[tokio::test]
    async fn self_transfer_is_rejected() {
        let store = Store::in_memory().unwrap();
        let a = Address::repeat_byte(0x0A);
        let result = store
            .transaction(|tx| {
                fund(tx, a, "usdc", "10");
                transfer(
                    tx,
                    a,
                    &AccountId::from_wallet(a),
                    &[TransferAllocation {
                        asset: "usdc".into(),
                        amount: dec("1"),
                    }],
                    None,
                )
            })
            .await;
        assert!(matches!(result, Err(BrokerError::InvalidRequest(_))));
    }
}
