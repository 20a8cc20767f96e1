//! Idempotency records for applied custody logs.

use rusqlite::params;

use super::StoreTx;
use crate::core::{error::BrokerError, model::ContractEvent};

impl StoreTx<'_> {
    pub fn has_contract_event(
        &self,
        chain_id: u64,
        tx_hash: &str,
        log_index: u64,
    ) -> Result<bool, BrokerError> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM contract_events WHERE chain_id = ?1 AND tx_hash = ?2 AND log_index = ?3",
            params![chain_id, tx_hash, log_index],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert the idempotency row. The `(chain_id, tx_hash, log_index)`
    /// primary key turns a double-apply into a constraint error, which the
    /// ingestor treats as "already processed".
    pub fn insert_contract_event(&self, event: &ContractEvent) -> Result<(), BrokerError> {
        self.tx.execute(
            "INSERT INTO contract_events (chain_id, contract_address, tx_hash, log_index, block_number) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.chain_id,
                event.contract_address.to_checksum(None),
                event.tx_hash,
                event.log_index,
                event.block_number,
            ],
        )?;
        Ok(())
    }

    /// Highest block with at least one applied log, used to resume polling
    /// after a restart.
    pub fn last_event_block(&self, chain_id: u64) -> Result<Option<u64>, BrokerError> {
        let block: Option<u64> = self.tx.query_row(
            "SELECT MAX(block_number) FROM contract_events WHERE chain_id = ?1",
            params![chain_id],
            |row| row.get(0),
        )?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::Store;
    use alloy_primitives::Address;

    fn event(chain_id: u64, tx_hash: &str, log_index: u64, block: u64) -> ContractEvent {
        ContractEvent {
            chain_id,
            contract_address: Address::repeat_byte(0x01),
            tx_hash: tx_hash.to_string(),
            log_index,
            block_number: block,
        }
    }

    #[tokio::test]
    async fn duplicate_event_insert_fails() {
        let store = Store::in_memory().unwrap();
        store
            .transaction(|tx| tx.insert_contract_event(&event(137, "0xaa", 3, 100)))
            .await
            .unwrap();
        assert!(store
            .transaction(|tx| tx.insert_contract_event(&event(137, "0xaa", 3, 100)))
            .await
            .is_err());
        // Same tx hash on another log index is a different event.
        store
            .transaction(|tx| tx.insert_contract_event(&event(137, "0xaa", 4, 100)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn last_block_tracks_per_chain() {
        let store = Store::in_memory().unwrap();
        store
            .transaction(|tx| {
                tx.insert_contract_event(&event(137, "0xaa", 0, 100))?;
                tx.insert_contract_event(&event(137, "0xbb", 0, 250))?;
                tx.insert_contract_event(&event(1, "0xcc", 0, 9000))
            })
            .await
            .unwrap();

        let (polygon, mainnet, empty) = store
            .transaction(|tx| {
                Ok((
                    tx.last_event_block(137)?,
                    tx.last_event_block(1)?,
                    tx.last_event_block(5)?,
                ))
            })
            .await
            .unwrap();
        assert_eq!(polygon, Some(250));
        assert_eq!(mainnet, Some(9000));
        assert_eq!(empty, None);
    }

    #[tokio::test]
    async fn exists_check() {
        let store = Store::in_memory().unwrap();
        store
            .transaction(|tx| tx.insert_contract_event(&event(137, "0xaa", 1, 5)))
            .await
            .unwrap();
        let (hit, miss) = store
            .transaction(|tx| {
                Ok((
                    tx.has_contract_event(137, "0xaa", 1)?,
                    tx.has_contract_event(137, "0xaa", 2)?,
                ))
            })
            .await
            .unwrap();
        assert!(hit);
        assert!(!miss);
    }
}
