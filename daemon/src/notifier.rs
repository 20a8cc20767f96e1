//! Server-initiated notifications: built, signed with the broker key and
//! fanned out through the connection hub. Sent eagerly from handlers and
//! after event ingestion commits.

use std::sync::Arc;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use serde_json::json;

use clearhouse_common::{
    api::{
        app_session::AppSessionView,
        channel::ChannelView,
        ledger::{BalanceEntry, TransactionRecord},
        NOTIFY_APP_SESSION_UPDATE, NOTIFY_BALANCE_UPDATE, NOTIFY_CHANNEL_UPDATE, NOTIFY_TRANSFER,
    },
    crypto::sign_payload,
    rpc::{RpcResponse, RpcPayload},
    time::get_current_time_in_millis,
};

use crate::rpc::hub::ConnectionHub;

pub struct Notifier {
    hub: Arc<ConnectionHub>,
    signer: PrivateKeySigner,
}

impl Notifier {
    pub fn new(hub: Arc<ConnectionHub>, signer: PrivateKeySigner) -> Self {
        Self { hub, signer }
    }

    async fn publish(&self, user: Address, method: &str, params: serde_json::Value) {
        let payload = RpcPayload::new(0, method, params, get_current_time_in_millis());
        let frame = match self.sign_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to build {} notification: {}", method, e);
                return;
            }
        };
        let delivered = self.hub.publish(user, &frame).await;
        trace!(
            "Notification {} delivered to {} connection(s) of {}",
            method,
            delivered,
            user
        );
    }

    fn sign_frame(&self, payload: RpcPayload) -> Result<String, anyhow::Error> {
        let bytes = payload.to_sign_bytes()?;
        let signature = sign_payload(&self.signer, &bytes)?;
        let response = RpcResponse {
            res: payload,
            sig: vec![signature],
        };
        Ok(serde_json::to_string(&response)?)
    }

    pub async fn balance_update(&self, user: Address, balances: Vec<BalanceEntry>) {
        self.publish(
            user,
            NOTIFY_BALANCE_UPDATE,
            json!({ "balance_updates": balances }),
        )
        .await;
    }

    pub async fn transfer(&self, user: Address, transactions: &[TransactionRecord]) {
        self.publish(user, NOTIFY_TRANSFER, json!({ "transactions": transactions }))
            .await;
    }

    pub async fn channel_update(&self, user: Address, channel: &ChannelView) {
        self.publish(user, NOTIFY_CHANNEL_UPDATE, json!(channel)).await;
    }

    pub async fn app_session_update(&self, participants: &[Address], session: &AppSessionView) {
        for participant in participants {
            self.publish(*participant, NOTIFY_APP_SESSION_UPDATE, json!(session))
                .await;
        }
    }
}
