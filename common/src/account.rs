use std::{fmt, str::FromStr};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Opaque ledger account identifier.
///
/// A value that parses as a 20-byte hex address is normalized to its
/// EIP-55 checksummed form so that the same wallet always maps to the same
/// account rows. Anything else (channel ids, app-session ids, reserved
/// system accounts) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new<S: Into<String>>(raw: S) -> Self {
        let raw = raw.into();
        match Address::from_str(&raw) {
            Ok(address) => Self(address.to_checksum(None)),
            Err(_) => Self(raw),
        }
    }

    pub fn from_wallet(address: Address) -> Self {
        Self(address.to_checksum(None))
    }

    /// Returns the wallet address when this account is a plain wallet account.
    pub fn as_wallet(&self) -> Option<Address> {
        Address::from_str(&self.0).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Address> for AccountId {
    fn from(address: Address) -> Self {
        Self::from_wallet(address)
    }
}

impl From<&str> for AccountId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for AccountId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// Ledger account classes. Stored as integers in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Wallet,
    Channel,
    AppSession,
}

impl AccountType {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Wallet => 0,
            Self::Channel => 1,
            Self::AppSession => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Wallet),
            1 => Some(Self::Channel),
            2 => Some(Self::AppSession),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_accounts_are_checksummed() {
        let lower = AccountId::new("0xd8da6bf26964af9d7eed9e03e53415d37aa96045");
        let upper = AccountId::new("0xD8DA6BF26964AF9D7EED9E03E53415D37AA96045");
        assert_eq!(lower, upper);
        assert_eq!(lower.as_str(), "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
        assert!(lower.as_wallet().is_some());
    }

    #[test]
    fn opaque_ids_pass_through() {
        let id = AccountId::new("0xdeadbeef_not_an_address");
        assert_eq!(id.as_str(), "0xdeadbeef_not_an_address");
        assert!(id.as_wallet().is_none());
    }
}
