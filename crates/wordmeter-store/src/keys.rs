//! Key encoding utilities for `RocksDB`.

use wordmeter_core::{AccountId, IntentId, InvoiceId, TransactionId};

use crate::error::{Result, StoreError};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-scoped index key.
///
/// Format: `account_id (16 bytes) || ulid (16 bytes)`. ULIDs are time-ordered,
/// so entries for an account sort chronologically.
#[must_use]
pub fn account_index_key(account_id: &AccountId, ulid_bytes: [u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&ulid_bytes);
    key
}

/// Prefix for iterating an account-scoped index.
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the trailing ULID bytes from an account-scoped index key.
///
/// # Errors
///
/// Returns `StoreError::Database` if the key is not 32 bytes.
pub fn extract_ulid_from_index_key(key: &[u8]) -> Result<[u8; 16]> {
    key.get(16..32)
        .and_then(|tail| <[u8; 16]>::try_from(tail).ok())
        .ok_or_else(|| StoreError::Database(format!("malformed index key of {} bytes", key.len())))
}

/// Key for the external-reference uniqueness index.
#[must_use]
pub fn reference_key(reference: &str) -> Vec<u8> {
    reference.as_bytes().to_vec()
}

/// Create a payment intent key.
#[must_use]
pub fn intent_key(intent_id: &IntentId) -> Vec<u8> {
    intent_id.to_bytes().to_vec()
}

/// Create a coupon key from a normalized code.
#[must_use]
pub fn coupon_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

/// Create an invoice key.
#[must_use]
pub fn invoice_key(invoice_id: &InvoiceId) -> Vec<u8> {
    invoice_id.to_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_index_key_format() {
        let account_id = AccountId::generate();
        let tx_id = TransactionId::generate();
        let key = account_index_key(&account_id, tx_id.to_bytes());

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], account_id.as_bytes());
        assert_eq!(&key[16..], tx_id.to_bytes());
        assert!(key.starts_with(&account_prefix(&account_id)));
    }

    #[test]
    fn extract_ulid_roundtrip() {
        let account_id = AccountId::generate();
        let tx_id = TransactionId::generate();
        let key = account_index_key(&account_id, tx_id.to_bytes());

        let extracted = TransactionId::from_bytes(extract_ulid_from_index_key(&key).unwrap());
        assert_eq!(extracted, tx_id);
    }

    #[test]
    fn extract_ulid_rejects_short_key() {
        assert!(extract_ulid_from_index_key(&[0u8; 20]).is_err());
    }
}
