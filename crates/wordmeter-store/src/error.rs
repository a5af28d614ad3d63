//! Error types for wordmeter storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Its key.
        id: String,
    },

    /// Insert of a record whose key is taken.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Its key.
        id: String,
    },

    /// Conditional account write lost to a concurrent writer.
    #[error("version conflict: expected={expected}, actual={actual}")]
    VersionConflict {
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// A transaction with this external reference is already recorded.
    #[error("duplicate external reference: {reference}")]
    DuplicateReference {
        /// The reference.
        reference: String,
    },

    /// Conditional coupon increment found no uses left.
    #[error("coupon exhausted: {code}")]
    CouponExhausted {
        /// The coupon code.
        code: String,
    },
}

impl StoreError {
    pub(crate) fn poisoned() -> Self {
        Self::Database("store lock poisoned".into())
    }
}

impl From<StoreError> for wordmeter_core::BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CouponExhausted { code } => Self::CouponExhausted { code },
            StoreError::Serialization(msg) => Self::Serialization(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}
