#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A read or write was attempted with no open write transaction
    TransactionRequired,
    /// Another write transaction is already open
    TransactionAlreadyExists,
    InvalidRecord { id: String, reason: String },
    Cancelled,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::TransactionRequired => write!(f, "a write transaction is required"),
            StoreError::TransactionAlreadyExists => {
                write!(f, "a write transaction is already open")
            }
            StoreError::InvalidRecord { id, reason } => {
                write!(f, "invalid record '{}': {}", id, reason)
            }
            StoreError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for StoreError {}
