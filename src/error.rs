// error.rs
// Domain error shared by the ledger, the access guard and user management.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    /// Malformed user input; the mutation is never attempted.
    #[error("{}", .0.join(" "))]
    Validation(Vec<String>),
    /// A referenced product, supplier, customer or category does not exist.
    #[error("{}", .0.join(" "))]
    Reference(Vec<String>),
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not enough stock for {product}: {available} available, {requested} requested")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl InventoryError {
    pub fn conflict(message: impl Into<String>) -> Self {
        InventoryError::Conflict(message.into())
    }

    /// Messages suitable for flashing back to the user.
    pub fn messages(&self) -> Vec<String> {
        match self {
            InventoryError::Validation(msgs) | InventoryError::Reference(msgs) => msgs.clone(),
            InventoryError::Storage(_) => {
                vec!["Something went wrong, nothing was saved.".to_string()]
            }
            other => vec![other.to_string()],
        }
    }
}

impl From<mongodb::error::Error> for InventoryError {
    fn from(err: mongodb::error::Error) -> Self {
        InventoryError::Storage(err.into())
    }
}
