//! One transaction per source file: committed when the pass succeeds, rolled back
//! otherwise.

use rentroll_storage::{ImportSession, Store, StoreError};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Connected,
    InTransaction,
    Committed,
    RolledBack,
    Released,
}

pub struct FileTransaction {
    label: String,
    session: Box<dyn ImportSession>,
}

impl FileTransaction {
    pub async fn begin(store: &dyn Store, label: &str) -> Result<Self, StoreError> {
        debug!(file = label, state = ?TransactionState::Connected, "opening transaction");
        let session = store.begin().await?;
        debug!(file = label, state = ?TransactionState::InTransaction, "transaction started");
        Ok(Self {
            label: label.to_string(),
            session,
        })
    }

    pub fn session(&mut self) -> &mut dyn ImportSession {
        self.session.as_mut()
    }

    /// Commits on `Ok`; on `Err` rolls back and hands the original error back.
    /// A failed rollback is logged, never allowed to mask the cause.
    ///
    /// Returns the state the transaction ended in: `Committed` or `RolledBack`.
    pub async fn finish<T, E>(self, outcome: Result<T, E>) -> (TransactionState, Result<T, E>)
    where
        E: From<StoreError>,
    {
        let Self { label, session } = self;

        let (state, result) = match outcome {
            Ok(value) => match session.commit().await {
                Ok(()) => (TransactionState::Committed, Ok(value)),
                Err(commit_err) => {
                    error!(file = %label, error = %commit_err, "commit failed");
                    (TransactionState::RolledBack, Err(E::from(commit_err)))
                }
            },
            Err(err) => match session.rollback().await {
                Ok(()) => (TransactionState::RolledBack, Err(err)),
                Err(rollback_err) => {
                    error!(file = %label, error = %rollback_err, "rollback failed");
                    (TransactionState::RolledBack, Err(err))
                }
            },
        };

        debug!(file = %label, outcome = ?state, "transaction finished");
        debug!(file = %label, state = ?TransactionState::Released, "connection released");
        (state, result)
    }
}
