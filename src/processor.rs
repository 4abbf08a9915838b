//! Sequencing of the operations of one transaction.
//!
//! Operations run one at a time: each is evaluated against the ledger as left by the previous
//! ones and applied before the next begins. If any operation fails the ledger is rolled back to
//! the snapshot taken before the transaction.

use log::{debug, error};
use thiserror::Error;

use crate::core::{CommitError, ExecutionEngine, Ledger};
use crate::evaluator::{EvalError, Evaluator, InvokeResult};
use crate::tx::Transaction;

#[derive(Error, Clone, PartialEq, Debug)]
pub enum TxError {
    #[error("transaction has no operations")]
    Empty,
    /// The operation at `index` failed to evaluate.
    #[error("{source}")]
    Operation {
        index: usize,
        #[source]
        source: EvalError,
    },
    #[error("fatal commit error: {0}")]
    Commit(#[from] CommitError),
}

impl TxError {
    /// The evaluation error behind a failed operation, if that is what happened.
    pub fn eval_error(&self) -> Option<&EvalError> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn run_operations<L: Ledger>(
    ledger: &mut L, engine: &dyn ExecutionEngine, tx: &Transaction,
) -> Result<Vec<InvokeResult>, TxError> {
    if tx.operations.is_empty() {
        return Err(TxError::Empty)
    }
    let tx_id = tx.tx_id();
    let mut results = Vec::with_capacity(tx.operations.len());
    for (index, op) in tx.operations.iter().enumerate() {
        let evaluated = Evaluator::new(tx_id.clone(), op)
            .evaluate(&*ledger, engine)
            .map_err(|source| TxError::Operation { index, source })?;
        results.push(evaluated.apply(ledger)?);
    }
    Ok(results)
}

/// Evaluate and apply every operation of `tx`. On failure the ledger is left as it was.
pub fn apply_transaction<L: Ledger>(
    ledger: &mut L, engine: &dyn ExecutionEngine, tx: &Transaction,
) -> Result<Vec<InvokeResult>, TxError> {
    let snapshot = ledger.snapshot();
    match run_operations(ledger, engine, tx) {
        Ok(results) => {
            debug!("applied tx {}", tx.tx_id());
            Ok(results)
        }
        Err(e) => {
            if let TxError::Commit(ref c) = e {
                error!("commit of tx {} failed: {}", tx.tx_id(), c);
            }
            ledger.rollback(snapshot);
            Err(e)
        }
    }
}

/// Dry run of `tx` on a throwaway copy of the ledger.
pub fn evaluate_transaction<L: Ledger>(
    ledger: &L, engine: &dyn ExecutionEngine, tx: &Transaction,
) -> Result<Vec<InvokeResult>, TxError> {
    let mut scratch = ledger.snapshot();
    run_operations(&mut scratch, engine, tx)
}
