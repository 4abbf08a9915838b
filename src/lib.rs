//! # simplechain: the state-transition core of a smart-contract chain
//!
//! - A chain is a ledger (accounts, balances, assets, contracts and their storage, receipts) plus
//!   an ordered list of transactions, each made of operations. This crate turns one operation at a
//!   time into a validated set of state changes and writes them into the ledger.
//!
//! - Contract execution itself is pluggable: anything implementing
//!   [ExecutionEngine](core/trait.ExecutionEngine.html) can run interpreted contract code, and a
//!   small stack machine ([StackEngine](core/struct.StackEngine.html)) is included. Native
//!   contracts (see [native]) are compiled into the crate and looked up by template key.
//!
//! # Overview
//! The crate is organized bottom-up:
//!
//! - [common]: basic types (addresses, hashes, byte strings, amounts).
//! - [value]: the typed value stored in contract slots, with a canonical binary encoding (RLP)
//!   and a human-readable one (JSON).
//! - [diff]: structural diff/patch/rollback between two value trees.
//! - [core]: ledger traits, ledger records, error types, gas accounting and the execution engine.
//! - [state]: the per-operation evaluation overlay and an in-memory ledger.
//! - [evaluator]: the evaluate/apply pipeline and the asset conservation check.
//! - [processor]: runs all operations of a transaction, all or nothing.
//! - [mempool], [config] and (with the default `chain` feature) [chain]: a minimal in-memory
//!   chain built from the pieces above.
//!
//! # On the Data Flow
//! Every operation goes through the same two phases:
//!
//! - *Evaluate*: an [EvaluateState](state/struct.EvaluateState.html) overlay is put on top of the
//!   ledger. Reads fall through to the ledger unless the overlay has a pending value; writes only
//!   go to the overlay. Gas is metered while the operation runs, and at the end storage and event
//!   bytes are billed and the conservation of every asset is checked. On any error the overlay is
//!   simply dropped.
//!
//! - *Apply*: the successful result is consumed and written into the ledger through
//!   [LedgerW](core/trait.LedgerW.html). Nothing can be applied without being evaluated first,
//!   and nothing can be applied twice.
//!
//! Because the overlay itself implements [LedgerR](core/trait.LedgerR.html), overlays can be
//! stacked, the same way the ledger sits under the first one:
//!
//! ```notrust
//!           [ ExecutionEngine / native contract ]
//!                     |           ^ (Read)
//!                     v (Write)   |
//!               [     EvaluateState     ] --gas--> [ GasMeter ]
//!                     |           ^
//!            apply()  |           | <LedgerR>
//!                     v           |
//!               [        MemLedger        ]
//!                     |
//!              snapshot() / rollback()  (per transaction)
//! ```

#[macro_use] extern crate num_derive;

#[macro_use]
pub mod common;
#[cfg(feature = "chain")] pub mod chain;
pub mod config;
pub mod core;
pub mod diff;
pub mod evaluator;
pub mod mempool;
pub mod native;
pub mod processor;
pub mod state;
pub mod tx;
pub mod value;
