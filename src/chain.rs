//! An in-memory chain: assets, a mempool and a linear list of blocks on top of a [MemLedger].

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::Serialize;
use thiserror::Error;

use crate::common::{Addr, AssetId, Hash, Share};
use crate::config::{ChainConfig, ConfigError};
use crate::core::params::CORE_ASSET_ID;
use crate::core::{
    Asset, CommitError, ContractObject, ExecutionEngine, LedgerR, LedgerW,
    StackEngine, TxReceipt,
};
use crate::evaluator::{invoke_offline, EvalError, InvokeResult};
use crate::mempool::Mempool;
use crate::processor::{apply_transaction, evaluate_transaction, TxError};
use crate::state::MemLedger;
use crate::tx::Transaction;
use crate::value::Value;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("asset symbol `{0}` already exists")]
    AssetExists(String),
    #[error("transaction {0} already exists")]
    DuplicateTx(Hash),
    #[error("block time {time} is before the head block time {head_time}")]
    InvalidBlockTime { time: u64, head_time: u64 },
    #[error("genesis failed: {0}")]
    Genesis(CommitError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Fields covered by the block hash.
#[derive(Clone, PartialEq, Debug, RlpEncodable, RlpDecodable)]
struct BlockHeader {
    number: u64,
    parent: Hash,
    block_time: u64,
    tx_ids: Vec<Hash>,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct Block {
    number: u64,
    parent: Hash,
    block_time: u64,
    txs: Vec<Transaction>,
    hash: Hash,
}

impl Block {
    fn new(
        number: u64, parent: Hash, block_time: u64, txs: Vec<Transaction>,
    ) -> Self {
        let header = BlockHeader {
            number,
            parent,
            block_time,
            tx_ids: txs.iter().map(|tx| tx.tx_id()).collect(),
        };
        let hash = Hash::hash(&rlp::encode(&header));
        Self {
            number: header.number,
            parent: header.parent,
            block_time,
            txs,
            hash,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn parent(&self) -> &Hash {
        &self.parent
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn block_time(&self) -> u64 {
        self.block_time
    }

    pub fn txs(&self) -> &[Transaction] {
        &self.txs
    }
}

pub type BlockRef = Arc<Block>;

pub struct Blockchain {
    config: ChainConfig,
    ledger: MemLedger,
    engine: Box<dyn ExecutionEngine>,
    blocks: Vec<BlockRef>,
    block_index: HashMap<Hash, u64>,
    /// Block number of every included transaction.
    tx_index: HashMap<Hash, u64>,
    mempool: Mempool,
}

impl Blockchain {
    /// Create a chain running contracts on the [StackEngine].
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        Self::with_engine(config, Box::new(StackEngine))
    }

    pub fn with_engine(
        config: ChainConfig, engine: Box<dyn ExecutionEngine>,
    ) -> Result<Self, ChainError> {
        config.validate()?;
        let mut ledger = MemLedger::new();
        ledger.add_asset(Asset {
            asset_id: CORE_ASSET_ID,
            symbol: config.core_asset_symbol.clone(),
            precision: config.core_asset_precision,
        });
        for acc in config.genesis_accounts.iter() {
            ledger
                .register_account(&acc.addr, &acc.pubkey)
                .map_err(ChainError::Genesis)?;
            if acc.balance > 0 {
                let delta = i64::try_from(acc.balance).map_err(|_| {
                    ChainError::Genesis(CommitError::BalanceOverflow {
                        account: acc.addr.clone(),
                        asset: CORE_ASSET_ID,
                    })
                })?;
                ledger
                    .update_balance(&acc.addr, CORE_ASSET_ID, delta)
                    .map_err(ChainError::Genesis)?;
            }
        }
        let genesis = Arc::new(Block::new(
            0,
            Hash::zero().clone(),
            config.genesis_time,
            Vec::new(),
        ));
        info!("genesis block {}", genesis.hash());
        let mut block_index = HashMap::new();
        block_index.insert(genesis.hash().clone(), 0);
        Ok(Self {
            config,
            ledger,
            engine,
            blocks: vec![genesis],
            block_index,
            tx_index: HashMap::new(),
            mempool: Mempool::new(),
        })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn ledger(&self) -> &MemLedger {
        &self.ledger
    }

    pub fn head_block_number(&self) -> u64 {
        self.ledger.head_block_number()
    }

    pub fn latest_block(&self) -> &BlockRef {
        // there is always the genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn get_block_by_number(&self, number: u64) -> Option<&BlockRef> {
        self.blocks.get(usize::try_from(number).ok()?)
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Option<&BlockRef> {
        self.block_index
            .get(hash)
            .and_then(|n| self.get_block_by_number(*n))
    }

    /// Register a new asset and return its id.
    pub fn add_asset(
        &mut self, symbol: &str, precision: u32,
    ) -> Result<AssetId, ChainError> {
        if self.get_asset_by_symbol(symbol).is_some() {
            return Err(ChainError::AssetExists(symbol.to_string()))
        }
        let asset_id =
            self.ledger.assets().map(|a| a.asset_id + 1).max().unwrap_or(0);
        self.ledger.add_asset(Asset {
            asset_id,
            symbol: symbol.to_string(),
            precision,
        });
        info!("added asset {} ({})", symbol, asset_id);
        Ok(asset_id)
    }

    pub fn get_asset(&self, asset: AssetId) -> Option<Asset> {
        self.ledger.get_asset(asset)
    }

    pub fn get_asset_by_symbol(&self, symbol: &str) -> Option<Asset> {
        self.ledger.get_asset_by_symbol(symbol)
    }

    pub fn get_balance(&self, account: &Addr, asset: AssetId) -> Share {
        self.ledger.get_balance(account, asset)
    }

    pub fn get_storage(&self, contract: &Addr, slot: &str) -> Value {
        self.ledger.get_storage(contract, slot)
    }

    pub fn get_contract(&self, addr: &Addr) -> Option<ContractObject> {
        self.ledger.get_contract(addr)
    }

    pub fn get_receipt(&self, tx_id: &Hash) -> Option<TxReceipt> {
        self.ledger.get_receipt(tx_id)
    }

    /// Block number that included the transaction.
    pub fn get_tx_block_number(&self, tx_id: &Hash) -> Option<u64> {
        self.tx_index.get(tx_id).copied()
    }

    /// Dry run of a transaction against the current state.
    pub fn evaluate_transaction(
        &self, tx: &Transaction,
    ) -> Result<Vec<InvokeResult>, ChainError> {
        Ok(evaluate_transaction(&self.ledger, self.engine.as_ref(), tx)?)
    }

    /// Queue a transaction for the next block.
    pub fn accept_transaction_to_mempool(
        &mut self, tx: Transaction,
    ) -> Result<Hash, ChainError> {
        let tx_id = tx.tx_id();
        if self.tx_index.contains_key(&tx_id) {
            return Err(ChainError::DuplicateTx(tx_id))
        }
        self.mempool.add(tx).ok_or(ChainError::DuplicateTx(tx_id))
    }

    pub fn pending_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.mempool.pending()
    }

    /// Apply every pending transaction in arrival order and seal the ones that succeeded into a
    /// new block. Failed transactions are dropped.
    pub fn generate_block(
        &mut self, block_time: u64,
    ) -> Result<BlockRef, ChainError> {
        let head_time = self.latest_block().block_time();
        if block_time < head_time {
            return Err(ChainError::InvalidBlockTime {
                time: block_time,
                head_time,
            })
        }
        let number = self.head_block_number() + 1;
        let mut included = Vec::new();
        for (tx_id, tx) in self.mempool.drain() {
            match apply_transaction(&mut self.ledger, self.engine.as_ref(), &tx)
            {
                Ok(_) => {
                    self.tx_index.insert(tx_id, number);
                    included.push(tx);
                }
                Err(e) => warn!("dropped tx {}: {}", tx_id, e),
            }
        }
        let block = Arc::new(Block::new(
            number,
            self.latest_block().hash().clone(),
            block_time,
            included,
        ));
        self.ledger.set_head_block_number(number);
        self.block_index.insert(block.hash().clone(), number);
        self.blocks.push(block.clone());
        info!(
            "generated block #{} {} with {} txs",
            number,
            block.hash(),
            block.txs().len()
        );
        Ok(block)
    }

    /// Call a read-only contract API on the current state.
    pub fn invoke_contract_offline(
        &self, caller: &Addr, contract: &Addr, api: &str, arg: &str,
    ) -> Result<Value, ChainError> {
        Ok(invoke_offline(
            &self.ledger,
            self.engine.as_ref(),
            caller,
            contract,
            api,
            arg,
            self.config.offline_gas_limit,
        )?)
    }

    /// JSON dump of the ledger together with the chain head.
    pub fn get_state_json(&self) -> serde_json::Value {
        let mut state = self.ledger.to_json();
        if let serde_json::Value::Object(m) = &mut state {
            m.insert(
                "head_block_hash".into(),
                self.latest_block().hash().to_string().into(),
            );
            m.insert("pending_txs".into(), self.mempool.len().into());
        }
        state
    }
}
