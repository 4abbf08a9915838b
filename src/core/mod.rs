use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod engine;
pub mod gas;
pub mod params;
mod stack;

use crate::common::{Addr, AssetId, Bytes, Delta, Gas, Hash, Share};
use crate::diff::DiffError;
use crate::value::Value;
pub use engine::{
    CallContext, ExecOutcome, ExecutionEngine, Opcode, Program,
    ProgramBuilder, StackEngine,
};
pub use gas::GasMeter;

/// Code of an interpreted contract together with the API surface it declares.
#[derive(
    Clone,
    PartialEq,
    Eq,
    Default,
    Debug,
    Serialize,
    Deserialize,
    RlpEncodable,
    RlpDecodable,
)]
pub struct ContractCode {
    /// APIs callable on-chain.
    pub abi: Vec<String>,
    /// Read-only APIs.
    pub offline_abi: Vec<String>,
    pub events: Vec<String>,
    pub code: Bytes,
}

impl ContractCode {
    pub fn code_hash(&self) -> Hash {
        Hash::hash(&self.code)
    }

    pub fn has_api(&self, api: &str) -> bool {
        self.abi.iter().chain(self.offline_abi.iter()).any(|a| a == api)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    Normal,
    Native,
}

/// A contract registered on the ledger.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ContractObject {
    pub address: Addr,
    pub owner: Addr,
    pub code: ContractCode,
    pub create_time: u64,
    pub registered_block: u64,
    pub contract_type: ContractType,
    /// Template key of a native contract.
    pub native_key: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ContractEvent {
    pub contract_address: Addr,
    pub event_name: String,
    pub event_arg: String,
    pub caller_addr: Addr,
    pub block_num: u64,
}

/// One receipt per transaction, accumulating the events of all its operations.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id: Hash,
    pub events: Vec<ContractEvent>,
    pub exec_succeed: bool,
}

impl TxReceipt {
    pub fn new(tx_id: Hash) -> Self {
        Self {
            tx_id,
            events: Vec::new(),
            exec_succeed: false,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: AssetId,
    pub symbol: String,
    pub precision: u32,
}

/// Read-only part of the ledger. Both the committed ledger and the per-operation evaluation
/// overlay implement it, so overlays can be stacked on top of each other.
pub trait LedgerR {
    /// Number of the latest block.
    fn head_block_number(&self) -> u64;
    /// Balance of `account` in `asset`, zero if the account never held it.
    fn get_balance(&self, account: &Addr, asset: AssetId) -> Share;
    /// Value stored in a contract's slot. An unwritten slot reads as [Value::Null].
    fn get_storage(&self, contract: &Addr, slot: &str) -> Value;
    fn get_contract(&self, addr: &Addr) -> Option<ContractObject>;
    fn get_asset(&self, asset: AssetId) -> Option<Asset>;
    fn get_asset_by_symbol(&self, symbol: &str) -> Option<Asset>;
    fn is_registered(&self, account: &Addr) -> bool;
    fn get_receipt(&self, tx_id: &Hash) -> Option<TxReceipt>;
}

/// Write part of the ledger, only used by the commit step.
pub trait LedgerW {
    fn store_contract(&mut self, contract: ContractObject);
    /// Apply a signed change to a balance. A result below zero is rejected.
    fn update_balance(
        &mut self, account: &Addr, asset: AssetId, delta: Delta,
    ) -> Result<(), CommitError>;
    fn set_storage(&mut self, contract: &Addr, slot: &str, value: &Value);
    fn set_receipt(&mut self, receipt: TxReceipt);
    fn register_account(
        &mut self, account: &Addr, pubkey: &str,
    ) -> Result<(), CommitError>;
}

/// A complete ledger. `snapshot()` and `rollback()` let a transaction with several operations
/// be undone as a whole.
pub trait Ledger: LedgerR + LedgerW {
    /// Create a copy of the current state to roll back to.
    fn snapshot(&self) -> Self;
    /// Rollback to a given snapshot.
    fn rollback(&mut self, state: Self);
}

/// Errors raised while executing an operation. The ledger is untouched when one occurs.
#[derive(Error, Clone, PartialEq, Debug)]
pub enum ExecError {
    #[error("out of gas")]
    OutOfGas,
    #[error("gas integer overflow")]
    GasIntOverflow,
    #[error(
        "contract evaluate result must in >= out + fee (asset {asset}: in {inflow}, out {outflow})"
    )]
    ConservationViolation {
        asset: AssetId,
        inflow: u128,
        outflow: u128,
    },
    #[error("insufficient balance of asset {asset} in {account}")]
    InsufficientBalance { account: Addr, asset: AssetId },
    #[error("balance change overflow")]
    BalanceOverflow,
    #[error("{0}")]
    Contract(String),
    #[error("contract api `{0}` not found")]
    ApiNotFound(String),
    #[error("invalid contract code: {0}")]
    InvalidCode(String),
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("invalid jump destination")]
    InvalidJump,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("type mismatch: expected {0}")]
    TypeMismatch(&'static str),
    #[error(transparent)]
    Diff(#[from] DiffError),
}

/// Errors detected before anything executes.
#[derive(Error, Clone, PartialEq, Debug)]
pub enum AdmissionError {
    #[error("invalid_contract_gas_limit")]
    InvalidGasLimit,
    #[error("invalid address `{0}`")]
    InvalidAddress(Addr),
    #[error("invalid contract address `{0}`")]
    InvalidContractAddress(Addr),
    #[error("Can't find contract by address {0}")]
    ContractNotFound(Addr),
    #[error("contract {0} already exists")]
    ContractExists(Addr),
    #[error("contract code must provide the init api")]
    MissingInit,
    #[error("contract api `{0}` can't be called directly")]
    ApiNotCallable(String),
    #[error("contract has no api `{0}`")]
    ApiNotDeclared(String),
    #[error("deposit can only call on_deposit_asset, got `{0}`")]
    DepositApiMismatch(String),
    #[error("asset {0} not found")]
    AssetNotFound(AssetId),
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("can't transfer to the same address")]
    SelfTransfer,
    #[error("insufficient balance of asset {asset} in {account}")]
    InsufficientBalance { account: Addr, asset: AssetId },
    #[error("account {0} already registered")]
    AccountExists(Addr),
    #[error("native contract with this key not found: {0}")]
    NativeTemplateNotFound(String),
}

/// Errors while writing an evaluated result into the ledger. These are fatal.
#[derive(Error, Clone, PartialEq, Debug)]
pub enum CommitError {
    #[error("balance of asset {asset} in {account} would become negative")]
    NegativeBalance { account: Addr, asset: AssetId },
    #[error("balance of asset {asset} in {account} overflows")]
    BalanceOverflow { account: Addr, asset: AssetId },
    #[error("account {0} already registered")]
    AccountExists(Addr),
}

pub fn gas_checked_add(x: Gas, y: Gas) -> Result<Gas, ExecError> {
    x.checked_add(y).ok_or(ExecError::GasIntOverflow)
}

pub fn gas_checked_mul(x: Gas, y: Gas) -> Result<Gas, ExecError> {
    x.checked_mul(y).ok_or(ExecError::GasIntOverflow)
}

#[test]
fn test_gas_checked() {
    assert_eq!(gas_checked_add(1, 2), Ok(3));
    assert_eq!(gas_checked_add(Gas::MAX, 1), Err(ExecError::GasIntOverflow));
    assert_eq!(gas_checked_mul(Gas::MAX / 2, 3), Err(ExecError::GasIntOverflow));
}

#[test]
fn test_contract_code_api() {
    let code = ContractCode {
        abi: vec!["init".into(), "transfer".into()],
        offline_abi: vec!["balanceOf".into()],
        events: vec![],
        code: Bytes::empty(),
    };
    assert!(code.has_api("transfer"));
    assert!(code.has_api("balanceOf"));
    assert!(!code.has_api("mint"));
    let bytes = rlp::encode(&code);
    assert_eq!(rlp::decode::<ContractCode>(&bytes).unwrap(), code);
}
