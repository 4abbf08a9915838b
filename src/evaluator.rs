//! The two-phase evaluate/apply pipeline shared by every operation type.
//!
//! [Evaluator::evaluate] runs an operation against a fresh [EvaluateState] bound to the ledger
//! and either fails (nothing is kept) or produces an [Evaluated] result. Only an [Evaluated]
//! result can be applied, and applying consumes it, so a result is committed at most once.

use std::collections::BTreeMap;

use log::{debug, info};
use thiserror::Error;

use crate::common::{Addr, AssetId, Delta, Gas, Hash};
use crate::core::params::{
    is_special_api, API_INIT, API_ON_DEPOSIT_ASSET, GAS_EVENT_BYTE,
    GAS_STORAGE_BYTE,
};
use crate::core::{
    AdmissionError, CallContext, CommitError, ContractCode, ContractEvent,
    ContractObject, ContractType, ExecError, ExecutionEngine, LedgerR, LedgerW,
    TxReceipt,
};
use crate::native::{NativeContext, NativeTemplate};
use crate::state::{EvaluateState, StorageChanges};
use crate::tx::{
    ContractCreateOp, ContractInvokeOp, MintOp, NativeContractCreateOp,
    Operation, RegisterAccountOp, TransferOp,
};
use crate::value::Value;

/// Why an operation failed. Displays as the underlying error.
#[derive(Error, Clone, PartialEq, Debug)]
pub enum EvalError {
    #[error("{0}")]
    Admission(#[from] AdmissionError),
    #[error("{0}")]
    Execution(#[from] ExecError),
}

/// Everything a successful evaluation produced.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct InvokeResult {
    pub api_result: Value,
    pub storage_changes: StorageChanges,
    pub balance_changes: BTreeMap<(Addr, AssetId), Delta>,
    pub events: Vec<ContractEvent>,
    pub new_contracts: Vec<ContractObject>,
    pub new_accounts: Vec<(Addr, String)>,
    pub gas_used: Gas,
}

/// An operation bound to its transaction, ready to be evaluated.
pub struct Evaluator<'t> {
    tx_id: Hash,
    op: &'t Operation,
}

/// A successfully evaluated operation, waiting to be applied.
#[derive(Debug)]
pub struct Evaluated {
    tx_id: Hash,
    result: InvokeResult,
}

impl<'t> Evaluator<'t> {
    pub fn new(tx_id: Hash, op: &'t Operation) -> Self {
        Self { tx_id, op }
    }

    /// Run the operation against the ledger without touching it.
    pub fn evaluate(
        &self, ledger: &dyn LedgerR, engine: &dyn ExecutionEngine,
    ) -> Result<Evaluated, EvalError> {
        let gas_limit = match self.op {
            Operation::ContractCreate(op) => op.gas_limit,
            Operation::NativeContractCreate(op) => op.gas_limit,
            Operation::ContractInvoke(op) => op.gas_limit,
            _ => 0,
        };
        let mut state = EvaluateState::new(ledger, gas_limit);
        let res = match self.op {
            Operation::RegisterAccount(op) => register_account(op, &mut state),
            Operation::Mint(op) => mint(op, &mut state),
            Operation::Transfer(op) => transfer(op, &mut state),
            Operation::ContractCreate(op) => {
                contract_create(op, &mut state, engine)
            }
            Operation::NativeContractCreate(op) => {
                native_contract_create(op, &mut state)
            }
            Operation::ContractInvoke(op) => {
                contract_invoke(op, &mut state, engine)
            }
        };
        let api_result = match res {
            Ok(v) => v,
            Err(e) => {
                debug!(
                    "{:?} operation of tx {} failed: {}",
                    self.op.type_(),
                    self.tx_id,
                    e
                );
                return Err(e)
            }
        };
        let (changes, gas_used) = state.finish();
        Ok(Evaluated {
            tx_id: self.tx_id.clone(),
            result: InvokeResult {
                api_result,
                storage_changes: changes.storage,
                balance_changes: changes.balances,
                events: changes.events,
                new_contracts: changes.new_contracts,
                new_accounts: changes.new_accounts,
                gas_used,
            },
        })
    }
}

impl Evaluated {
    pub fn tx_id(&self) -> &Hash {
        &self.tx_id
    }

    pub fn result(&self) -> &InvokeResult {
        &self.result
    }

    /// Commit the result into the ledger. Errors here are fatal to the caller.
    pub fn apply<L: LedgerR + LedgerW + ?Sized>(
        self, ledger: &mut L,
    ) -> Result<InvokeResult, CommitError> {
        let res = self.result;
        let mut receipt = ledger
            .get_receipt(&self.tx_id)
            .unwrap_or_else(|| TxReceipt::new(self.tx_id.clone()));
        for (account, pubkey) in res.new_accounts.iter() {
            ledger.register_account(account, pubkey)?
        }
        for contract in res.new_contracts.iter() {
            info!("new contract {} by {}", contract.address, contract.owner);
            ledger.store_contract(contract.clone())
        }
        receipt.events.extend(res.events.iter().cloned());
        receipt.exec_succeed = true;
        for ((account, asset), delta) in res.balance_changes.iter() {
            ledger.update_balance(account, *asset, *delta)?
        }
        for (contract, slots) in res.storage_changes.iter() {
            for (slot, change) in slots.iter() {
                ledger.set_storage(contract, slot, &change.after)
            }
        }
        ledger.set_receipt(receipt);
        Ok(res)
    }
}

/// Per asset, the amount leaving accounts (negative deltas) must cover the amount arriving
/// (positive deltas).
pub fn check_conservation(
    balances: &BTreeMap<(Addr, AssetId), Delta>,
) -> Result<(), ExecError> {
    let mut totals: BTreeMap<AssetId, (u128, u128)> = BTreeMap::new();
    for ((_, asset), delta) in balances.iter() {
        let (inflow, outflow) = totals.entry(*asset).or_default();
        if *delta < 0 {
            *inflow += delta.unsigned_abs() as u128
        } else {
            *outflow += *delta as u128
        }
    }
    for (asset, (inflow, outflow)) in totals {
        if outflow > 0 && inflow < outflow {
            return Err(ExecError::ConservationViolation {
                asset,
                inflow,
                outflow,
            })
        }
    }
    Ok(())
}

/// Read-only call of a contract API. Whatever the call writes is discarded.
pub fn invoke_offline(
    ledger: &dyn LedgerR, engine: &dyn ExecutionEngine, caller: &Addr,
    contract: &Addr, api: &str, arg: &str, gas_limit: Gas,
) -> Result<Value, EvalError> {
    if gas_limit == 0 {
        return Err(AdmissionError::InvalidGasLimit.into())
    }
    let obj = ledger
        .get_contract(contract)
        .ok_or_else(|| AdmissionError::ContractNotFound(contract.clone()))?;
    if !obj.code.offline_abi.iter().any(|a| a == api) {
        return Err(AdmissionError::ApiNotDeclared(api.to_string()).into())
    }
    let mut state = EvaluateState::new(ledger, gas_limit);
    run_contract(&mut state, engine, &obj, caller, api, arg)
}

fn check_account(addr: &Addr) -> Result<(), AdmissionError> {
    if !addr.is_valid() || addr.is_contract() {
        return Err(AdmissionError::InvalidAddress(addr.clone()))
    }
    Ok(())
}

fn check_asset(
    state: &EvaluateState<'_>, asset: AssetId,
) -> Result<(), AdmissionError> {
    match state.get_asset(asset) {
        Some(_) => Ok(()),
        None => Err(AdmissionError::AssetNotFound(asset)),
    }
}

fn to_delta(amount: u64) -> Result<Delta, ExecError> {
    Delta::try_from(amount).map_err(|_| ExecError::BalanceOverflow)
}

fn register_account(
    op: &RegisterAccountOp, state: &mut EvaluateState<'_>,
) -> Result<Value, EvalError> {
    check_account(&op.addr)?;
    if state.is_registered(&op.addr) {
        return Err(AdmissionError::AccountExists(op.addr.clone()).into())
    }
    state.register_account(&op.addr, &op.pubkey);
    Ok(Value::Null)
}

fn mint(op: &MintOp, state: &mut EvaluateState<'_>) -> Result<Value, EvalError> {
    check_asset(state, op.asset_id)?;
    if op.amount == 0 {
        return Err(AdmissionError::InvalidAmount.into())
    }
    if !op.account.is_valid() {
        return Err(AdmissionError::InvalidAddress(op.account.clone()).into())
    }
    state.update_balance(&op.account, op.asset_id, to_delta(op.amount)?)?;
    Ok(Value::Null)
}

fn transfer(
    op: &TransferOp, state: &mut EvaluateState<'_>,
) -> Result<Value, EvalError> {
    check_asset(state, op.asset_id)?;
    if op.amount == 0 {
        return Err(AdmissionError::InvalidAmount.into())
    }
    check_account(&op.from)?;
    check_account(&op.to)?;
    if op.from == op.to {
        return Err(AdmissionError::SelfTransfer.into())
    }
    if state.get_balance(&op.from, op.asset_id) < op.amount {
        return Err(AdmissionError::InsufficientBalance {
            account: op.from.clone(),
            asset: op.asset_id,
        }
        .into())
    }
    state.transfer(&op.from, &op.to, op.asset_id, op.amount)?;
    check_conservation(state.balance_changes())?;
    Ok(Value::Null)
}

/// Run a contract API through the engine or the native registry and bill its execution.
fn run_contract(
    state: &mut EvaluateState<'_>, engine: &dyn ExecutionEngine,
    contract: &ContractObject, caller: &Addr, api: &str, arg: &str,
) -> Result<Value, EvalError> {
    let ctx = CallContext {
        caller: caller.clone(),
        contract: contract.address.clone(),
    };
    match contract.contract_type {
        ContractType::Normal => {
            let limit = state.gas().remaining();
            let out = engine.execute(&contract.code, api, arg, &ctx, state, limit);
            state.gas_mut().charge(out.instructions)?;
            out.status?;
            Ok(out.result)
        }
        ContractType::Native => {
            let key = contract.native_key.as_deref().unwrap_or_default();
            let template = NativeTemplate::from_key(key).ok_or_else(|| {
                AdmissionError::NativeTemplateNotFound(key.to_string())
            })?;
            run_native(state, template, &ctx, api, arg)
        }
    }
}

fn run_native(
    state: &mut EvaluateState<'_>, template: NativeTemplate, ctx: &CallContext,
    api: &str, arg: &str,
) -> Result<Value, EvalError> {
    state.gas_mut().charge(template.gas_for_api(api))?;
    let mut native = NativeContext::new(state, ctx);
    Ok(template.invoke(&mut native, api, arg)?)
}

/// Bill storage and event bytes, then validate conservation.
fn finish_contract_op(state: &mut EvaluateState<'_>) -> Result<(), ExecError> {
    let storage_bytes = state.storage_diff_bytes();
    let event_bytes = state.event_bytes();
    let gas = state.gas_mut();
    gas.charge_bytes(storage_bytes, GAS_STORAGE_BYTE)?;
    gas.charge_bytes(event_bytes, GAS_EVENT_BYTE)?;
    check_conservation(state.balance_changes())
}

fn new_contract(
    state: &EvaluateState<'_>, address: Addr, caller: &Addr, op_time: u64,
    code: ContractCode, native_key: Option<String>,
) -> ContractObject {
    ContractObject {
        address,
        owner: caller.clone(),
        code,
        create_time: op_time,
        registered_block: state.head_block_number() + 1,
        contract_type: match native_key {
            Some(_) => ContractType::Native,
            None => ContractType::Normal,
        },
        native_key,
    }
}

fn contract_create(
    op: &ContractCreateOp, state: &mut EvaluateState<'_>,
    engine: &dyn ExecutionEngine,
) -> Result<Value, EvalError> {
    if op.gas_limit == 0 {
        return Err(AdmissionError::InvalidGasLimit.into())
    }
    check_account(&op.caller_addr)?;
    if !op.contract_code.has_api(API_INIT) {
        return Err(AdmissionError::MissingInit.into())
    }
    let address = op.contract_address();
    if state.get_contract(&address).is_some() {
        return Err(AdmissionError::ContractExists(address).into())
    }
    let contract = new_contract(
        state,
        address,
        &op.caller_addr,
        op.op_time,
        op.contract_code.clone(),
        None,
    );
    state.register_new_contract(contract.clone());
    let res = run_contract(state, engine, &contract, &op.caller_addr, API_INIT, "")?;
    finish_contract_op(state)?;
    Ok(res)
}

fn native_contract_create(
    op: &NativeContractCreateOp, state: &mut EvaluateState<'_>,
) -> Result<Value, EvalError> {
    if op.gas_limit == 0 {
        return Err(AdmissionError::InvalidGasLimit.into())
    }
    check_account(&op.caller_addr)?;
    let template = NativeTemplate::from_key(&op.template_key).ok_or_else(|| {
        AdmissionError::NativeTemplateNotFound(op.template_key.clone())
    })?;
    let address = op.contract_address();
    if state.get_contract(&address).is_some() {
        return Err(AdmissionError::ContractExists(address).into())
    }
    let contract = new_contract(
        state,
        address.clone(),
        &op.caller_addr,
        op.op_time,
        template.code(),
        Some(template.key().to_string()),
    );
    state.register_new_contract(contract);
    let ctx = CallContext {
        caller: op.caller_addr.clone(),
        contract: address,
    };
    let res = run_native(state, template, &ctx, API_INIT, "")?;
    finish_contract_op(state)?;
    Ok(res)
}

fn contract_invoke(
    op: &ContractInvokeOp, state: &mut EvaluateState<'_>,
    engine: &dyn ExecutionEngine,
) -> Result<Value, EvalError> {
    if op.gas_limit == 0 {
        return Err(AdmissionError::InvalidGasLimit.into())
    }
    check_account(&op.caller_addr)?;
    if !op.contract_address.is_contract() {
        return Err(AdmissionError::InvalidContractAddress(
            op.contract_address.clone(),
        )
        .into())
    }
    let contract = state.get_contract(&op.contract_address).ok_or_else(|| {
        AdmissionError::ContractNotFound(op.contract_address.clone())
    })?;
    let api = op.contract_api.as_str();
    if op.has_deposit() {
        if api != API_ON_DEPOSIT_ASSET {
            return Err(AdmissionError::DepositApiMismatch(api.to_string()).into())
        }
    } else if is_special_api(api) {
        return Err(AdmissionError::ApiNotCallable(api.to_string()).into())
    }
    if !contract.code.has_api(api) {
        return Err(AdmissionError::ApiNotDeclared(api.to_string()).into())
    }
    let arg = if op.has_deposit() {
        let asset = state
            .get_asset(op.deposit_asset_id)
            .ok_or(AdmissionError::AssetNotFound(op.deposit_asset_id))?;
        if state.get_balance(&op.caller_addr, asset.asset_id) < op.deposit_amount
        {
            return Err(AdmissionError::InsufficientBalance {
                account: op.caller_addr.clone(),
                asset: asset.asset_id,
            }
            .into())
        }
        state.transfer(
            &op.caller_addr,
            &contract.address,
            asset.asset_id,
            op.deposit_amount,
        )?;
        serde_json::json!({
            "num": op.deposit_amount,
            "symbol": asset.symbol,
            "param": op.contract_arg,
        })
        .to_string()
    } else {
        op.contract_arg.clone()
    };
    let res = run_contract(state, engine, &contract, &op.caller_addr, api, &arg)?;
    finish_contract_op(state)?;
    Ok(res)
}

#[test]
fn test_conservation() {
    let a = Addr::account("a");
    let b = Addr::account("b");
    let mut balances = BTreeMap::new();
    balances.insert((a.clone(), 0), -60);
    balances.insert((b.clone(), 0), 100);
    assert_eq!(
        check_conservation(&balances),
        Err(ExecError::ConservationViolation {
            asset: 0,
            inflow: 60,
            outflow: 100
        })
    );
    balances.insert((a.clone(), 0), -100);
    balances.insert((b.clone(), 0), 60);
    assert_eq!(check_conservation(&balances), Ok(()));
    balances.insert((b, 1), -5);
    assert_eq!(check_conservation(&balances), Ok(()));
}
