//! Ledger state implementations: the committed in-memory ledger ([MemLedger]) and the
//! per-operation copy-on-write overlay ([EvaluateState]) that buffers every read and write an
//! operation makes until the commit step.

use std::collections::{BTreeMap, HashMap};

use log::error;

use crate::common::{Addr, AssetId, Bytes, Delta, Gas, Hash, Share};
use crate::core::{
    Asset, CommitError, ContractEvent, ContractObject, ExecError, GasMeter,
    Ledger, LedgerR, LedgerW, TxReceipt,
};
use crate::diff::{diff, DiffResult};
use crate::value::Value;

/// Slot name of the entry `key` of the associative storage `name`.
#[inline]
pub fn map_slot(name: &str, key: &str) -> String {
    format!("{}.{}", name, key)
}

/// Pending change of one storage slot within an operation.
#[derive(Clone, PartialEq, Debug)]
pub struct StorageChange {
    /// Value observed in the underlying ledger at the first write.
    pub before: Value,
    pub after: Value,
    pub diff: DiffResult<Value>,
}

pub type StorageChanges = BTreeMap<Addr, BTreeMap<String, StorageChange>>;

/// Everything an operation buffered, detached from the ledger it was evaluated against.
#[derive(Clone, Default, Debug)]
pub struct StateChanges {
    pub storage: StorageChanges,
    pub balances: BTreeMap<(Addr, AssetId), Delta>,
    pub events: Vec<ContractEvent>,
    pub new_contracts: Vec<ContractObject>,
    pub new_accounts: Vec<(Addr, String)>,
}

/// Copy-on-write overlay bound to one operation. Reads check the pending changes first and
/// then fall through to `base`; writes never reach `base`.
///
/// The overlay carries no success flag or error text of its own: the outcome of an operation
/// is the `Result` returned by [Evaluator::evaluate](crate::evaluator::Evaluator::evaluate).
/// `Ok` holds the finished changes, `Err` the [EvalError](crate::evaluator::EvalError) whose
/// `Display` is the error text, and the overlay is dropped either way.
pub struct EvaluateState<'a> {
    base: &'a dyn LedgerR,
    gas: GasMeter,
    changes: StateChanges,
}

impl<'a> EvaluateState<'a> {
    pub fn new(base: &'a dyn LedgerR, gas_limit: Gas) -> Self {
        Self {
            base,
            gas: GasMeter::new(gas_limit),
            changes: StateChanges::default(),
        }
    }

    #[inline(always)]
    pub fn gas(&self) -> &GasMeter {
        &self.gas
    }

    #[inline(always)]
    pub fn gas_mut(&mut self) -> &mut GasMeter {
        &mut self.gas
    }

    pub fn set_storage(&mut self, contract: &Addr, slot: &str, value: Value) {
        let base = self.base;
        let slots = self
            .changes
            .storage
            .entry(contract.clone())
            .or_insert_with(BTreeMap::new);
        match slots.get_mut(slot) {
            Some(change) => {
                change.diff = diff(&change.before, &value);
                change.after = value;
            }
            None => {
                let before = base.get_storage(contract, slot);
                let diff = diff(&before, &value);
                slots.insert(
                    slot.to_string(),
                    StorageChange {
                        before,
                        after: value,
                        diff,
                    },
                );
            }
        }
    }

    pub fn get_map(&self, contract: &Addr, name: &str, key: &str) -> Value {
        self.get_storage(contract, &map_slot(name, key))
    }

    pub fn set_map(
        &mut self, contract: &Addr, name: &str, key: &str, value: Value,
    ) {
        self.set_storage(contract, &map_slot(name, key), value)
    }

    /// Add a signed delta to the pending balance change. A debit below the available balance
    /// fails immediately.
    pub fn update_balance(
        &mut self, account: &Addr, asset: AssetId, delta: Delta,
    ) -> Result<(), ExecError> {
        let key = (account.clone(), asset);
        let pending = self.changes.balances.get(&key).copied().unwrap_or(0);
        let next = pending
            .checked_add(delta)
            .ok_or(ExecError::BalanceOverflow)?;
        let total = self.base.get_balance(account, asset) as i128 + next as i128;
        if total < 0 {
            return Err(ExecError::InsufficientBalance {
                account: account.clone(),
                asset,
            })
        }
        if total > Share::MAX as i128 {
            return Err(ExecError::BalanceOverflow)
        }
        if next == 0 {
            self.changes.balances.remove(&key);
        } else {
            self.changes.balances.insert(key, next);
        }
        Ok(())
    }

    pub fn transfer(
        &mut self, from: &Addr, to: &Addr, asset: AssetId, amount: Share,
    ) -> Result<(), ExecError> {
        let amount =
            Delta::try_from(amount).map_err(|_| ExecError::BalanceOverflow)?;
        self.update_balance(from, asset, -amount)?;
        self.update_balance(to, asset, amount)
    }

    /// Record an event. It is stamped with the number of the block being produced.
    pub fn emit_event(
        &mut self, contract: &Addr, caller: &Addr, name: &str, arg: &str,
    ) {
        let block_num = self.base.head_block_number() + 1;
        self.changes.events.push(ContractEvent {
            contract_address: contract.clone(),
            event_name: name.to_string(),
            event_arg: arg.to_string(),
            caller_addr: caller.clone(),
            block_num,
        })
    }

    pub fn register_new_contract(&mut self, contract: ContractObject) {
        let pending = &mut self.changes.new_contracts;
        match pending.iter_mut().find(|c| c.address == contract.address) {
            Some(c) => *c = contract,
            None => pending.push(contract),
        }
    }

    pub fn register_account(&mut self, account: &Addr, pubkey: &str) {
        self.changes
            .new_accounts
            .push((account.clone(), pubkey.to_string()))
    }

    pub fn storage_changes(&self) -> &StorageChanges {
        &self.changes.storage
    }

    pub fn balance_changes(&self) -> &BTreeMap<(Addr, AssetId), Delta> {
        &self.changes.balances
    }

    pub fn events(&self) -> &[ContractEvent] {
        &self.changes.events
    }

    pub fn new_contracts(&self) -> &[ContractObject] {
        &self.changes.new_contracts
    }

    /// Size of the compact encoding of all storage diffs, one `{slot: diff}` map per contract
    /// with changed slots.
    pub fn storage_diff_bytes(&self) -> usize {
        let mut total = 0;
        for slots in self.changes.storage.values() {
            let diffs: BTreeMap<String, Value> = slots
                .iter()
                .filter_map(|(slot, change)| {
                    change.diff.value().map(|d| (slot.clone(), d.clone()))
                })
                .collect();
            if diffs.is_empty() {
                continue
            }
            total += Value::Map(diffs).encode().len();
        }
        total
    }

    pub fn event_bytes(&self) -> usize {
        self.changes
            .events
            .iter()
            .map(|e| e.event_name.len() + e.event_arg.len())
            .sum()
    }

    /// Merge the changes of an overlay that was stacked on top of this one.
    pub fn absorb(&mut self, inner: StateChanges) -> Result<(), ExecError> {
        for (contract, slots) in inner.storage {
            for (slot, change) in slots {
                self.set_storage(&contract, &slot, change.after)
            }
        }
        for ((account, asset), delta) in inner.balances {
            self.update_balance(&account, asset, delta)?
        }
        self.changes.events.extend(inner.events);
        for contract in inner.new_contracts {
            self.register_new_contract(contract)
        }
        self.changes.new_accounts.extend(inner.new_accounts);
        Ok(())
    }

    /// Detach the buffered changes and the gas used from the underlying ledger.
    pub fn finish(self) -> (StateChanges, Gas) {
        (self.changes, self.gas.used())
    }
}

impl<'a> LedgerR for EvaluateState<'a> {
    fn head_block_number(&self) -> u64 {
        self.base.head_block_number()
    }

    fn get_balance(&self, account: &Addr, asset: AssetId) -> Share {
        let base = self.base.get_balance(account, asset);
        match self.changes.balances.get(&(account.clone(), asset)) {
            Some(delta) => (base as i128 + *delta as i128) as Share,
            None => base,
        }
    }

    fn get_storage(&self, contract: &Addr, slot: &str) -> Value {
        match self
            .changes
            .storage
            .get(contract)
            .and_then(|slots| slots.get(slot))
        {
            Some(change) => change.after.clone(),
            None => self.base.get_storage(contract, slot),
        }
    }

    fn get_contract(&self, addr: &Addr) -> Option<ContractObject> {
        self.changes
            .new_contracts
            .iter()
            .find(|c| &c.address == addr)
            .cloned()
            .or_else(|| self.base.get_contract(addr))
    }

    fn get_asset(&self, asset: AssetId) -> Option<Asset> {
        self.base.get_asset(asset)
    }

    fn get_asset_by_symbol(&self, symbol: &str) -> Option<Asset> {
        self.base.get_asset_by_symbol(symbol)
    }

    fn is_registered(&self, account: &Addr) -> bool {
        self.changes.new_accounts.iter().any(|(a, _)| a == account) ||
            self.base.is_registered(account)
    }

    fn get_receipt(&self, tx_id: &Hash) -> Option<TxReceipt> {
        self.base.get_receipt(tx_id)
    }
}

/// Committed ledger held in memory. Storage slots are kept in the compact binary encoding.
#[derive(Clone, Default, Debug)]
pub struct MemLedger {
    head: u64,
    balances: BTreeMap<(Addr, AssetId), Share>,
    storage: BTreeMap<Addr, BTreeMap<String, Bytes>>,
    contracts: BTreeMap<Addr, ContractObject>,
    assets: BTreeMap<AssetId, Asset>,
    accounts: BTreeMap<Addr, String>,
    receipts: HashMap<Hash, TxReceipt>,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head_block_number(&mut self, number: u64) {
        self.head = number
    }

    pub fn add_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.asset_id, asset);
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn contracts(&self) -> impl Iterator<Item = &ContractObject> {
        self.contracts.values()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Addr> {
        self.accounts.keys()
    }

    /// Storage slot names written for a contract.
    pub fn contract_slots(
        &self, contract: &Addr,
    ) -> Option<impl Iterator<Item = &String>> {
        self.storage.get(contract).map(|slots| slots.keys())
    }

    /// JSON view of balances, accounts, contracts and their storage.
    pub fn to_json(&self) -> serde_json::Value {
        let mut balances = serde_json::Map::new();
        for ((account, asset), amount) in self.balances.iter() {
            let entry = balances
                .entry(account.to_string())
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
            if let serde_json::Value::Object(m) = entry {
                m.insert(asset.to_string(), (*amount).into());
            }
        }
        let mut storage = serde_json::Map::new();
        for (contract, slots) in self.storage.iter() {
            let slots: serde_json::Map<_, _> = slots
                .keys()
                .map(|slot| {
                    (slot.clone(), self.get_storage(contract, slot).to_json())
                })
                .collect();
            storage.insert(contract.to_string(), slots.into());
        }
        serde_json::json!({
            "head_block_number": self.head,
            "accounts": self.accounts,
            "balances": balances,
            "assets": self.assets.values().collect::<Vec<_>>(),
            "contracts": self.contracts.values().collect::<Vec<_>>(),
            "storage": storage,
        })
    }
}

impl LedgerR for MemLedger {
    fn head_block_number(&self) -> u64 {
        self.head
    }

    fn get_balance(&self, account: &Addr, asset: AssetId) -> Share {
        self.balances
            .get(&(account.clone(), asset))
            .copied()
            .unwrap_or(0)
    }

    fn get_storage(&self, contract: &Addr, slot: &str) -> Value {
        match self.storage.get(contract).and_then(|slots| slots.get(slot)) {
            Some(bytes) => Value::decode(bytes).unwrap_or_else(|e| {
                error!("corrupted storage slot {}/{}: {}", contract, slot, e);
                Value::Null
            }),
            None => Value::Null,
        }
    }

    fn get_contract(&self, addr: &Addr) -> Option<ContractObject> {
        self.contracts.get(addr).cloned()
    }

    fn get_asset(&self, asset: AssetId) -> Option<Asset> {
        self.assets.get(&asset).cloned()
    }

    fn get_asset_by_symbol(&self, symbol: &str) -> Option<Asset> {
        self.assets.values().find(|a| a.symbol == symbol).cloned()
    }

    fn is_registered(&self, account: &Addr) -> bool {
        self.accounts.contains_key(account)
    }

    fn get_receipt(&self, tx_id: &Hash) -> Option<TxReceipt> {
        self.receipts.get(tx_id).cloned()
    }
}

impl LedgerW for MemLedger {
    fn store_contract(&mut self, contract: ContractObject) {
        self.contracts.insert(contract.address.clone(), contract);
    }

    fn update_balance(
        &mut self, account: &Addr, asset: AssetId, delta: Delta,
    ) -> Result<(), CommitError> {
        let key = (account.clone(), asset);
        let cur = self.balances.get(&key).copied().unwrap_or(0);
        let next = if delta >= 0 {
            cur.checked_add(delta as Share).ok_or_else(|| {
                CommitError::BalanceOverflow {
                    account: account.clone(),
                    asset,
                }
            })?
        } else {
            cur.checked_sub(delta.unsigned_abs()).ok_or_else(|| {
                CommitError::NegativeBalance {
                    account: account.clone(),
                    asset,
                }
            })?
        };
        self.balances.insert(key, next);
        Ok(())
    }

    fn set_storage(&mut self, contract: &Addr, slot: &str, value: &Value) {
        let slots = self
            .storage
            .entry(contract.clone())
            .or_insert_with(BTreeMap::new);
        if value.is_null() {
            slots.remove(slot);
        } else {
            slots.insert(slot.to_string(), value.encode().into());
        }
    }

    fn set_receipt(&mut self, receipt: TxReceipt) {
        self.receipts.insert(receipt.tx_id.clone(), receipt);
    }

    fn register_account(
        &mut self, account: &Addr, pubkey: &str,
    ) -> Result<(), CommitError> {
        if self.accounts.contains_key(account) {
            return Err(CommitError::AccountExists(account.clone()))
        }
        self.accounts.insert(account.clone(), pubkey.to_string());
        Ok(())
    }
}

impl Ledger for MemLedger {
    fn snapshot(&self) -> Self {
        self.clone()
    }

    fn rollback(&mut self, mut state: Self) {
        std::mem::swap(self, &mut state);
    }
}

#[cfg(test)]
fn test_ledger() -> MemLedger {
    let mut ledger = MemLedger::new();
    ledger.update_balance(&Addr::account("a"), 0, 100).unwrap();
    ledger.set_storage(&Addr::new("CONx"), "counter", &Value::Int(1));
    ledger
}

#[test]
fn test_overlay_reads_fall_through() {
    let ledger = test_ledger();
    let c = Addr::new("CONx");
    let mut s = EvaluateState::new(&ledger, 1000);
    assert_eq!(s.get_storage(&c, "counter"), Value::Int(1));
    assert_eq!(s.get_storage(&c, "missing"), Value::Null);
    s.set_storage(&c, "counter", Value::Int(2));
    s.set_storage(&c, "counter", Value::Int(3));
    assert_eq!(s.get_storage(&c, "counter"), Value::Int(3));
    let change = &s.storage_changes()[&c]["counter"];
    assert_eq!(change.before, Value::Int(1));
    assert!(!change.diff.is_undefined());
    s.set_storage(&c, "counter", Value::Int(1));
    assert!(s.storage_changes()[&c]["counter"].diff.is_undefined());
    assert_eq!(s.storage_diff_bytes(), 0);
    assert_eq!(ledger.get_storage(&c, "counter"), Value::Int(1));
}

#[test]
fn test_overlay_balances() {
    let ledger = test_ledger();
    let a = Addr::account("a");
    let b = Addr::account("b");
    let mut s = EvaluateState::new(&ledger, 1000);
    s.transfer(&a, &b, 0, 60).unwrap();
    assert_eq!(s.get_balance(&a, 0), 40);
    assert_eq!(s.get_balance(&b, 0), 60);
    assert_eq!(
        s.transfer(&a, &b, 0, 41),
        Err(ExecError::InsufficientBalance {
            account: a.clone(),
            asset: 0
        })
    );
    s.transfer(&b, &a, 0, 60).unwrap();
    assert!(s.balance_changes().is_empty());
    assert_eq!(ledger.get_balance(&b, 0), 0);
}

#[test]
fn test_mem_ledger_commit_errors() {
    let mut ledger = test_ledger();
    let a = Addr::account("a");
    assert_eq!(
        ledger.update_balance(&a, 0, -101),
        Err(CommitError::NegativeBalance {
            account: a.clone(),
            asset: 0
        })
    );
    ledger.register_account(&a, "pk").unwrap();
    assert!(ledger.register_account(&a, "pk").is_err());
    let snap = ledger.snapshot();
    ledger.update_balance(&a, 0, -100).unwrap();
    ledger.rollback(snap);
    assert_eq!(ledger.get_balance(&a, 0), 100);
}
