use std::collections::hash_map::HashMap;

use log::info;

use simplechain::common::{Addr, AssetId, Delta, Hash, Share};
use simplechain::core::{
    Asset, CommitError, ContractObject, Ledger, LedgerR, LedgerW, TxReceipt,
};
use simplechain::value::Value;

#[derive(Clone, Default)]
struct DummyAccountState {
    storage: HashMap<String, Value>,
    balances: HashMap<AssetId, Share>,
    pubkey: Option<String>,
    contract: Option<ContractObject>,
}

/// A plain, logging ledger with no encoding of its own. Used to cross-check other ledgers.
#[derive(Clone, Default)]
pub struct DummyLedger {
    head: u64,
    accounts: HashMap<Addr, DummyAccountState>,
    assets: HashMap<AssetId, Asset>,
    receipts: HashMap<Hash, TxReceipt>,
}

impl DummyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_account(&mut self, addr: &Addr) -> &mut DummyAccountState {
        self.accounts
            .entry(addr.clone())
            .or_insert_with(DummyAccountState::default)
    }

    pub fn set_head_block_number(&mut self, number: u64) {
        info!("set_head_block_number({})", number);
        self.head = number
    }

    pub fn add_asset(&mut self, asset: Asset) {
        info!("add_asset({}, {})", asset.asset_id, asset.symbol);
        self.assets.insert(asset.asset_id, asset);
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Addr> {
        self.accounts.keys()
    }

    pub fn account_slots(
        &self, addr: &Addr,
    ) -> Option<impl Iterator<Item = &String>> {
        self.accounts.get(addr).map(|acc| acc.storage.keys())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }
}

impl LedgerR for DummyLedger {
    fn head_block_number(&self) -> u64 {
        self.head
    }

    fn get_balance(&self, account: &Addr, asset: AssetId) -> Share {
        info!("get_balance({}, {})", account, asset);
        self.accounts
            .get(account)
            .and_then(|acc| acc.balances.get(&asset))
            .copied()
            .unwrap_or(0)
    }

    fn get_storage(&self, contract: &Addr, slot: &str) -> Value {
        info!("get_storage({}, {})", contract, slot);
        self.accounts
            .get(contract)
            .and_then(|acc| acc.storage.get(slot))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn get_contract(&self, addr: &Addr) -> Option<ContractObject> {
        info!("get_contract({})", addr);
        self.accounts.get(addr).and_then(|acc| acc.contract.clone())
    }

    fn get_asset(&self, asset: AssetId) -> Option<Asset> {
        self.assets.get(&asset).cloned()
    }

    fn get_asset_by_symbol(&self, symbol: &str) -> Option<Asset> {
        info!("get_asset_by_symbol({})", symbol);
        self.assets.values().find(|a| a.symbol == symbol).cloned()
    }

    fn is_registered(&self, account: &Addr) -> bool {
        info!("is_registered({})", account);
        self.accounts
            .get(account)
            .map(|acc| acc.pubkey.is_some())
            .unwrap_or(false)
    }

    fn get_receipt(&self, tx_id: &Hash) -> Option<TxReceipt> {
        self.receipts.get(tx_id).cloned()
    }
}

impl LedgerW for DummyLedger {
    fn store_contract(&mut self, contract: ContractObject) {
        info!(
            "store_contract({}, code={})",
            contract.address,
            hex::encode(&*contract.code.code)
        );
        let addr = contract.address.clone();
        self.get_account(&addr).contract = Some(contract)
    }

    fn update_balance(
        &mut self, account: &Addr, asset: AssetId, delta: Delta,
    ) -> Result<(), CommitError> {
        info!("update_balance({}, {}, {})", account, asset, delta);
        let balance =
            self.get_account(account).balances.entry(asset).or_insert(0);
        let next = if delta >= 0 {
            balance.checked_add(delta as Share).ok_or_else(|| {
                CommitError::BalanceOverflow {
                    account: account.clone(),
                    asset,
                }
            })?
        } else {
            balance.checked_sub(delta.unsigned_abs()).ok_or_else(|| {
                CommitError::NegativeBalance {
                    account: account.clone(),
                    asset,
                }
            })?
        };
        *balance = next;
        Ok(())
    }

    fn set_storage(&mut self, contract: &Addr, slot: &str, value: &Value) {
        info!("set_storage({}, {}, {})", contract, slot, value);
        let storage = &mut self.get_account(contract).storage;
        if value.is_null() {
            storage.remove(slot);
        } else {
            storage.insert(slot.to_string(), value.clone());
        }
    }

    fn set_receipt(&mut self, receipt: TxReceipt) {
        info!("set_receipt({})", receipt.tx_id);
        self.receipts.insert(receipt.tx_id.clone(), receipt);
    }

    fn register_account(
        &mut self, account: &Addr, pubkey: &str,
    ) -> Result<(), CommitError> {
        info!("register_account({}, {})", account, pubkey);
        let acc = self.get_account(account);
        if acc.pubkey.is_some() {
            return Err(CommitError::AccountExists(account.clone()))
        }
        acc.pubkey = Some(pubkey.to_string());
        Ok(())
    }
}

impl Ledger for DummyLedger {
    fn snapshot(&self) -> Self {
        info!("snapshot()");
        self.clone()
    }

    fn rollback(&mut self, mut state: Self) {
        info!("rollback()");
        std::mem::swap(self, &mut state);
    }
}
