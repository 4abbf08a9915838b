//! Native (built-in, non-interpreted) contracts.
//!
//! The set of templates is fixed at build time and looked up by template key. A native contract
//! reaches the ledger only through [NativeContext], the same evaluation state interface
//! interpreted code uses, so the commit pipeline treats both kinds alike.

use std::collections::HashMap;

use once_cell::sync::OnceCell;

use crate::common::{Addr, AssetId, Bytes, Gas, Share};
use crate::core::params::{ADDRESS_PREFIX, GAS_NATIVE_API_CALL};
use crate::core::{Asset, CallContext, ContractCode, ExecError, LedgerR};
use crate::state::EvaluateState;
use crate::value::Value;

pub mod exchange;
pub mod token;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NativeTemplate {
    Token,
    Exchange,
}

fn registry() -> &'static HashMap<&'static str, NativeTemplate> {
    static R: OnceCell<HashMap<&'static str, NativeTemplate>> = OnceCell::new();
    R.get_or_init(|| {
        [NativeTemplate::Token, NativeTemplate::Exchange]
            .into_iter()
            .map(|t| (t.key(), t))
            .collect()
    })
}

impl NativeTemplate {
    pub fn from_key(key: &str) -> Option<Self> {
        registry().get(key).copied()
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Token => token::KEY,
            Self::Exchange => exchange::KEY,
        }
    }

    pub fn apis(&self) -> &'static [&'static str] {
        match self {
            Self::Token => token::APIS,
            Self::Exchange => exchange::APIS,
        }
    }

    pub fn offline_apis(&self) -> &'static [&'static str] {
        match self {
            Self::Token => token::OFFLINE_APIS,
            Self::Exchange => exchange::OFFLINE_APIS,
        }
    }

    pub fn events(&self) -> &'static [&'static str] {
        match self {
            Self::Token => token::EVENTS,
            Self::Exchange => exchange::EVENTS,
        }
    }

    /// The API surface in the form stored with the contract. Native contracts carry no code.
    pub fn code(&self) -> ContractCode {
        let strings =
            |s: &[&str]| s.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        ContractCode {
            abi: strings(self.apis()),
            offline_abi: strings(self.offline_apis()),
            events: strings(self.events()),
            code: Bytes::empty(),
        }
    }

    pub fn gas_for_api(&self, _api: &str) -> Gas {
        GAS_NATIVE_API_CALL
    }

    pub fn invoke(
        &self, ctx: &mut NativeContext<'_, '_>, api: &str, arg: &str,
    ) -> Result<Value, ExecError> {
        match self {
            Self::Token => token::invoke(ctx, api, arg),
            Self::Exchange => exchange::invoke(ctx, api, arg),
        }
    }
}

/// Storage adapter handed to a native contract for the duration of one API call.
pub struct NativeContext<'s, 'a> {
    state: &'s mut EvaluateState<'a>,
    call: &'s CallContext,
}

impl<'s, 'a> NativeContext<'s, 'a> {
    pub fn new(state: &'s mut EvaluateState<'a>, call: &'s CallContext) -> Self {
        Self { state, call }
    }

    #[inline(always)]
    pub fn caller(&self) -> &Addr {
        &self.call.caller
    }

    #[inline(always)]
    pub fn contract_address(&self) -> &Addr {
        &self.call.contract
    }

    pub fn head_block_number(&self) -> u64 {
        self.state.head_block_number()
    }

    pub fn get_storage(&self, slot: &str) -> Value {
        self.state.get_storage(&self.call.contract, slot)
    }

    pub fn set_storage(&mut self, slot: &str, value: Value) {
        self.state.set_storage(&self.call.contract, slot, value)
    }

    pub fn get_string_storage(&self, slot: &str) -> Result<String, ExecError> {
        match self.get_storage(slot) {
            Value::Text(s) => Ok(s),
            _ => Err(self.invalid_storage("string", slot)),
        }
    }

    pub fn get_int_storage(&self, slot: &str) -> Result<i64, ExecError> {
        self.get_storage(slot)
            .as_int()
            .ok_or_else(|| self.invalid_storage("int", slot))
    }

    fn invalid_storage(&self, kind: &str, slot: &str) -> ExecError {
        ExecError::Contract(format!(
            "invalid {} contract storage {}.{}",
            kind, self.call.contract, slot
        ))
    }

    pub fn fast_map_get(&self, name: &str, key: &str) -> Value {
        self.state.get_map(&self.call.contract, name, key)
    }

    pub fn fast_map_set(&mut self, name: &str, key: &str, value: Value) {
        self.state.set_map(&self.call.contract, name, key, value)
    }

    pub fn emit_event(&mut self, name: &str, arg: &str) {
        self.state
            .emit_event(&self.call.contract, &self.call.caller, name, arg)
    }

    pub fn get_asset_by_symbol(&self, symbol: &str) -> Option<Asset> {
        self.state.get_asset_by_symbol(symbol)
    }

    /// Move an asset held by the contract to `to`.
    pub fn transfer_to(
        &mut self, to: &Addr, asset: AssetId, amount: Share,
    ) -> Result<(), ExecError> {
        self.state.transfer(&self.call.contract, to, asset, amount)
    }

    pub fn is_valid_address(&self, addr: &str) -> bool {
        let addr = Addr::new(addr);
        addr.as_str().starts_with(ADDRESS_PREFIX) || addr.is_contract()
    }
}

/// Error raised by a native contract.
#[inline]
pub fn throw<T, S: Into<String>>(msg: S) -> Result<T, ExecError> {
    Err(ExecError::Contract(msg.into()))
}

/// Split a comma separated argument list into `min..=max` trimmed parts.
fn parse_args<'a>(
    arg: &'a str, min: usize, max: usize, format: &str,
) -> Result<Vec<&'a str>, ExecError> {
    let parsed: Vec<&str> = arg.split(',').map(|s| s.trim()).collect();
    if parsed.len() < min || parsed.len() > max {
        return throw(format!("argument format error, need format: {}", format))
    }
    Ok(parsed)
}

fn parse_amount(s: &str) -> Result<i64, ExecError> {
    match s.parse::<i64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => throw("amount must be positive integer"),
    }
}

#[test]
fn test_registry() {
    assert_eq!(NativeTemplate::from_key("token"), Some(NativeTemplate::Token));
    assert_eq!(
        NativeTemplate::from_key("exchange"),
        Some(NativeTemplate::Exchange)
    );
    assert_eq!(NativeTemplate::from_key("uniswap"), None);
    assert!(NativeTemplate::Exchange.code().has_api("on_deposit_asset"));
    let code = NativeTemplate::Token.code();
    assert!(code.has_api("init"));
    assert!(code.has_api("balanceOf"));
    assert!(code.offline_abi.contains(&"balanceOf".to_string()));
    assert!(code.code.is_empty());
}
