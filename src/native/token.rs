//! ERC20-style token as a native contract.
//!
//! Storage: `name`, `symbol`, `supply`, `precision`, `state`, `admin`, and the associative
//! storages `users` (holder => balance) and `allowed` (owner => {spender => amount}).

use std::collections::BTreeMap;

use serde_json::json;

use super::{parse_amount, parse_args, throw, NativeContext};
use crate::core::ExecError;
use crate::value::Value;

pub const KEY: &str = "token";

pub const APIS: &[&str] = &[
    "init",
    "init_token",
    "transfer",
    "approve",
    "transferFrom",
    "balanceOf",
    "state",
    "tokenName",
    "tokenSymbol",
    "supply",
    "totalSupply",
    "precision",
    "approvedBalanceFrom",
    "allApprovedFromUser",
];

pub const OFFLINE_APIS: &[&str] = &[
    "balanceOf",
    "state",
    "tokenName",
    "tokenSymbol",
    "supply",
    "totalSupply",
    "precision",
    "approvedBalanceFrom",
    "allApprovedFromUser",
];

pub const EVENTS: &[&str] = &["Inited", "Transfer", "Approved"];

const STATE_NOT_INITED: &str = "NOT_INITED";
const STATE_COMMON: &str = "COMMON";

const USERS: &str = "users";
const ALLOWED: &str = "allowed";

pub(super) fn invoke(
    ctx: &mut NativeContext<'_, '_>, api: &str, arg: &str,
) -> Result<Value, ExecError> {
    match api {
        "init" => init(ctx),
        "init_token" => init_token(ctx, arg),
        "transfer" => transfer(ctx, arg),
        "approve" => approve(ctx, arg),
        "transferFrom" => transfer_from(ctx, arg),
        "balanceOf" => {
            let owner = arg.trim();
            Ok(balance_of(ctx, owner)?.into())
        }
        "state" => Ok(ctx.get_string_storage("state")?.into()),
        "tokenName" => Ok(ctx.get_string_storage("name")?.into()),
        "tokenSymbol" => Ok(ctx.get_string_storage("symbol")?.into()),
        "supply" | "totalSupply" => Ok(ctx.get_int_storage("supply")?.into()),
        "precision" => Ok(ctx.get_int_storage("precision")?.into()),
        "approvedBalanceFrom" => approved_balance_from(ctx, arg),
        "allApprovedFromUser" => {
            let allowed = allowed_of(ctx, arg.trim())?;
            Ok(Value::Text(Value::Map(allowed).to_string()))
        }
        _ => throw(format!("token contract has no api {}", api)),
    }
}

fn init(ctx: &mut NativeContext<'_, '_>) -> Result<Value, ExecError> {
    let admin = ctx.caller().as_str().to_string();
    ctx.set_storage("name", "".into());
    ctx.set_storage("symbol", "".into());
    ctx.set_storage("supply", 0i64.into());
    ctx.set_storage("precision", 0i64.into());
    ctx.set_storage("state", STATE_NOT_INITED.into());
    ctx.set_storage("admin", admin.into());
    Ok(Value::Null)
}

fn check_admin(ctx: &NativeContext<'_, '_>) -> Result<(), ExecError> {
    let admin = ctx.get_string_storage("admin")?;
    if admin != ctx.caller().as_str() {
        return throw("only admin can call this api")
    }
    Ok(())
}

fn check_inited(ctx: &NativeContext<'_, '_>) -> Result<(), ExecError> {
    if ctx.get_string_storage("state")? != STATE_COMMON {
        return throw("this token contract not inited")
    }
    Ok(())
}

fn check_address(
    ctx: &NativeContext<'_, '_>, addr: &str,
) -> Result<(), ExecError> {
    if !ctx.is_valid_address(addr) {
        return throw(format!("invalid address {}", addr))
    }
    Ok(())
}

fn balance_of(
    ctx: &NativeContext<'_, '_>, owner: &str,
) -> Result<i64, ExecError> {
    match ctx.fast_map_get(USERS, owner) {
        Value::Null => Ok(0),
        Value::Int(v) => Ok(v),
        _ => throw(format!("invalid balance of {}", owner)),
    }
}

fn allowed_of(
    ctx: &NativeContext<'_, '_>, owner: &str,
) -> Result<BTreeMap<String, Value>, ExecError> {
    match ctx.fast_map_get(ALLOWED, owner) {
        Value::Null => Ok(BTreeMap::new()),
        Value::Map(m) => Ok(m),
        _ => throw(format!("invalid allowed storage of {}", owner)),
    }
}

fn init_token(
    ctx: &mut NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    check_admin(ctx)?;
    if ctx.get_string_storage("state")? != STATE_NOT_INITED {
        return throw("this token contract inited before")
    }
    let args = parse_args(arg, 4, 4, "name,symbol,supply,precision")?;
    let (name, symbol) = (args[0], args[1]);
    if name.is_empty() || symbol.is_empty() {
        return throw("name and symbol of token can't be empty")
    }
    let supply = match args[2].parse::<i64>() {
        Ok(v) if v > 0 => v,
        _ => return throw("supply must be positive integer"),
    };
    let precision = match args[3].parse::<i64>() {
        Ok(v) if is_power_of_ten(v) => v,
        _ => {
            return throw(
                "precision must be positive integer in [1,10,100,1000,...]",
            )
        }
    };
    let admin = ctx.caller().as_str().to_string();
    ctx.set_storage("name", name.into());
    ctx.set_storage("symbol", symbol.into());
    ctx.set_storage("supply", supply.into());
    ctx.set_storage("precision", precision.into());
    ctx.fast_map_set(USERS, &admin, supply.into());
    ctx.set_storage("state", STATE_COMMON.into());
    ctx.emit_event("Inited", arg);
    Ok(Value::Null)
}

fn is_power_of_ten(mut v: i64) -> bool {
    if v <= 0 {
        return false
    }
    while v % 10 == 0 {
        v /= 10
    }
    v == 1
}

fn move_balance(
    ctx: &mut NativeContext<'_, '_>, from: &str, to: &str, amount: i64,
) -> Result<(), ExecError> {
    let from_balance = balance_of(ctx, from)?;
    if from_balance < amount {
        return throw("you have not enough amount to transfer out")
    }
    ctx.fast_map_set(USERS, from, (from_balance - amount).into());
    let to_balance = balance_of(ctx, to)?;
    let to_balance = to_balance
        .checked_add(amount)
        .ok_or_else(|| ExecError::Contract("balance overflow".into()))?;
    ctx.fast_map_set(USERS, to, to_balance.into());
    Ok(())
}

fn transfer(
    ctx: &mut NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    check_inited(ctx)?;
    let args = parse_args(arg, 2, 3, "to_address,amount[,memo]")?;
    let to = args[0];
    check_address(ctx, to)?;
    let amount = parse_amount(args[1])?;
    let memo = args.get(2).copied().unwrap_or("");
    let from = ctx.caller().as_str().to_string();
    if from == to {
        return throw("can't transfer to self")
    }
    move_balance(ctx, &from, to, amount)?;
    let event = json!({
        "from": from,
        "to": to,
        "amount": amount,
        "fee": 0,
        "memo": memo,
    });
    ctx.emit_event("Transfer", &event.to_string());
    Ok(Value::Null)
}

fn approve(
    ctx: &mut NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    check_inited(ctx)?;
    let args = parse_args(arg, 2, 2, "spender_address,amount")?;
    let spender = args[0];
    check_address(ctx, spender)?;
    let amount = parse_amount(args[1])?;
    let from = ctx.caller().as_str().to_string();
    let mut allowed = allowed_of(ctx, &from)?;
    allowed.insert(spender.to_string(), amount.into());
    ctx.fast_map_set(ALLOWED, &from, Value::Map(allowed));
    let event = json!({
        "from": from,
        "spender": spender,
        "amount": amount,
    });
    ctx.emit_event("Approved", &event.to_string());
    Ok(Value::Null)
}

fn transfer_from(
    ctx: &mut NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    check_inited(ctx)?;
    let args = parse_args(arg, 3, 4, "from_address,to_address,amount[,memo]")?;
    let (from, to) = (args[0], args[1]);
    check_address(ctx, from)?;
    check_address(ctx, to)?;
    let amount = parse_amount(args[2])?;
    let memo = args.get(3).copied().unwrap_or("");
    let spender = ctx.caller().as_str().to_string();
    let mut allowed = allowed_of(ctx, from)?;
    let approved = allowed.get(&spender).and_then(|v| v.as_int()).unwrap_or(0);
    if approved < amount {
        return throw("approved balance not enough")
    }
    move_balance(ctx, from, to, amount)?;
    if approved == amount {
        allowed.remove(&spender);
    } else {
        allowed.insert(spender, (approved - amount).into());
    }
    ctx.fast_map_set(ALLOWED, from, Value::Map(allowed));
    let event = json!({
        "from": from,
        "to": to,
        "amount": amount,
        "fee": 0,
        "memo": memo,
    });
    ctx.emit_event("Transfer", &event.to_string());
    Ok(Value::Null)
}

fn approved_balance_from(
    ctx: &NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    let args = parse_args(arg, 2, 2, "spender_address,from_address")?;
    let (spender, from) = (args[0], args[1]);
    let allowed = allowed_of(ctx, from)?;
    Ok(allowed
        .get(spender)
        .and_then(|v| v.as_int())
        .unwrap_or(0)
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Addr;
    use crate::core::CallContext;
    use crate::state::{EvaluateState, MemLedger, StateChanges};

    const ADMIN: &str = "SPLadmin";
    const BOB: &str = "SPLbob";

    fn call(
        state: &mut EvaluateState<'_>, caller: &str, api: &str, arg: &str,
    ) -> Result<Value, ExecError> {
        let call = CallContext {
            caller: Addr::new(caller),
            contract: Addr::new("CONtoken"),
        };
        let mut ctx = NativeContext::new(state, &call);
        invoke(&mut ctx, api, arg)
    }

    fn storage(changes: &StateChanges, slot: &str) -> Value {
        changes.storage[&Addr::new("CONtoken")][slot].after.clone()
    }

    #[test]
    fn test_token_flow() {
        let ledger = MemLedger::new();
        let mut s = EvaluateState::new(&ledger, 0);
        call(&mut s, ADMIN, "init", "").unwrap();
        assert_eq!(
            call(&mut s, ADMIN, "transfer", "SPLbob,1"),
            Err(ExecError::Contract("this token contract not inited".into()))
        );
        assert!(call(&mut s, BOB, "init_token", "t,T,1000,100").is_err());
        call(&mut s, ADMIN, "init_token", "test,TEST,1000,100").unwrap();
        assert!(call(&mut s, ADMIN, "init_token", "test,TEST,1000,100").is_err());
        call(&mut s, ADMIN, "transfer", "SPLbob,300,hi").unwrap();
        assert_eq!(call(&mut s, BOB, "balanceOf", ADMIN), Ok(Value::Int(700)));
        assert_eq!(call(&mut s, BOB, "balanceOf", BOB), Ok(Value::Int(300)));
        assert!(call(&mut s, BOB, "transfer", "SPLadmin,301").is_err());

        call(&mut s, ADMIN, "approve", "SPLbob,50").unwrap();
        assert_eq!(
            call(&mut s, BOB, "approvedBalanceFrom", "SPLbob,SPLadmin"),
            Ok(Value::Int(50))
        );
        assert_eq!(
            call(&mut s, BOB, "transferFrom", "SPLadmin,SPLbob,51"),
            Err(ExecError::Contract("approved balance not enough".into()))
        );
        call(&mut s, BOB, "transferFrom", "SPLadmin,SPLbob,20").unwrap();
        assert_eq!(call(&mut s, BOB, "balanceOf", BOB), Ok(Value::Int(320)));
        assert_eq!(
            call(&mut s, BOB, "allApprovedFromUser", ADMIN),
            Ok(Value::Text("{\"SPLbob\":30}".into()))
        );
        assert_eq!(call(&mut s, BOB, "supply", ""), Ok(Value::Int(1000)));
        assert_eq!(call(&mut s, BOB, "state", ""), Ok(Value::from("COMMON")));

        let events: Vec<_> =
            s.events().iter().map(|e| e.event_name.clone()).collect();
        assert_eq!(events, vec!["Inited", "Transfer", "Approved", "Transfer"]);
        let (changes, _) = s.finish();
        assert_eq!(storage(&changes, "users.SPLadmin"), Value::Int(680));
        assert_eq!(storage(&changes, "symbol"), Value::Text("TEST".into()));
    }

    #[test]
    fn test_init_token_args() {
        let ledger = MemLedger::new();
        let mut s = EvaluateState::new(&ledger, 0);
        call(&mut s, ADMIN, "init", "").unwrap();
        for bad in ["a,b,c", "a,b,100,3", "a,b,-1,10", "a,b,100,0", ",b,1,1"] {
            assert!(call(&mut s, ADMIN, "init_token", bad).is_err(), "{}", bad);
        }
        call(&mut s, ADMIN, "init_token", "a,b,100,1").unwrap();
        assert!(is_power_of_ten(1000));
        assert!(!is_power_of_ten(20));
    }
}
