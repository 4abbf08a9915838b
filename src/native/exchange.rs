//! Custody part of the exchange native contract: users deposit assets into it, the contract keeps
//! a per-user ledger of what it holds for them, and users withdraw from it.
//!
//! Storage: `name`, `feeReceiver`, `state`, `admin`, plus the associative storages
//! `<address>.<symbol>` (deposited balance) and `<symbol>.minFee`. Order matching is done off
//! chain and is not part of this contract.

use serde_json::json;

use super::{parse_amount, parse_args, throw, NativeContext};
use crate::common::Share;
use crate::core::ExecError;
use crate::value::Value;

pub const KEY: &str = "exchange";

pub const APIS: &[&str] = &[
    "init",
    "init_config",
    "setMinFee",
    "withdraw",
    "on_deposit_asset",
    "state",
    "feeReceiver",
    "balanceOf",
    "minFee",
];

pub const OFFLINE_APIS: &[&str] =
    &["state", "feeReceiver", "balanceOf", "minFee"];

pub const EVENTS: &[&str] =
    &["Inited", "Deposited", "Withdrawed", "UserBalanceChange"];

const STATE_NOT_INITED: &str = "NOT_INITED";
const STATE_COMMON: &str = "COMMON";

pub(super) fn invoke(
    ctx: &mut NativeContext<'_, '_>, api: &str, arg: &str,
) -> Result<Value, ExecError> {
    match api {
        "init" => init(ctx),
        "init_config" => init_config(ctx, arg),
        "setMinFee" => set_min_fee(ctx, arg),
        "on_deposit_asset" => on_deposit_asset(ctx, arg),
        "withdraw" => withdraw(ctx, arg),
        "state" => Ok(ctx.get_string_storage("state")?.into()),
        "feeReceiver" => Ok(ctx.get_string_storage("feeReceiver")?.into()),
        "balanceOf" => {
            let args = parse_args(arg, 2, 2, "address,symbol")?;
            Ok(deposited(ctx, args[0], args[1])?.into())
        }
        "minFee" => {
            let fee = ctx.fast_map_get(arg.trim(), "minFee");
            Ok(fee.as_int().unwrap_or(0).into())
        }
        _ => throw("exchange api not found"),
    }
}

fn init(ctx: &mut NativeContext<'_, '_>) -> Result<Value, ExecError> {
    let admin = ctx.caller().as_str().to_string();
    ctx.set_storage("name", "".into());
    ctx.set_storage("feeReceiver", "".into());
    ctx.set_storage("state", STATE_NOT_INITED.into());
    ctx.set_storage("admin", admin.into());
    Ok(Value::Null)
}

fn check_admin(ctx: &NativeContext<'_, '_>) -> Result<(), ExecError> {
    if ctx.get_string_storage("admin")? != ctx.caller().as_str() {
        return throw("only admin can call this api")
    }
    Ok(())
}

fn check_common(ctx: &NativeContext<'_, '_>) -> Result<(), ExecError> {
    if ctx.get_string_storage("state")? != STATE_COMMON {
        return throw("this exchange contract state is not common")
    }
    Ok(())
}

fn deposited(
    ctx: &NativeContext<'_, '_>, owner: &str, symbol: &str,
) -> Result<i64, ExecError> {
    match ctx.fast_map_get(owner, symbol) {
        Value::Null => Ok(0),
        Value::Int(v) => Ok(v),
        _ => throw(format!("invalid balance of {}", owner)),
    }
}

fn init_config(
    ctx: &mut NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    check_admin(ctx)?;
    if ctx.get_string_storage("state")? != STATE_NOT_INITED {
        return throw("this exchange contract inited before")
    }
    let fee_receiver = arg.trim();
    if fee_receiver.is_empty() {
        return throw("feeReceiver is empty")
    }
    if !ctx.is_valid_address(fee_receiver) {
        return throw("feeReceiver is invalid address")
    }
    ctx.set_storage("feeReceiver", fee_receiver.into());
    ctx.set_storage("state", STATE_COMMON.into());
    ctx.emit_event("Inited", fee_receiver);
    Ok(Value::Null)
}

fn set_min_fee(
    ctx: &mut NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    check_admin(ctx)?;
    check_common(ctx)?;
    let args = parse_args(arg, 2, 2, "asset_symbol,minFee")?;
    if args[0].is_empty() {
        return throw("symbol is empty")
    }
    let min_fee = match args[1].parse::<i64>() {
        Ok(v) if v >= 0 => v,
        _ => return throw("minFee must be non-negative integer"),
    };
    ctx.fast_map_set(args[0], "minFee", min_fee.into());
    Ok(Value::Null)
}

/// Credit the caller with an asset the chain already moved into the contract. The argument is
/// the deposit description `{"num":..,"param":..,"symbol":..}`.
fn on_deposit_asset(
    ctx: &mut NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    check_common(ctx)?;
    let args: serde_json::Value = serde_json::from_str(arg)
        .map_err(|_| ExecError::Contract("args not map".into()))?;
    let (amount, symbol) = match (args["num"].as_i64(), args["symbol"].as_str())
    {
        (Some(amount), Some(symbol)) => (amount, symbol.to_string()),
        _ => return throw("args not map"),
    };
    if amount <= 0 {
        return throw("amount must > 0")
    }
    let addr = ctx.caller().as_str().to_string();
    let balance = deposited(ctx, &addr, &symbol)?
        .checked_add(amount)
        .ok_or_else(|| ExecError::Contract("balance overflow".into()))?;
    ctx.fast_map_set(&addr, &symbol, balance.into());
    let event = json!({
        "from_address": addr,
        "symbol": symbol,
        "amount": amount,
    });
    ctx.emit_event("Deposited", &event.to_string());
    let event = json!({
        "address": addr,
        "symbol": symbol,
        "amount": amount,
    });
    ctx.emit_event("UserBalanceChange", &event.to_string());
    Ok(Value::Null)
}

fn withdraw(
    ctx: &mut NativeContext<'_, '_>, arg: &str,
) -> Result<Value, ExecError> {
    check_common(ctx)?;
    let args = parse_args(arg, 2, 2, "amount,symbol")?;
    let amount = parse_amount(args[0])?;
    let symbol = args[1];
    if symbol.is_empty() {
        return throw("symbol is empty")
    }
    let caller = ctx.caller().clone();
    let balance = match ctx.fast_map_get(caller.as_str(), symbol) {
        Value::Int(v) => v,
        _ => return throw("no balance to withdraw"),
    };
    if amount > balance {
        return throw("not enough balance to withdraw")
    }
    let asset = match ctx.get_asset_by_symbol(symbol) {
        Some(asset) => asset,
        None => return throw(format!("asset {} not found", symbol)),
    };
    let left = balance - amount;
    ctx.fast_map_set(
        caller.as_str(),
        symbol,
        if left == 0 { Value::Null } else { left.into() },
    );
    ctx.transfer_to(&caller, asset.asset_id, amount as Share)?;
    let event = json!({
        "to_address": caller.as_str(),
        "symbol": symbol,
        "amount": amount,
    });
    ctx.emit_event("Withdrawed", &event.to_string());
    let event = json!({
        "address": caller.as_str(),
        "symbol": symbol,
        "amount": -amount,
    });
    ctx.emit_event("UserBalanceChange", &event.to_string());
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Addr;
    use crate::core::{Asset, CallContext, LedgerR, LedgerW};
    use crate::state::{EvaluateState, MemLedger};

    const ADMIN: &str = "SPLadmin";
    const BOB: &str = "SPLbob";
    const EXCHANGE: &str = "CONexchange";

    fn call(
        state: &mut EvaluateState<'_>, caller: &str, api: &str, arg: &str,
    ) -> Result<Value, ExecError> {
        let call = CallContext {
            caller: Addr::new(caller),
            contract: Addr::new(EXCHANGE),
        };
        let mut ctx = NativeContext::new(state, &call);
        invoke(&mut ctx, api, arg)
    }

    fn bob_deposit(state: &mut EvaluateState<'_>) -> Value {
        call(state, BOB, "balanceOf", "SPLbob,COIN").unwrap()
    }

    #[test]
    fn test_custody() {
        let mut ledger = MemLedger::new();
        ledger.add_asset(Asset {
            asset_id: 0,
            symbol: "COIN".into(),
            precision: 5,
        });
        // funds the chain moved into the contract along with the deposit
        ledger.update_balance(&Addr::new(EXCHANGE), 0, 30).unwrap();
        let mut s = EvaluateState::new(&ledger, 0);
        call(&mut s, ADMIN, "init", "").unwrap();
        let deposit = r#"{"num":30,"param":"","symbol":"COIN"}"#;
        assert_eq!(
            call(&mut s, BOB, "on_deposit_asset", deposit),
            Err(ExecError::Contract(
                "this exchange contract state is not common".into()
            ))
        );
        assert!(call(&mut s, BOB, "init_config", ADMIN).is_err());
        assert!(call(&mut s, ADMIN, "init_config", "nobody").is_err());
        call(&mut s, ADMIN, "init_config", ADMIN).unwrap();
        assert_eq!(
            call(&mut s, BOB, "feeReceiver", ""),
            Ok(Value::from(ADMIN))
        );

        call(&mut s, BOB, "on_deposit_asset", deposit).unwrap();
        assert_eq!(bob_deposit(&mut s), Value::Int(30));
        assert!(call(&mut s, BOB, "on_deposit_asset", "[1]").is_err());

        assert_eq!(
            call(&mut s, BOB, "withdraw", "31,COIN"),
            Err(ExecError::Contract("not enough balance to withdraw".into()))
        );
        call(&mut s, BOB, "withdraw", "12,COIN").unwrap();
        assert_eq!(bob_deposit(&mut s), Value::Int(18));
        assert_eq!(s.get_balance(&Addr::new(BOB), 0), 12);
        assert_eq!(s.get_balance(&Addr::new(EXCHANGE), 0), 18);
        call(&mut s, BOB, "withdraw", "18,COIN").unwrap();
        assert_eq!(bob_deposit(&mut s), Value::Int(0));
        assert_eq!(
            call(&mut s, BOB, "withdraw", "1,COIN"),
            Err(ExecError::Contract("no balance to withdraw".into()))
        );

        assert!(call(&mut s, BOB, "setMinFee", "COIN,5").is_err());
        call(&mut s, ADMIN, "setMinFee", "COIN,5").unwrap();
        assert_eq!(call(&mut s, BOB, "minFee", "COIN"), Ok(Value::Int(5)));
        assert_eq!(call(&mut s, BOB, "minFee", "USD"), Ok(Value::Int(0)));

        let events: Vec<_> =
            s.events().iter().map(|e| e.event_name.clone()).collect();
        assert_eq!(
            events,
            vec![
                "Inited",
                "Deposited",
                "UserBalanceChange",
                "Withdrawed",
                "UserBalanceChange",
                "Withdrawed",
                "UserBalanceChange",
            ]
        );
    }
}
