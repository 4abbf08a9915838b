use simplechain::common::{Addr, Hash};
use simplechain::core::params::CORE_ASSET_ID;
use simplechain::core::{
    AdmissionError, Asset, CallContext, ContractCode, ExecError, ExecOutcome,
    ExecutionEngine, LedgerR, LedgerW, Opcode, ProgramBuilder, StackEngine,
};
use simplechain::evaluator::{invoke_offline, EvalError, Evaluator};
use simplechain::processor::{apply_transaction, evaluate_transaction};
use simplechain::state::{EvaluateState, MemLedger};
use simplechain::tx::{
    ContractCreateOp, ContractInvokeOp, NativeContractCreateOp, Operation,
    Transaction,
};
use simplechain::value::Value;

fn alice() -> Addr {
    Addr::account("alice")
}

fn bob() -> Addr {
    Addr::account("bob")
}

fn setup() -> MemLedger {
    let _ = env_logger::try_init();
    let mut ledger = MemLedger::new();
    ledger.add_asset(Asset {
        asset_id: CORE_ASSET_ID,
        symbol: "COIN".into(),
        precision: 5,
    });
    for acc in [alice(), bob()] {
        ledger.register_account(&acc, "").unwrap();
    }
    ledger.update_balance(&alice(), CORE_ASSET_ID, 1000).unwrap();
    ledger
}

fn counter_code() -> ContractCode {
    ProgramBuilder::new()
        .api("init")
        .push("count")
        .push(0i64)
        .op(Opcode::SStore)
        .op(Opcode::Stop)
        .api("inc")
        .push("count")
        .push("count")
        .op(Opcode::SLoad)
        .push(1i64)
        .op(Opcode::Add)
        .op(Opcode::SStore)
        .push("Inc")
        .push("count")
        .op(Opcode::SLoad)
        .op(Opcode::Emit)
        .push("count")
        .op(Opcode::SLoad)
        .op(Opcode::Return)
        .api("spin")
        .label("spin")
        .jump("spin")
        .api("on_deposit_asset")
        .push("last_deposit")
        .op(Opcode::Arg)
        .op(Opcode::SStore)
        .op(Opcode::Stop)
        .api("pay")
        .op(Opcode::Caller)
        .push(0i64)
        .push(10i64)
        .op(Opcode::Transfer)
        .op(Opcode::Stop)
        .offline_api("get")
        .push("count")
        .op(Opcode::SLoad)
        .op(Opcode::Return)
        .event("Inc")
        .build_code()
        .unwrap()
}

fn create_op(code: ContractCode) -> ContractCreateOp {
    ContractCreateOp {
        caller_addr: alice(),
        contract_code: code,
        gas_limit: 100_000,
        op_time: 1_600_000_000,
    }
}

fn invoke_op(contract: &Addr, api: &str, arg: &str) -> ContractInvokeOp {
    ContractInvokeOp {
        caller_addr: alice(),
        contract_address: contract.clone(),
        contract_api: api.into(),
        contract_arg: arg.into(),
        gas_limit: 100_000,
        deposit_asset_id: CORE_ASSET_ID,
        deposit_amount: 0,
        op_time: 1_600_000_001,
    }
}

fn tx(nonce: u64, ops: Vec<Operation>) -> Transaction {
    Transaction::new(nonce, 1_600_000_000 + nonce, ops)
}

/// Deploy the counter contract and return its address.
fn deploy(ledger: &mut MemLedger) -> Addr {
    let op = create_op(counter_code());
    let addr = op.contract_address();
    apply_transaction(
        ledger,
        &StackEngine,
        &tx(0, vec![Operation::ContractCreate(op)]),
    )
    .unwrap();
    addr
}

#[test]
fn test_deploy_and_invoke() {
    let mut ledger = setup();
    let contract = deploy(&mut ledger);
    assert!(contract.is_contract());
    assert_eq!(ledger.get_storage(&contract, "count"), Value::Int(0));
    assert_eq!(ledger.get_balance(&alice(), CORE_ASSET_ID), 1000);
    let obj = ledger.get_contract(&contract).unwrap();
    assert_eq!(obj.owner, alice());
    assert_eq!(obj.registered_block, 1);

    let t = tx(
        1,
        vec![
            Operation::ContractInvoke(invoke_op(&contract, "inc", "")),
            Operation::ContractInvoke(invoke_op(&contract, "inc", "")),
        ],
    );
    let results = apply_transaction(&mut ledger, &StackEngine, &t).unwrap();
    assert_eq!(results[0].api_result, Value::Int(1));
    assert_eq!(results[1].api_result, Value::Int(2));
    assert_eq!(ledger.get_storage(&contract, "count"), Value::Int(2));
    let change = &results[1].storage_changes[&contract]["count"];
    assert_eq!(change.before, Value::Int(1));
    assert_eq!(change.after, Value::Int(2));
    assert!(!change.diff.is_undefined());

    // one receipt per transaction, events of both operations in order
    let receipt = ledger.get_receipt(&t.tx_id()).unwrap();
    assert!(receipt.exec_succeed);
    let args: Vec<_> =
        receipt.events.iter().map(|e| e.event_arg.as_str()).collect();
    assert_eq!(args, vec!["1", "2"]);

    assert_eq!(
        invoke_offline(&ledger, &StackEngine, &bob(), &contract, "get", "", 1000),
        Ok(Value::Int(2))
    );
    assert_eq!(
        invoke_offline(&ledger, &StackEngine, &bob(), &contract, "inc", "", 1000),
        Err(EvalError::Admission(AdmissionError::ApiNotDeclared("inc".into())))
    );
    // offline calls never write
    assert_eq!(ledger.get_storage(&contract, "count"), Value::Int(2));
}

#[test]
fn test_out_of_gas_leaves_ledger_unchanged() {
    let mut ledger = setup();
    let contract = deploy(&mut ledger);
    let before = ledger.to_json();

    let mut op = invoke_op(&contract, "spin", "");
    op.gas_limit = 500;
    let t = tx(1, vec![Operation::ContractInvoke(op)]);
    let err = apply_transaction(&mut ledger, &StackEngine, &t).unwrap_err();
    assert_eq!(
        err.eval_error(),
        Some(&EvalError::Execution(ExecError::OutOfGas))
    );
    assert_eq!(ledger.to_json(), before);
    assert!(ledger.get_receipt(&t.tx_id()).is_none());

    // a failing later operation undoes the earlier ones of the same transaction
    let mut spin = invoke_op(&contract, "spin", "");
    spin.gas_limit = 500;
    let t = tx(
        2,
        vec![
            Operation::ContractInvoke(invoke_op(&contract, "inc", "")),
            Operation::ContractInvoke(spin),
        ],
    );
    assert!(apply_transaction(&mut ledger, &StackEngine, &t).is_err());
    assert_eq!(ledger.to_json(), before);
}

#[test]
fn test_storage_gas_detected_after_execution() {
    let mut ledger = setup();
    let contract = deploy(&mut ledger);
    let op = Operation::ContractInvoke(invoke_op(&contract, "inc", ""));
    let evaluated = Evaluator::new(Hash::zero().clone(), &op)
        .evaluate(&ledger, &StackEngine)
        .unwrap();
    let used = evaluated.result().gas_used;
    // 13 instructions plus storage and event bytes
    assert!(used > 13);

    let mut exact = invoke_op(&contract, "inc", "");
    exact.gas_limit = used;
    let op = Operation::ContractInvoke(exact.clone());
    assert!(Evaluator::new(Hash::zero().clone(), &op)
        .evaluate(&ledger, &StackEngine)
        .is_ok());

    exact.gas_limit = used - 1;
    let op = Operation::ContractInvoke(exact);
    assert_eq!(
        Evaluator::new(Hash::zero().clone(), &op)
            .evaluate(&ledger, &StackEngine)
            .unwrap_err(),
        EvalError::Execution(ExecError::OutOfGas)
    );

    let mut zero = invoke_op(&contract, "inc", "");
    zero.gas_limit = 0;
    let op = Operation::ContractInvoke(zero);
    assert_eq!(
        Evaluator::new(Hash::zero().clone(), &op)
            .evaluate(&ledger, &StackEngine)
            .unwrap_err()
            .to_string(),
        "invalid_contract_gas_limit"
    );
    evaluated.apply(&mut ledger).unwrap();
    assert_eq!(ledger.get_storage(&contract, "count"), Value::Int(1));
}

#[test]
fn test_evaluate_is_deterministic() {
    let mut ledger = setup();
    let contract = deploy(&mut ledger);
    let t = tx(
        1,
        vec![
            Operation::ContractInvoke(invoke_op(&contract, "inc", "")),
            Operation::ContractInvoke(invoke_op(&contract, "get", "")),
        ],
    );
    let a = evaluate_transaction(&ledger, &StackEngine, &t);
    let b = evaluate_transaction(&ledger, &StackEngine, &t);
    assert_eq!(a, b);
    let mut spin = invoke_op(&contract, "spin", "");
    spin.gas_limit = 100;
    let t = tx(2, vec![Operation::ContractInvoke(spin)]);
    let a = evaluate_transaction(&ledger, &StackEngine, &t);
    let b = evaluate_transaction(&ledger, &StackEngine, &t);
    assert!(a.is_err());
    assert_eq!(a, b);
    // dry runs leave the ledger alone
    assert_eq!(ledger.get_storage(&contract, "count"), Value::Int(0));
}

#[test]
fn test_deposit() {
    let mut ledger = setup();
    let contract = deploy(&mut ledger);

    let mut op = invoke_op(&contract, "on_deposit_asset", "memo");
    op.deposit_amount = 50;
    apply_transaction(
        &mut ledger,
        &StackEngine,
        &tx(1, vec![Operation::ContractInvoke(op)]),
    )
    .unwrap();
    assert_eq!(ledger.get_balance(&alice(), CORE_ASSET_ID), 950);
    assert_eq!(ledger.get_balance(&contract, CORE_ASSET_ID), 50);
    assert_eq!(
        ledger.get_storage(&contract, "last_deposit"),
        Value::Text(r#"{"num":50,"param":"memo","symbol":"COIN"}"#.into())
    );

    // the contract pays back through a balanced transfer
    apply_transaction(
        &mut ledger,
        &StackEngine,
        &tx(2, vec![Operation::ContractInvoke(invoke_op(&contract, "pay", ""))]),
    )
    .unwrap();
    assert_eq!(ledger.get_balance(&alice(), CORE_ASSET_ID), 960);
    assert_eq!(ledger.get_balance(&contract, CORE_ASSET_ID), 40);

    let admission = |op: ContractInvokeOp| {
        Evaluator::new(Hash::zero().clone(), &Operation::ContractInvoke(op))
            .evaluate(&ledger, &StackEngine)
            .unwrap_err()
    };
    let mut op = invoke_op(&contract, "inc", "");
    op.deposit_amount = 1;
    assert_eq!(
        admission(op),
        EvalError::from(AdmissionError::DepositApiMismatch("inc".into()))
    );
    assert_eq!(
        admission(invoke_op(&contract, "on_deposit_asset", "")),
        EvalError::from(AdmissionError::ApiNotCallable("on_deposit_asset".into()))
    );
    assert_eq!(
        admission(invoke_op(&contract, "init", "")),
        EvalError::from(AdmissionError::ApiNotCallable("init".into()))
    );
    let mut op = invoke_op(&contract, "on_deposit_asset", "");
    op.deposit_amount = 5000;
    assert!(matches!(
        admission(op),
        EvalError::Admission(AdmissionError::InsufficientBalance { .. })
    ));
    let mut op = invoke_op(&contract, "on_deposit_asset", "");
    op.deposit_amount = 5;
    op.deposit_asset_id = 9;
    assert_eq!(admission(op), EvalError::from(AdmissionError::AssetNotFound(9)));
    let missing = Addr::new("CONmissing");
    assert_eq!(
        admission(invoke_op(&missing, "inc", "")).to_string(),
        "Can't find contract by address CONmissing"
    );
}

/// Engine crediting the caller out of nothing.
struct MintingEngine;

impl ExecutionEngine for MintingEngine {
    fn execute(
        &self, _code: &ContractCode, _api: &str, _arg: &str, ctx: &CallContext,
        state: &mut EvaluateState<'_>, _limit: u64,
    ) -> ExecOutcome {
        let status = state.update_balance(&ctx.caller, CORE_ASSET_ID, 100);
        ExecOutcome {
            result: Value::Null,
            instructions: 1,
            status,
        }
    }
}

#[test]
fn test_conservation_violation() {
    let mut ledger = setup();
    let code = ContractCode {
        abi: vec!["init".into()],
        ..Default::default()
    };
    let t = tx(0, vec![Operation::ContractCreate(create_op(code))]);
    let err = apply_transaction(&mut ledger, &MintingEngine, &t).unwrap_err();
    assert_eq!(
        err.eval_error(),
        Some(&EvalError::Execution(ExecError::ConservationViolation {
            asset: CORE_ASSET_ID,
            inflow: 0,
            outflow: 100,
        }))
    );
    assert_eq!(ledger.get_balance(&alice(), CORE_ASSET_ID), 1000);
}

#[test]
fn test_native_token() {
    let mut ledger = setup();
    let op = NativeContractCreateOp {
        caller_addr: alice(),
        template_key: "token".into(),
        gas_limit: 10_000,
        op_time: 1_600_000_000,
    };
    let token = op.contract_address();
    let t = tx(
        0,
        vec![
            Operation::NativeContractCreate(op),
            Operation::ContractInvoke(invoke_op(
                &token,
                "init_token",
                "Test,TST,10000,100",
            )),
            Operation::ContractInvoke(invoke_op(&token, "transfer", "SPLbob,25")),
        ],
    );
    let results = apply_transaction(&mut ledger, &StackEngine, &t).unwrap();
    // one native call plus storage and event bytes
    assert!(results[2].gas_used > 100);
    let offline = |api: &str, arg: &str| {
        invoke_offline(&ledger, &StackEngine, &bob(), &token, api, arg, 1000)
    };
    assert_eq!(offline("balanceOf", "SPLbob"), Ok(Value::Int(25)));
    assert_eq!(offline("balanceOf", "SPLalice"), Ok(Value::Int(9975)));
    assert_eq!(offline("tokenSymbol", ""), Ok(Value::from("TST")));
    assert_eq!(ledger.get_storage(&token, "users.SPLbob"), Value::Int(25));
    let receipt = ledger.get_receipt(&t.tx_id()).unwrap();
    let names: Vec<_> =
        receipt.events.iter().map(|e| e.event_name.as_str()).collect();
    assert_eq!(names, vec!["Inited", "Transfer"]);

    let unknown = NativeContractCreateOp {
        caller_addr: alice(),
        template_key: "nft".into(),
        gas_limit: 10_000,
        op_time: 1,
    };
    let err = apply_transaction(
        &mut ledger,
        &StackEngine,
        &tx(1, vec![Operation::NativeContractCreate(unknown)]),
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "native contract with this key not found: nft");
}

#[test]
fn test_native_deposit() {
    let mut ledger = setup();
    let op = NativeContractCreateOp {
        caller_addr: alice(),
        template_key: "exchange".into(),
        gas_limit: 10_000,
        op_time: 1_600_000_000,
    };
    let exchange = op.contract_address();
    let mut deposit = invoke_op(&exchange, "on_deposit_asset", "memo");
    deposit.deposit_amount = 40;
    let t = tx(
        0,
        vec![
            Operation::NativeContractCreate(op),
            Operation::ContractInvoke(invoke_op(
                &exchange,
                "init_config",
                "SPLalice",
            )),
            Operation::ContractInvoke(deposit),
        ],
    );
    let results = apply_transaction(&mut ledger, &StackEngine, &t).unwrap();
    let moved = &results[2].balance_changes;
    assert_eq!(moved[&(alice(), CORE_ASSET_ID)], -40);
    assert_eq!(moved[&(exchange.clone(), CORE_ASSET_ID)], 40);
    assert_eq!(moved.values().sum::<i64>(), 0);
    assert_eq!(ledger.get_balance(&alice(), CORE_ASSET_ID), 960);
    assert_eq!(ledger.get_balance(&exchange, CORE_ASSET_ID), 40);
    assert_eq!(
        ledger.get_storage(&exchange, "SPLalice.COIN"),
        Value::Int(40)
    );
    let receipt = ledger.get_receipt(&t.tx_id()).unwrap();
    let args: Vec<_> =
        receipt.events.iter().map(|e| e.event_arg.as_str()).collect();
    assert_eq!(
        args,
        vec![
            "SPLalice",
            r#"{"amount":40,"from_address":"SPLalice","symbol":"COIN"}"#,
            r#"{"address":"SPLalice","amount":40,"symbol":"COIN"}"#,
        ]
    );

    // without a deposit the hook is not callable
    let direct = invoke_op(&exchange, "on_deposit_asset", "");
    assert_eq!(
        apply_transaction(
            &mut ledger,
            &StackEngine,
            &tx(1, vec![Operation::ContractInvoke(direct)]),
        )
        .unwrap_err()
        .eval_error(),
        Some(&EvalError::Admission(AdmissionError::ApiNotCallable(
            "on_deposit_asset".into()
        )))
    );

    let t = tx(
        2,
        vec![Operation::ContractInvoke(invoke_op(
            &exchange, "withdraw", "15,COIN",
        ))],
    );
    let results = apply_transaction(&mut ledger, &StackEngine, &t).unwrap();
    assert_eq!(results[0].balance_changes.values().sum::<i64>(), 0);
    assert_eq!(ledger.get_balance(&alice(), CORE_ASSET_ID), 975);
    assert_eq!(ledger.get_balance(&exchange, CORE_ASSET_ID), 25);
    assert_eq!(
        invoke_offline(
            &ledger,
            &StackEngine,
            &bob(),
            &exchange,
            "balanceOf",
            "SPLalice,COIN",
            1000
        ),
        Ok(Value::Int(25))
    );

    // bob deposited nothing and can't drain alice's funds
    let mut steal = invoke_op(&exchange, "withdraw", "5,COIN");
    steal.caller_addr = bob();
    let before = ledger.to_json();
    assert!(apply_transaction(
        &mut ledger,
        &StackEngine,
        &tx(3, vec![Operation::ContractInvoke(steal)]),
    )
    .is_err());
    assert_eq!(ledger.to_json(), before);
}

#[test]
fn test_deeply_nested_operand_is_rejected() {
    let ledger = setup();
    let mut deep = Value::Null;
    for _ in 0..1_000 {
        deep = Value::List(vec![deep]);
    }
    let code = ProgramBuilder::new()
        .api("init")
        .push("x")
        .push(deep)
        .op(Opcode::SStore)
        .op(Opcode::Stop)
        .build_code()
        .unwrap();
    let op = Operation::ContractCreate(create_op(code));
    let err = Evaluator::new(Hash::zero().clone(), &op)
        .evaluate(&ledger, &StackEngine)
        .unwrap_err();
    assert!(matches!(
        err,
        EvalError::Execution(ExecError::InvalidCode(ref msg))
            if msg.contains("value nested too deep")
    ));
}
