use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use simplechain::common::Addr;
use simplechain::core::{ExecError, LedgerR, LedgerW};
use simplechain::state::{EvaluateState, MemLedger, StateChanges};
use simplechain::value::Value;
use simplechain_tools::dummy::DummyLedger;

const SLOTS: [&str; 4] = ["x", "y", "z", "users.SPLa"];

fn contracts() -> Vec<Addr> {
    vec![Addr::new("CONa"), Addr::new("CONb")]
}

fn accounts() -> Vec<Addr> {
    ["a", "b", "c"].iter().map(|n| Addr::account(n)).collect()
}

fn random_value(rng: &mut StdRng) -> Value {
    match rng.gen_range(0..5) {
        0 => Value::Null,
        1 => Value::Int(rng.gen_range(-100..100)),
        2 => Value::Text(format!("v{}", rng.gen_range(0..10))),
        3 => Value::List(
            (0..rng.gen_range(0..4))
                .map(|i| Value::Int(i))
                .collect(),
        ),
        _ => Value::Bool(rng.gen()),
    }
}

fn commit<L: LedgerW>(ledger: &mut L, changes: StateChanges) {
    for ((account, asset), delta) in changes.balances {
        ledger.update_balance(&account, asset, delta).unwrap();
    }
    for (contract, slots) in changes.storage {
        for (slot, change) in slots {
            ledger.set_storage(&contract, &slot, &change.after);
        }
    }
}

fn assert_same<A: LedgerR, B: LedgerR>(a: &A, b: &B) {
    for c in contracts() {
        for slot in SLOTS {
            assert_eq!(a.get_storage(&c, slot), b.get_storage(&c, slot));
        }
    }
    for acc in accounts() {
        assert_eq!(a.get_balance(&acc, 0), b.get_balance(&acc, 0));
    }
}

fn setup() -> (MemLedger, DummyLedger) {
    let mut mem = MemLedger::new();
    let mut dummy = DummyLedger::new();
    for acc in accounts() {
        mem.update_balance(&acc, 0, 100).unwrap();
        dummy.update_balance(&acc, 0, 100).unwrap();
    }
    mem.set_storage(&contracts()[0], "x", &Value::Int(1));
    dummy.set_storage(&contracts()[0], "x", &Value::Int(1));
    (mem, dummy)
}

#[test]
fn test_overlay_against_dummy() {
    let _ = env_logger::try_init();
    let mut rng = StdRng::seed_from_u64(7);
    let (mut mem, mut dummy) = setup();
    let contracts = contracts();
    let accounts = accounts();
    for _ in 0..20 {
        let mut state = EvaluateState::new(&mem, 1_000_000);
        for _ in 0..30 {
            if rng.gen_bool(0.5) {
                let c = &contracts[rng.gen_range(0..contracts.len())];
                let slot = SLOTS[rng.gen_range(0..SLOTS.len())];
                let v = random_value(&mut rng);
                state.set_storage(c, slot, v.clone());
                dummy.set_storage(c, slot, &v);
            } else {
                let from = &accounts[rng.gen_range(0..accounts.len())];
                let to = &accounts[rng.gen_range(0..accounts.len())];
                let amount = rng.gen_range(1..60u64);
                let res = state.transfer(from, to, 0, amount);
                if dummy.get_balance(from, 0) < amount {
                    assert_eq!(
                        res,
                        Err(ExecError::InsufficientBalance {
                            account: from.clone(),
                            asset: 0
                        })
                    );
                } else {
                    res.unwrap();
                    dummy.update_balance(from, 0, -(amount as i64)).unwrap();
                    dummy.update_balance(to, 0, amount as i64).unwrap();
                }
            }
            assert_same(&state, &dummy);
        }
        let (changes, _) = state.finish();
        let total: i64 = changes.balances.values().sum();
        assert_eq!(total, 0);
        commit(&mut mem, changes);
        assert_same(&mem, &dummy);
    }
}

#[test]
fn test_dropped_overlay() {
    let (mem, dummy) = setup();
    let c = &contracts()[0];
    let mut state = EvaluateState::new(&mem, 1000);
    state.set_storage(c, "x", Value::Int(99));
    state
        .transfer(&accounts()[0], &accounts()[1], 0, 100)
        .unwrap();
    drop(state);
    assert_same(&mem, &dummy);
}

#[test]
fn test_nested_overlays() {
    let (mut mem, _) = setup();
    let c = &contracts()[0];
    let a = &accounts()[0];
    let b = &accounts()[1];
    let mut outer = EvaluateState::new(&mem, 1000);
    outer.set_storage(c, "x", Value::Int(2));
    outer.transfer(a, b, 0, 30).unwrap();

    let mut inner = EvaluateState::new(&outer, 1000);
    assert_eq!(inner.get_storage(c, "x"), Value::Int(2));
    assert_eq!(inner.get_balance(a, 0), 70);
    inner.set_storage(c, "x", Value::Int(3));
    inner.set_storage(c, "y", Value::Text("new".into()));
    inner.transfer(a, b, 0, 70).unwrap();
    assert_eq!(
        inner.transfer(a, b, 0, 1),
        Err(ExecError::InsufficientBalance {
            account: a.clone(),
            asset: 0
        })
    );
    let (changes, _) = inner.finish();
    // the inner overlay saw the outer one as its base
    assert_eq!(changes.storage[c]["x"].before, Value::Int(2));

    outer.absorb(changes).unwrap();
    assert_eq!(outer.get_balance(a, 0), 0);
    assert_eq!(outer.get_balance(b, 0), 200);
    let slots = &outer.storage_changes()[c];
    assert_eq!(slots["x"].before, Value::Int(1));
    assert_eq!(slots["x"].after, Value::Int(3));
    assert_eq!(slots["y"].before, Value::Null);

    let (changes, _) = outer.finish();
    commit(&mut mem, changes);
    assert_eq!(mem.get_storage(c, "x"), Value::Int(3));
    assert_eq!(mem.get_storage(c, "y"), Value::Text("new".into()));
    assert_eq!(mem.get_balance(a, 0), 0);
}
