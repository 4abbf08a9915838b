use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use simplechain::diff::{diff, patch, rollback, DiffError, DiffResult};
use simplechain::value::Value;

const KEYS: [&str; 5] = ["a", "b", "c", "owner", "users"];

fn random_json(rng: &mut StdRng, depth: usize) -> serde_json::Value {
    let pick = if depth == 0 {
        rng.gen_range(0..4)
    } else {
        rng.gen_range(0..6)
    };
    match pick {
        0 => serde_json::Value::Null,
        1 => rng.gen::<bool>().into(),
        2 => rng.gen_range(-5i64..5).into(),
        3 => KEYS[rng.gen_range(0..KEYS.len())].into(),
        4 => {
            let n = rng.gen_range(0..5);
            (0..n)
                .map(|_| random_json(rng, depth - 1))
                .collect::<Vec<_>>()
                .into()
        }
        _ => {
            let mut m = serde_json::Map::new();
            for _ in 0..rng.gen_range(0..4) {
                let k = KEYS[rng.gen_range(0..KEYS.len())];
                m.insert(k.to_string(), random_json(rng, depth - 1));
            }
            m.into()
        }
    }
}

/// Mutate a value a little, so diffs of related values get exercised, not only replacements.
fn mutate(rng: &mut StdRng, v: &serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Array(list) => {
            let mut list: Vec<_> = list.iter().map(|x| mutate(rng, x)).collect();
            match rng.gen_range(0..3) {
                0 => list.push(random_json(rng, 1)),
                1 => {
                    list.pop();
                }
                _ => (),
            }
            list.into()
        }
        serde_json::Value::Object(m) => {
            let mut m = m.clone();
            for v in m.values_mut() {
                *v = mutate(rng, v);
            }
            if rng.gen_bool(0.3) {
                let k = KEYS[rng.gen_range(0..KEYS.len())];
                m.insert(k.to_string(), random_json(rng, 1));
            }
            if rng.gen_bool(0.3) {
                let k = KEYS[rng.gen_range(0..KEYS.len())];
                m.remove(k);
            }
            m.into()
        }
        _ if rng.gen_bool(0.3) => random_json(rng, 1),
        v => v.clone(),
    }
}

fn check_json(a: &serde_json::Value, b: &serde_json::Value) {
    let d = diff(a, b);
    assert_eq!(d.is_undefined(), a == b, "{} -> {}", a, b);
    assert_eq!(&patch(a, &d).unwrap(), b, "patch {} -> {}", a, b);
    assert_eq!(&rollback(b, &d).unwrap(), a, "rollback {} -> {}", a, b);
}

fn check_value(a: &Value, b: &Value) {
    let d = diff(a, b);
    assert_eq!(d.is_undefined(), a == b);
    assert_eq!(&patch(a, &d).unwrap(), b);
    assert_eq!(&rollback(b, &d).unwrap(), a);
}

#[test]
fn test_random_roundtrip() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        let a = random_json(&mut rng, 3);
        let b = if rng.gen_bool(0.7) {
            mutate(&mut rng, &a)
        } else {
            random_json(&mut rng, 3)
        };
        check_json(&a, &b);
        check_json(&b, &a);
        check_value(&Value::from(&a), &Value::from(&b));
        assert!(diff(&a, &a).is_undefined());
    }
}

#[test]
fn test_value_only_kinds() {
    // kinds without a JSON counterpart
    let a = Value::List(vec![
        Value::Bytes(vec![1u8, 2, 3].into()),
        Value::Tag(7, Box::new(Value::Int(1))),
        Value::Float(1.5),
    ]);
    let b = Value::List(vec![
        Value::Bytes(vec![1u8, 2].into()),
        Value::Tag(7, Box::new(Value::Int(1))),
        Value::Float(-0.0),
        Value::Null,
    ]);
    check_value(&a, &b);
    let d = diff(&a, &b);
    let tuples = d.value().unwrap().as_list().unwrap();
    // the unchanged tag produces no tuple
    assert_eq!(tuples.len(), 3);
    assert!(diff(&Value::Float(0.0), &Value::Float(-0.0)).value().is_some());
}

#[test]
fn test_documented_cases() {
    let d = diff(&json!({"x": 1}), &json!({"y": 1}));
    assert_eq!(d.value(), Some(&json!({"x__deleted": 1, "y__added": 1})));

    let a = json!([1, 2, 3, 4, 5, 6]);
    let b = json!({"a": [1, 2, 3]});
    assert_eq!(
        diff(&a, &b).value(),
        Some(&json!({"__old": a.clone(), "__new": b}))
    );

    let b = json!([0, 1, 3, 4, 6, 7, 5]);
    check_json(&a, &b);
    check_json(&b, &a);
}

#[test]
fn test_rollback_errors() {
    let d = diff(&json!({"x": 1}), &json!({"y": 1}));
    assert_eq!(
        rollback(&json!({"z": 1}), &d),
        Err(DiffError::MissingKey("y__added".into()))
    );
    let d: DiffResult<serde_json::Value> =
        DiffResult::new(json!([["+", 3, 1]]));
    assert!(matches!(
        patch(&json!([]), &d),
        Err(DiffError::IndexOutOfRange { .. })
    ));
}
