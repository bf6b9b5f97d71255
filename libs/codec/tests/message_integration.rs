//! # Codec Integration Tests
//!
//! Exercises the public codec API end to end: values appended to a message,
//! framed, decoded and read back, including large payloads.

use bus_codec::{ContainerKind, Message};
use bus_types::{Array, BasicType, BusType, Dict, SignatureType, Value, Variant};
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Instant;

fn framed(mut msg: Message) -> Message {
    msg.set_serial(1);
    msg.seal().unwrap();
    Message::decode(&msg.encode().unwrap()).unwrap()
}

fn signal() -> Message {
    Message::signal("/org/example/obj", "org.example.Iface", "Update").unwrap()
}

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<u8>().prop_map(Value::Byte),
        any::<bool>().prop_map(Value::Bool),
        any::<i16>().prop_map(Value::Int16),
        any::<u32>().prop_map(Value::Uint32),
        any::<i64>().prop_map(Value::Int64),
        (-1.0e9f64..1.0e9).prop_map(Value::Double),
        "[a-z]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Value::Struct),
            inner
                .clone()
                .prop_map(|v| Value::Variant(Variant::from_value(v))),
            // arrays of one element type: repeat a single generated value
            (inner.clone(), 0usize..4).prop_map(|(v, n)| {
                Value::Array(Array::new(v.value_type(), vec![v; n]).unwrap())
            }),
            prop::collection::vec(("[a-z]{1,6}", inner), 0..4).prop_map(|pairs| {
                let value_type = pairs
                    .first()
                    .map(|(_, v)| v.value_type())
                    .unwrap_or(SignatureType::Variant);
                let entries = pairs
                    .into_iter()
                    .filter(|(_, v)| v.value_type() == value_type)
                    .map(|(k, v)| (Value::String(k), v))
                    .collect();
                Value::Dict(Dict::new(BasicType::String, value_type, entries).unwrap())
            }),
        ]
    })
}

proptest! {
    #[test]
    fn values_survive_framing(values in prop::collection::vec(value_strategy(), 1..4)) {
        let mut msg = signal();
        for v in &values {
            msg.append_value(v).unwrap();
        }
        let expected_signature = msg.signature().to_string();

        let mut decoded = framed(msg);
        prop_assert_eq!(decoded.signature(), expected_signature.as_str());
        let back = decoded.read_all().unwrap();
        for (orig, got) in values.iter().zip(&back) {
            prop_assert_eq!(orig, got);
            prop_assert_eq!(orig.signature(), got.signature());
        }
        prop_assert_eq!(back.len(), values.len());
    }
}

#[test]
fn test_struct_of_array_of_dict() {
    type Shape = (i32, Vec<HashMap<String, Variant>>);
    let mut entry = HashMap::new();
    entry.insert("id".to_string(), Variant::new(7u64));
    entry.insert("tags".to_string(), Variant::new(vec!["a".to_string()]));
    let value: Shape = (3, vec![entry.clone(), HashMap::new()]);

    let mut msg = signal();
    msg.append(&value).unwrap();
    assert_eq!(msg.signature(), "(iaa{sv})");
    let mut decoded = framed(msg);
    let back: Shape = decoded.read().unwrap();
    assert_eq!(back.0, 3);
    assert_eq!(back.1[0], entry);
    assert!(back.1[1].is_empty());
    assert_eq!(Shape::signature(), "(iaa{sv})");
}

#[test]
fn test_large_dictionary_is_linear() {
    let n = 50_000;
    let map: HashMap<String, Variant> = (0..n)
        .map(|i| (format!("key{i}"), Variant::new(i as i64)))
        .collect();

    let started = Instant::now();
    let mut msg = signal();
    msg.append(&map).unwrap();
    let mut decoded = framed(msg);
    let back: HashMap<String, Variant> = decoded.read().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(back.len(), n);
    assert_eq!(back["key49999"].get::<i64>().unwrap(), 49_999);
    // generous bound: a quadratic implementation takes minutes here
    assert!(elapsed.as_secs() < 10, "took {elapsed:?}");
}

#[test]
fn test_large_dictionary_through_containers() {
    let mut msg = signal();
    msg.open_container(ContainerKind::Array, "{su}").unwrap();
    for i in 0..20_000u32 {
        msg.open_container(ContainerKind::DictEntry, "su").unwrap();
        msg.append(&format!("k{i}")).unwrap();
        msg.append(&i).unwrap();
        msg.close_container().unwrap();
    }
    msg.close_container().unwrap();

    let mut decoded = framed(msg);
    decoded.enter_container(ContainerKind::Array, "{su}").unwrap();
    let mut count = 0u32;
    while !decoded.at_end().unwrap() {
        decoded.enter_container(ContainerKind::DictEntry, "su").unwrap();
        let _key: String = decoded.read().unwrap();
        assert_eq!(decoded.read::<u32>().unwrap(), count);
        decoded.exit_container().unwrap();
        count += 1;
    }
    decoded.exit_container().unwrap();
    assert_eq!(count, 20_000);
}

#[test]
fn test_copy_semantics_after_framing() {
    let mut msg = signal();
    msg.append(&"hello".to_string()).unwrap();
    let decoded = framed(msg);

    let mut target = signal();
    decoded.copy_to(&mut target, false).unwrap();
    assert_eq!(target.read::<String>().unwrap(), "hello");
    assert!(target.is_sealed());

    let mut deep = signal();
    decoded.copy_to(&mut deep, true).unwrap();
    drop(decoded);
    assert!(target.rewind(true).is_ok());
    assert!(target.read::<String>().is_err());
    assert_eq!(deep.read::<String>().unwrap(), "hello");
}

#[test]
fn test_nested_payload_limits_leave_message_unchanged() {
    let mut msg = signal();
    msg.append(&7u32).unwrap();
    let (sig, len) = (msg.signature().to_string(), msg.body_len());

    let wide = Value::structure(vec![Value::Byte(1); 300]).unwrap();
    let oversized = Value::Variant(Variant::from_value(wide.clone()));
    assert!(msg.append_value(&oversized).is_err());
    assert!(msg.append_value(&Value::structure(vec![Value::Int32(1), oversized]).unwrap()).is_err());
    assert!(msg.open_container(ContainerKind::Variant, wide.signature().as_str()).is_err());
    assert_eq!(msg.signature(), sig);
    assert_eq!(msg.body_len(), len);

    let fits = Value::Variant(Variant::from_value(Value::structure(vec![Value::Byte(1); 200]).unwrap()));
    msg.append_value(&fits).unwrap();
    let mut decoded = framed(msg);
    assert_eq!(decoded.read::<u32>().unwrap(), 7);
    assert_eq!(decoded.read_value().unwrap(), fits);
}
