//! Properties E2E Test
//!
//! Get/Set/GetAll round-trips through the standard Properties interface, and
//! the PropertiesChanged signal each update behaviour produces.

use crate::framework::{ScenarioContext, TestScenario};
use crate::validation::{ValidationResult, Validator};
use anyhow::Result;
use bus_rpc::{error_names, ErrorKind, Object, Property, PropertyUpdate, Proxy, VTable, Variant};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

const DEVICE_INTERFACE: &str = "org.example.Device";

type Change = (String, HashMap<String, Variant>, Vec<String>);

pub struct PropertiesTest {
    pub writes: u32,
}

impl Default for PropertiesTest {
    fn default() -> Self {
        Self { writes: 20 }
    }
}

struct DeviceState {
    brightness: AtomicU32,
    label: Mutex<String>,
    cache_epoch: AtomicU32,
}

fn device_vtable(state: &Arc<DeviceState>) -> VTable {
    let (b_get, b_set) = (Arc::clone(state), Arc::clone(state));
    let (l_get, l_set) = (Arc::clone(state), Arc::clone(state));
    let (c_get, c_set) = (Arc::clone(state), Arc::clone(state));
    VTable::new()
        .property(
            Property::read_write(
                "Brightness",
                move || b_get.brightness.load(Ordering::SeqCst),
                move |value: u32| {
                    if value > 100 {
                        return Err(bus_rpc::MethodError::invalid_args("brightness is 0..=100"));
                    }
                    b_set.brightness.store(value, Ordering::SeqCst);
                    Ok(())
                },
            )
            .with_doc("Percent"),
        )
        .property(
            Property::read_write(
                "Label",
                move || l_get.label.lock().clone(),
                move |value: String| {
                    *l_set.label.lock() = value;
                    Ok(())
                },
            )
            .with_update(PropertyUpdate::EmitsInvalidation),
        )
        .property(
            Property::read_write(
                "CacheEpoch",
                move || c_get.cache_epoch.load(Ordering::SeqCst),
                move |value: u32| {
                    c_set.cache_epoch.store(value, Ordering::SeqCst);
                    Ok(())
                },
            )
            .with_update(PropertyUpdate::EmitsNoSignal),
        )
        .property(Property::read_only("Model", || "bx-100".to_string()).with_update(PropertyUpdate::Const))
}

impl TestScenario for PropertiesTest {
    fn name(&self) -> &str {
        "properties"
    }

    fn description(&self) -> &str {
        "Property access and PropertiesChanged per update behaviour"
    }

    fn execute(&self, ctx: &ScenarioContext) -> Result<Vec<ValidationResult>> {
        let server = ctx.connect()?;
        let client = ctx.connect()?;
        let state = Arc::new(DeviceState {
            brightness: AtomicU32::new(50),
            label: Mutex::new("lamp".to_string()),
            cache_epoch: AtomicU32::new(0),
        });
        let object = Object::new(&server, "/org/example/device0")?;
        let _slot = object.add_vtable(DEVICE_INTERFACE, device_vtable(&state))?;
        server.enter_event_loop_async()?;
        client.enter_event_loop_async()?;

        let proxy = Proxy::new(&client, server.unique_name(), "/org/example/device0")?;
        let (tx, rx) = mpsc::channel::<Change>();
        let metrics = Arc::clone(ctx.metrics());
        proxy.on_properties_changed(DEVICE_INTERFACE, move |iface, changed, invalidated| {
            metrics.record_signal();
            let _ = tx.send((iface.to_string(), changed, invalidated));
        })?;
        let next_change = || rx.recv_timeout(Duration::from_secs(2)).ok();

        let mut v = Validator::new();
        v.check_eq(
            "get_initial",
            ctx.timed(|| proxy.get_property::<u32>(DEVICE_INTERFACE, "Brightness")).ok(),
            Some(50),
        );

        let mut lost = 0u32;
        for i in 0..self.writes {
            let value = i % 101;
            if ctx.timed(|| proxy.set_property(DEVICE_INTERFACE, "Brightness", value)).is_err() {
                lost += 1;
                continue;
            }
            match next_change() {
                Some((_, changed, invalidated))
                    if invalidated.is_empty()
                        && changed.get("Brightness").and_then(|b| b.get::<u32>().ok()) == Some(value) => {}
                _ => lost += 1,
            }
        }
        v.check_eq("emits_change_carries_value", lost, 0);

        proxy.set_property(DEVICE_INTERFACE, "Label", "desk lamp".to_string())?;
        match next_change() {
            Some((iface, changed, invalidated)) => {
                v.check_eq("invalidation_interface", iface.as_str(), DEVICE_INTERFACE);
                v.check_eq("invalidation_without_value", changed.is_empty(), true);
                v.check_eq("invalidation_names", invalidated, vec!["Label".to_string()]);
            }
            None => {
                v.check("invalidation_signal", false, "no PropertiesChanged for Label");
            }
        }
        v.check_eq(
            "label_written",
            proxy.get_property::<String>(DEVICE_INTERFACE, "Label").ok(),
            Some("desk lamp".to_string()),
        );

        proxy.set_property(DEVICE_INTERFACE, "CacheEpoch", 7u32)?;
        v.check("no_signal_property", next_change().is_none(), "CacheEpoch write stayed silent");
        v.check_eq("no_signal_written", state.cache_epoch.load(Ordering::SeqCst), 7);

        v.check_err(
            "const_read_only",
            proxy.set_property(DEVICE_INTERFACE, "Model", "other".to_string()),
            |e| e.remote_name() == Some(error_names::PROPERTY_READ_ONLY),
        );
        v.check_err(
            "setter_rejects",
            proxy.set_property(DEVICE_INTERFACE, "Brightness", 500u32),
            |e| e.remote_name() == Some(error_names::INVALID_ARGS),
        );
        v.check_err(
            "wrong_value_type",
            proxy.set_property(DEVICE_INTERFACE, "Brightness", "bright".to_string()),
            |e| e.remote_name() == Some(error_names::INVALID_ARGS),
        );
        v.check_err(
            "read_as_wrong_type",
            proxy.get_property::<String>(DEVICE_INTERFACE, "Brightness"),
            |e| e.kind() == ErrorKind::TypeMismatch,
        );
        v.check_err(
            "unknown_property",
            proxy.get_property::<u32>(DEVICE_INTERFACE, "Volume"),
            |e| e.remote_name() == Some(error_names::UNKNOWN_PROPERTY),
        );

        match proxy.get_all_properties(DEVICE_INTERFACE) {
            Ok(all) => {
                let mut names: Vec<_> = all.keys().cloned().collect();
                names.sort();
                v.check_eq("get_all_names", names, vec![
                    "Brightness".to_string(),
                    "CacheEpoch".to_string(),
                    "Label".to_string(),
                    "Model".to_string(),
                ]);
                v.check_eq(
                    "get_all_model",
                    all.get("Model").and_then(|m| m.get::<String>().ok()),
                    Some("bx-100".to_string()),
                );
            }
            Err(e) => {
                v.check("get_all", false, e.to_string());
            }
        }

        // Emitting on demand: all properties of the interface, then one by name
        object.emit_properties_changed_signal(DEVICE_INTERFACE, None)?;
        match next_change() {
            Some((_, changed, invalidated)) => {
                v.check_eq("emit_all_changed", changed.len(), 1);
                v.check_eq("emit_all_invalidated", invalidated, vec!["Label".to_string()]);
            }
            None => {
                v.check("emit_all", false, "no signal");
            }
        }

        let (tx_async, rx_async) = mpsc::channel();
        proxy.get_property_async::<u32, _>(DEVICE_INTERFACE, "CacheEpoch", move |r| {
            let _ = tx_async.send(r.ok());
        })?;
        v.check_eq(
            "get_property_async",
            rx_async.recv_timeout(Duration::from_secs(2)).ok().flatten(),
            Some(7),
        );

        Ok(v.finish())
    }
}
