//! Object Manager E2E Test
//!
//! A manager object reports every live descendant with a property snapshot
//! taken from the getters at call time, and announces children through
//! InterfacesAdded / InterfacesRemoved.

use crate::framework::{ScenarioContext, TestScenario};
use crate::validation::{ValidationResult, Validator};
use anyhow::Result;
use bus_rpc::{Object, ObjectPath, Property, Proxy, VTable, Variant};
use bus_types::constants;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::debug;

const SENSOR_INTERFACE: &str = "org.example.Sensor";
const MANAGER_PATH: &str = "/org/example/sensors";

type Snapshot = BTreeMap<String, BTreeMap<String, Variant>>;

pub struct ObjectManagerTest {
    pub children: usize,
}

impl Default for ObjectManagerTest {
    fn default() -> Self {
        Self { children: 5 }
    }
}

impl TestScenario for ObjectManagerTest {
    fn name(&self) -> &str {
        "object-manager"
    }

    fn description(&self) -> &str {
        "GetManagedObjects snapshots and InterfacesAdded/Removed signals"
    }

    fn execute(&self, ctx: &ScenarioContext) -> Result<Vec<ValidationResult>> {
        let server = ctx.connect()?;
        let client = ctx.connect()?;
        let manager = Object::new(&server, MANAGER_PATH)?;
        manager.add_object_manager();
        server.enter_event_loop_async()?;
        client.enter_event_loop_async()?;

        let proxy = Proxy::new(&client, server.unique_name(), MANAGER_PATH)?;
        let (added_tx, added_rx) = mpsc::channel();
        let metrics = Arc::clone(ctx.metrics());
        proxy.on_signal(
            constants::OBJECT_MANAGER_INTERFACE,
            constants::INTERFACES_ADDED,
            move |(path, interfaces): (ObjectPath, Snapshot)| {
                metrics.record_signal();
                let _ = added_tx.send((path, interfaces));
            },
        )?;
        let (removed_tx, removed_rx) = mpsc::channel();
        proxy.on_signal(
            constants::OBJECT_MANAGER_INTERFACE,
            constants::INTERFACES_REMOVED,
            move |(path, interfaces): (ObjectPath, Vec<String>)| {
                let _ = removed_tx.send((path, interfaces));
            },
        )?;

        let mut v = Validator::new();
        let readings: Vec<Arc<AtomicU64>> = (0..self.children).map(|i| Arc::new(AtomicU64::new(i as u64))).collect();
        let mut children = Vec::new();
        let mut announced = 0usize;
        for (i, reading) in readings.iter().enumerate() {
            let path = format!("{MANAGER_PATH}/sensor{i}");
            let child = Object::new(&server, &path)?;
            let value = Arc::clone(reading);
            let slot = child.add_vtable(
                SENSOR_INTERFACE,
                VTable::new()
                    .property(Property::read_only("Reading", move || value.load(Ordering::SeqCst)))
                    .property(Property::read_only("Index", move || i as u32)),
            )?;
            child.emit_interfaces_added_signal(None)?;
            if let Ok((added, interfaces)) = added_rx.recv_timeout(Duration::from_secs(2)) {
                let reading = interfaces
                    .get(SENSOR_INTERFACE)
                    .and_then(|props| props.get("Reading"))
                    .and_then(|r| r.get::<u64>().ok());
                if added.as_str() == path && reading == Some(i as u64) {
                    announced += 1;
                }
            }
            children.push((child, slot));
        }
        v.check_eq("interfaces_added", announced, self.children);

        // Outside the manager's subtree
        let stray = Object::new(&server, "/org/example/other")?;
        let _stray_slot = stray.add_vtable(SENSOR_INTERFACE, VTable::new().property(Property::read_only("Reading", || 0u64)))?;

        match ctx.timed(|| proxy.get_managed_objects()) {
            Ok(objects) => {
                v.check_eq("managed_count", objects.len(), self.children);
                v.check(
                    "only_descendants",
                    objects.keys().all(|p| p.as_str().starts_with(MANAGER_PATH)),
                    format!("{:?}", objects.keys().collect::<Vec<_>>()),
                );
            }
            Err(e) => {
                v.check("managed_objects", false, e.to_string());
            }
        }

        for reading in &readings {
            reading.fetch_add(100, Ordering::SeqCst);
        }
        let live = proxy.get_managed_objects().map(|objects| {
            objects
                .values()
                .filter_map(|ifaces| ifaces.get(SENSOR_INTERFACE)?.get("Reading")?.get::<u64>().ok())
                .all(|r| r >= 100)
        });
        v.check_eq("snapshot_is_live", live.ok(), Some(true));

        if let Some((child, slot)) = children.pop() {
            let path = child.path().clone();
            child.emit_interfaces_removed_signal(None)?;
            match removed_rx.recv_timeout(Duration::from_secs(2)) {
                Ok((removed, interfaces)) => {
                    v.check_eq("interfaces_removed_path", removed, path);
                    v.check_eq("interfaces_removed_names", interfaces, vec![SENSOR_INTERFACE.to_string()]);
                }
                Err(_) => {
                    v.check("interfaces_removed", false, "no InterfacesRemoved signal");
                }
            }
            drop(slot);
            drop(child);
            v.check_eq(
                "managed_after_removal",
                proxy.get_managed_objects().map(|o| o.len()).ok(),
                Some(self.children - 1),
            );
        }

        debug!(children = self.children, "Object manager scenario finished");
        Ok(v.finish())
    }
}
