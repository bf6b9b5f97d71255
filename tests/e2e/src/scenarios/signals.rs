//! Signals E2E Test
//!
//! Delivery order, filter scoping, install confirmation of asynchronous
//! subscriptions, and release stopping delivery.

use crate::framework::{ScenarioContext, TestScenario};
use crate::validation::{ValidationResult, Validator};
use anyhow::Result;
use bus_rpc::{MatchRule, Object, Proxy, Signal, VTable};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const FEED_INTERFACE: &str = "org.example.Feed";

pub struct SignalsTest {
    pub signals: u32,
}

impl Default for SignalsTest {
    fn default() -> Self {
        Self { signals: 100 }
    }
}

fn feed_vtable() -> VTable {
    VTable::new()
        .signal(Signal::new::<(u32, String)>("Tick").with_names(&["seq", "source"]))
        .signal(Signal::new::<()>("Reset"))
}

impl TestScenario for SignalsTest {
    fn name(&self) -> &str {
        "signals"
    }

    fn description(&self) -> &str {
        "Ordered delivery, per-path filtering and subscription lifetime"
    }

    fn execute(&self, ctx: &ScenarioContext) -> Result<Vec<ValidationResult>> {
        let server = ctx.connect()?;
        let client = ctx.connect()?;
        let alpha = Object::new(&server, "/feeds/alpha")?;
        let _alpha_slot = alpha.add_vtable(FEED_INTERFACE, feed_vtable())?;
        let beta = Object::new(&server, "/feeds/beta")?;
        let _beta_slot = beta.add_vtable(FEED_INTERFACE, feed_vtable())?;
        client.enter_event_loop_async()?;

        let mut v = Validator::new();

        // Install confirmation runs before any later signal reaches the handler
        let installed = Arc::new(AtomicBool::new(false));
        let seen_before_install = Arc::new(AtomicUsize::new(0));
        let (all_tx, all_rx) = mpsc::channel();
        let (flag, early) = (Arc::clone(&installed), Arc::clone(&seen_before_install));
        let metrics = Arc::clone(ctx.metrics());
        let confirmed = Arc::clone(&installed);
        let (confirm_tx, confirm_rx) = mpsc::channel();
        let namespace_slot = client.add_match_async(
            MatchRule::signal()
                .with_sender(server.unique_name())?
                .with_path_namespace("/feeds")?
                .with_interface(FEED_INTERFACE)?
                .with_member("Tick")?,
            move |msg| {
                if !flag.load(Ordering::SeqCst) {
                    early.fetch_add(1, Ordering::SeqCst);
                }
                metrics.record_signal();
                let path = msg.path().map(|p| p.to_string()).unwrap_or_default();
                if let Ok(seq) = msg.read::<u32>() {
                    let _ = all_tx.send((path, seq));
                }
            },
            move || {
                confirmed.store(true, Ordering::SeqCst);
                let _ = confirm_tx.send(());
            },
        )?;
        v.check(
            "install_confirmed",
            confirm_rx.recv_timeout(Duration::from_secs(2)).is_ok(),
            "confirmation callback ran",
        );

        let alpha_proxy = Proxy::new(&client, server.unique_name(), "/feeds/alpha")?;
        let (alpha_tx, alpha_rx) = mpsc::channel();
        alpha_proxy.on_signal(FEED_INTERFACE, "Tick", move |(seq, _source): (u32, String)| {
            let _ = alpha_tx.send(seq);
        })?;

        for seq in 0..self.signals {
            let target = if seq % 2 == 0 { &alpha } else { &beta };
            target.emit_signal(FEED_INTERFACE, "Tick", (seq, "test".to_string()))?;
        }

        let mut everything = Vec::new();
        while let Ok(item) = all_rx.recv_timeout(Duration::from_secs(2)) {
            everything.push(item);
            if everything.len() == self.signals as usize {
                break;
            }
        }
        let order: Vec<u32> = everything.iter().map(|(_, seq)| *seq).collect();
        v.check_eq("namespace_receives_all_in_order", order, (0..self.signals).collect::<Vec<_>>());
        v.check_eq("no_delivery_before_install", seen_before_install.load(Ordering::SeqCst), 0);

        let mut alpha_seen = Vec::new();
        while alpha_seen.len() < (self.signals as usize).div_ceil(2) {
            match alpha_rx.recv_timeout(Duration::from_secs(2)) {
                Ok(seq) => alpha_seen.push(seq),
                Err(_) => break,
            }
        }
        v.check("path_filter", alpha_seen.iter().all(|s| s % 2 == 0), format!("{} alpha ticks", alpha_seen.len()));
        v.check_eq("path_filter_count", alpha_seen.len(), (self.signals as usize).div_ceil(2));

        v.check_err(
            "undeclared_signal_rejected",
            alpha.emit_signal(FEED_INTERFACE, "Tock", ()),
            |_| true,
        );
        v.check_err(
            "wrong_signature_rejected",
            alpha.emit_signal(FEED_INTERFACE, "Tick", ("x".to_string(),)),
            |_| true,
        );

        // Releasing stops delivery
        namespace_slot.release()?;
        alpha_proxy.release();
        alpha.emit_signal(FEED_INTERFACE, "Tick", (999u32, "late".to_string()))?;
        alpha.emit_signal(FEED_INTERFACE, "Reset", ())?;
        thread::sleep(Duration::from_millis(100));
        v.check("released_match_silent", all_rx.try_recv().is_err(), "no delivery after release");
        v.check("released_proxy_silent", alpha_rx.try_recv().is_err(), "no delivery after proxy release");
        v.check_eq("proxy_subscriptions", alpha_proxy.subscription_count(), 0);

        Ok(v.finish())
    }
}
