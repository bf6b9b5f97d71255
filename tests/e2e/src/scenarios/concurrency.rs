//! Concurrency E2E Test
//!
//! Many threads share one proxy for blocking calls while async calls are
//! issued and cancelled from racing threads. Every async call must resolve
//! to at most one callback, and to none when a cancel won.

use super::calculator::{calculator_vtable, CALCULATOR_INTERFACE, CALCULATOR_PATH};
use crate::framework::{ScenarioContext, TestScenario};
use crate::validation::{ValidationResult, Validator};
use anyhow::{anyhow, Result};
use bus_rpc::{Object, PendingAsyncCall, Proxy, RpcResult};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct ConcurrencyTest {
    pub threads: usize,
    pub calls_per_thread: usize,
    pub async_calls: usize,
    pub cancellers: usize,
}

impl Default for ConcurrencyTest {
    fn default() -> Self {
        Self {
            threads: 8,
            calls_per_thread: 50,
            async_calls: 200,
            cancellers: 4,
        }
    }
}

struct Tracked {
    call: PendingAsyncCall,
    delivered: Arc<AtomicU32>,
    cancel_wins: Arc<AtomicUsize>,
}

impl ConcurrencyTest {
    fn blocking_calls(&self, ctx: &ScenarioContext, proxy: &Arc<Proxy>, v: &mut Validator) -> Result<()> {
        let failures = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(self.threads));
        let handles: Vec<_> = (0..self.threads)
            .map(|t| {
                let proxy = Arc::clone(proxy);
                let failures = Arc::clone(&failures);
                let start = Arc::clone(&start);
                let metrics = Arc::clone(ctx.metrics());
                let calls = self.calls_per_thread;
                thread::spawn(move || {
                    start.wait();
                    for i in 0..calls {
                        let a = (t * 1000 + i) as i64;
                        let started = Instant::now();
                        let reply: RpcResult<(f64,)> =
                            proxy.call_method(CALCULATOR_INTERFACE, "Multiply", (a, 2.0f64));
                        metrics.record_call(started.elapsed());
                        if !matches!(reply, Ok((p,)) if p == a as f64 * 2.0) {
                            failures.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().map_err(|_| anyhow!("caller thread panicked"))?;
        }
        v.check_eq("parallel_blocking_calls", failures.load(Ordering::SeqCst), 0);
        Ok(())
    }

    fn racing_cancels(&self, proxy: &Proxy, v: &mut Validator) -> Result<()> {
        let mut tracked = Vec::with_capacity(self.async_calls);
        for i in 0..self.async_calls {
            let delivered = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&delivered);
            let call = proxy.call_method_async(
                CALCULATOR_INTERFACE,
                "Multiply",
                (i as i64, 3.0f64),
                move |_reply: RpcResult<(f64,)>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )?;

            let cancel_wins = Arc::new(AtomicUsize::new(0));
            if i % 2 == 0 {
                let racers: Vec<_> = (0..self.cancellers)
                    .map(|_| {
                        let call = call.clone();
                        let wins = Arc::clone(&cancel_wins);
                        thread::spawn(move || {
                            if call.cancel() {
                                wins.fetch_add(1, Ordering::SeqCst);
                            }
                        })
                    })
                    .collect();
                for racer in racers {
                    racer.join().map_err(|_| anyhow!("cancel thread panicked"))?;
                }
            }
            tracked.push(Tracked {
                call,
                delivered,
                cancel_wins,
            });
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while tracked.iter().any(|t| t.call.is_pending()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        // Settled calls may still be running their callback
        thread::sleep(Duration::from_millis(50));

        let multiple_winners = tracked
            .iter()
            .filter(|t| t.cancel_wins.load(Ordering::SeqCst) > 1)
            .count();
        let delivered_after_cancel = tracked
            .iter()
            .filter(|t| t.cancel_wins.load(Ordering::SeqCst) == 1 && t.delivered.load(Ordering::SeqCst) != 0)
            .count();
        let not_exactly_once = tracked
            .iter()
            .filter(|t| t.cancel_wins.load(Ordering::SeqCst) == 0 && t.delivered.load(Ordering::SeqCst) != 1)
            .count();
        let cancelled = tracked.iter().filter(|t| t.call.is_cancelled()).count();
        debug!(cancelled, total = tracked.len(), "Cancel race finished");

        v.check_eq("single_cancel_winner", multiple_winners, 0);
        v.check_eq("no_callback_after_cancel", delivered_after_cancel, 0);
        v.check_eq("uncancelled_delivered_once", not_exactly_once, 0);
        v.note("cancel_race", format!("{cancelled} of {} calls cancelled", tracked.len()));
        Ok(())
    }
}

impl TestScenario for ConcurrencyTest {
    fn name(&self) -> &str {
        "concurrency"
    }

    fn description(&self) -> &str {
        "Parallel blocking calls and async calls racing cancellation"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn execute(&self, ctx: &ScenarioContext) -> Result<Vec<ValidationResult>> {
        let server = ctx.connect()?;
        let client = ctx.connect()?;
        let object = Object::new(&server, CALCULATOR_PATH)?;
        let _slot = object.add_vtable(CALCULATOR_INTERFACE, calculator_vtable())?;
        server.enter_event_loop_async()?;

        let proxy = Arc::new(Proxy::new(&client, server.unique_name(), CALCULATOR_PATH)?);
        let mut v = Validator::new();

        // Blocking calls first without a client loop, then with one
        self.blocking_calls(ctx, &proxy, &mut v)?;
        client.enter_event_loop_async()?;
        self.blocking_calls(ctx, &proxy, &mut v)?;
        self.racing_cancels(&proxy, &mut v)?;

        Ok(v.finish())
    }
}
