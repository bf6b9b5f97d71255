//! Timeout E2E Test
//!
//! A handler slower than the call timeout yields a Timeout error, distinct
//! from remote errors. An async method that never answers is failed by the
//! server after its grace period, and the caller sees that as a Timeout too.

use crate::framework::{ScenarioContext, TestScenario};
use crate::validation::{ValidationResult, Validator};
use anyhow::Result;
use bus_rpc::{AsyncReply, ErrorKind, Method, Object, Proxy, VTable};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLOW_INTERFACE: &str = "org.example.Slow";

pub struct TimeoutTest {
    pub call_timeout: Duration,
    pub handler_delay: Duration,
    pub async_grace: Duration,
}

impl Default for TimeoutTest {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(100),
            handler_delay: Duration::from_millis(400),
            async_grace: Duration::from_millis(200),
        }
    }
}

impl TestScenario for TimeoutTest {
    fn name(&self) -> &str {
        "timeouts"
    }

    fn description(&self) -> &str {
        "Call deadlines, default timeout and the async reply grace period"
    }

    fn execute(&self, ctx: &ScenarioContext) -> Result<Vec<ValidationResult>> {
        let mut server_config = ctx.rpc_config().clone();
        server_config.async_reply_grace_ms = self.async_grace.as_millis() as u64;
        let server = ctx.connect_with(server_config)?;
        let client = ctx.connect()?;

        let parked: Arc<Mutex<Vec<AsyncReply<()>>>> = Arc::default();
        let keep = Arc::clone(&parked);
        let delay = self.handler_delay;
        let object = Object::new(&server, "/slow")?;
        let _slot = object.add_vtable(
            SLOW_INTERFACE,
            VTable::new()
                .method(Method::new("Sleep", move |(): ()| {
                    thread::sleep(delay);
                    Ok(())
                }))
                .method(Method::new("Quick", |(): ()| Ok(())))
                .method(Method::new_async("Forget", move |(): (), reply: AsyncReply<()>| {
                    keep.lock().push(reply);
                })),
        )?;
        server.enter_event_loop_async()?;

        let proxy = Proxy::new(&client, server.unique_name(), "/slow")?;
        let mut v = Validator::new();

        let started = Instant::now();
        let result = proxy.call_method_with_timeout::<_, ()>(SLOW_INTERFACE, "Sleep", (), Some(self.call_timeout));
        let elapsed = started.elapsed();
        v.check_err("explicit_timeout", result, |e| e.kind() == ErrorKind::Timeout);
        v.check(
            "timeout_not_early",
            elapsed >= self.call_timeout,
            format!("gave up after {elapsed:?}"),
        );
        v.check(
            "timeout_not_late",
            elapsed < self.handler_delay,
            format!("gave up after {elapsed:?}"),
        );

        // Let the server finish the slow call so later calls are not queued behind it
        thread::sleep(self.handler_delay);

        client.set_method_call_timeout(self.call_timeout);
        v.check_eq("default_timeout", client.method_call_timeout(), self.call_timeout);
        v.check_err("default_timeout_applies", proxy.call_method::<_, ()>(SLOW_INTERFACE, "Sleep", ()), |e| {
            e.kind() == ErrorKind::Timeout
        });
        thread::sleep(self.handler_delay);
        v.check(
            "fast_call_within_timeout",
            ctx.timed(|| proxy.call_method::<_, ()>(SLOW_INTERFACE, "Quick", ())).is_ok(),
            "Quick answered",
        );

        client.set_method_call_timeout(Duration::from_secs(10));
        let started = Instant::now();
        let result = proxy.call_method::<_, ()>(SLOW_INTERFACE, "Forget", ());
        let elapsed = started.elapsed();
        v.check_err("grace_expiry_is_timeout", result, |e| e.kind() == ErrorKind::Timeout);
        v.check(
            "grace_expiry_bounded",
            elapsed < Duration::from_secs(5),
            format!("failed after {elapsed:?}"),
        );
        v.check_eq("forgotten_reply_settled", parked.lock().iter().all(|r| r.is_settled()), true);

        Ok(v.finish())
    }
}
