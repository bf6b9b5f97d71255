//! # Proxy
//!
//! ## Purpose
//!
//! Client side of the runtime: a [`Proxy`] binds a [`Connection`] to one
//! (destination, path) pair and turns typed Rust arguments into method calls,
//! property round-trips through `org.freedesktop.DBus.Properties`, and signal
//! subscriptions scoped to that remote object.
//!
//! ## Call Styles
//!
//! ```text
//! call_method ──────────▶ blocks this thread until reply / error / timeout
//! call_method_async ────▶ PendingAsyncCall, callback runs exactly once
//! call_method_future ───▶ ReplyFuture, await it; dropping it cancels the call
//! call_method_no_reply ─▶ fire and forget
//! ```
//!
//! Replies are decoded as the requested result type and must carry exactly
//! its signature; anything else fails with [`ErrorKind::TypeMismatch`](crate::ErrorKind).
//!
//! Subscriptions made through a proxy are owned by it: [`Proxy::release`] or
//! dropping the proxy removes every one of them.

use crate::connection::Connection;
use crate::error::{RpcError, RpcResult};
use crate::matching::MatchSlot;
use crate::pending::{decode_reply, PendingAsyncCall, ReplyFuture};
use bus_codec::{Arguments, FromArguments, Message};
use bus_transport::MatchRule;
use bus_types::{constants, BusName, BusType, ObjectPath, Variant};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// `a{oa{sa{sv}}}` reply of `GetManagedObjects`
pub type ManagedObjects = BTreeMap<ObjectPath, BTreeMap<String, BTreeMap<String, Variant>>>;

/// Handle on one remote object
pub struct Proxy {
    conn: Connection,
    destination: BusName,
    path: ObjectPath,
    slots: Mutex<Vec<MatchSlot>>,
}

impl Proxy {
    pub fn new(conn: &Connection, destination: &str, path: &str) -> RpcResult<Self> {
        Ok(Self {
            conn: conn.clone(),
            destination: BusName::new(destination)?,
            path: ObjectPath::new(path)?,
            slots: Mutex::new(Vec::new()),
        })
    }

    pub fn destination(&self) -> &BusName {
        &self.destination
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Empty, unsealed call to this object
    pub fn create_method_call(&self, interface: &str, member: &str) -> RpcResult<Message> {
        Ok(Message::method_call(
            Some(self.destination.as_str()),
            self.path.as_str(),
            Some(interface),
            member,
        )?)
    }

    fn build_call<A: Arguments>(&self, interface: &str, member: &str, args: &A) -> RpcResult<Message> {
        let mut call = self.create_method_call(interface, member)?;
        args.append_to(&mut call)?;
        Ok(call)
    }

    // ----- method calls -----

    /// Call and block for the reply, using the connection's default timeout
    pub fn call_method<A, R>(&self, interface: &str, member: &str, args: A) -> RpcResult<R>
    where
        A: Arguments,
        R: FromArguments,
    {
        self.call_method_with_timeout(interface, member, args, None)
    }

    /// Call and block for the reply; `None` uses the connection's default timeout
    pub fn call_method_with_timeout<A, R>(
        &self,
        interface: &str,
        member: &str,
        args: A,
        timeout: Option<Duration>,
    ) -> RpcResult<R>
    where
        A: Arguments,
        R: FromArguments,
    {
        let call = self.build_call(interface, member, &args)?;
        decode_reply(self.call_raw(call, timeout)?)
    }

    /// Send a prepared call and block for the undecoded reply
    pub fn call_raw(&self, call: Message, timeout: Option<Duration>) -> RpcResult<Message> {
        self.conn.send_with_reply_and_block(call, timeout)
    }

    /// Send a call flagged as expecting no reply
    pub fn call_method_no_reply<A: Arguments>(&self, interface: &str, member: &str, args: A) -> RpcResult<()> {
        let mut call = self.build_call(interface, member, &args)?;
        call.set_no_reply_expected(true);
        self.conn.send(call)?;
        Ok(())
    }

    /// Call without blocking; `callback` receives the decoded reply or the error
    ///
    /// The callback runs at most once, and never after a successful
    /// [`PendingAsyncCall::cancel`].
    pub fn call_method_async<A, R, F>(
        &self,
        interface: &str,
        member: &str,
        args: A,
        callback: F,
    ) -> RpcResult<PendingAsyncCall>
    where
        A: Arguments,
        R: FromArguments + 'static,
        F: FnOnce(RpcResult<R>) + Send + 'static,
    {
        let call = self.build_call(interface, member, &args)?;
        send_decoded(&self.conn, call, callback)
    }

    /// Call without blocking and await the decoded reply
    pub fn call_method_future<A, R>(&self, interface: &str, member: &str, args: A) -> RpcResult<ReplyFuture<R>>
    where
        A: Arguments,
        R: FromArguments,
    {
        let call = self.build_call(interface, member, &args)?;
        let (tx, rx) = oneshot::channel();
        let pending = self.conn.call_async(call, None, reply_sender(tx))?;
        Ok(ReplyFuture::new(pending, rx))
    }

    // ----- properties -----

    /// `Properties.Get`, read back as `T`
    pub fn get_property<T: BusType>(&self, interface: &str, name: &str) -> RpcResult<T> {
        let (value,): (Variant,) = self.call_method(
            constants::PROPERTIES_INTERFACE,
            constants::PROPERTIES_GET,
            (interface.to_string(), name.to_string()),
        )?;
        Ok(value.get::<T>()?)
    }

    /// `Properties.Set`; the value travels as a variant of `T`'s signature
    pub fn set_property<T: BusType>(&self, interface: &str, name: &str, value: T) -> RpcResult<()> {
        self.call_method(
            constants::PROPERTIES_INTERFACE,
            constants::PROPERTIES_SET,
            (interface.to_string(), name.to_string(), Variant::new(value)),
        )
    }

    /// `Properties.GetAll`
    pub fn get_all_properties(&self, interface: &str) -> RpcResult<HashMap<String, Variant>> {
        let (values,): (HashMap<String, Variant>,) = self.call_method(
            constants::PROPERTIES_INTERFACE,
            constants::PROPERTIES_GET_ALL,
            (interface.to_string(),),
        )?;
        Ok(values)
    }

    /// Non-blocking `Properties.Get`
    pub fn get_property_async<T, F>(&self, interface: &str, name: &str, callback: F) -> RpcResult<PendingAsyncCall>
    where
        T: BusType + 'static,
        F: FnOnce(RpcResult<T>) + Send + 'static,
    {
        self.call_method_async(
            constants::PROPERTIES_INTERFACE,
            constants::PROPERTIES_GET,
            (interface.to_string(), name.to_string()),
            move |reply: RpcResult<(Variant,)>| {
                callback(reply.and_then(|(value,)| value.get::<T>().map_err(RpcError::from)))
            },
        )
    }

    /// `ObjectManager.GetManagedObjects` on this path
    pub fn get_managed_objects(&self) -> RpcResult<ManagedObjects> {
        let (objects,): (ManagedObjects,) = self.call_method(
            constants::OBJECT_MANAGER_INTERFACE,
            constants::GET_MANAGED_OBJECTS,
            (),
        )?;
        Ok(objects)
    }

    // ----- signals -----

    fn signal_rule(&self, interface: &str, member: &str) -> RpcResult<MatchRule> {
        Ok(MatchRule::signal()
            .with_sender(self.destination.as_str())?
            .with_path(self.path.as_str())?
            .with_interface(interface)?
            .with_member(member)?)
    }

    fn own(&self, slot: MatchSlot) {
        self.slots.lock().push(slot);
    }

    /// Subscribe to a signal of this object, decoded as `A`
    ///
    /// Signals whose body does not have exactly `A`'s signature are dropped.
    pub fn on_signal<A, F>(&self, interface: &str, member: &str, handler: F) -> RpcResult<()>
    where
        A: FromArguments + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let rule = self.signal_rule(interface, member)?;
        let slot = self.conn.add_match(rule, move |msg| {
            let expected = A::signature();
            if msg.signature() != expected {
                warn!(
                    member = ?msg.member().map(|m| m.as_str()),
                    expected = %expected,
                    found = %msg.signature(),
                    "Dropping signal with unexpected signature"
                );
                return;
            }
            match A::read_from(msg) {
                Ok(args) => handler(args),
                Err(e) => warn!(error = %e, "Failed to decode signal"),
            }
        })?;
        debug!(destination = %self.destination, path = %self.path, interface, member, "Proxy subscribed");
        self.own(slot);
        Ok(())
    }

    /// Subscribe to a signal of this object, handing over the message itself
    pub fn on_signal_raw<F>(&self, interface: &str, member: &str, handler: F) -> RpcResult<()>
    where
        F: Fn(&mut Message) + Send + Sync + 'static,
    {
        let rule = self.signal_rule(interface, member)?;
        let slot = self.conn.add_match(rule, handler)?;
        self.own(slot);
        Ok(())
    }

    /// `PropertiesChanged` for `interface`: (interface, changed values, invalidated names)
    pub fn on_properties_changed<F>(&self, interface: &str, handler: F) -> RpcResult<()>
    where
        F: Fn(&str, HashMap<String, Variant>, Vec<String>) + Send + Sync + 'static,
    {
        let rule = self
            .signal_rule(constants::PROPERTIES_INTERFACE, constants::PROPERTIES_CHANGED)?
            .with_arg0(interface);
        let slot = self.conn.add_match(rule, move |msg| {
            match <(String, HashMap<String, Variant>, Vec<String>)>::read_from(msg) {
                Ok((iface, changed, invalidated)) => handler(&iface, changed, invalidated),
                Err(e) => warn!(error = %e, "Malformed PropertiesChanged"),
            }
        })?;
        self.own(slot);
        Ok(())
    }

    /// Number of live subscriptions owned by this proxy
    pub fn subscription_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_active()).count()
    }

    /// Release every subscription made through this proxy
    pub fn release(&self) {
        let slots: Vec<MatchSlot> = self.slots.lock().drain(..).collect();
        for slot in slots {
            if let Err(e) = slot.release() {
                debug!(error = %e, "Subscription already gone");
            }
        }
    }
}

fn send_decoded<R, F>(conn: &Connection, call: Message, callback: F) -> RpcResult<PendingAsyncCall>
where
    R: FromArguments + 'static,
    F: FnOnce(RpcResult<R>) + Send + 'static,
{
    conn.call_async(call, None, move |reply| callback(reply.and_then(decode_reply::<R>)))
}

fn reply_sender(tx: oneshot::Sender<RpcResult<Message>>) -> impl FnOnce(RpcResult<Message>) + Send + 'static {
    move |reply| {
        // Receiver gone means the future was dropped and the call cancelled
        let _ = tx.send(reply);
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("destination", &self.destination.as_str())
            .field("path", &self.path.as_str())
            .field("subscriptions", &self.slots.lock().len())
            .finish()
    }
}
