//! Interface tables: methods, properties and signals
//!
//! Typed constructors derive every signature from the Rust types of the
//! handler, so a table cannot disagree with the code that serves it.
//!
//! ```rust
//! use bus_rpc::{Method, MethodError, Property, PropertyUpdate, Signal, VTable};
//!
//! let table = VTable::new()
//!     .method(
//!         Method::new("Multiply", |(a, b): (i64, f64)| Ok::<_, MethodError>((a as f64 * b,)))
//!             .with_names(&["a", "b"], &["result"]),
//!     )
//!     .property(Property::read_only("Precision", || 2u32).with_update(PropertyUpdate::Const))
//!     .signal(Signal::new::<(String,)>("Computed").with_names(&["expression"]));
//! assert_eq!(table.methods()[0].in_signature(), "xd");
//! ```

use crate::connection::ConnectionInner;
use crate::error::{MethodError, RpcError, RpcResult};
use bus_codec::{Arguments, CodecResult, FromArguments, Message};
use bus_types::{error_names, split_complete_types, BusType, MemberName, Signature, Value};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, warn};

pub(crate) type SyncHandler = Arc<dyn Fn(&mut Message) -> Result<Message, MethodError> + Send + Sync>;
pub(crate) type AsyncHandler =
    Arc<dyn Fn(&mut Message, Arc<DeferredReply>) -> Result<(), MethodError> + Send + Sync>;
type Getter = Arc<dyn Fn() -> Value + Send + Sync>;
type Setter = Arc<dyn Fn(Value) -> Result<(), MethodError> + Send + Sync>;

pub(crate) enum Invoke {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// One callable method
pub struct Method {
    name: String,
    in_signature: String,
    out_signature: String,
    in_names: Vec<String>,
    out_names: Vec<String>,
    doc: Option<String>,
    no_reply: bool,
    pub(crate) invoke: Invoke,
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("in_signature", &self.in_signature)
            .field("out_signature", &self.out_signature)
            .field("in_names", &self.in_names)
            .field("out_names", &self.out_names)
            .field("doc", &self.doc)
            .field("no_reply", &self.no_reply)
            .finish_non_exhaustive()
    }
}

impl Method {
    /// Method answered on the dispatch thread with the handler's return value
    ///
    /// Arguments are decoded as `A`; a single return value is a 1-tuple.
    pub fn new<A, R, F>(name: &str, handler: F) -> Self
    where
        A: FromArguments + 'static,
        R: Arguments + 'static,
        F: Fn(A) -> Result<R, MethodError> + Send + Sync + 'static,
    {
        let invoke = Invoke::Sync(Arc::new(move |call: &mut Message| {
            let args = A::read_from(call)?;
            let result = handler(args)?;
            let mut reply = call.create_reply().map_err(build_failure)?;
            result.append_to(&mut reply).map_err(build_failure)?;
            Ok(reply)
        }));
        Self::with_invoke(name, <A as FromArguments>::signature(), R::signature(), invoke)
    }

    /// Method whose handler answers later through an [`AsyncReply`]
    ///
    /// If no answer is sent within the configured grace period the caller
    /// receives a `NoReply` error.
    pub fn new_async<A, R, F>(name: &str, handler: F) -> Self
    where
        A: FromArguments + 'static,
        R: Arguments + 'static,
        F: Fn(A, AsyncReply<R>) + Send + Sync + 'static,
    {
        let invoke = Invoke::Async(Arc::new(move |call: &mut Message, deferred| {
            let args = A::read_from(call)?;
            handler(args, AsyncReply::new(deferred));
            Ok(())
        }));
        Self::with_invoke(name, <A as FromArguments>::signature(), R::signature(), invoke)
    }

    /// Method with explicit signatures; the handler reads the call and builds the reply
    pub fn raw<F>(name: &str, in_signature: &str, out_signature: &str, handler: F) -> Self
    where
        F: Fn(&mut Message) -> Result<Message, MethodError> + Send + Sync + 'static,
    {
        let expected = out_signature.to_string();
        let invoke = Invoke::Sync(Arc::new(move |call: &mut Message| {
            let reply = handler(call)?;
            if reply.signature() != expected {
                return Err(MethodError::failed(format!(
                    "handler replied with '{}', declared '{}'",
                    reply.signature(),
                    expected
                )));
            }
            Ok(reply)
        }));
        Self::with_invoke(name, in_signature.to_string(), out_signature.to_string(), invoke)
    }

    fn with_invoke(name: &str, in_signature: String, out_signature: String, invoke: Invoke) -> Self {
        Self {
            name: name.to_string(),
            in_signature,
            out_signature,
            in_names: Vec::new(),
            out_names: Vec::new(),
            doc: None,
            no_reply: false,
            invoke,
        }
    }

    /// Parameter names, one per complete type of each signature
    pub fn with_names(mut self, inputs: &[&str], outputs: &[&str]) -> Self {
        self.in_names = inputs.iter().map(|s| s.to_string()).collect();
        self.out_names = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Never send a reply, whatever the caller asked for
    pub fn no_reply(mut self) -> Self {
        self.no_reply = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_signature(&self) -> &str {
        &self.in_signature
    }

    pub fn out_signature(&self) -> &str {
        &self.out_signature
    }

    pub fn in_names(&self) -> &[String] {
        &self.in_names
    }

    pub fn out_names(&self) -> &[String] {
        &self.out_names
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn is_no_reply(&self) -> bool {
        self.no_reply
    }

    pub fn is_async(&self) -> bool {
        matches!(self.invoke, Invoke::Async(_))
    }
}

fn build_failure(e: bus_codec::CodecError) -> MethodError {
    MethodError::failed(format!("cannot build reply: {e}"))
}

/// When and how a property write is announced through `PropertiesChanged`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyUpdate {
    /// Writes are not announced
    EmitsNoSignal,
    /// Writes announce the name only, in the invalidated list
    EmitsInvalidation,
    /// Writes announce the new value
    #[default]
    EmitsChange,
    /// Value never changes; writable registration is rejected
    Const,
}

/// One property served from a live getter
pub struct Property {
    name: String,
    signature: String,
    getter: Getter,
    setter: Option<Setter>,
    update: PropertyUpdate,
    doc: Option<String>,
}

impl Property {
    pub fn read_only<T, G>(name: &str, get: G) -> Self
    where
        T: BusType + 'static,
        G: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            signature: T::signature().into_inner(),
            getter: Arc::new(move || get().to_value()),
            setter: None,
            update: PropertyUpdate::default(),
            doc: None,
        }
    }

    /// Writable property; the setter receives values already checked against `T`
    pub fn read_write<T, G, S>(name: &str, get: G, set: S) -> Self
    where
        T: BusType + 'static,
        G: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) -> Result<(), MethodError> + Send + Sync + 'static,
    {
        let mut property = Self::read_only(name, get);
        property.setter = Some(Arc::new(move |value: Value| {
            let value = T::from_value(value).map_err(|e| MethodError::invalid_args(e.to_string()))?;
            set(value)
        }));
        property
    }

    pub fn with_update(mut self, update: PropertyUpdate) -> Self {
        self.update = update;
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn update(&self) -> PropertyUpdate {
        self.update
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub(crate) fn get(&self) -> Value {
        (self.getter)()
    }

    pub(crate) fn set(&self, value: Value) -> Result<(), MethodError> {
        match &self.setter {
            Some(setter) => setter(value),
            None => Err(MethodError::new(
                error_names::PROPERTY_READ_ONLY,
                format!("Property {} is read-only", self.name),
            )),
        }
    }
}

/// Signal declaration: name and payload signature
#[derive(Debug, Clone)]
pub struct Signal {
    name: String,
    signature: String,
    arg_names: Vec<String>,
}

impl Signal {
    pub fn new<A: Arguments>(name: &str) -> Self {
        Self::raw(name, &A::signature())
    }

    pub fn raw(name: &str, signature: &str) -> Self {
        Self {
            name: name.to_string(),
            signature: signature.to_string(),
            arg_names: Vec::new(),
        }
    }

    pub fn with_names(mut self, names: &[&str]) -> Self {
        self.arg_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn arg_names(&self) -> &[String] {
        &self.arg_names
    }
}

/// Members registered in one `add_vtable` call
#[derive(Default)]
pub struct VTable {
    methods: Vec<Arc<Method>>,
    properties: Vec<Arc<Property>>,
    signals: Vec<Signal>,
}

impl VTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(Arc::new(method));
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(Arc::new(property));
        self
    }

    pub fn signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    pub fn properties(&self) -> &[Arc<Property>] {
        &self.properties
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.properties.is_empty() && self.signals.is_empty()
    }

    pub(crate) fn member_names(&self) -> impl Iterator<Item = &str> {
        self.methods
            .iter()
            .map(|m| m.name())
            .chain(self.properties.iter().map(|p| p.name()))
            .chain(self.signals.iter().map(|s| s.name()))
    }

    pub(crate) fn find_method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.iter().find(|m| m.name() == name).cloned()
    }

    pub(crate) fn find_property(&self, name: &str) -> Option<Arc<Property>> {
        self.properties.iter().find(|p| p.name() == name).cloned()
    }

    pub(crate) fn find_signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name() == name)
    }

    /// Reject tables the dispatcher could not serve consistently
    pub(crate) fn validate(&self, interface: &str) -> RpcResult<()> {
        let mut seen = HashSet::new();
        for name in self.member_names() {
            MemberName::new(name)?;
            if !seen.insert(name) {
                return Err(RpcError::registration(format!(
                    "{interface}.{name} is declared twice"
                )));
            }
        }
        for method in &self.methods {
            check_names(interface, method.name(), method.in_signature(), method.in_names())?;
            check_names(interface, method.name(), method.out_signature(), method.out_names())?;
        }
        for property in &self.properties {
            let signature = Signature::new(property.signature())?;
            if !signature.is_single_complete_type() {
                return Err(RpcError::registration(format!(
                    "property {interface}.{} must have one complete type, got '{signature}'",
                    property.name()
                )));
            }
            if property.update() == PropertyUpdate::Const && property.is_writable() {
                return Err(RpcError::registration(format!(
                    "const property {interface}.{} cannot be writable",
                    property.name()
                )));
            }
        }
        for signal in &self.signals {
            check_names(interface, signal.name(), signal.signature(), signal.arg_names())?;
        }
        Ok(())
    }
}

fn check_names(interface: &str, member: &str, signature: &str, names: &[String]) -> RpcResult<()> {
    let types = split_complete_types(signature)?;
    if !names.is_empty() && names.len() != types.len() {
        return Err(RpcError::registration(format!(
            "{interface}.{member}: {} names for signature '{signature}'",
            names.len()
        )));
    }
    Ok(())
}

/// Reply owed to one call served by an async method
pub(crate) struct DeferredReply {
    conn: Weak<ConnectionInner>,
    serial: u32,
    destination: Option<String>,
    member: String,
    wants_reply: bool,
    deadline: Instant,
    settled: AtomicBool,
}

impl DeferredReply {
    pub(crate) fn new(conn: &Arc<ConnectionInner>, call: &Message, wants_reply: bool) -> Arc<Self> {
        Arc::new(Self {
            conn: Arc::downgrade(conn),
            serial: call.serial(),
            destination: call.sender().map(|s| s.to_string()),
            member: call.member().map(|m| m.to_string()).unwrap_or_default(),
            wants_reply,
            deadline: Instant::now() + conn.config().async_reply_grace(),
            settled: AtomicBool::new(false),
        })
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Send the reply built by `build`, unless one was already sent
    fn settle<F>(&self, build: F) -> bool
    where
        F: FnOnce(u32, Option<&str>) -> CodecResult<Message>,
    {
        if self.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if !self.wants_reply {
            return true;
        }
        let Some(conn) = self.conn.upgrade() else {
            debug!(serial = self.serial, "Connection gone before async reply");
            return true;
        };
        match build(self.serial, self.destination.as_deref()) {
            Ok(reply) => {
                if let Err(e) = conn.send(reply) {
                    warn!(serial = self.serial, member = %self.member, error = %e, "Failed to send async reply");
                }
            }
            Err(e) => warn!(serial = self.serial, member = %self.member, error = %e, "Failed to build async reply"),
        }
        true
    }

    pub(crate) fn fail(&self, error: MethodError) -> bool {
        self.settle(|serial, destination| {
            Message::error(serial, destination, &error.name, &error.message)
        })
    }

    /// Grace period elapsed without an answer
    pub(crate) fn expire(&self) {
        if self.fail(MethodError::new(
            error_names::NO_REPLY,
            format!("{} did not reply within the grace period", self.member),
        )) {
            warn!(serial = self.serial, member = %self.member, "Async method never replied");
        }
    }
}

/// Answer to one call of an async method; send it at most once from any thread
///
/// Dropping it unanswered replies with `org.freedesktop.DBus.Error.Failed`.
pub struct AsyncReply<R> {
    deferred: Arc<DeferredReply>,
    _result: PhantomData<fn(R)>,
}

impl<R: Arguments> AsyncReply<R> {
    fn new(deferred: Arc<DeferredReply>) -> Self {
        Self {
            deferred,
            _result: PhantomData,
        }
    }

    pub fn reply(self, value: R) {
        self.send(Ok(value));
    }

    pub fn error(self, error: MethodError) {
        self.send(Err(error));
    }

    pub fn send(self, result: Result<R, MethodError>) {
        match result {
            Ok(value) => {
                self.deferred.settle(|serial, destination| {
                    let mut reply = Message::method_return(serial, destination)?;
                    match value.append_to(&mut reply) {
                        Ok(()) => Ok(reply),
                        Err(e) => Message::error(
                            serial,
                            destination,
                            error_names::FAILED,
                            &format!("cannot build reply: {e}"),
                        ),
                    }
                });
            }
            Err(error) => {
                self.deferred.fail(error);
            }
        }
    }

    /// Whether an answer (or the grace-period error) has already gone out
    pub fn is_settled(&self) -> bool {
        self.deferred.is_settled()
    }
}

impl<R> Drop for AsyncReply<R> {
    fn drop(&mut self) {
        if !self.deferred.is_settled() {
            self.deferred.fail(MethodError::failed(format!(
                "{} dropped its reply without answering",
                self.deferred.member
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_method_signatures() {
        let method = Method::new("Multiply", |(a, b): (i64, f64)| Ok((a as f64 * b,)))
            .with_names(&["a", "b"], &["result"]);
        assert_eq!(method.in_signature(), "xd");
        assert_eq!(method.out_signature(), "d");
        assert!(!method.is_async());
        VTable::new().method(method).validate("org.example.Calc").unwrap();
    }

    #[test]
    fn test_async_method_signatures() {
        let method = Method::new_async("Sleep", |(ms,): (u32,), reply: AsyncReply<(u32,)>| {
            reply.reply((ms,))
        });
        assert!(method.is_async());
        assert_eq!(method.in_signature(), "u");
        assert_eq!(method.out_signature(), "u");
    }

    #[test]
    fn test_const_writable_property_rejected() {
        let table = VTable::new().property(
            Property::read_write("Answer", || 42i32, |_: i32| Ok(())).with_update(PropertyUpdate::Const),
        );
        let err = table.validate("org.example.I").unwrap_err();
        assert!(matches!(err, RpcError::Registration(_)));

        let table = VTable::new()
            .property(Property::read_only("Answer", || 42i32).with_update(PropertyUpdate::Const));
        table.validate("org.example.I").unwrap();
    }

    #[test]
    fn test_duplicate_members_rejected() {
        let table = VTable::new()
            .method(Method::new("Do", |(): ()| Ok(())))
            .signal(Signal::raw("Do", ""));
        assert!(table.validate("org.example.I").is_err());
    }

    #[test]
    fn test_parameter_name_count_checked() {
        let table = VTable::new().method(
            Method::new("Add", |(a, b): (i32, i32)| Ok((a + b,))).with_names(&["a"], &["sum"]),
        );
        assert!(table.validate("org.example.I").is_err());
        let table = VTable::new().signal(Signal::new::<(String, u32)>("Changed").with_names(&["name", "count"]));
        table.validate("org.example.I").unwrap();
    }

    #[test]
    fn test_invalid_member_name_rejected() {
        let table = VTable::new().method(Method::raw("not-valid", "", "", |call| {
            call.create_reply().map_err(MethodError::from)
        }));
        assert!(table.validate("org.example.I").is_err());
    }

    #[test]
    fn test_read_write_property_checks_type() {
        let property = Property::read_write("Level", || 1u8, |_: u8| Ok(()));
        assert_eq!(property.signature(), "y");
        assert!(property.set(Value::Byte(3)).is_ok());
        let err = property.set(Value::Int32(3)).unwrap_err();
        assert_eq!(err.name, error_names::INVALID_ARGS);

        let read_only = Property::read_only("Level", || 1u8);
        assert_eq!(read_only.set(Value::Byte(1)).unwrap_err().name, error_names::PROPERTY_READ_ONLY);
    }
}
