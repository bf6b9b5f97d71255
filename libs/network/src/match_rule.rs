//! Match rules
//!
//! A match rule selects incoming messages by header fields. Every field that
//! is present must equal the message's field; absent fields match anything.
//!
//! Rules have a canonical text form understood by bus brokers:
//!
//! ```text
//! type='signal',sender=':1.4',path='/org/example/obj',interface='org.example.Iface',member='Changed'
//! ```

use crate::error::{Result, TransportError};
use bus_codec::{Message, MessageKind};
use bus_types::{BusName, InterfaceName, MemberName, ObjectPath};
use std::fmt;
use std::str::FromStr;

/// Filter over message type, sender, path, interface, member and first argument
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MatchRule {
    kind: Option<MessageKind>,
    sender: Option<BusName>,
    path: Option<ObjectPath>,
    path_namespace: Option<ObjectPath>,
    interface: Option<InterfaceName>,
    member: Option<MemberName>,
    arg0: Option<String>,
}

impl MatchRule {
    /// Rule matching every message
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule matching every signal
    pub fn signal() -> Self {
        Self {
            kind: Some(MessageKind::Signal),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_sender(mut self, sender: &str) -> Result<Self> {
        self.sender = Some(BusName::new(sender)?);
        Ok(self)
    }

    pub fn with_path(mut self, path: &str) -> Result<Self> {
        if self.path_namespace.is_some() {
            return Err(TransportError::invalid_match_rule(
                self.to_string(),
                "path and path_namespace are mutually exclusive",
            ));
        }
        self.path = Some(ObjectPath::new(path)?);
        Ok(self)
    }

    /// Match the path and every path below it
    pub fn with_path_namespace(mut self, namespace: &str) -> Result<Self> {
        if self.path.is_some() {
            return Err(TransportError::invalid_match_rule(
                self.to_string(),
                "path and path_namespace are mutually exclusive",
            ));
        }
        self.path_namespace = Some(ObjectPath::new(namespace)?);
        Ok(self)
    }

    pub fn with_interface(mut self, interface: &str) -> Result<Self> {
        self.interface = Some(InterfaceName::new(interface)?);
        Ok(self)
    }

    pub fn with_member(mut self, member: &str) -> Result<Self> {
        self.member = Some(MemberName::new(member)?);
        Ok(self)
    }

    /// Match only messages whose first argument is this string
    pub fn with_arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.kind
    }

    pub fn sender(&self) -> Option<&BusName> {
        self.sender.as_ref()
    }

    pub fn path(&self) -> Option<&ObjectPath> {
        self.path.as_ref()
    }

    pub fn path_namespace(&self) -> Option<&ObjectPath> {
        self.path_namespace.as_ref()
    }

    pub fn interface(&self) -> Option<&InterfaceName> {
        self.interface.as_ref()
    }

    pub fn member(&self) -> Option<&MemberName> {
        self.member.as_ref()
    }

    pub fn arg0(&self) -> Option<&str> {
        self.arg0.as_deref()
    }

    /// Exact-field match; a well-known sender only matches itself
    pub fn matches(&self, msg: &Message) -> bool {
        self.matches_with(msg, |_| None)
    }

    /// Match, resolving a well-known sender filter to its current owner
    ///
    /// Messages always carry the unique name of their sender, so a rule
    /// naming a well-known service compares against `resolve(name)`.
    pub fn matches_with<F>(&self, msg: &Message, resolve: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = self.kind {
            if msg.kind() != kind {
                return false;
            }
        }
        if let Some(sender) = &self.sender {
            let Some(actual) = msg.sender() else {
                return false;
            };
            if sender != actual {
                let owner = (!sender.is_unique())
                    .then(|| resolve(sender.as_str()))
                    .flatten();
                if owner.as_deref() != Some(actual.as_str()) {
                    return false;
                }
            }
        }
        if let Some(path) = &self.path {
            if msg.path() != Some(path) {
                return false;
            }
        }
        if let Some(namespace) = &self.path_namespace {
            match msg.path() {
                Some(p) if p == namespace || p.is_descendant_of(namespace) => {}
                _ => return false,
            }
        }
        if let Some(interface) = &self.interface {
            if msg.interface() != Some(interface) {
                return false;
            }
        }
        if let Some(member) = &self.member {
            if msg.member() != Some(member) {
                return false;
            }
        }
        if let Some(arg0) = &self.arg0 {
            if !msg.signature().starts_with('s') {
                return false;
            }
            let first = msg.values().ok().and_then(|values| {
                values
                    .into_iter()
                    .next()
                    .and_then(|v| v.as_str().map(str::to_string))
            });
            if first.as_deref() != Some(arg0.as_str()) {
                return false;
            }
        }
        true
    }
}

fn kind_text(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::MethodCall => "method_call",
        MessageKind::MethodReturn => "method_return",
        MessageKind::Error => "error",
        MessageKind::Signal => "signal",
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("type", self.kind.map(kind_text)),
            ("sender", self.sender.as_deref()),
            ("path", self.path.as_deref()),
            ("path_namespace", self.path_namespace.as_deref()),
            ("interface", self.interface.as_deref()),
            ("member", self.member.as_deref()),
            ("arg0", self.arg0.as_deref()),
        ];
        let mut first = true;
        for (key, value) in fields {
            if let Some(value) = value {
                if !first {
                    f.write_str(",")?;
                }
                write!(f, "{key}='{value}'")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Split `key=value` pairs on commas outside single quotes
fn split_pairs(text: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = text.chars().peekable();
    while chars.peek().is_some() {
        let key: String = chars.by_ref().take_while(|&c| c != '=').collect();
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(TransportError::invalid_match_rule(text, "empty key"));
        }
        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '\'' {
                    closed = true;
                    break;
                }
                value.push(c);
            }
            if !closed {
                return Err(TransportError::invalid_match_rule(
                    text,
                    format!("unterminated quote in value of '{key}'"),
                ));
            }
            match chars.next() {
                None | Some(',') => {}
                Some(other) => {
                    return Err(TransportError::invalid_match_rule(
                        text,
                        format!("unexpected '{other}' after value of '{key}'"),
                    ))
                }
            }
        } else {
            value = chars.by_ref().take_while(|&c| c != ',').collect();
        }
        pairs.push((key, value));
    }
    Ok(pairs)
}

impl FromStr for MatchRule {
    type Err = TransportError;

    fn from_str(text: &str) -> Result<Self> {
        let mut rule = MatchRule::new();
        let mut seen = Vec::new();
        for (key, value) in split_pairs(text)? {
            if seen.contains(&key) {
                return Err(TransportError::invalid_match_rule(
                    text,
                    format!("duplicate key '{key}'"),
                ));
            }
            rule = match key.as_str() {
                "type" => rule.with_kind(match value.as_str() {
                    "method_call" => MessageKind::MethodCall,
                    "method_return" => MessageKind::MethodReturn,
                    "error" => MessageKind::Error,
                    "signal" => MessageKind::Signal,
                    other => {
                        return Err(TransportError::invalid_match_rule(
                            text,
                            format!("unknown message type '{other}'"),
                        ))
                    }
                }),
                "sender" => rule.with_sender(&value)?,
                "path" => rule.with_path(&value)?,
                "path_namespace" => rule.with_path_namespace(&value)?,
                "interface" => rule.with_interface(&value)?,
                "member" => rule.with_member(&value)?,
                "arg0" => rule.with_arg0(value),
                other => {
                    return Err(TransportError::invalid_match_rule(
                        text,
                        format!("unsupported key '{other}'"),
                    ))
                }
            };
            seen.push(key);
        }
        Ok(rule)
    }
}
