use std::fmt;

use crate::locator::{Locator, MethodLocator};

/// A node in the object graph carried by the codec.
///
/// Invocation parameters, results, attachments, and the protocol composites
/// (locators, affinities, throwables) all travel as `Value` graphs.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Sequence(Vec<Value>),
    /// Order-preserving key/value pairs.
    Map(Vec<(Value, Value)>),
    Locator(Locator),
    MethodLocator(MethodLocator),
    Affinity(Affinity),
    Throwable(Box<RemoteThrowable>),
}

impl Value {
    /// Short kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Sequence(_) => "sequence",
            Value::Map(_) => "map",
            Value::Locator(_) => "locator",
            Value::MethodLocator(_) => "method-locator",
            Value::Affinity(_) => "affinity",
            Value::Throwable(_) => "throwable",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

/// Routing hint returned by the server, sometimes piggybacked as a response
/// attachment under the weak-affinity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affinity {
    /// No affinity.
    None,
    /// Pin to a named cluster node.
    Node(String),
    /// Prefer any member of a named cluster.
    Cluster(String),
    /// Pin to an explicit connection URI.
    Uri(String),
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Affinity::None => write!(f, "none"),
            Affinity::Node(name) => write!(f, "node \"{}\"", name),
            Affinity::Cluster(name) => write!(f, "cluster \"{}\"", name),
            Affinity::Uri(uri) => write!(f, "uri \"{}\"", uri),
        }
    }
}

/// An exception decoded from an application-exception response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteThrowable {
    /// Fully qualified class name on the server side.
    pub class_name: String,
    pub message: Option<String>,
    pub cause: Option<Box<RemoteThrowable>>,
}

impl RemoteThrowable {
    pub fn new(class_name: impl Into<String>, message: Option<String>) -> Self {
        RemoteThrowable {
            class_name: class_name.into(),
            message,
            cause: None,
        }
    }
}

impl fmt::Display for RemoteThrowable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.class_name, msg)?,
            None => write!(f, "{}", self.class_name)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {})", cause)?;
        }
        Ok(())
    }
}
