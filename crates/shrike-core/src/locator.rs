use std::fmt;

use crate::error::Error;
use crate::value::Affinity;

/// Identifies a target component on the server.
///
/// `app_name` and `distinct_name` may be empty on the wire; `module_name`
/// and `bean_name` must not be.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub app_name: String,
    pub module_name: String,
    pub bean_name: String,
    pub distinct_name: String,
}

impl Locator {
    pub fn new(module_name: impl Into<String>, bean_name: impl Into<String>) -> Self {
        Locator {
            app_name: String::new(),
            module_name: module_name.into(),
            bean_name: bean_name.into(),
            distinct_name: String::new(),
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_distinct_name(mut self, distinct_name: impl Into<String>) -> Self {
        self.distinct_name = distinct_name.into();
        self
    }

    /// Check the non-empty-name invariant before anything hits the wire.
    pub fn validate(&self) -> Result<(), Error> {
        if self.module_name.is_empty() {
            return Err(Error::protocol("locator module name must not be empty"));
        }
        if self.bean_name.is_empty() {
            return Err(Error::protocol("locator bean name must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.app_name, self.module_name, self.bean_name
        )?;
        if !self.distinct_name.is_empty() {
            write!(f, "/{}", self.distinct_name)?;
        }
        Ok(())
    }
}

/// Identifies the invoked method.
///
/// On v3+ streams this travels as a single composite object; on older
/// streams it is flattened into the method name plus a signature string
/// (parameter type names joined by commas, no whitespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodLocator {
    pub method_name: String,
    pub param_types: Vec<String>,
}

impl MethodLocator {
    pub fn new(method_name: impl Into<String>, param_types: Vec<String>) -> Self {
        MethodLocator {
            method_name: method_name.into(),
            param_types,
        }
    }

    /// The legacy signature string.
    pub fn signature(&self) -> String {
        self.param_types.join(",")
    }
}

impl fmt::Display for MethodLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.method_name, self.signature())
    }
}

/// A stateless locator bound to a server-created session.
#[derive(Debug, Clone, PartialEq)]
pub struct StatefulLocator {
    pub stateless: Locator,
    pub session_id: Vec<u8>,
    pub affinity: Affinity,
}
