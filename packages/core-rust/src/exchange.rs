//! Bus-side exchange model: one request/response unit of work.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::BridgeError;
use crate::key::OperationKey;

// ---------------------------------------------------------------------------
// Role / Status
// ---------------------------------------------------------------------------

/// Which side of the exchange this component plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The exchange was initiated here and sent to a provider.
    Consumer,
    /// The exchange was received here to be answered.
    Provider,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consumer => f.write_str("consumer"),
            Self::Provider => f.write_str("provider"),
        }
    }
}

/// Exchange status. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeStatus {
    Active,
    Done,
    Error,
}

// ---------------------------------------------------------------------------
// Mep
// ---------------------------------------------------------------------------

const WSDL_MEP_PREFIX: &str = "http://www.w3.org/2004/08/wsdl/";

/// Message exchange pattern: governs whether an answer is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mep {
    InOnly,
    RobustInOnly,
    InOut,
    InOptionalOut,
}

impl Mep {
    /// `true` when the provider answers with an out message.
    #[must_use]
    pub fn expects_out(self) -> bool {
        matches!(self, Self::InOut | Self::InOptionalOut)
    }

    /// `true` when the provider may answer with a fault.
    #[must_use]
    pub fn allows_fault(self) -> bool {
        !matches!(self, Self::InOnly)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InOnly => "in-only",
            Self::RobustInOnly => "robust-in-only",
            Self::InOut => "in-out",
            Self::InOptionalOut => "in-opt-out",
        }
    }
}

impl fmt::Display for Mep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mep {
    type Err = BridgeError;

    /// Accepts the WSDL 2004 URIs, their short suffixes, and the
    /// `InOnly`-style names used in descriptors.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix(WSDL_MEP_PREFIX).unwrap_or(name);
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "in-only" | "inonly" => Ok(Self::InOnly),
            "robust-in-only" | "robustinonly" => Ok(Self::RobustInOnly),
            "in-out" | "inout" => Ok(Self::InOut),
            "in-opt-out" | "in-optional-out" | "inoptionalout" => Ok(Self::InOptionalOut),
            _ => Err(BridgeError::UnknownMep(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Normalized message: opaque content plus string headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub content: Bytes,
    pub headers: BTreeMap<String, String>,
}

impl Message {
    #[must_use]
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// A request/response unit of work travelling on the service bus.
///
/// An exchange has exactly one owner at a time: it is moved along the
/// dispatch chain rather than shared.
#[derive(Debug, Clone)]
pub struct Exchange {
    id: String,
    key: OperationKey,
    interface: Option<String>,
    mep: Mep,
    role: Role,
    status: ExchangeStatus,
    input: Option<Message>,
    output: Option<Message>,
    fault: Option<Message>,
    properties: HashMap<String, serde_json::Value>,
    error: Option<Arc<BridgeError>>,
}

impl Exchange {
    /// Creates an active exchange with a freshly generated id.
    #[must_use]
    pub fn new(key: OperationKey, mep: Mep, role: Role) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), key, mep, role)
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>, key: OperationKey, mep: Mep, role: Role) -> Self {
        Self {
            id: id.into(),
            key,
            interface: None,
            mep,
            role,
            status: ExchangeStatus::Active,
            input: None,
            output: None,
            fault: None,
            properties: HashMap::new(),
            error: None,
        }
    }

    /// Correlation identifier of this exchange.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn set_interface(&mut self, interface: Option<String>) {
        self.interface = interface;
    }

    #[must_use]
    pub fn mep(&self) -> Mep {
        self.mep
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Flips the role, as happens when an answer travels back to its consumer.
    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    #[must_use]
    pub fn status(&self) -> ExchangeStatus {
        self.status
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ExchangeStatus::Active
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == ExchangeStatus::Done
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == ExchangeStatus::Error
    }

    #[must_use]
    pub fn input(&self) -> Option<&Message> {
        self.input.as_ref()
    }

    pub fn set_input(&mut self, message: Message) {
        self.input = Some(message);
    }

    #[must_use]
    pub fn output(&self) -> Option<&Message> {
        self.output.as_ref()
    }

    pub fn set_output(&mut self, message: Message) {
        self.output = Some(message);
    }

    #[must_use]
    pub fn fault(&self) -> Option<&Message> {
        self.fault.as_ref()
    }

    pub fn set_fault(&mut self, message: Message) {
        self.fault = Some(message);
    }

    #[must_use]
    pub fn properties(&self) -> &HashMap<String, serde_json::Value> {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut HashMap<String, serde_json::Value> {
        &mut self.properties
    }

    #[must_use]
    pub fn error(&self) -> Option<&Arc<BridgeError>> {
        self.error.as_ref()
    }

    /// Attaches an error and moves the exchange to the terminal `Error` status.
    pub fn set_error(&mut self, error: Arc<BridgeError>) {
        self.error = Some(error);
        self.status = ExchangeStatus::Error;
    }

    /// Moves the exchange to the terminal `Done` status.
    pub fn set_done(&mut self) {
        self.status = ExchangeStatus::Done;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> OperationKey {
        OperationKey::new("{ns}HelloService", "helloEndpoint", "{ns}sayHello")
    }

    #[test]
    fn parses_wsdl_uris_and_short_names() {
        assert_eq!(
            "http://www.w3.org/2004/08/wsdl/in-out".parse::<Mep>().unwrap(),
            Mep::InOut
        );
        assert_eq!("InOnly".parse::<Mep>().unwrap(), Mep::InOnly);
        assert_eq!("robust-in-only".parse::<Mep>().unwrap(), Mep::RobustInOnly);
        assert_eq!("IN_OPTIONAL_OUT".parse::<Mep>().unwrap(), Mep::InOptionalOut);
        assert_eq!(
            "http://www.w3.org/2004/08/wsdl/in-opt-out".parse::<Mep>().unwrap(),
            Mep::InOptionalOut
        );
    }

    #[test]
    fn unknown_mep_is_rejected() {
        let err = "out-only".parse::<Mep>().unwrap_err();
        assert_eq!(err, BridgeError::UnknownMep("out-only".to_string()));
    }

    #[test]
    fn mep_answer_shape() {
        assert!(Mep::InOut.expects_out());
        assert!(Mep::InOptionalOut.expects_out());
        assert!(!Mep::RobustInOnly.expects_out());
        assert!(Mep::RobustInOnly.allows_fault());
        assert!(!Mep::InOnly.allows_fault());
    }

    #[test]
    fn new_exchange_is_active_with_unique_id() {
        let a = Exchange::new(key(), Mep::InOut, Role::Consumer);
        let b = Exchange::new(key(), Mep::InOut, Role::Consumer);
        assert!(a.is_active());
        assert_ne!(a.id(), b.id());
        assert!(a.error().is_none());
    }

    #[test]
    fn set_error_is_terminal() {
        let mut exchange = Exchange::with_id("x-1", key(), Mep::InOut, Role::Provider);
        exchange.set_error(BridgeError::timeout());
        assert!(exchange.is_error());
        assert!(exchange.error().unwrap().is_timeout());
    }

    #[test]
    fn message_headers_accumulate() {
        let message = Message::new("<aaa/>")
            .with_header("a", "1")
            .with_header("b", "2");
        assert_eq!(message.headers.len(), 2);
        assert_eq!(message.content, Bytes::from_static(b"<aaa/>"));
    }
}
