//! Service-endpoint-operation declarations of a deployment unit.
//!
//! A unit *provides* operations (inbound exchanges are routed to it) and
//! *consumes* operations of other services (routes call out to them). Both
//! share one record; what each can do differs per variant.

use switchyard_core::{BridgeError, EndpointRef, Exchange, Mep, OperationKey, Role, Transport};

/// Fields common to provided and consumed operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub interface: Option<String>,
    pub service: String,
    pub endpoint: Option<String>,
    pub operation: Option<String>,
    pub mep: Option<Mep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEndpointOperation {
    /// An operation of another service that routes of this unit call.
    Consumes(OperationRecord),
    /// An operation this unit answers.
    Provides(OperationRecord),
}

/// What a declared operation can do on the bus.
pub trait EndpointChannel {
    /// Creates a new outbound exchange addressed to this operation.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` when the declaration cannot
    /// initiate exchanges or is missing the operation or MEP.
    fn new_exchange(&self) -> Result<Exchange, BridgeError>;

    /// Looks up the declared endpoint on the bus.
    fn resolve_endpoint(&self, transport: &dyn Transport) -> Option<EndpointRef>;
}

impl ServiceEndpointOperation {
    #[must_use]
    pub fn provides(
        interface: Option<String>,
        service: impl Into<String>,
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        mep: Mep,
    ) -> Self {
        Self::Provides(OperationRecord {
            interface,
            service: service.into(),
            endpoint: Some(endpoint.into()),
            operation: Some(operation.into()),
            mep: Some(mep),
        })
    }

    #[must_use]
    pub fn consumes(record: OperationRecord) -> Self {
        Self::Consumes(record)
    }

    #[must_use]
    pub fn record(&self) -> &OperationRecord {
        match self {
            Self::Consumes(record) | Self::Provides(record) => record,
        }
    }

    /// The full key, when endpoint and operation are both declared.
    #[must_use]
    pub fn key(&self) -> Option<OperationKey> {
        let record = self.record();
        match (&record.endpoint, &record.operation) {
            (Some(endpoint), Some(operation)) => Some(OperationKey::new(
                record.service.clone(),
                endpoint.clone(),
                operation.clone(),
            )),
            _ => None,
        }
    }
}

impl EndpointChannel for ServiceEndpointOperation {
    fn new_exchange(&self) -> Result<Exchange, BridgeError> {
        match self {
            Self::Provides(record) => Err(BridgeError::Configuration(format!(
                "provided service {} cannot initiate exchanges",
                record.service
            ))),
            Self::Consumes(record) => {
                let operation = record.operation.clone().ok_or_else(|| {
                    BridgeError::Configuration(format!(
                        "no operation declared to consume service {}",
                        record.service
                    ))
                })?;
                let mep = record.mep.ok_or_else(|| {
                    BridgeError::Configuration(format!(
                        "no MEP declared for operation {operation} of service {}",
                        record.service
                    ))
                })?;
                // An empty endpoint lets the bus pick one.
                let key = OperationKey::new(
                    record.service.clone(),
                    record.endpoint.clone().unwrap_or_default(),
                    operation,
                );
                let mut exchange = Exchange::new(key, mep, Role::Consumer);
                exchange.set_interface(record.interface.clone());
                Ok(exchange)
            }
        }
    }

    fn resolve_endpoint(&self, transport: &dyn Transport) -> Option<EndpointRef> {
        let record = self.record();
        let endpoint = record.endpoint.as_deref()?;
        transport.resolve_endpoint(&record.service, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumes(operation: Option<&str>, mep: Option<Mep>) -> ServiceEndpointOperation {
        ServiceEndpointOperation::consumes(OperationRecord {
            interface: Some("{ns}HelloInterface".to_string()),
            service: "{ns}HelloService".to_string(),
            endpoint: Some("externalHelloEndpoint".to_string()),
            operation: operation.map(str::to_string),
            mep,
        })
    }

    #[test]
    fn consumes_creates_consumer_exchange() {
        let exchange = consumes(Some("{ns}sayHello"), Some(Mep::InOut))
            .new_exchange()
            .unwrap();
        assert_eq!(exchange.role(), Role::Consumer);
        assert_eq!(exchange.mep(), Mep::InOut);
        assert_eq!(exchange.key().operation, "{ns}sayHello");
        assert_eq!(exchange.key().endpoint, "externalHelloEndpoint");
        assert_eq!(exchange.interface(), Some("{ns}HelloInterface"));
        assert!(exchange.is_active());
    }

    #[test]
    fn consumes_without_mep_is_a_configuration_error() {
        let err = consumes(Some("{ns}sayHello"), None).new_exchange().unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn consumes_without_operation_is_a_configuration_error() {
        let err = consumes(None, Some(Mep::InOut)).new_exchange().unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn provides_cannot_initiate() {
        let provides =
            ServiceEndpointOperation::provides(None, "svc", "ep", "op", Mep::InOnly);
        assert!(matches!(
            provides.new_exchange(),
            Err(BridgeError::Configuration(_))
        ));
        assert_eq!(provides.key(), Some(OperationKey::new("svc", "ep", "op")));
    }

    #[test]
    fn key_requires_endpoint_and_operation() {
        assert!(consumes(None, Some(Mep::InOut)).key().is_none());
        assert!(consumes(Some("op"), None).key().is_some());
    }
}
