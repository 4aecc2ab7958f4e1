use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the (service, endpoint, operation) triple a route answers for.
///
/// Keys are compared by value and used as map keys by the route registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationKey {
    pub service: String,
    pub endpoint: String,
    pub operation: String,
}

impl OperationKey {
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.service, self.endpoint, self.operation)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn equal_triples_are_the_same_key() {
        let mut keys = HashSet::new();
        keys.insert(OperationKey::new("{ns}Hello", "ep", "sayHello"));
        keys.insert(OperationKey::new("{ns}Hello", "ep", "sayHello"));
        keys.insert(OperationKey::new("{ns}Hello", "ep", "sayBye"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn display_names_all_three_parts() {
        let key = OperationKey::new("{ns}Hello", "helloEndpoint", "sayHello");
        assert_eq!(key.to_string(), "{ns}Hello/helloEndpoint#sayHello");
    }
}
