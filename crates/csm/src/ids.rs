//! Branded identifiers.
//!
//! Each id wraps a `String` but is its own type, so a `StateId` can never be
//! passed where a `FlowId` is expected. Serialized transparently as a string.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Identifies a compiled agent.
    AgentId
);
branded_id!(
    /// Identifies the machine owned by an agent.
    MachineId
);
branded_id!(
    /// Identifies a flow within a machine.
    FlowId
);
branded_id!(
    /// Identifies a state within a flow.
    StateId
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = StateId::new("Welcome");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("Welcome"));
        let back: StateId = serde_json::from_value(serde_json::json!("Welcome")).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_support_str_lookup_in_maps() {
        let mut map = BTreeMap::new();
        map.insert(FlowId::new("Main"), 1);
        assert_eq!(map.get("Main"), Some(&1));
    }
}
