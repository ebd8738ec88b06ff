//! Name bindings held by the directory service
//!
//! Every running player publishes exactly one name (its root name plus a
//! zero-padded id) bound to the socket address of its RPC listener. Joining
//! players list the bindings under a prefix to discover who is already in
//! the game and to pick their own id.

use log::info;
use std::collections::BTreeMap;
use thiserror::Error;

/// Reasons a binding request is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// The name is already bound to another endpoint
    #[error("name {name} already bound to {addr}")]
    AlreadyBound { name: String, addr: String },
    /// Empty names cannot be looked up by prefix and are refused
    #[error("empty name")]
    EmptyName,
}

/// Ordered table of published names
///
/// Ordering matters: lookups return names sorted, which keeps discovery
/// output stable across calls.
#[derive(Debug, Default)]
pub struct NameTable {
    bindings: BTreeMap<String, String>,
}

impl NameTable {
    pub fn new() -> Self {
        Self {
            bindings: BTreeMap::new(),
        }
    }

    /// Binds a name to an address
    ///
    /// Re-publishing the same name with the same address is accepted so a
    /// retried request stays harmless. Binding a taken name to a different
    /// address is refused; this is how two players racing for the same id
    /// find out.
    pub fn publish(&mut self, name: &str, addr: &str) -> Result<(), NameError> {
        if name.is_empty() {
            return Err(NameError::EmptyName);
        }
        if let Some(existing) = self.bindings.get(name) {
            if existing == addr {
                return Ok(());
            }
            return Err(NameError::AlreadyBound {
                name: name.to_string(),
                addr: existing.clone(),
            });
        }

        info!("Published {} at {}", name, addr);
        self.bindings.insert(name.to_string(), addr.to_string());
        Ok(())
    }

    /// Removes a binding. Returns true if the name was bound.
    pub fn unpublish(&mut self, name: &str) -> bool {
        if self.bindings.remove(name).is_some() {
            info!("Unpublished {}", name);
            true
        } else {
            false
        }
    }

    /// Returns every bound name starting with the prefix, in sorted order
    pub fn lookup(&self, prefix: &str) -> Vec<String> {
        self.bindings
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn resolve(&self, name: &str) -> Option<String> {
        self.bindings.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_publish_and_resolve() {
        let mut table = NameTable::new();
        table.publish("volley/player0001", "127.0.0.1:4000").unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.resolve("volley/player0001"),
            Some("127.0.0.1:4000".to_string())
        );
        assert_eq!(table.resolve("volley/player0002"), None);
    }

    #[test]
    fn test_publish_same_binding_twice() {
        let mut table = NameTable::new();
        assert_ok!(table.publish("volley/player0001", "127.0.0.1:4000"));
        assert_ok!(table.publish("volley/player0001", "127.0.0.1:4000"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_publish_conflict() {
        let mut table = NameTable::new();
        table.publish("volley/player0001", "127.0.0.1:4000").unwrap();

        let result = table.publish("volley/player0001", "127.0.0.1:5000");
        assert_eq!(
            result,
            Err(NameError::AlreadyBound {
                name: "volley/player0001".to_string(),
                addr: "127.0.0.1:4000".to_string(),
            })
        );
        assert_eq!(
            table.resolve("volley/player0001"),
            Some("127.0.0.1:4000".to_string())
        );
    }

    #[test]
    fn test_publish_empty_name() {
        let mut table = NameTable::new();
        assert_eq!(table.publish("", "127.0.0.1:4000"), Err(NameError::EmptyName));
        assert!(table.is_empty());
    }

    #[test]
    fn test_name_error_messages() {
        let conflict = NameError::AlreadyBound {
            name: "volley/player0001".to_string(),
            addr: "127.0.0.1:4000".to_string(),
        };
        assert_eq!(
            conflict.to_string(),
            "name volley/player0001 already bound to 127.0.0.1:4000"
        );
        assert_eq!(NameError::EmptyName.to_string(), "empty name");

        let boxed: Box<dyn std::error::Error> = Box::new(NameError::EmptyName);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_unpublish() {
        let mut table = NameTable::new();
        table.publish("volley/player0001", "127.0.0.1:4000").unwrap();

        assert!(table.unpublish("volley/player0001"));
        assert!(!table.unpublish("volley/player0001"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_by_prefix() {
        let mut table = NameTable::new();
        table.publish("volley/player0003", "127.0.0.1:4003").unwrap();
        table.publish("croupier/player0001", "127.0.0.1:5001").unwrap();
        table.publish("volley/player0001", "127.0.0.1:4001").unwrap();
        table.publish("volley/playerz", "127.0.0.1:4009").unwrap();
        table.publish("volleyball", "127.0.0.1:4010").unwrap();

        let names = table.lookup("volley/player");
        assert_eq!(
            names,
            vec![
                "volley/player0001".to_string(),
                "volley/player0003".to_string(),
                "volley/playerz".to_string(),
            ]
        );
    }

    #[test]
    fn test_lookup_empty_prefix_lists_everything() {
        let mut table = NameTable::new();
        table.publish("b", "1").unwrap();
        table.publish("a", "2").unwrap();
        assert_eq!(table.lookup(""), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_lookup_no_match() {
        let mut table = NameTable::new();
        table.publish("volley/player0001", "127.0.0.1:4001").unwrap();
        assert!(table.lookup("croupier/").is_empty());
    }
}
