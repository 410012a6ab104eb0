//! Serialization boundary between session variables and stored bytes.
//!
//! The store moves [`SessionPayload`] bytes without looking inside them.
//! [`SessionItems`] is one concrete encoding callers may use to produce
//! those bytes; anything else that fits in a byte vector works equally well.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::errors::SessionStateError;

/// Opaque serialized session variable set plus its denormalized count.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionPayload {
    bytes: Vec<u8>,
    item_count: u32,
}

impl SessionPayload {
    pub fn new(bytes: Vec<u8>, item_count: u32) -> Self {
        Self { bytes, item_count }
    }

    /// A payload holding no variables.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Encodes a variable collection as JSON bytes.
    pub fn from_items(items: &SessionItems) -> Result<Self, SessionStateError> {
        let bytes = serde_json::to_vec(&items.values)
            .map_err(|e| SessionStateError::payload(e.to_string()))?;
        Ok(Self::new(bytes, items.len() as u32))
    }

    /// Decodes bytes previously produced by [`SessionPayload::from_items`].
    ///
    /// An empty byte sequence decodes to an empty collection.
    pub fn decode_items(&self) -> Result<SessionItems, SessionStateError> {
        if self.bytes.is_empty() {
            return Ok(SessionItems::new());
        }
        let values: BTreeMap<String, Value> = serde_json::from_slice(&self.bytes)
            .map_err(|e| SessionStateError::payload(e.to_string()))?;
        Ok(SessionItems { values })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Named session variables, kept sorted by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionItems {
    values: BTreeMap<String, Value>,
}

impl SessionItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a variable, replacing any previous value under the same name.
    pub fn set<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<(), SessionStateError> {
        let value =
            serde_json::to_value(value).map_err(|e| SessionStateError::payload(e.to_string()))?;
        self.values.insert(name.into(), value);
        Ok(())
    }

    /// Reads a variable back into a typed value.
    ///
    /// Returns `Ok(None)` when the variable is not present.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, SessionStateError> {
        self.values
            .get(name)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| SessionStateError::payload(format!("{}: {}", name, e)))
            })
            .transpose()
    }

    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Session contents handed to and from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStateData {
    pub payload: SessionPayload,
    pub timeout_minutes: u32,
}

impl SessionStateData {
    pub fn new(payload: SessionPayload, timeout_minutes: u32) -> Self {
        Self {
            payload,
            timeout_minutes,
        }
    }

    /// A fresh session with no variables.
    pub fn new_empty(timeout_minutes: u32) -> Self {
        Self::new(SessionPayload::empty(), timeout_minutes)
    }

    /// Decodes the payload as [`SessionItems`].
    pub fn items(&self) -> Result<SessionItems, SessionStateError> {
        self.payload.decode_items()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_decodes_to_empty_items() {
        let items = SessionPayload::empty().decode_items().unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn items_survive_encoding() {
        let mut items = SessionItems::new();
        items.set("cart_total", &42_u32).unwrap();
        items.set("user", &"alice").unwrap();

        let payload = SessionPayload::from_items(&items).unwrap();
        assert_eq!(payload.item_count(), 2);

        let decoded = payload.decode_items().unwrap();
        assert_eq!(decoded.get::<u32>("cart_total").unwrap(), Some(42));
        assert_eq!(decoded.get::<String>("user").unwrap(), Some("alice".to_string()));
    }

    #[test]
    fn missing_item_is_none() {
        let items = SessionItems::new();
        assert_eq!(items.get::<u32>("absent").unwrap(), None);
    }

    #[test]
    fn mistyped_item_is_payload_error() {
        let mut items = SessionItems::new();
        items.set("count", &"not a number").unwrap();

        assert!(matches!(
            items.get::<u32>("count"),
            Err(SessionStateError::Payload(_))
        ));
    }

    #[test]
    fn set_replaces_existing_value() {
        let mut items = SessionItems::new();
        items.set("step", &1).unwrap();
        items.set("step", &2).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items.get::<i32>("step").unwrap(), Some(2));
    }

    #[test]
    fn names_are_sorted() {
        let mut items = SessionItems::new();
        items.set("zeta", &1).unwrap();
        items.set("alpha", &2).unwrap();

        assert_eq!(items.names().collect::<Vec<_>>(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let payload = SessionPayload::new(vec![0xff, 0x00, 0x13], 1);
        assert!(payload.decode_items().is_err());
    }

    #[test]
    fn new_empty_data_has_no_items() {
        let data = SessionStateData::new_empty(20);
        assert_eq!(data.timeout_minutes, 20);
        assert!(data.items().unwrap().is_empty());
    }
}
