//! Registered-handler table for rebuilding relocated objects
//!
//! Code cannot travel with a frame, so every node that may host a type
//! registers it here under its stable type name. Reconstruction is a table
//! lookup followed by binding the shipped attributes straight onto a new
//! instance (its normal constructor is never run).

use crate::frame::ObjectFrame;
use crate::object::{ActiveObject, ActiveType, BehaviorDefinition};
use axo_types::{AxoError, AxoResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

type Constructor = fn(Map<String, Value>) -> AxoResult<Box<dyn ActiveObject>>;

fn construct<T: ActiveType>(attributes: Map<String, Value>) -> AxoResult<Box<dyn ActiveObject>> {
    serde_json::from_value::<T>(Value::Object(attributes))
        .map(|object| Box::new(object) as Box<dyn ActiveObject>)
        .map_err(|err| {
            AxoError::internal(format!(
                "cannot bind attributes onto {}: {}",
                T::TYPE_NAME,
                err
            ))
        })
}

/// Type name to constructor table.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    constructors: HashMap<String, Constructor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type so frames naming it can be rebuilt.
    pub fn register<T: ActiveType>(&mut self) -> AxoResult<()> {
        if self.constructors.contains_key(T::TYPE_NAME) {
            return Err(AxoError::already_exists(format!(
                "type '{}' is already registered",
                T::TYPE_NAME
            )));
        }
        self.constructors
            .insert(T::TYPE_NAME.to_string(), construct::<T>);
        debug!(type_name = T::TYPE_NAME, "registered active type");
        Ok(())
    }

    /// Builder form of [`TypeRegistry::register`].
    pub fn with<T: ActiveType>(mut self) -> AxoResult<Self> {
        self.register::<T>()?;
        Ok(self)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Rebuilds an object from an already split frame.
    pub fn reconstruct(&self, frame: &ObjectFrame) -> AxoResult<Box<dyn ActiveObject>> {
        let behavior = BehaviorDefinition::parse(&frame.behavior)?;
        let constructor = self.constructors.get(&behavior.type_name).ok_or_else(|| {
            AxoError::not_found(format!(
                "no registered type named '{}'",
                behavior.type_name
            ))
        })?;

        let attributes = match serde_json::from_slice::<Value>(&frame.attributes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(AxoError::validation(
                    "attribute segment is not a JSON object",
                ))
            }
            Err(err) => {
                return Err(AxoError::validation(format!(
                    "attribute segment is not valid JSON: {}",
                    err
                )))
            }
        };

        let object = constructor(attributes)?;
        debug!(type_name = %behavior.type_name, "reconstructed active object");
        Ok(object)
    }

    /// Inverse of [`crate::to_bytes`].
    pub fn from_bytes(&self, bytes: &[u8]) -> AxoResult<Box<dyn ActiveObject>> {
        self.reconstruct(&ObjectFrame::decode(bytes)?)
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_segments;
    use crate::object::tests::Counter;
    use crate::object::{to_bytes, Kwargs};
    use axo_types::ErrorKind;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        TypeRegistry::new().with::<Counter>().unwrap()
    }

    #[test]
    fn test_round_trip_preserves_behavior() {
        let mut original = Counter {
            count: 10,
            label: "hits".to_string(),
        };
        let bytes = to_bytes(&original).unwrap();
        let mut restored = registry().from_bytes(&bytes).unwrap();

        assert_eq!(restored.type_name(), "Counter");
        assert_eq!(restored.attributes().unwrap(), original.attributes().unwrap());
        for by in [1, 5, -3] {
            let expected = original
                .call("increment", &[json!(by)], &Kwargs::new())
                .unwrap();
            let actual = restored
                .call("increment", &[json!(by)], &Kwargs::new())
                .unwrap();
            assert_eq!(actual, expected);
        }
        assert_eq!(
            restored.call("describe", &[], &Kwargs::new()).unwrap(),
            original.call("describe", &[], &Kwargs::new()).unwrap()
        );
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry.register::<Counter>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_malformed_framing_rejected() {
        let err = registry().from_bytes(&[0, 0, 0, 9, 1]).err().unwrap();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn test_invalid_behavior_rejected() {
        let bytes = encode_segments(&[b"{}".as_slice(), b"class Counter:"]).unwrap();
        let err = registry().from_bytes(&bytes).err().unwrap();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn test_unregistered_type_not_found() {
        let bytes = encode_segments(&[
            b"{}".as_slice(),
            br#"{"type_name":"Heatmap"}"#.as_slice(),
        ])
        .unwrap();
        let err = registry().from_bytes(&bytes).err().unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_missing_attributes_internal_error() {
        let bytes = encode_segments(&[
            b"{}".as_slice(),
            br#"{"type_name":"Counter"}"#.as_slice(),
        ])
        .unwrap();
        let err = registry().from_bytes(&bytes).err().unwrap();
        assert_eq!(err.kind, ErrorKind::InternalError);
    }

    #[test]
    fn test_non_object_attributes_rejected() {
        let bytes = encode_segments(&[
            b"[1,2]".as_slice(),
            br#"{"type_name":"Counter"}"#.as_slice(),
        ])
        .unwrap();
        let err = registry().from_bytes(&bytes).err().unwrap();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }
}
