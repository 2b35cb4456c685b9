//! Active object behavior and state capture.

use crate::frame::ObjectFrame;
use axo_types::{AxoError, AxoResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Keyword arguments of a method call.
pub type Kwargs = Map<String, Value>;

/// Signature of a method handler in a [`MethodTable`].
pub type MethodFn<T> = fn(&mut T, &[Value], &Kwargs) -> AxoResult<Value>;

/// An instance whose state and behavior can be relocated and invoked at a
/// remote execution point.
pub trait ActiveObject: Send + 'static {
    /// Stable identifier of the behavior, registered at every hosting node.
    fn type_name(&self) -> &str;

    /// Logical module the type belongs to.
    fn module(&self) -> &str {
        ""
    }

    /// Current attribute map.
    fn attributes(&self) -> AxoResult<Map<String, Value>>;

    /// Names of the methods that [`ActiveObject::call`] dispatches.
    fn method_names(&self) -> Vec<String>;

    /// Invokes a named method.
    fn call(&mut self, method: &str, args: &[Value], kwargs: &Kwargs) -> AxoResult<Value>;
}

/// A serde-backed active object type.
///
/// Every `ActiveType` is an [`ActiveObject`]: its attributes are its serde
/// fields and its methods come from [`ActiveType::method_table`].
pub trait ActiveType: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_NAME: &'static str;
    const MODULE: &'static str = "";

    fn method_table() -> MethodTable<Self>;
}

impl<T: ActiveType> ActiveObject for T {
    fn type_name(&self) -> &str {
        T::TYPE_NAME
    }

    fn module(&self) -> &str {
        T::MODULE
    }

    fn attributes(&self) -> AxoResult<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(AxoError::validation(format!(
                "{} serializes to {} instead of an attribute map",
                T::TYPE_NAME,
                json_kind(&other)
            ))),
            Err(err) => Err(AxoError::internal(format!(
                "cannot capture attributes of {}: {}",
                T::TYPE_NAME,
                err
            ))),
        }
    }

    fn method_names(&self) -> Vec<String> {
        T::method_table().names()
    }

    fn call(&mut self, method: &str, args: &[Value], kwargs: &Kwargs) -> AxoResult<Value> {
        T::method_table().invoke(self, method, args, kwargs)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Name to handler map for one active object type.
pub struct MethodTable<T> {
    methods: BTreeMap<&'static str, MethodFn<T>>,
}

impl<T> MethodTable<T> {
    pub fn new() -> Self {
        Self {
            methods: BTreeMap::new(),
        }
    }

    /// Adds a method handler.
    pub fn with(mut self, name: &'static str, handler: MethodFn<T>) -> Self {
        self.methods.insert(name, handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Method names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.methods.keys().map(|name| name.to_string()).collect()
    }

    pub fn invoke(
        &self,
        target: &mut T,
        method: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> AxoResult<Value> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| AxoError::not_found(format!("method '{}' is not defined", method)))?;
        handler(target, args, kwargs)
    }
}

impl<T> Default for MethodTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserializes a positional argument.
pub fn arg<A: DeserializeOwned>(args: &[Value], index: usize) -> AxoResult<A> {
    let value = args
        .get(index)
        .ok_or_else(|| AxoError::validation(format!("missing positional argument {}", index)))?;
    serde_json::from_value(value.clone())
        .map_err(|err| AxoError::validation(format!("argument {}: {}", index, err)))
}

/// Deserializes an optional keyword argument.
pub fn kwarg<A: DeserializeOwned>(kwargs: &Kwargs, name: &str) -> AxoResult<Option<A>> {
    match kwargs.get(name) {
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| AxoError::validation(format!("keyword argument '{}': {}", name, err))),
        None => Ok(None),
    }
}

/// Textual definition of an object's behavior.
///
/// Travels as the second segment of an [`ObjectFrame`] and names the
/// registered type that can rebuild the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorDefinition {
    pub type_name: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub methods: Vec<String>,
}

impl BehaviorDefinition {
    pub fn of(object: &dyn ActiveObject) -> Self {
        Self {
            type_name: object.type_name().to_string(),
            module: object.module().to_string(),
            methods: object.method_names(),
        }
    }

    pub fn to_text(&self) -> AxoResult<String> {
        serde_json::to_string(self)
            .map_err(|err| AxoError::internal(format!("cannot encode behavior: {}", err)))
    }

    /// Parses and validates a behavior definition.
    pub fn parse(text: &str) -> AxoResult<Self> {
        let definition: Self = serde_json::from_str(text)
            .map_err(|err| AxoError::validation(format!("invalid behavior definition: {}", err)))?;
        if !is_identifier(&definition.type_name) {
            return Err(AxoError::validation(format!(
                "'{}' is not a valid type name",
                definition.type_name
            )));
        }
        Ok(definition)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Captures an object's attributes and behavior definition.
pub fn to_frame(object: &dyn ActiveObject) -> AxoResult<ObjectFrame> {
    let attributes = serde_json::to_vec(&object.attributes()?)
        .map_err(|err| AxoError::internal(format!("cannot encode attributes: {}", err)))?;
    Ok(ObjectFrame {
        attributes,
        behavior: BehaviorDefinition::of(object).to_text()?,
    })
}

/// Serializes an object into its transportable byte form.
pub fn to_bytes(object: &dyn ActiveObject) -> AxoResult<Vec<u8>> {
    to_frame(object)?.encode()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axo_types::ErrorKind;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Counter {
        pub count: i64,
        pub label: String,
    }

    impl Counter {
        fn increment(&mut self, args: &[Value], _: &Kwargs) -> AxoResult<Value> {
            let by: i64 = arg(args, 0)?;
            self.count += by;
            Ok(json!(self.count))
        }

        fn describe(&mut self, _: &[Value], kwargs: &Kwargs) -> AxoResult<Value> {
            let prefix: Option<String> = kwarg(kwargs, "prefix")?;
            Ok(json!(format!(
                "{}{}={}",
                prefix.unwrap_or_default(),
                self.label,
                self.count
            )))
        }
    }

    impl ActiveType for Counter {
        const TYPE_NAME: &'static str = "Counter";
        const MODULE: &'static str = "tests";

        fn method_table() -> MethodTable<Self> {
            MethodTable::new()
                .with("increment", Counter::increment)
                .with("describe", Counter::describe)
        }
    }

    #[test]
    fn test_call_dispatches_by_name() {
        let mut counter = Counter {
            count: 1,
            label: "c".to_string(),
        };
        let result = counter.call("increment", &[json!(4)], &Kwargs::new()).unwrap();
        assert_eq!(result, json!(5));

        let mut kwargs = Kwargs::new();
        kwargs.insert("prefix".to_string(), json!(">"));
        let result = counter.call("describe", &[], &kwargs).unwrap();
        assert_eq!(result, json!(">c=5"));
    }

    #[test]
    fn test_unknown_method_not_found() {
        let mut counter = Counter {
            count: 0,
            label: String::new(),
        };
        let err = counter.call("reset", &[], &Kwargs::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_bad_argument_is_validation_error() {
        let mut counter = Counter {
            count: 0,
            label: String::new(),
        };
        let err = counter
            .call("increment", &[json!("two")], &Kwargs::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        let err = counter.call("increment", &[], &Kwargs::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn test_behavior_definition_lists_methods() {
        let counter = Counter {
            count: 0,
            label: String::new(),
        };
        let definition = BehaviorDefinition::of(&counter);
        assert_eq!(definition.type_name, "Counter");
        assert_eq!(definition.module, "tests");
        assert_eq!(definition.methods, vec!["describe", "increment"]);
    }

    #[test]
    fn test_behavior_parse_validates_type_name() {
        for text in [
            "not json",
            r#"{"module":"m"}"#,
            r#"{"type_name":""}"#,
            r#"{"type_name":"9lives"}"#,
            r#"{"type_name":"a-b"}"#,
        ] {
            let err = BehaviorDefinition::parse(text).unwrap_err();
            assert_eq!(err.kind, ErrorKind::ValidationFailed, "{}", text);
        }
        assert!(BehaviorDefinition::parse(r#"{"type_name":"_Ok1"}"#).is_ok());
    }

    #[test]
    fn test_frame_captures_attributes() {
        let counter = Counter {
            count: 3,
            label: "x".to_string(),
        };
        let frame = to_frame(&counter).unwrap();
        let attributes: Value = serde_json::from_slice(&frame.attributes).unwrap();
        assert_eq!(attributes, json!({"count": 3, "label": "x"}));
    }
}
