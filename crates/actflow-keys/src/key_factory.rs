//! Tag and query-key generation from a resource schema
//!
//! A [`KeyFactory`] maps resource names to a [`ResourceSpec`]. For each
//! resource it builds two identities from the same parameters:
//!
//! - a tag string for invalidation, e.g. `post:123`
//! - a structured key for caches and the in-flight registry, e.g. `["post", 123]`
//!
//! Parameters are strict: every declared parameter must be present and be a
//! string, number or boolean, and nothing else may be passed.
//!
//! # Example
//!
//! ```rust
//! use actflow_keys::{KeyFactory, KeyPart, ResourceSpec};
//! use serde_json::json;
//!
//! let keys = KeyFactory::new()
//!     .with_resource("posts", ResourceSpec::new("posts"))
//!     .with_resource("post", ResourceSpec::new("post").with_params(["id"]));
//!
//! assert_eq!(keys.tag("posts", &()).unwrap(), "posts");
//! assert_eq!(keys.tag("post", &json!({ "id": 123 })).unwrap(), "post:123");
//! assert_eq!(
//!     keys.key("post", &json!({ "id": 123 })).unwrap(),
//!     vec![KeyPart::from("post"), KeyPart::from(123)]
//! );
//! ```

use std::collections::BTreeMap;
use std::fmt;

use actflow_core::error::{Error, InvalidArgumentCode, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

pub const DEFAULT_SEPARATOR: &str = ":";

/// One resource of a [`KeyFactory`] schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceSpec {
    /// First segment of every tag and key
    pub key: String,

    /// Parameter names, in the order their values appear
    #[serde(default)]
    pub params: Vec<String>,

    /// Tag separator
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

impl ResourceSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            params: Vec::new(),
            separator: default_separator(),
        }
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

/// One element of a structured key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Str(String),
    Num(Number),
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        Self::Num(n.into())
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Num(n) => f.write_str(&number_text(n)),
        }
    }
}

/// Integral floats print without a fraction, matching JSON number text
fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(v) if n.is_f64() && v.fract() == 0.0 && v.abs() < 9_007_199_254_740_992.0 => {
            format!("{}", v as i64)
        }
        _ => n.to_string(),
    }
}

/// Resource schema producing tags and structured keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFactory {
    resources: BTreeMap<String, ResourceSpec>,
}

impl KeyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, name: impl Into<String>, spec: ResourceSpec) -> Self {
        self.resources.insert(name.into(), spec);
        self
    }

    /// Build a factory from a JSON schema object (`{"post": {"key": "post", "params": ["id"]}}`)
    pub fn from_value(schema: Value) -> Result<Self> {
        serde_json::from_value(schema)
            .map_err(|e| Error::invalid_config(format!("invalid key schema: {}", e)))
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.get(name)
    }

    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Invalidation tag: `key`, then each parameter value, joined by the separator
    ///
    /// Booleans become `"1"` and `"0"`.
    pub fn tag<P: Serialize + ?Sized>(&self, resource: &str, params: &P) -> Result<String> {
        let (spec, values) = self.resolve(resource, params)?;
        let parts = values
            .iter()
            .map(|v| match v {
                Atom::Str(s) => s.clone(),
                Atom::Num(n) => number_text(n),
            })
            .collect::<Vec<_>>();

        if parts.is_empty() {
            return Ok(spec.key.clone());
        }
        Ok(format!("{}{}{}", spec.key, spec.separator, parts.join(&spec.separator)))
    }

    /// Structured key: `[key, ...values]` with booleans as `1` and `0`
    pub fn key<P: Serialize + ?Sized>(&self, resource: &str, params: &P) -> Result<Vec<KeyPart>> {
        let (spec, values) = self.resolve(resource, params)?;
        let mut key = Vec::with_capacity(values.len() + 1);
        key.push(KeyPart::Str(spec.key.clone()));
        key.extend(values.into_iter().map(|v| match v {
            Atom::Str(s) => KeyPart::Str(s),
            Atom::Num(n) => KeyPart::Num(n),
        }));
        Ok(key)
    }

    fn resolve<P: Serialize + ?Sized>(
        &self,
        resource: &str,
        params: &P,
    ) -> Result<(&ResourceSpec, Vec<Atom>)> {
        let spec = self.resources.get(resource).ok_or_else(|| {
            Error::invalid_argument(
                InvalidArgumentCode::KeyUnknownResource,
                format!("Unknown resource \"{}\"", resource),
            )
        })?;

        let params = serde_json::to_value(params).map_err(|e| {
            Error::invalid_argument(
                InvalidArgumentCode::KeyInvalidParam,
                format!("Invalid params for resource \"{}\": {}", resource, e),
            )
        })?;
        let empty = Map::new();
        let object = match &params {
            Value::Null => &empty,
            Value::Object(object) => object,
            _ => {
                return Err(Error::invalid_argument(
                    InvalidArgumentCode::KeyInvalidParam,
                    format!("Params for resource \"{}\" must be an object", resource),
                ))
            }
        };

        let values = spec
            .params
            .iter()
            .map(|name| {
                let value = object.get(name).ok_or_else(|| {
                    Error::invalid_argument(
                        InvalidArgumentCode::KeyMissingParam,
                        format!("Missing param \"{}\" for resource \"{}\"", name, resource),
                    )
                })?;
                Atom::from_value(value).ok_or_else(|| {
                    Error::invalid_argument(
                        InvalidArgumentCode::KeyInvalidParam,
                        format!(
                            "Invalid type for param \"{}\" in resource \"{}\": expected string|number|boolean",
                            name, resource
                        ),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(extra) = object.keys().find(|k| !spec.params.iter().any(|p| p == *k)) {
            return Err(Error::invalid_argument(
                InvalidArgumentCode::KeyUnexpectedParam,
                format!("Unexpected param \"{}\" for resource \"{}\"", extra, resource),
            ));
        }

        Ok((spec, values))
    }
}

/// A parameter value after boolean normalisation
enum Atom {
    Str(String),
    Num(Number),
}

impl Atom {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Number(n) => Some(Self::Num(n.clone())),
            Value::Bool(b) => Some(Self::Num(Number::from(u8::from(*b)))),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factory() -> KeyFactory {
        KeyFactory::new()
            .with_resource("posts", ResourceSpec::new("posts"))
            .with_resource("post", ResourceSpec::new("post").with_params(["id"]))
            .with_resource("entity", ResourceSpec::new("entity").with_params(["id", "lang"]))
            .with_resource("visible", ResourceSpec::new("visible").with_params(["flag"]))
            .with_resource(
                "item",
                ResourceSpec::new("item").with_params(["id"]).with_separator("/"),
            )
    }

    fn code(err: Error) -> Option<InvalidArgumentCode> {
        err.invalid_argument_code()
    }

    #[test]
    fn test_zero_param_resource() {
        let f = factory();
        assert_eq!(f.tag("posts", &()).unwrap(), "posts");
        assert_eq!(f.tag("posts", &json!({})).unwrap(), "posts");
        assert_eq!(f.key("posts", &()).unwrap(), vec![KeyPart::from("posts")]);
    }

    #[test]
    fn test_single_param_resource() {
        let f = factory();
        assert_eq!(f.tag("post", &json!({ "id": 123 })).unwrap(), "post:123");
        assert_eq!(
            f.key("post", &json!({ "id": 123 })).unwrap(),
            vec![KeyPart::from("post"), KeyPart::from(123)]
        );
    }

    #[test]
    fn test_params_follow_declared_order() {
        let f = factory();
        let params = json!({ "lang": "ko", "id": "42" });
        assert_eq!(f.tag("entity", &params).unwrap(), "entity:42:ko");
        assert_eq!(
            f.key("entity", &params).unwrap(),
            vec![KeyPart::from("entity"), KeyPart::from("42"), KeyPart::from("ko")]
        );
    }

    #[test]
    fn test_booleans_normalise_to_one_and_zero() {
        let f = factory();
        assert_eq!(
            f.key("visible", &json!({ "flag": true })).unwrap(),
            vec![KeyPart::from("visible"), KeyPart::from(1)]
        );
        assert_eq!(
            f.key("visible", &json!({ "flag": false })).unwrap()[1],
            KeyPart::from(0)
        );
        assert_eq!(f.tag("visible", &json!({ "flag": true })).unwrap(), "visible:1");
        assert_eq!(f.tag("visible", &json!({ "flag": false })).unwrap(), "visible:0");
    }

    #[test]
    fn test_custom_separator() {
        assert_eq!(factory().tag("item", &json!({ "id": "x" })).unwrap(), "item/x");
    }

    #[test]
    fn test_integral_float_prints_as_integer() {
        let f = factory();
        assert_eq!(f.tag("post", &json!({ "id": 7.0 })).unwrap(), "post:7");
        assert_eq!(f.tag("post", &json!({ "id": 1.5 })).unwrap(), "post:1.5");
    }

    #[test]
    fn test_typed_params() {
        #[derive(Serialize)]
        struct EntityParams<'a> {
            id: u64,
            lang: &'a str,
        }

        let tag = factory()
            .tag("entity", &EntityParams { id: 9, lang: "en" })
            .unwrap();
        assert_eq!(tag, "entity:9:en");
    }

    #[test]
    fn test_invalid_param_type() {
        let err = factory().tag("post", &json!({ "id": { "x": 1 } })).unwrap_err();
        assert!(err.to_string().contains("Invalid type for param \"id\""));
        assert_eq!(code(err), Some(InvalidArgumentCode::KeyInvalidParam));

        let err = factory().key("post", &json!({ "id": null })).unwrap_err();
        assert_eq!(code(err), Some(InvalidArgumentCode::KeyInvalidParam));
    }

    #[test]
    fn test_missing_param() {
        let err = factory().tag("post", &json!({})).unwrap_err();
        assert!(err.to_string().contains("\"id\""));
        assert!(err.to_string().contains("\"post\""));
        assert_eq!(code(err), Some(InvalidArgumentCode::KeyMissingParam));
    }

    #[test]
    fn test_unexpected_param() {
        let err = factory().key("post", &json!({ "id": 1, "extra": 2 })).unwrap_err();
        assert_eq!(code(err), Some(InvalidArgumentCode::KeyUnexpectedParam));

        let err = factory().tag("posts", &json!({ "slug": "a" })).unwrap_err();
        assert_eq!(code(err), Some(InvalidArgumentCode::KeyUnexpectedParam));
    }

    #[test]
    fn test_unknown_resource() {
        let err = factory().tag("comments", &()).unwrap_err();
        assert_eq!(code(err), Some(InvalidArgumentCode::KeyUnknownResource));
    }

    #[test]
    fn test_non_object_params() {
        let err = factory().tag("post", &"123").unwrap_err();
        assert_eq!(code(err), Some(InvalidArgumentCode::KeyInvalidParam));
    }

    #[test]
    fn test_schema_from_value() {
        let f = KeyFactory::from_value(json!({
            "post": { "key": "post", "params": ["id"] },
            "item": { "key": "item", "params": ["id"], "separator": "/" }
        }))
        .unwrap();

        assert_eq!(f.resource_names().collect::<Vec<_>>(), vec!["item", "post"]);
        assert_eq!(f.tag("item", &json!({ "id": 3 })).unwrap(), "item/3");
        assert_eq!(f.resource("post").unwrap().separator, ":");
    }

    #[test]
    fn test_key_serializes_as_json_tuple() {
        let key = factory().key("entity", &json!({ "id": 1, "lang": "ko" })).unwrap();
        assert_eq!(serde_json::to_value(&key).unwrap(), json!(["entity", 1, "ko"]));
    }
}
