//! Stable stringification and idempotency keys
//!
//! [`stable_stringify`] renders any [`Serialize`] value as JSON text that does
//! not depend on field or map insertion order, so logically equal payloads
//! always produce the same bytes. A few values get tagged encodings:
//!
//! | Value                 | Encoding                               |
//! |-----------------------|----------------------------------------|
//! | `i128` / `u128`       | `{"$bigint": "<decimal>"}`             |
//! | bytes ([`Binary`])    | `{"$binary": "<base64>"}`              |
//! | [`IsoDate`]           | `{"$date": "2020-01-01T00:00:00.000Z"}` |
//! | `NaN`, `±inf`, `()`   | `null`                                 |
//!
//! Maps whose keys are not strings are rejected, as is nesting deeper than
//! [`MAX_DEPTH`] levels, which is where a reference cycle ends up.
//!
//! [`make_idempotency_key`] hashes a versioned payload with SHA-1 and returns
//! `prefix + 40 lowercase hex digits`.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use actflow_core::error::{Error, InvalidArgumentCode, Result};
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::ser::{self, Serialize};
use sha1::{Digest, Sha1};

/// Deepest nesting accepted by [`stable_stringify`]
pub const MAX_DEPTH: usize = 128;

pub const DEFAULT_PREFIX: &str = "idem:";

const PAYLOAD_VERSION: i64 = 1;
const DATE_TOKEN: &str = "$actflow::IsoDate";

/// A UTC instant rendered as `{"$date": ...}` with millisecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoDate(DateTime<Utc>);

impl IsoDate {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for IsoDate {
    fn from(at: DateTime<Tz>) -> Self {
        Self(at.with_timezone(&Utc))
    }
}

impl Serialize for IsoDate {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let text = self.0.to_rfc3339_opts(SecondsFormat::Millis, true);
        serializer.serialize_newtype_struct(DATE_TOKEN, &text)
    }
}

/// Raw bytes rendered as `{"$binary": base64}`
///
/// `Vec<u8>` serializes as a sequence of numbers; wrap it to get bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Binary(pub Vec<u8>);

impl From<&[u8]> for Binary {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Binary {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Binary {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

/// Options for [`make_idempotency_key`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdempotencyKeyOptions {
    /// Separates key spaces; defaults to the empty string
    pub namespace: Option<String>,
    /// Defaults to [`DEFAULT_PREFIX`]
    pub prefix: Option<String>,
}

impl IdempotencyKeyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Render `value` as canonical JSON text
pub fn stable_stringify<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(canonicalize(value)?.to_string())
}

/// SHA-1 of [`stable_stringify`] as lowercase hex
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(sha1_hex(&stable_stringify(value)?))
}

/// Derive `prefix + 40 hex` from `parts`
///
/// `parts` must serialize to a non-empty sequence: a slice, a `Vec` or a
/// tuple of heterogeneous values.
///
/// ```rust
/// use actflow_keys::{make_idempotency_key, IdempotencyKeyOptions};
/// use serde_json::json;
///
/// let a = make_idempotency_key(&(json!({ "a": 1, "b": 2 }), "foo"), &IdempotencyKeyOptions::new()).unwrap();
/// let b = make_idempotency_key(&(json!({ "b": 2, "a": 1 }), "foo"), &IdempotencyKeyOptions::new()).unwrap();
/// assert_eq!(a, b);
/// assert!(a.starts_with("idem:"));
/// ```
pub fn make_idempotency_key<P: Serialize + ?Sized>(
    parts: &P,
    options: &IdempotencyKeyOptions,
) -> Result<String> {
    let parts = match canonicalize(parts)? {
        Canonical::Array(items) if !items.is_empty() => Canonical::Array(items),
        _ => {
            return Err(Error::invalid_argument(
                InvalidArgumentCode::IdempEmpty,
                "parts must be a non-empty sequence",
            ))
        }
    };

    let payload = Canonical::Object(BTreeMap::from([
        ("v".to_string(), Canonical::Number(PAYLOAD_VERSION.into())),
        (
            "ns".to_string(),
            Canonical::String(options.namespace.clone().unwrap_or_default()),
        ),
        ("parts".to_string(), parts),
    ]));

    let prefix = options.prefix.as_deref().unwrap_or(DEFAULT_PREFIX);
    let key = format!("{}{}", prefix, sha1_hex(&payload.to_string()));
    tracing::trace!(key = %key, "derived idempotency key");
    Ok(key)
}

fn sha1_hex(text: &str) -> String {
    hex::encode(Sha1::digest(text.as_bytes()))
}

fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Canonical> {
    value
        .serialize(CanonicalSerializer { depth: 0 })
        .map_err(|e| match e {
            CanonicalError::Circular => {
                Error::invalid_argument(InvalidArgumentCode::IdempCircular, e.to_string())
            }
            CanonicalError::Unsupported(_) => {
                Error::invalid_argument(InvalidArgumentCode::IdempUnsupportedType, e.to_string())
            }
        })
}

#[derive(Debug, thiserror::Error)]
enum CanonicalError {
    #[error("circular structure detected (nesting deeper than 128 levels)")]
    Circular,
    #[error("unsupported type for stringify: {0}")]
    Unsupported(String),
}

impl ser::Error for CanonicalError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Unsupported(msg.to_string())
    }
}

/// Order-independent JSON tree
#[derive(Debug, Clone, PartialEq)]
enum Canonical {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Canonical>),
    Object(BTreeMap<String, Canonical>),
}

impl Canonical {
    fn tagged(tag: &str, value: String) -> Self {
        Self::Object(BTreeMap::from([(tag.to_string(), Self::String(value))]))
    }

    fn float(v: f64) -> Self {
        if !v.is_finite() {
            return Self::Null;
        }
        if v.fract() == 0.0 && v.abs() < 9_007_199_254_740_992.0 {
            return Self::Number((v as i64).into());
        }
        serde_json::Number::from_f64(v).map_or(Self::Null, Self::Number)
    }
}

impl fmt::Display for Canonical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write_json_string(f, s),
            Self::Array(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_char(']')
            }
            Self::Object(entries) => {
                f.write_char('{')?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write_json_string(f, key)?;
                    write!(f, ":{}", value)?;
                }
                f.write_char('}')
            }
        }
    }
}

fn write_json_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "{}", serde_json::Value::from(s))
}

struct CanonicalSerializer {
    depth: usize,
}

impl CanonicalSerializer {
    fn nested(&self) -> std::result::Result<Self, CanonicalError> {
        let depth = self.depth + 1;
        if depth > MAX_DEPTH {
            return Err(CanonicalError::Circular);
        }
        Ok(Self { depth })
    }
}

type Ser<T> = std::result::Result<T, CanonicalError>;

impl ser::Serializer for CanonicalSerializer {
    type Ok = Canonical;
    type Error = CanonicalError;
    type SerializeSeq = SeqCollector;
    type SerializeTuple = SeqCollector;
    type SerializeTupleStruct = SeqCollector;
    type SerializeTupleVariant = SeqCollector;
    type SerializeMap = MapCollector;
    type SerializeStruct = MapCollector;
    type SerializeStructVariant = MapCollector;

    fn serialize_bool(self, v: bool) -> Ser<Canonical> {
        Ok(Canonical::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Ser<Canonical> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i16(self, v: i16) -> Ser<Canonical> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i32(self, v: i32) -> Ser<Canonical> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i64(self, v: i64) -> Ser<Canonical> {
        Ok(Canonical::Number(v.into()))
    }

    fn serialize_i128(self, v: i128) -> Ser<Canonical> {
        Ok(Canonical::tagged("$bigint", v.to_string()))
    }

    fn serialize_u8(self, v: u8) -> Ser<Canonical> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u16(self, v: u16) -> Ser<Canonical> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u32(self, v: u32) -> Ser<Canonical> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u64(self, v: u64) -> Ser<Canonical> {
        Ok(Canonical::Number(v.into()))
    }

    fn serialize_u128(self, v: u128) -> Ser<Canonical> {
        Ok(Canonical::tagged("$bigint", v.to_string()))
    }

    fn serialize_f32(self, v: f32) -> Ser<Canonical> {
        Ok(Canonical::float(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Ser<Canonical> {
        Ok(Canonical::float(v))
    }

    fn serialize_char(self, v: char) -> Ser<Canonical> {
        Ok(Canonical::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Ser<Canonical> {
        Ok(Canonical::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Ser<Canonical> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(v);
        Ok(Canonical::tagged("$binary", encoded))
    }

    fn serialize_none(self) -> Ser<Canonical> {
        Ok(Canonical::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Ser<Canonical> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Ser<Canonical> {
        Ok(Canonical::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Ser<Canonical> {
        Ok(Canonical::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Ser<Canonical> {
        Ok(Canonical::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Ser<Canonical> {
        let inner = value.serialize(self.nested()?)?;
        match inner {
            Canonical::String(text) if name == DATE_TOKEN => {
                Ok(Canonical::tagged("$date", text))
            }
            inner => Ok(inner),
        }
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Ser<Canonical> {
        let inner = value.serialize(self.nested()?)?;
        Ok(Canonical::Object(BTreeMap::from([(variant.to_string(), inner)])))
    }

    fn serialize_seq(self, len: Option<usize>) -> Ser<SeqCollector> {
        Ok(SeqCollector {
            child: self.nested()?,
            items: Vec::with_capacity(len.unwrap_or(0)),
            variant: None,
        })
    }

    fn serialize_tuple(self, len: usize) -> Ser<SeqCollector> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Ser<SeqCollector> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Ser<SeqCollector> {
        let mut collector = self.serialize_seq(Some(len))?;
        collector.variant = Some(variant);
        Ok(collector)
    }

    fn serialize_map(self, _len: Option<usize>) -> Ser<MapCollector> {
        Ok(MapCollector {
            child: self.nested()?,
            entries: BTreeMap::new(),
            next_key: None,
            variant: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Ser<MapCollector> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Ser<MapCollector> {
        let mut collector = self.serialize_map(Some(len))?;
        collector.variant = Some(variant);
        Ok(collector)
    }
}

fn wrap_variant(variant: Option<&'static str>, value: Canonical) -> Canonical {
    match variant {
        Some(name) => Canonical::Object(BTreeMap::from([(name.to_string(), value)])),
        None => value,
    }
}

struct SeqCollector {
    child: CanonicalSerializer,
    items: Vec<Canonical>,
    variant: Option<&'static str>,
}

impl SeqCollector {
    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Ser<()> {
        let item = value.serialize(CanonicalSerializer {
            depth: self.child.depth,
        })?;
        self.items.push(item);
        Ok(())
    }

    fn finish(self) -> Canonical {
        wrap_variant(self.variant, Canonical::Array(self.items))
    }
}

impl ser::SerializeSeq for SeqCollector {
    type Ok = Canonical;
    type Error = CanonicalError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Ser<()> {
        self.push(value)
    }

    fn end(self) -> Ser<Canonical> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqCollector {
    type Ok = Canonical;
    type Error = CanonicalError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Ser<()> {
        self.push(value)
    }

    fn end(self) -> Ser<Canonical> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqCollector {
    type Ok = Canonical;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Ser<()> {
        self.push(value)
    }

    fn end(self) -> Ser<Canonical> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleVariant for SeqCollector {
    type Ok = Canonical;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Ser<()> {
        self.push(value)
    }

    fn end(self) -> Ser<Canonical> {
        Ok(self.finish())
    }
}

struct MapCollector {
    child: CanonicalSerializer,
    entries: BTreeMap<String, Canonical>,
    next_key: Option<String>,
    variant: Option<&'static str>,
}

impl MapCollector {
    fn serializer(&self) -> CanonicalSerializer {
        CanonicalSerializer {
            depth: self.child.depth,
        }
    }

    fn finish(self) -> Canonical {
        wrap_variant(self.variant, Canonical::Object(self.entries))
    }
}

impl ser::SerializeMap for MapCollector {
    type Ok = Canonical;
    type Error = CanonicalError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Ser<()> {
        match key.serialize(self.serializer())? {
            Canonical::String(key) => {
                self.next_key = Some(key);
                Ok(())
            }
            _ => Err(CanonicalError::Unsupported(
                "map with non-string keys".to_string(),
            )),
        }
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Ser<()> {
        let key = self.next_key.take().ok_or_else(|| {
            CanonicalError::Unsupported("map value without a key".to_string())
        })?;
        let value = value.serialize(self.serializer())?;
        self.entries.insert(key, value);
        Ok(())
    }

    fn end(self) -> Ser<Canonical> {
        Ok(self.finish())
    }
}

impl ser::SerializeStruct for MapCollector {
    type Ok = Canonical;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Ser<()> {
        let value = value.serialize(self.serializer())?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn end(self) -> Ser<Canonical> {
        Ok(self.finish())
    }
}

impl ser::SerializeStructVariant for MapCollector {
    type Ok = Canonical;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Ser<()> {
        let value = value.serialize(self.serializer())?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn end(self) -> Ser<Canonical> {
        Ok(self.finish())
    }
}
