//! Call fingerprinting for content-addressed artifacts
//!
//! A cache key is the SHA256 of the function identity, its retention window and
//! a canonical rendering of the call arguments. Same function + same arguments
//! = same key, regardless of the order keyword arguments were built in, and
//! values JSON cannot tell apart (`None` / `Some(None)`, infinities, NaN)
//! still get distinct keys.

use crate::cache::canonical::to_canonical_value;
use crate::cache::retention::RetentionPolicy;
use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain tag mixed into every key, bumped if the canonical form changes
const KEY_DOMAIN: &[u8] = b"cache-to-disk/key/v2";

/// Longest readable prefix kept in a function's directory name
const MAX_SLUG_LEN: usize = 64;

/// Qualified identity of a cached function
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    namespace: String,
    name: String,
}

impl FunctionId {
    /// Identify a function by its declaring namespace and name
    ///
    /// See [`function_id!`](crate::function_id) to fill the namespace from `module_path!()`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a qualified name such as `my_crate::reports::build`
    ///
    /// The last `::` segment is the function name; everything before it is the
    /// namespace. A bare name has an empty namespace.
    pub fn parse(qualified: &str) -> CacheResult<Self> {
        let qualified = qualified.trim();
        let (namespace, name) = match qualified.rsplit_once("::") {
            Some((ns, name)) => (ns, name),
            None => ("", qualified),
        };
        if name.is_empty() {
            return Err(CacheError::InvalidFunctionName(qualified.to_string()));
        }
        Ok(Self::new(namespace, name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `namespace::name`, or just `name` without a namespace
    pub fn qualified(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.namespace, self.name)
        }
    }

    /// Directory name holding this function's artifacts
    ///
    /// A filesystem-safe slug for humans plus 12 hex chars of the qualified
    /// name's hash, so slugs that collapse to the same text stay distinct.
    pub fn dir_name(&self) -> String {
        let qualified = self.qualified();
        let slug: String = qualified
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(MAX_SLUG_LEN)
            .collect();

        let digest = Sha256::digest(qualified.as_bytes());
        format!("{}-{}", slug, hex::encode(&digest[..6]))
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// Build a [`FunctionId`] for a function declared in the current module
#[macro_export]
macro_rules! function_id {
    ($name:ident) => {
        $crate::FunctionId::new(module_path!(), stringify!($name))
    };
}

/// Fingerprint of a single call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a stored key only if it has the shape of a SHA256 hex digest
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(hex.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for one call
///
/// `args` holds the positional arguments (use a tuple for several) and
/// `kwargs` the keyword arguments, which must serialize to a map (a struct,
/// `BTreeMap`, `HashMap`, ...) or to nothing at all (`()`).
pub fn compute_key<A, K>(
    function: &FunctionId,
    retention: RetentionPolicy,
    args: &A,
    kwargs: &K,
) -> CacheResult<CacheKey>
where
    A: Serialize + ?Sized,
    K: Serialize + ?Sized,
{
    let args = canonicalize(function, args)?;
    let kwargs = match to_canonical_value(kwargs) {
        Ok(value @ (Value::Object(_) | Value::Null)) => canonical_string(&value),
        Ok(other) => {
            return Err(CacheError::key_derivation(
                function.qualified(),
                format!("keyword arguments must be a map, got {}", json_kind(&other)),
            ))
        }
        Err(e) => return Err(CacheError::key_derivation(function.qualified(), e)),
    };

    let mut hasher = Sha256::new();
    hasher.update(KEY_DOMAIN);
    update_framed(&mut hasher, function.qualified().as_bytes());
    hasher.update(retention.n_days().to_le_bytes());
    update_framed(&mut hasher, args.as_bytes());
    update_framed(&mut hasher, kwargs.as_bytes());

    Ok(CacheKey(hex::encode(hasher.finalize())))
}

fn canonicalize<A: Serialize + ?Sized>(function: &FunctionId, args: &A) -> CacheResult<String> {
    to_canonical_value(args)
        .map(|value| canonical_string(&value))
        .map_err(|e| CacheError::key_derivation(function.qualified(), e))
}

/// Length-prefix each field so adjacent fields can't run into each other
fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Compact JSON with object keys sorted at every depth
fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet, HashMap};

    fn f() -> FunctionId {
        FunctionId::new("reports", "build")
    }

    #[test]
    fn key_deterministic() {
        let policy = RetentionPolicy::days(7);
        let key1 = compute_key(&f(), policy, &(1, "a"), &()).unwrap();
        let key2 = compute_key(&f(), policy, &(1, "a"), &()).unwrap();

        assert_eq!(key1, key2);
        assert_eq!(key1.as_str().len(), 64);
    }

    #[test]
    fn key_differs_by_args() {
        let policy = RetentionPolicy::days(7);
        let key1 = compute_key(&f(), policy, &(1, "a"), &()).unwrap();
        let key2 = compute_key(&f(), policy, &(2, "a"), &()).unwrap();
        let key3 = compute_key(&f(), policy, &(1, "b"), &()).unwrap();

        assert_ne!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key2, key3);
    }

    #[test]
    fn key_differs_by_function() {
        let policy = RetentionPolicy::days(7);
        let other = FunctionId::new("reports", "render");
        let key1 = compute_key(&f(), policy, &42, &()).unwrap();
        let key2 = compute_key(&other, policy, &42, &()).unwrap();

        assert_ne!(key1, key2);
    }

    #[test]
    fn key_differs_by_retention() {
        let key1 = compute_key(&f(), RetentionPolicy::days(1), &42, &()).unwrap();
        let key2 = compute_key(&f(), RetentionPolicy::days(2), &42, &()).unwrap();

        assert_ne!(key1, key2);
    }

    #[test]
    fn kwargs_order_independent() {
        let mut first = HashMap::new();
        first.insert("alpha", 1);
        first.insert("beta", 2);
        first.insert("gamma", 3);

        let mut second = HashMap::new();
        second.insert("gamma", 3);
        second.insert("alpha", 1);
        second.insert("beta", 2);

        let policy = RetentionPolicy::default();
        let key1 = compute_key(&f(), policy, &(), &first).unwrap();
        let key2 = compute_key(&f(), policy, &(), &second).unwrap();

        assert_eq!(key1, key2);
    }

    #[test]
    fn args_and_kwargs_do_not_alias() {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("x", 1);

        let policy = RetentionPolicy::default();
        let key1 = compute_key(&f(), policy, &kwargs, &()).unwrap();
        let key2 = compute_key(&f(), policy, &(), &kwargs).unwrap();

        assert_ne!(key1, key2);
    }

    #[test]
    fn non_string_map_keys_fail() {
        let mut args = HashMap::new();
        args.insert((1, 2), "point");

        let err = compute_key(&f(), RetentionPolicy::default(), &args, &()).unwrap_err();
        assert!(err.is_key_derivation());
    }

    #[test]
    fn scalar_kwargs_fail() {
        let err = compute_key(&f(), RetentionPolicy::default(), &(), &5).unwrap_err();
        assert!(err.is_key_derivation());
        assert!(err.to_string().contains("a number"));
    }

    #[test]
    fn non_finite_floats_have_distinct_keys() {
        let policy = RetentionPolicy::default();
        let keys: BTreeSet<_> = [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, 0.0]
            .iter()
            .map(|x| compute_key(&f(), policy, x, &()).unwrap())
            .collect();

        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn nested_options_have_distinct_keys() {
        let policy = RetentionPolicy::default();
        let none: Option<Option<u8>> = None;
        let some_none: Option<Option<u8>> = Some(None);

        let key1 = compute_key(&f(), policy, &none, &()).unwrap();
        let key2 = compute_key(&f(), policy, &some_none, &()).unwrap();
        let key3 = compute_key(&f(), policy, &Some(Some(0u8)), &()).unwrap();

        assert_ne!(key1, key2);
        assert_ne!(key2, key3);
        assert_ne!(key1, key3);
    }

    #[test]
    fn canonical_sorts_nested_objects() {
        let value = serde_json::json!({"b": {"z": 1, "a": [true, null]}, "a": "x"});
        assert_eq!(
            canonical_string(&value),
            r#"{"a":"x","b":{"a":[true,null],"z":1}}"#
        );
    }

    #[test]
    fn function_id_parse() {
        let id = FunctionId::parse("my_crate::reports::build").unwrap();
        assert_eq!(id.namespace(), "my_crate::reports");
        assert_eq!(id.name(), "build");
        assert_eq!(id.qualified(), "my_crate::reports::build");

        let bare = FunctionId::parse("build").unwrap();
        assert_eq!(bare.namespace(), "");
        assert_eq!(bare.to_string(), "build");

        assert!(FunctionId::parse("reports::").is_err());
        assert!(FunctionId::parse("  ").is_err());
    }

    #[test]
    fn function_id_macro_uses_module_path() {
        let id = crate::function_id!(expensive);
        assert_eq!(id.name(), "expensive");
        assert_eq!(id.namespace(), module_path!());
    }

    #[test]
    fn dir_name_is_safe_and_distinct() {
        let a = FunctionId::new("a::b", "c");
        let b = FunctionId::new("a", "b__c");

        assert!(a
            .dir_name()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        assert_ne!(a.dir_name(), b.dir_name());
        assert_eq!(a.dir_name(), FunctionId::new("a::b", "c").dir_name());
    }

    #[test]
    fn cache_key_from_hex() {
        let key = compute_key(&f(), RetentionPolicy::default(), &1, &()).unwrap();
        assert_eq!(CacheKey::from_hex(key.as_str()), Some(key));
        assert!(CacheKey::from_hex("not-a-key").is_none());
        assert!(CacheKey::from_hex(&"A".repeat(64)).is_none());
    }
}
