//! Cache keys are `cache:{namespace}:{scope...}:{digest}`. The digest is a
//! SHA-256 over the canonical JSON form of the request parameters, so two
//! requests that differ only in key order or number spelling share a key.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix shared by every cache entry; rate limit counters live elsewhere.
pub const CACHE_ROOT: &str = "cache";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    rendered: String,
}

impl CacheKey {
    /// Key for `operation` called with `params`.
    pub fn derive(operation: &str, params: &Value) -> Self {
        Self::scoped(operation, &[], params)
    }

    /// Key for `operation` under extra scope segments, e.g. the customer a
    /// prediction belongs to, so the scope can be invalidated as a group.
    pub fn scoped(operation: &str, scope: &[&str], params: &Value) -> Self {
        let mut rendered = scope_prefix(operation, scope);
        rendered.push_str(&params_digest(params));
        Self {
            namespace: operation.to_string(),
            rendered,
        }
    }

    /// Uses a caller-built key such as `pred:CUST001` verbatim under the
    /// cache root. The namespace is the first `:` separated segment.
    pub fn raw(key: &str) -> Self {
        let namespace = key.split(':').next().unwrap_or(key).to_string();
        Self {
            namespace,
            rendered: format!("{}:{}", CACHE_ROOT, key),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Prefix covering every key of one namespace.
pub fn namespace_prefix(namespace: &str) -> String {
    scope_prefix(namespace, &[])
}

/// Prefix covering every key of `namespace` under the given scope segments.
pub fn scope_prefix(namespace: &str, scope: &[&str]) -> String {
    let mut prefix = format!("{}:{}:", CACHE_ROOT, escape_segment(namespace));
    for segment in scope {
        prefix.push_str(&escape_segment(segment));
        prefix.push(':');
    }
    prefix
}

/// Namespace of a rendered key, if it lives under the cache root.
pub fn namespace_of(rendered: &str) -> Option<&str> {
    rendered
        .strip_prefix(CACHE_ROOT)?
        .strip_prefix(':')?
        .split(':')
        .next()
}

fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace(':', "%3A")
}

/// Hex SHA-256 of the canonical form of `params`.
pub fn params_digest(params: &Value) -> String {
    format!("{:x}", Sha256::digest(canonical_json(params).as_bytes()))
}

/// Serializes `value` with object keys sorted and numbers normalized:
/// integral values print as integers (`1.0` and `1` agree), others in
/// shortest round-trip form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
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
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

// 2^53: beyond this f64 cannot represent every integer.
const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_F64 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}
