//! JSON pointers used for field selection, sorting and patching

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pointer into a JSON document (`/a/b/0`)
///
/// The leading `/` is optional when parsing, so the field names a client
/// sends (`name,address/city`) parse the same as their absolute forms. The
/// empty string and `/` both denote the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct JsonPointer {
    tokens: Vec<String>,
}

impl JsonPointer {
    /// The root pointer
    #[must_use]
    pub const fn root() -> Self {
        Self { tokens: Vec::new() }
    }

    /// Parse a pointer, unescaping `~1` and `~0`
    pub fn parse(pointer: &str) -> Self {
        let trimmed = pointer.trim();
        let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Self::root();
        }
        let tokens = trimmed
            .split('/')
            .map(|t| t.replace("~1", "/").replace("~0", "~"))
            .collect();
        Self { tokens }
    }

    /// Build a pointer from unescaped tokens
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// Unescaped tokens
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Whether this is the root pointer
    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Last token
    pub fn leaf(&self) -> Option<&str> {
        self.tokens.last().map(String::as_str)
    }

    /// Pointer to the parent container
    pub fn parent(&self) -> Option<Self> {
        let (_, head) = self.tokens.split_last()?;
        Some(Self {
            tokens: head.to_vec(),
        })
    }

    /// Append a token
    #[must_use]
    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.into());
        Self { tokens }
    }

    /// Whether this pointer equals `other` or is a prefix of it
    pub fn is_prefix_of(&self, other: &JsonPointer) -> bool {
        other.tokens.starts_with(&self.tokens)
    }

    /// Whether this pointer is a proper prefix of `other`
    pub fn is_strict_prefix_of(&self, other: &JsonPointer) -> bool {
        self.tokens.len() < other.tokens.len() && other.tokens.starts_with(&self.tokens)
    }

    /// Resolve against a document
    pub fn get<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.tokens
            .iter()
            .try_fold(document, |current, token| step(current, token))
    }

    /// Resolve mutably against a document
    pub fn get_mut<'a>(&self, document: &'a mut Value) -> Option<&'a mut Value> {
        let mut current = document;
        for token in &self.tokens {
            current = match current {
                Value::Object(map) => map.get_mut(token)?,
                Value::Array(items) => {
                    let index = token.parse::<usize>().ok()?;
                    items.get_mut(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set the value at this pointer
    ///
    /// The parent must already exist and be an object or an array. For an
    /// array the token `-` appends. Returns `false` when nothing was written.
    pub fn set(&self, document: &mut Value, value: Value) -> bool {
        let Some((leaf, _)) = self.tokens.split_last() else {
            *document = value;
            return true;
        };
        let Some(container) = self.parent().and_then(|p| p.get_mut(document)) else {
            return false;
        };
        match container {
            Value::Object(map) => {
                map.insert(leaf.clone(), value);
                true
            }
            Value::Array(items) if leaf == "-" => {
                items.push(value);
                true
            }
            Value::Array(items) => match leaf.parse::<usize>() {
                Ok(index) if index < items.len() => {
                    items[index] = value;
                    true
                }
                Ok(index) if index == items.len() => {
                    items.push(value);
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Set the value at this pointer, creating missing parents
    ///
    /// A missing parent becomes an array when the token below it is `-` or
    /// an index, and an object otherwise. Existing array elements are never
    /// created, so an out-of-range index still fails. Returns `false` when
    /// the value was not written; parents created on the way are kept.
    pub fn set_permissive(&self, document: &mut Value, value: Value) -> bool {
        let Some((leaf, parents)) = self.tokens.split_last() else {
            *document = value;
            return true;
        };
        let mut current = document;
        for (depth, token) in parents.iter().enumerate() {
            let below = self.tokens[depth + 1].as_str();
            current = match current {
                Value::Object(map) => map
                    .entry(token.clone())
                    .or_insert_with(|| empty_container(below)),
                Value::Array(items) => match token.parse::<usize>() {
                    Ok(index) if index < items.len() => &mut items[index],
                    _ => return false,
                },
                _ => return false,
            };
        }
        Self::from_tokens([leaf.clone()]).set(current, value)
    }

    /// Remove and return the value at this pointer
    pub fn remove(&self, document: &mut Value) -> Option<Value> {
        let (leaf, _) = self.tokens.split_last()?;
        let container = self.parent()?.get_mut(document)?;
        match container {
            Value::Object(map) => map.remove(leaf),
            Value::Array(items) => {
                let index = leaf.parse::<usize>().ok()?;
                (index < items.len()).then(|| items.remove(index))
            }
            _ => None,
        }
    }
}

fn empty_container(token: &str) -> Value {
    if token == "-" || token.parse::<usize>().is_ok() {
        Value::Array(Vec::new())
    } else {
        Value::Object(serde_json::Map::new())
    }
}

fn step<'a>(current: &'a Value, token: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => map.get(token),
        Value::Array(items) => items.get(token.parse::<usize>().ok()?),
        _ => None,
    }
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tokens.is_empty() {
            return f.write_str("/");
        }
        for token in &self.tokens {
            write!(f, "/{}", token.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

impl FromStr for JsonPointer {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for JsonPointer {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for JsonPointer {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<JsonPointer> for String {
    fn from(pointer: JsonPointer) -> Self {
        pointer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        assert_eq!(JsonPointer::parse("/a/b").tokens(), ["a", "b"]);
        assert_eq!(JsonPointer::parse("a/b"), JsonPointer::parse("/a/b"));
        assert!(JsonPointer::parse("").is_root());
        assert!(JsonPointer::parse("/").is_root());
        assert_eq!(JsonPointer::parse("/a~1b/c~0d").tokens(), ["a/b", "c~d"]);
        assert_eq!(JsonPointer::parse("/a~1b/c~0d").to_string(), "/a~1b/c~0d");
        assert_eq!(JsonPointer::root().to_string(), "/");
    }

    #[test]
    fn test_get() {
        let doc = json!({"a": {"b": [10, 20]}, "c": null});
        assert_eq!(JsonPointer::parse("/a/b/1").get(&doc), Some(&json!(20)));
        assert_eq!(JsonPointer::parse("/c").get(&doc), Some(&Value::Null));
        assert_eq!(JsonPointer::parse("/a/x").get(&doc), None);
        assert_eq!(JsonPointer::parse("/a/b/9").get(&doc), None);
        assert_eq!(JsonPointer::root().get(&doc), Some(&doc));
    }

    #[test]
    fn test_prefix() {
        let a = JsonPointer::parse("/a");
        let ab = JsonPointer::parse("/a/b");
        assert!(a.is_strict_prefix_of(&ab));
        assert!(!ab.is_strict_prefix_of(&a));
        assert!(!a.is_strict_prefix_of(&a));
        assert!(a.is_prefix_of(&a));
        assert!(a.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
        assert!(JsonPointer::root().is_strict_prefix_of(&a));
    }

    #[test]
    fn test_set_and_remove() {
        let mut doc = json!({"a": {"list": [1]}});
        assert!(JsonPointer::parse("/a/b").set(&mut doc, json!("x")));
        assert!(JsonPointer::parse("/a/list/-").set(&mut doc, json!(2)));
        assert!(!JsonPointer::parse("/missing/b").set(&mut doc, json!(1)));
        assert_eq!(doc, json!({"a": {"b": "x", "list": [1, 2]}}));

        assert_eq!(JsonPointer::parse("/a/list/0").remove(&mut doc), Some(json!(1)));
        assert_eq!(JsonPointer::parse("/a/b").remove(&mut doc), Some(json!("x")));
        assert_eq!(JsonPointer::parse("/a/b").remove(&mut doc), None);
        assert_eq!(doc, json!({"a": {"list": [2]}}));
    }

    #[test]
    fn test_set_permissive() {
        let mut doc = json!({"uid": "bjensen", "roles": ["sales", "marketing"]});
        assert!(JsonPointer::parse("/contact/mobile").set_permissive(&mut doc, json!("+33 6")));
        assert!(JsonPointer::parse("/contact/fixed").set_permissive(&mut doc, json!("+33 4")));
        assert!(JsonPointer::parse("/uid").set_permissive(&mut doc, json!("trigden")));
        assert!(JsonPointer::parse("/roles/0").set_permissive(&mut doc, json!("hr")));
        assert!(JsonPointer::parse("/groups/-").set_permissive(&mut doc, json!({"id": "m"})));
        assert_eq!(
            doc,
            json!({
                "uid": "trigden",
                "roles": ["hr", "marketing"],
                "contact": {"mobile": "+33 6", "fixed": "+33 4"},
                "groups": [{"id": "m"}]
            })
        );

        assert!(!JsonPointer::parse("/roles/10").set_permissive(&mut doc, json!("it")));
        assert!(!JsonPointer::parse("/uid/first").set_permissive(&mut doc, json!("x")));
        assert!(!JsonPointer::parse("/roles/7/name").set_permissive(&mut doc, json!("x")));
    }
}
