//! JSONPath evaluation for data routing.
//!
//! Implements the restricted reference-path dialect the Amazon States
//! Language allows for InputPath/OutputPath/ResultPath: the root `$`,
//! dotted field access, and integer array indices. The fancier JSONPath
//! operators (`@`, `..`, `,`, `:`, `?`, `*`) are rejected at parse time.

use serde_json::Value;

use crate::error::PathError;

/// A validated path expression such as `$.detail.sum` or `$.items[2]`.
///
/// Both [`select`](JsonPath::select) and [`merge`](JsonPath::merge) are pure:
/// they never mutate their arguments and always return fresh values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

impl JsonPath {
    /// Parse and validate a path expression.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        if path.is_empty() || !path.starts_with('$') {
            return Err(PathError::MissingRoot(path.to_string()));
        }

        for operator in ["@", "..", ",", ":", "?", "*"] {
            if path.contains(operator) {
                return Err(PathError::UnsupportedOperator {
                    path: path.to_string(),
                    operator: operator.to_string(),
                });
            }
        }

        let mut segments = Vec::new();
        let mut rest = &path[1..];
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                let key = &after[..end];
                if key.is_empty() {
                    return Err(PathError::MalformedSegment {
                        path: path.to_string(),
                        segment: rest.to_string(),
                    });
                }
                segments.push(Segment::Key(key.to_string()));
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let Some(end) = after.find(']') else {
                    return Err(PathError::MalformedSegment {
                        path: path.to_string(),
                        segment: rest.to_string(),
                    });
                };
                let index = after[..end].parse::<usize>().map_err(|_| {
                    PathError::MalformedSegment {
                        path: path.to_string(),
                        segment: rest.to_string(),
                    }
                })?;
                segments.push(Segment::Index(index));
                rest = &after[end + 1..];
            } else {
                return Err(PathError::MalformedSegment {
                    path: path.to_string(),
                    segment: rest.to_string(),
                });
            }
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// The root path `$`, which selects and replaces the whole value.
    pub fn root() -> Self {
        Self {
            raw: "$".to_string(),
            segments: Vec::new(),
        }
    }

    /// Whether this is the bare root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Return the subvalue this path addresses within `value`.
    pub fn select(&self, value: &Value) -> Result<Value, PathError> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map
                    .get(key)
                    .ok_or_else(|| PathError::NotFound(self.raw.clone()))?,
                (Segment::Index(index), Value::Array(items)) => items
                    .get(*index)
                    .ok_or_else(|| PathError::NotFound(self.raw.clone()))?,
                _ => return Err(PathError::NotFound(self.raw.clone())),
            };
        }
        Ok(current.clone())
    }

    /// Return a copy of `value` with the addressed location replaced by
    /// `replacement`.
    ///
    /// The root path replaces the whole value. A non-root path creates or
    /// overwrites only the terminal key, leaving siblings untouched; every
    /// intermediate segment must already resolve to a container.
    pub fn merge(&self, value: &Value, replacement: Value) -> Result<Value, PathError> {
        if self.is_root() {
            return Ok(replacement);
        }

        let mut out = value.clone();
        let mut cursor = &mut out;
        let (last, intermediate) = self
            .segments
            .split_last()
            .ok_or_else(|| PathError::NotFound(self.raw.clone()))?;

        for segment in intermediate {
            cursor = match (segment, cursor) {
                (Segment::Key(key), Value::Object(map)) => map
                    .get_mut(key)
                    .ok_or_else(|| PathError::NotFound(self.raw.clone()))?,
                (Segment::Index(index), Value::Array(items)) => items
                    .get_mut(*index)
                    .ok_or_else(|| PathError::NotFound(self.raw.clone()))?,
                (segment, _) => {
                    return Err(PathError::NotAContainer {
                        path: self.raw.clone(),
                        segment: segment.describe(),
                    });
                }
            };
        }

        match (last, cursor) {
            (Segment::Key(key), Value::Object(map)) => {
                map.insert(key.clone(), replacement);
            }
            (Segment::Index(index), Value::Array(items)) => {
                if *index < items.len() {
                    items[*index] = replacement;
                } else if *index == items.len() {
                    items.push(replacement);
                } else {
                    return Err(PathError::NotFound(self.raw.clone()));
                }
            }
            (segment, _) => {
                return Err(PathError::NotAContainer {
                    path: self.raw.clone(),
                    segment: segment.describe(),
                });
            }
        }

        Ok(out)
    }
}

impl Segment {
    fn describe(&self) -> String {
        match self {
            Segment::Key(key) => key.clone(),
            Segment::Index(index) => format!("[{index}]"),
        }
    }
}

impl Default for JsonPath {
    fn default() -> Self {
        Self::root()
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
