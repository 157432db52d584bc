//! Query keys.

use std::fmt;
use std::sync::Arc;

/// One segment of a [`QueryKey`].
///
/// Segments are plain values so that two keys built at different times compare
/// equal whenever their contents do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySegment {
    /// An explicit null segment.
    Null,
    /// A boolean segment.
    Bool(bool),
    /// An integer segment.
    Int(i64),
    /// A string segment.
    Str(String),
    /// A nested list of segments.
    List(Vec<KeySegment>),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Null => write!(f, "null"),
            KeySegment::Bool(b) => write!(f, "{}", b),
            KeySegment::Int(i) => write!(f, "{}", i),
            KeySegment::Str(s) => write!(f, "{:?}", s),
            KeySegment::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        KeySegment::Str(value.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        KeySegment::Str(value)
    }
}

impl From<&String> for KeySegment {
    fn from(value: &String) -> Self {
        KeySegment::Str(value.clone())
    }
}

impl From<bool> for KeySegment {
    fn from(value: bool) -> Self {
        KeySegment::Bool(value)
    }
}

macro_rules! int_segment {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeySegment {
                fn from(value: $ty) -> Self {
                    KeySegment::Int(value as i64)
                }
            }
        )*
    };
}

int_segment!(i8, i16, i32, i64, u8, u16, u32, isize);

impl<T: Into<KeySegment>> From<Option<T>> for KeySegment {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeySegment::Null, Into::into)
    }
}

impl<T: Into<KeySegment>> From<Vec<T>> for KeySegment {
    fn from(value: Vec<T>) -> Self {
        KeySegment::List(value.into_iter().map(Into::into).collect())
    }
}

/// Identifies one logical dataset in the cache.
///
/// Clone is cheap as segments are wrapped by `Arc`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QueryKey(Arc<[KeySegment]>);

impl QueryKey {
    /// Create a key from its segments.
    pub fn new(segments: impl IntoIterator<Item = KeySegment>) -> Self {
        QueryKey(segments.into_iter().collect())
    }

    /// The segments of this key.
    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `prefix` matches the leading segments of this key.
    ///
    /// Used for partial matching by query filters.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns a new key with `segment` appended.
    #[must_use]
    pub fn with(&self, segment: impl Into<KeySegment>) -> Self {
        let mut segments = self.0.to_vec();
        segments.push(segment.into());
        QueryKey(segments.into())
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", KeySegment::List(self.0.to_vec()))
    }
}

impl FromIterator<KeySegment> for QueryKey {
    fn from_iter<T: IntoIterator<Item = KeySegment>>(iter: T) -> Self {
        QueryKey::new(iter)
    }
}

impl From<Vec<KeySegment>> for QueryKey {
    fn from(segments: Vec<KeySegment>) -> Self {
        QueryKey(segments.into())
    }
}

impl From<&str> for QueryKey {
    fn from(value: &str) -> Self {
        QueryKey::new([KeySegment::from(value)])
    }
}

/// Build a [`QueryKey`] from a list of segment expressions.
///
/// ```
/// use reactive_query::query_key;
///
/// let key = query_key!["user", 42];
/// assert_eq!(key.to_string(), r#"["user", 42]"#);
/// ```
#[macro_export]
macro_rules! query_key {
    ($($segment:expr),* $(,)?) => {
        $crate::QueryKey::new([$($crate::KeySegment::from($segment)),*])
    };
}
