/// A single parameter value as it will be sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    /// Expands to one `key=value` pair per item.
    Multi(Vec<String>),
    /// Omitted from the request entirely. Distinct from `Single("")`.
    Absent,
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        Self::Single(value.clone())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Single(value.to_string())
    }
}

macro_rules! numeric_param {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ParamValue {
            fn from(value: $ty) -> Self {
                Self::Single(value.to_string())
            }
        })*
    };
}

numeric_param!(i32, i64, u32, u64, usize);

impl<T: ToString> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        Self::Multi(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: ToString, const N: usize> From<[T; N]> for ParamValue {
    fn from(values: [T; N]) -> Self {
        Self::Multi(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}

/// Ordered request parameters. Setting an existing key replaces its value in
/// place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, ParamValue)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `action=query&format=json&formatversion=2`.
    pub fn query() -> Self {
        Self::new()
            .with("action", "query")
            .with("format", "json")
            .with("formatversion", 2)
    }

    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| name == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wire pairs in insertion order, list values expanded and absent values
    /// dropped.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            match value {
                ParamValue::Single(value) => pairs.push((key.clone(), value.clone())),
                ParamValue::Multi(values) => {
                    pairs.extend(values.iter().map(|value| (key.clone(), value.clone())));
                }
                ParamValue::Absent => {}
            }
        }
        pairs
    }
}
