use std::fmt;

/// Name of a cached collection, e.g. `posts`.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct QueryKey(pub String);

impl QueryKey {
    pub fn new(name: impl Into<String>) -> Self {
        QueryKey(name.into())
    }

    pub fn feed() -> Self {
        QueryKey::new("posts")
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
