use xxhash_rust::xxh3::xxh3_128;

/// Maps an arbitrary string to a fixed-width cache key.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, input: &str) -> String;
}

/// xxh3-128 hasher with a namespace prefix, rendered as 32 lowercase hex chars.
#[derive(Debug, Clone)]
pub struct XxHasher {
    namespace: String,
}

impl XxHasher {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl KeyHasher for XxHasher {
    fn hash(&self, input: &str) -> String {
        let mut s = String::with_capacity(self.namespace.len() + 1 + input.len());
        s.push_str(&self.namespace);
        s.push(':');
        s.push_str(input);
        let hash = xxh3_128(s.as_bytes());
        format!("{hash:032x}")
    }
}
