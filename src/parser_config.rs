/// Parser limits applied to untrusted input.
///
/// Every limit is a hard ceiling: exceeding one fails the parse, nothing is
/// skipped or repaired.
///
/// # Example
///
/// ```
/// use docseal::parser_config::ParserOptions;
///
/// let defaults = ParserOptions::default();
/// assert_eq!(defaults.max_object_depth, 64);
///
/// let tight = ParserOptions::default()
///     .with_max_size_bytes(64 * 1024)
///     .with_max_object_depth(16);
/// assert_eq!(tight.max_size_bytes, 64 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Maximum document size in bytes, checked before any tokenization
    pub max_size_bytes: usize,

    /// Maximum object depth
    ///
    /// Bounds both direct nesting of arrays/dictionaries inside one object
    /// and the length of indirect reference chains between objects.
    pub max_object_depth: usize,

    /// Maximum number of indirect objects
    pub max_objects: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_size_bytes: 20 * 1024 * 1024, // 20 MiB
            max_object_depth: 64,
            max_objects: 100_000,
        }
    }
}

impl ParserOptions {
    /// Set the size ceiling.
    pub fn with_max_size_bytes(mut self, max: usize) -> Self {
        self.max_size_bytes = max;
        self
    }

    /// Set the depth ceiling.
    pub fn with_max_object_depth(mut self, max: usize) -> Self {
        self.max_object_depth = max;
        self
    }

    /// Set the object count ceiling.
    pub fn with_max_objects(mut self, max: usize) -> Self {
        self.max_objects = max;
        self
    }
}
