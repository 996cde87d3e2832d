use std::collections::HashMap;

/// Maps stream names to caller-assigned stream ids.
///
/// A term without a stream prefix belongs to stream 0; prefixed terms
/// (`title:word`) resolve through this table, and an unregistered name
/// is a parse error.
#[derive(Debug, Clone, Default)]
pub struct StreamConfiguration {
    mappings: HashMap<String, u8>,
}

impl StreamConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with a caller-chosen stream id.
    pub fn add_mapping(&mut self, name: &str, id: u8) {
        self.mappings.insert(name.to_string(), id);
    }

    pub fn stream_id(&self, name: &str) -> Option<u8> {
        self.mappings.get(name).copied()
    }
}
