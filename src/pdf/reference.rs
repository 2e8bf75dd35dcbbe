//! Indirect object identity

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::parser::Tokenizer;

/// `(id, generation)` pair naming an indirect object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub id: u32,
    pub generation: u16,
}

impl Reference {
    pub const fn new(id: u32, generation: u16) -> Self {
        Self { id, generation }
    }

    /// Parse `<id> <gen> R`
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Tokenizer::new(bytes).parse_ref_at(0).map(|r| r.value)
    }

    /// Encode as `<id> <gen> R`
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.id, self.generation)
    }
}
