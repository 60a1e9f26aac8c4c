//! The report text handed to every agent.

use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Immutable document text, cheap to clone into each agent task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    text: Arc<str>,
}

impl Document {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Hex SHA-256 of the text, recorded on reports for audit.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl From<&str> for Document {
    fn from(text: &str) -> Self {
        Document::new(text)
    }
}

impl From<String> for Document {
    fn from(text: String) -> Self {
        Document::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_content_sensitive() {
        let a = Document::from("annual report 2024");
        let b = Document::from("annual report 2024");
        let c = Document::from("annual report 2025");
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_clone_shares_text() {
        let doc = Document::from(String::from("body"));
        let copy = doc.clone();
        assert_eq!(copy.as_str(), "body");
        assert_eq!(copy.len(), 4);
        assert!(!copy.is_empty());
    }
}
