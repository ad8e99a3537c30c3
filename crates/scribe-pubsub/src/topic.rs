//! Per-document topic naming.

use scribe_core::constants::DOC_TOPIC_PREFIX;

/// Broadcast topic for a document's persisted edits.
pub fn doc_topic(doc_id: &str) -> String {
    format!("{DOC_TOPIC_PREFIX}{doc_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_carries_document_id() {
        assert_eq!(doc_topic("doc-42"), "editor.doc.doc-42");
    }
}
