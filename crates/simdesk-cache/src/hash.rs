use sha2::{Digest, Sha256};

/// Strong ETag for a body: the quoted lowercase hex SHA-256 of its bytes.
pub fn content_tag(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("\"{:x}\"", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bodies_same_tag() {
        assert_eq!(content_tag(b"[{\"capital\":100}]"), content_tag(b"[{\"capital\":100}]"));
    }

    #[test]
    fn distinct_bodies_distinct_tags() {
        assert_ne!(content_tag(b"[]"), content_tag(b"[ ]"));
        assert_ne!(content_tag(b"hello"), content_tag(b"world"));
    }

    #[test]
    fn tag_is_quoted_hex() {
        let tag = content_tag(b"");
        assert_eq!(
            tag,
            "\"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\""
        );
    }
}
