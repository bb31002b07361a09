use sha2::{Digest, Sha256};

/// Digest over several fields, separated so that `["ab", "c"]` and
/// `["a", "bc"]` hash differently.
pub fn content_address(parts: &[&str]) -> String {
    let mut h = Sha256::new();
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            h.update([0x1f]);
        }
        h.update((p.len() as u64).to_le_bytes());
        h.update(p.as_bytes());
    }
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_address_separates_fields() {
        assert_ne!(content_address(&["ab", "c"]), content_address(&["a", "bc"]));
        assert_eq!(content_address(&["x", "y"]), content_address(&["x", "y"]));
        assert_eq!(content_address(&["abc"]).len(), 64);
    }
}
