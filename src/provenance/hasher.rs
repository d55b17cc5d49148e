//! BLAKE3 hashing for logical ids, templates, and assemblies.

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Short, upper-case path digest used as the logical id suffix.
///
/// Components are joined with `/` before hashing so `["a", "bc"]` and
/// `["ab", "c"]` never share a digest.
pub fn path_digest(components: &[&str]) -> String {
    let joined = components.join("/");
    let hex = blake3::hash(joined.as_bytes()).to_hex();
    hex[..8].to_ascii_uppercase()
}

/// Compute a composite hash from multiple component hashes.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}
