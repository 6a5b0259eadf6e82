use serde_json::Value;

/// BLAKE3 digest of everything that determines how a resource materializes:
/// its type token and its resolved inputs.
///
/// Engines can compare fingerprints between runs to tell whether a resource
/// would change.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl<T> From<T> for Fingerprint
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Fingerprint(value.into())
    }
}

impl Fingerprint {
    pub(crate) fn of(kind: &str, inputs: &Value) -> Self {
        // serde_json keeps object keys sorted, so equal inputs render equally
        blake3::Hasher::new()
            .update(kind.as_bytes())
            .update(&[0])
            .update(inputs.to_string().as_bytes())
            .finalize()
            .into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_inputs_equal_fingerprints() {
        let a = Fingerprint::of("aws:s3:Bucket", &json!({"b": 1, "a": [true]}));
        let b = Fingerprint::of("aws:s3:Bucket", &json!({"a": [true], "b": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_type_is_part_of_fingerprint() {
        let inputs = json!({"bucket": "b-1"});
        assert_ne!(
            Fingerprint::of("aws:s3:Bucket", &inputs),
            Fingerprint::of("aws:s3:BucketObject", &inputs)
        );
    }

    #[test]
    fn test_hex() {
        let hex = Fingerprint::from([0xABu8; 32]).to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("abab"));
    }
}
