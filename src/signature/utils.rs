use ring::hmac;

/// HMAC-SHA256(key, msg), returned as raw bytes.
pub fn sign(key: &[u8], msg: &str) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, msg.as_bytes()).as_ref().to_vec()
}

/// hex(SHA256(msg)) — used for both the empty-payload hash and the
/// canonical-request hash in the string-to-sign.
pub fn hash(msg: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, msg.as_bytes());
    hex::encode(digest.as_ref())
}

pub fn merge(mut parts: Vec<String>, sep: &str) -> String {
    parts.sort();
    parts.join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_empty_string_is_the_well_known_sha256_constant() {
        assert_eq!(
            hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn merge_sorts_and_joins() {
        assert_eq!(
            merge(vec!["b".into(), "a".into(), "c".into()], ";"),
            "a;b;c"
        );
    }
}
