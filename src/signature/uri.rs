/// RFC 3986 unreserved-character percent-encoding, as SigV4 requires for
/// both the canonical query string and the credential scope embedded in it.
/// `url`'s own encoders are tuned for `application/x-www-form-urlencoded`
/// (space becomes `+`) and aren't a drop-in match, so this stays hand-rolled
/// the way the corpus's other small SigV4 signers do it.
pub fn encode_uri(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
