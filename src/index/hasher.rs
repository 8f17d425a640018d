/// BLAKE3 over the lesson lines, each terminated by `\n`. Stable as long as
/// the lesson order and wording are unchanged.
pub fn content_hash<S: AsRef<str>>(lines: &[S]) -> String {
    let mut hasher = blake3::Hasher::new();
    for line in lines {
        hasher.update(line.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
