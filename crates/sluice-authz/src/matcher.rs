/// Glob match where `*` stands for any run of bytes, including none.
///
/// Used for ACL subject patterns such as `svc-*` or `*@ingest`.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern = pattern.as_bytes();
    let value = value.as_bytes();
    let mut pi = 0usize;
    let mut vi = 0usize;
    // Last star seen and the value position it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while vi < value.len() {
        match pattern.get(pi) {
            Some(b'*') => {
                backtrack = Some((pi, vi));
                pi += 1;
            }
            Some(&byte) if byte == value[vi] => {
                pi += 1;
                vi += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    pi = star + 1;
                    vi = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }
    pattern[pi..].iter().all(|byte| *byte == b'*')
}
