//! Command template expansion: `${name}` and `$arg1..$arg20` substitution.

use std::collections::BTreeMap;

/// Highest positional placeholder recognized by [`expand`].
const MAX_POSITIONAL: u32 = 20;

/// Expand `${name}` and `$arg1..$arg20` placeholders against `args`.
///
/// Unbound placeholders collapse to the empty string. Substitution is a
/// single pass: values are never re-scanned for further placeholders.
pub fn expand(cmd: &str, args: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(cmd.len());
    let bytes = cmd.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            // Copy the full UTF-8 character, not just one byte.
            let ch_len = utf8_len(bytes[i]);
            out.push_str(&cmd[i..i + ch_len]);
            i += ch_len;
            continue;
        }

        // `${name}`
        if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(close) = cmd[i + 2..].find('}') {
                let name = &cmd[i + 2..i + 2 + close];
                if is_var_name(name) {
                    if let Some(v) = args.get(name) {
                        out.push_str(v);
                    }
                    i += 2 + close + 1;
                    continue;
                }
            }
            // No closing brace, or junk between the braces: literal text.
            out.push('$');
            i += 1;
            continue;
        }

        // `$argN`
        if cmd[i + 1..].starts_with("arg") {
            let digits: String = cmd[i + 4..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                if let Ok(n) = digits.parse::<u32>() {
                    if (1..=MAX_POSITIONAL).contains(&n) {
                        let key = format!("arg{n}");
                        if let Some(v) = args.get(&key) {
                            out.push_str(v);
                        }
                        i += 4 + digits.len();
                        continue;
                    }
                }
            }
        }

        out.push('$');
        i += 1;
    }

    out
}

/// Collect the distinct `${name}` references in a command, in first-seen
/// order. Used by the selective global merge and missing-argument checks.
pub fn referenced_vars(cmd: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut rest = cmd;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if is_var_name(name) && !seen.iter().any(|s| s == name) {
                    seen.push(name.to_string());
                }
                rest = if is_var_name(name) {
                    &after[end + 1..]
                } else {
                    // Junk between braces: resume scanning just past `${`.
                    after
                };
            }
            None => break,
        }
    }
    seen
}

/// Placeholder names are identifier-like: alphanumerics plus `_`, `.`, `-`.
fn is_var_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >> 5 == 0b110 => 2,
        b if b >> 4 == 0b1110 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_named_substitution() {
        let a = args(&[("mode", "release"), ("jobs", "8")]);
        assert_eq!(
            expand("make -j${jobs} MODE=${mode}", &a),
            "make -j8 MODE=release"
        );
    }

    #[test]
    fn test_unbound_collapses_to_empty() {
        let a = args(&[]);
        assert_eq!(expand("echo [${missing}]", &a), "echo []");
    }

    #[test]
    fn test_positional_substitution() {
        let a = args(&[("arg1", "alpha"), ("arg2", "beta")]);
        assert_eq!(expand("run $arg1 then $arg2 then $arg3", &a), "run alpha then beta then ");
    }

    #[test]
    fn test_no_recursive_expansion() {
        let a = args(&[("x", "${y}"), ("y", "deep")]);
        assert_eq!(expand("echo ${x}", &a), "echo ${y}");
    }

    #[test]
    fn test_dollar_without_braces_passes_through() {
        let a = args(&[]);
        assert_eq!(expand("echo $HOME $$", &a), "echo $HOME $$");
    }

    #[test]
    fn test_unterminated_brace_left_alone() {
        let a = args(&[("x", "1")]);
        assert_eq!(expand("echo ${x then ${x}", &a), "echo ${x then 1");
        assert_eq!(expand("tail ${x", &a), "tail ${x");
    }

    #[test]
    fn test_positional_beyond_range_untouched() {
        let a = args(&[("arg21", "nope")]);
        assert_eq!(expand("run $arg21", &a), "run $arg21");
    }

    #[test]
    fn test_referenced_vars_order_and_dedup() {
        let vars = referenced_vars("a ${x} b ${y} c ${x} ${db.host}");
        assert_eq!(vars, vec!["x", "y", "db.host"]);
    }

    #[test]
    fn test_referenced_vars_none() {
        assert!(referenced_vars("plain command $arg1").is_empty());
    }
}
