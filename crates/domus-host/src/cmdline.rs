//! Splitting a parameter blob into an argument list.
//!
//! Follows the Windows command-line rules used for arguments after the
//! program name:
//!
//! - Spaces and tabs outside double quotes separate arguments.
//! - A double quote toggles quoted mode and is not part of the argument.
//! - Inside quoted mode, `""` is a literal double quote.
//! - `2n` backslashes followed by a quote produce `n` backslashes, and the
//!   quote toggles quoted mode. `2n + 1` backslashes followed by a quote
//!   produce `n` backslashes and a literal quote.
//! - Backslashes not followed by a quote are literal.
//! - An unterminated quote runs to the end of the blob.

use thiserror::Error;

/// A blob that cannot be turned into an argument list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandLineError {
    #[error("command line contains a NUL character at offset {0}")]
    InteriorNul(usize),
}

/// Split `blob` into arguments.
pub fn split_command_line(blob: &str) -> Result<Vec<String>, CommandLineError> {
    if let Some(offset) = blob.find('\0') {
        return Err(CommandLineError::InteriorNul(offset));
    }

    let mut args = Vec::new();
    let mut current = String::new();
    // An argument has started even if it is still empty, e.g. after `""`.
    let mut in_arg = false;
    let mut quoted = false;
    let mut backslashes = 0usize;
    let mut chars = blob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                backslashes += 1;
                in_arg = true;
            }
            '"' => {
                current.extend(std::iter::repeat_n('\\', backslashes / 2));
                let escaped = backslashes % 2 == 1;
                backslashes = 0;
                in_arg = true;

                if escaped {
                    current.push('"');
                } else if quoted && chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = !quoted;
                }
            }
            ' ' | '\t' if !quoted => {
                current.extend(std::iter::repeat_n('\\', backslashes));
                backslashes = 0;
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            other => {
                current.extend(std::iter::repeat_n('\\', backslashes));
                backslashes = 0;
                current.push(other);
                in_arg = true;
            }
        }
    }

    current.extend(std::iter::repeat_n('\\', backslashes));
    if in_arg {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(blob: &str) -> Vec<String> {
        split_command_line(blob).unwrap()
    }

    #[test]
    fn test_whitespace_separation() {
        assert_eq!(split("--x 1  --y\t2"), vec!["--x", "1", "--y", "2"]);
        assert!(split("").is_empty());
        assert!(split("   \t ").is_empty());
    }

    #[test]
    fn test_quotes_group_arguments() {
        assert_eq!(split(r#""a b" c"#), vec!["a b", "c"]);
        assert_eq!(split(r#"pre"fix suf"fix"#), vec!["prefix suffix"]);
        assert_eq!(split(r#""" x"#), vec!["", "x"]);
    }

    #[test]
    fn test_doubled_quote_inside_quotes() {
        assert_eq!(split(r#""say ""hi"" now""#), vec![r#"say "hi" now"#]);
    }

    #[test]
    fn test_backslash_rules() {
        assert_eq!(split(r#"a\\b"#), vec![r#"a\\b"#]);
        assert_eq!(split(r#"a\"b"#), vec![r#"a"b"#]);
        assert_eq!(split(r#""a\\" b"#), vec![r#"a\"#, "b"]);
        assert_eq!(split(r#"a\\\"b"#), vec![r#"a\"b"#]);
        assert_eq!(split(r#"C:\path\ x"#), vec![r#"C:\path\"#, "x"]);
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(split(r#"a "b c"#), vec!["a", "b c"]);
    }

    #[test]
    fn test_nul_is_rejected() {
        assert_eq!(
            split_command_line("a\0b"),
            Err(CommandLineError::InteriorNul(1))
        );
    }
}
