// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! A line-oriented dotenv parser.
//!
//! Lines are trimmed after stripping a trailing `\r`, a leading `export ` is
//! removed, and blank lines and lines starting with `#` are skipped. The
//! remainder is split at the first `=`. Values may be double-quoted (with
//! `\n`, `\r`, `\t`, `\\`, `\"` and `\$` escapes), single-quoted (literal),
//! or unquoted (with ` #` starting an inline comment). When a key is
//! repeated within a file, the last assignment wins.

use snafu::Snafu;

// `parse` returns the assignments of `src` in file order; the caller applies
// last-wins by inserting the pairs into a map in order.
pub fn parse(src: &str) -> Result<Vec<(String, String)>, ParseEnvError> {
    let mut pairs = vec![];

    for (i, raw_line) in src.lines().enumerate() {
        let line_num = i + 1;

        // `str::lines` doesn't strip `\r` from files with CRLF endings.
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line).trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

        let (raw_key, raw_value) = line.split_once('=')
            .ok_or(ParseEnvError::MissingSeparator{line: line_num})?;

        let key = raw_key.trim();
        if key.is_empty() {
            return Err(ParseEnvError::EmptyKey{line: line_num});
        }

        let value = parse_value(raw_value, line_num)?;

        pairs.push((key.to_string(), value));
    }

    Ok(pairs)
}

fn parse_value(raw: &str, line_num: usize) -> Result<String, ParseEnvError> {
    let trimmed = raw.trim_start();

    match trimmed.chars().next() {
        Some('"') => {
            parse_double_quoted(&trimmed[1..], line_num)
        },
        Some('\'') => {
            parse_single_quoted(&trimmed[1..], line_num)
        },
        _ => {
            Ok(strip_inline_comment(trimmed).trim_end().to_string())
        },
    }
}

fn parse_double_quoted(conts: &str, line_num: usize)
    -> Result<String, ParseEnvError>
{
    let mut value = String::new();
    let mut chars = conts.chars();

    loop {
        let c =
            match chars.next() {
                Some(c) => c,
                None => {
                    let e = ParseEnvError::UnterminatedDoubleQuote{
                        line: line_num,
                    };

                    return Err(e);
                },
            };

        match c {
            '"' => {
                // Anything after the closing quote is ignored.
                return Ok(value);
            },
            '\\' => {
                match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('$') => value.push('$'),
                    // Unknown escapes keep the backslash.
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    },
                    None => {
                        let e = ParseEnvError::UnterminatedDoubleQuote{
                            line: line_num,
                        };

                        return Err(e);
                    },
                }
            },
            _ => {
                value.push(c);
            },
        }
    }
}

fn parse_single_quoted(conts: &str, line_num: usize)
    -> Result<String, ParseEnvError>
{
    match conts.split_once('\'') {
        Some((value, _rest)) => {
            Ok(value.to_string())
        },
        None => {
            Err(ParseEnvError::UnterminatedSingleQuote{line: line_num})
        },
    }
}

// An inline comment starts at the first `#` that is preceded by a space; a
// `#` without a preceding space is part of the value.
fn strip_inline_comment(value: &str) -> &str {
    match value.find(" #") {
        Some(i) => &value[..i],
        None => value,
    }
}

#[derive(Debug, Snafu)]
pub enum ParseEnvError {
    #[snafu(display("line {}: missing `=`", line))]
    MissingSeparator{line: usize},
    #[snafu(display("line {}: the key is empty", line))]
    EmptyKey{line: usize},
    #[snafu(display("line {}: unterminated double-quoted value", line))]
    UnterminatedDoubleQuote{line: usize},
    #[snafu(display("line {}: unterminated single-quoted value", line))]
    UnterminatedSingleQuote{line: usize},
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use indoc::indoc;
    use maplit::hashmap;

    use super::*;

    fn parse_to_map(src: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (k, v) in parse(src).expect("couldn't parse dotenv source") {
            map.insert(k, v);
        }

        map
    }

    #[test]
    fn parses_unquoted_values() {
        let map = parse_to_map(indoc!{"
            A=1
            B=hello world
            C=  padded
        "});

        assert_eq!(map, hashmap!{
            "A".to_string() => "1".to_string(),
            "B".to_string() => "hello world".to_string(),
            "C".to_string() => "padded".to_string(),
        });
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let map = parse_to_map(indoc!{"

            # This is a comment.
            A=1

            # Another comment.
        "});

        assert_eq!(map, hashmap!{"A".to_string() => "1".to_string()});
    }

    #[test]
    fn strips_export_prefix() {
        let map = parse_to_map("export A=1\n");

        assert_eq!(map, hashmap!{"A".to_string() => "1".to_string()});
    }

    #[test]
    fn strips_carriage_returns() {
        let map = parse_to_map("A=1\r\nB=2\r\n");

        assert_eq!(map, hashmap!{
            "A".to_string() => "1".to_string(),
            "B".to_string() => "2".to_string(),
        });
    }

    #[test]
    fn parses_double_quoted_escapes() {
        let map = parse_to_map(indoc!{r#"
            A="line1\nline2"
            B="tab\there"
            C="quote\"inside"
            D="back\\slash"
            E="dollar\$sign"
            F="cr\rhere"
        "#});

        assert_eq!(map, hashmap!{
            "A".to_string() => "line1\nline2".to_string(),
            "B".to_string() => "tab\there".to_string(),
            "C".to_string() => "quote\"inside".to_string(),
            "D".to_string() => "back\\slash".to_string(),
            "E".to_string() => "dollar$sign".to_string(),
            "F".to_string() => "cr\rhere".to_string(),
        });
    }

    #[test]
    fn unknown_escape_keeps_backslash() {
        let map = parse_to_map(r#"A="a\xb""#);

        assert_eq!(map, hashmap!{"A".to_string() => r"a\xb".to_string()});
    }

    #[test]
    fn parses_single_quoted_literally() {
        let map = parse_to_map(r"A='no \n escapes $HERE'");

        assert_eq!(
            map,
            hashmap!{
                "A".to_string() => r"no \n escapes $HERE".to_string(),
            },
        );
    }

    #[test]
    fn trims_inline_comments_from_unquoted_values() {
        let map = parse_to_map(indoc!{"
            A=value # comment
            B=value#not-a-comment
        "});

        assert_eq!(map, hashmap!{
            "A".to_string() => "value".to_string(),
            "B".to_string() => "value#not-a-comment".to_string(),
        });
    }

    #[test]
    fn hash_inside_quotes_is_not_a_comment() {
        let map = parse_to_map(r#"A="value # kept""#);

        assert_eq!(
            map,
            hashmap!{"A".to_string() => "value # kept".to_string()},
        );
    }

    #[test]
    fn last_repeated_key_wins() {
        let map = parse_to_map(indoc!{"
            A=first
            A=second
        "});

        assert_eq!(map, hashmap!{"A".to_string() => "second".to_string()});
    }

    #[test]
    fn empty_value_is_allowed() {
        let map = parse_to_map("A=\n");

        assert_eq!(map, hashmap!{"A".to_string() => String::new()});
    }

    #[test]
    fn missing_separator_is_an_error_with_line_number() {
        let result = parse("A=1\nnot-an-assignment\n");

        assert_matches!(
            result,
            Err(ParseEnvError::MissingSeparator{line: 2})
        );
    }

    #[test]
    fn empty_key_is_an_error() {
        let result = parse("=value\n");

        assert_matches!(result, Err(ParseEnvError::EmptyKey{line: 1}));
    }

    #[test]
    fn unterminated_double_quote_is_an_error() {
        let result = parse("A=\"oops\n");

        assert_matches!(
            result,
            Err(ParseEnvError::UnterminatedDoubleQuote{line: 1})
        );
    }

    #[test]
    fn unterminated_single_quote_is_an_error() {
        let result = parse("A='oops\n");

        assert_matches!(
            result,
            Err(ParseEnvError::UnterminatedSingleQuote{line: 1})
        );
    }
}
