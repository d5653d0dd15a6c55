//! Value escaping and splitting helpers for criterion values

/// Escape SQL LIKE meta-characters so user input is treated literally.
pub(crate) fn escape_like_pattern(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Split a newline-delimited list value. Lines are trimmed and blanks dropped.
pub(crate) fn split_list_values(raw: &str) -> Vec<&str> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Quote a SQL identifier.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_meta_characters_are_escaped() {
        assert_eq!(escape_like_pattern("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like_pattern("Acme"), "Acme");
    }

    #[test]
    fn list_values_split_on_newlines() {
        assert_eq!(
            split_list_values("US\r\n  CA \n\nMX\n"),
            vec!["US", "CA", "MX"]
        );
        assert!(split_list_values(" \n ").is_empty());
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("order_number"), "\"order_number\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
