//! Identifier hygiene for inferred tables and columns.

/// SQL keywords that cannot be used bare as table or column names.
const RESERVED_WORDS: &[&str] = &[
    "add", "all", "alter", "and", "as", "asc", "between", "by", "case", "cast",
    "check", "column", "constraint", "create", "default", "delete", "desc",
    "distinct", "drop", "else", "end", "exists", "foreign", "from", "glob",
    "group", "having", "in", "index", "insert", "into", "is", "join", "key",
    "like", "limit", "not", "null", "offset", "on", "or", "order", "primary",
    "references", "select", "set", "table", "temp", "temporary", "then",
    "transaction", "trigger", "union", "unique", "update", "values", "view",
    "when", "where",
];

/// Sanitize a raw JSON key into a safe SQL identifier: lowercase
/// `[a-z0-9_]`, collapsed underscores, never starting with a digit,
/// suffixed on reserved-word collision.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for ch in raw.chars() {
        let mapped = match ch.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9') => c,
            _ => '_',
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }
    let out = out.trim_matches('_').to_string();

    if out.is_empty() {
        return "field".to_string();
    }

    let mut out = if out.starts_with(|c: char| c.is_ascii_digit()) {
        format!("f_{out}")
    } else {
        out
    };

    if RESERVED_WORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

/// Best-effort English singular for a JSON path key, used when no type
/// discriminator is present. `variants` -> `variant`, `studies` -> `study`.
pub fn singularize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["ches", "shes", "sses", "xes", "zes"] {
        if let Some(stem) = lower.strip_suffix(suffix) {
            if !stem.is_empty() {
                return format!("{stem}{}", &suffix[..suffix.len() - 2]);
            }
        }
    }
    if lower.ends_with('s') && !lower.ends_with("ss") && lower.len() > 1 {
        return lower[..lower.len() - 1].to_string();
    }
    lower
}

/// Double-quote an identifier for embedding into generated SQL.
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_mixed_input() {
        assert_eq!(sanitize_identifier("Gene Name"), "gene_name");
        assert_eq!(sanitize_identifier("clinVar--ID"), "clinvar_id");
        assert_eq!(sanitize_identifier("__typename"), "typename");
        assert_eq!(sanitize_identifier("123abc"), "f_123abc");
        assert_eq!(sanitize_identifier("!!!"), "field");
    }

    #[test]
    fn reserved_words_get_suffixed() {
        assert_eq!(sanitize_identifier("order"), "order_");
        assert_eq!(sanitize_identifier("GROUP"), "group_");
        assert_eq!(sanitize_identifier("ordering"), "ordering");
    }

    #[test]
    fn singularizes_common_plurals() {
        assert_eq!(singularize("variants"), "variant");
        assert_eq!(singularize("studies"), "study");
        assert_eq!(singularize("matches"), "match");
        assert_eq!(singularize("genes"), "gene");
        assert_eq!(singularize("status"), "statu");
        assert_eq!(singularize("class"), "class");
        assert_eq!(singularize("gene"), "gene");
    }

    #[test]
    fn quotes_embedded_quotes() {
        assert_eq!(quote_identifier("ok"), "\"ok\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
