//! Payee name normalization
//!
//! Every matching stage compares normalized names, so the transformation must be
//! deterministic and idempotent: `normalize_name(normalize_name(x)) == normalize_name(x)`.
//!
//! Steps:
//! 1. Case-fold to upper case and trim
//! 2. `&` becomes `AND`, apostrophes are dropped (`MCDONALD'S` → `MCDONALDS`)
//! 3. Punctuation other than the boundary characters `.` `,` `-` becomes a space
//! 4. Whitespace is collapsed, dangling boundary punctuation is trimmed
//! 5. Trailing legal-entity suffixes (`INC`, `L.L.C.`, `CORP`, ...) are removed
//!    while at least one other token remains

/// Characters that delimit tokens inside a normalized name
pub const BOUNDARY_CHARS: [char; 4] = [' ', '.', ',', '-'];

/// Legal-entity suffixes stripped from the end of a name (compared without dots/commas)
const LEGAL_SUFFIXES: &[&str] = &[
    "INC",
    "INCORPORATED",
    "LLC",
    "LLP",
    "LP",
    "LTD",
    "LIMITED",
    "CORP",
    "CORPORATION",
    "CO",
    "COMPANY",
    "PLLC",
    "PC",
    "PLC",
    "GMBH",
    "NA",
];

/// Normalize a free-text payee name for indexing and comparison
pub fn normalize_name(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        match ch {
            '&' => folded.push_str(" AND "),
            '\'' | '\u{2019}' | '`' | '"' => {}
            '.' | ',' | '-' => folded.push(ch),
            c if c.is_alphanumeric() => folded.extend(c.to_uppercase()),
            _ => folded.push(' '),
        }
    }

    let mut words: Vec<&str> = folded
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c == ',' || c == '-'))
        .filter(|w| !w.is_empty() && w.chars().any(|c| c.is_alphanumeric()))
        .collect();

    while words.len() > 1 {
        let last = words[words.len() - 1];
        let key: String = last.chars().filter(|c| *c != '.' && *c != ',').collect();
        if LEGAL_SUFFIXES.contains(&key.as_str()) {
            words.pop();
        } else {
            break;
        }
    }

    let joined = words.join(" ");
    joined
        .trim_end_matches(|c: char| BOUNDARY_CHARS.contains(&c))
        .to_string()
}

/// Split a normalized name into tokens on the boundary characters
pub fn tokens(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split(|c: char| BOUNDARY_CHARS.contains(&c))
        .filter(|t| !t.is_empty())
}

/// True when `c` is a token boundary character
pub fn is_boundary(c: char) -> bool {
    BOUNDARY_CHARS.contains(&c)
}
