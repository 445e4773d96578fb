//! Import scanner
//!
//! Best-effort extraction of module names from guest source. This is a
//! token-level heuristic, not a parser: imports written inside string
//! literals are reported (harmless, the resolver drops unknown names) and
//! imports assembled at runtime are missed.

/// Extracts candidate module names from source text
pub trait ImportScanner: Send + Sync {
    fn scan(&self, source: &str) -> Vec<String>;
}

/// Default scanner recognizing `import a, b as c` and
/// `from x.y import (p, q as r)`, including relative `from .m import n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScanner;

impl ImportScanner for HeuristicScanner {
    fn scan(&self, source: &str) -> Vec<String> {
        scan_imports(source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Comma,
    Open,
    Close,
    Newline,
    Other,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'*')
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            // 续行符
            b'\\' if bytes.get(i + 1) == Some(&b'\n') => {
                i += 2;
                continue;
            }
            b' ' | b'\t' | b'\r' => {}
            b'\n' => tokens.push(Token::Newline),
            b',' => tokens.push(Token::Comma),
            b'(' => tokens.push(Token::Open),
            b')' => tokens.push(Token::Close),
            b if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(&source[start..i]));
                continue;
            }
            _ => tokens.push(Token::Other),
        }
        i += 1;
    }
    tokens
}

fn is_keyword(word: &str) -> bool {
    matches!(word, "import" | "from" | "as")
}

fn qualify(prefix: Option<&str>, name: &str) -> Option<String> {
    match prefix {
        None if name.bytes().any(|b| b.is_ascii_alphanumeric() || b == b'_') => {
            Some(name.to_string())
        }
        None => None,
        Some(prefix) if name == "*" => Some(prefix.to_string()),
        Some(prefix) if prefix.ends_with('.') => Some(format!("{prefix}{name}")),
        Some(prefix) => Some(format!("{prefix}.{name}")),
    }
}

/// Parse a name list starting at `pos`; returns the position after it.
fn parse_names(tokens: &[Token<'_>], mut pos: usize, prefix: Option<&str>, out: &mut Vec<String>) -> usize {
    let parenthesized = tokens.get(pos) == Some(&Token::Open);
    if parenthesized {
        pos += 1;
    }
    let skip_newlines = |mut pos: usize| {
        while parenthesized && tokens.get(pos) == Some(&Token::Newline) {
            pos += 1;
        }
        pos
    };

    loop {
        pos = skip_newlines(pos);
        let Some(Token::Word(name)) = tokens.get(pos) else {
            break;
        };
        if is_keyword(name) {
            break;
        }
        out.extend(qualify(prefix, name));
        pos += 1;

        if tokens.get(pos) == Some(&Token::Word("as")) {
            pos += 1;
            if matches!(tokens.get(pos), Some(Token::Word(_))) {
                pos += 1;
            }
        }

        pos = skip_newlines(pos);
        if tokens.get(pos) != Some(&Token::Comma) {
            break;
        }
        pos += 1;
    }

    pos = skip_newlines(pos);
    if parenthesized && tokens.get(pos) == Some(&Token::Close) {
        pos += 1;
    }
    pos
}

/// Scan `source` with the default heuristic
pub fn scan_imports(source: &str) -> Vec<String> {
    let tokens = tokenize(source);
    let mut names = Vec::new();
    let mut pos = 0;

    while pos < tokens.len() {
        pos = match tokens[pos] {
            Token::Word("import") => parse_names(&tokens, pos + 1, None, &mut names),
            Token::Word("from") => match (tokens.get(pos + 1), tokens.get(pos + 2)) {
                (Some(Token::Word(module)), Some(Token::Word("import"))) if !is_keyword(module) => {
                    parse_names(&tokens, pos + 3, Some(*module), &mut names)
                }
                _ => pos + 1,
            },
            _ => pos + 1,
        };
    }
    names
}
