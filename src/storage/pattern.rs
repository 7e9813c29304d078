//! Glob patterns for `KEYS` and `SCAN ... MATCH`.
//!
//! Only two wildcards exist: `*` matches any run of characters (including
//! none) and `?` matches exactly one. Every other character, `.`, `[` and
//! `\` included, matches itself. A pattern must match the whole key.

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Literal(char),
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        let tokens = pattern
            .chars()
            .map(|c| match c {
                '*' => Token::Any,
                '?' => Token::One,
                c => Token::Literal(c),
            })
            .collect();
        Self { tokens }
    }

    /// Matches a key. Non-UTF-8 bytes are compared as replacement characters.
    pub fn matches(&self, key: &[u8]) -> bool {
        let text: Vec<char> = String::from_utf8_lossy(key).chars().collect();
        self.matches_chars(&text)
    }

    /// Iterative wildcard match with single-star backtracking.
    fn matches_chars(&self, text: &[char]) -> bool {
        let (mut p, mut t) = (0, 0);
        // (pattern index after the last `*`, text index it was tried at)
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::Literal(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                }
                Some(Token::One) => {
                    p += 1;
                    t += 1;
                }
                Some(Token::Any) => {
                    p += 1;
                    star = Some((p, t));
                }
                _ => match star {
                    Some((sp, st)) => {
                        p = sp;
                        t = st + 1;
                        star = Some((sp, st + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens[p..].iter().all(|tok| *tok == Token::Any)
    }
}
