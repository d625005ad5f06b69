//! Lazy, allocation-free token scanner. Tokens borrow their lexeme
//! directly from the source text; nothing is copied until the compiler
//! decides to intern an identifier or string literal.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // single-character
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // one or two character
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // literals
    Identifier,
    String,
    Number,

    // keywords
    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,

    Error,
    Eof,
}

#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
}

pub struct Scanner<'src> {
    source: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Scanner<'src> {
        Scanner { source: source.as_bytes(), start: 0, current: 0, line: 1 }
    }

    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        if c.is_ascii_digit() {
            return self.number();
        }
        if is_alpha(c) {
            return self.identifier();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b';' => self.make_token(TokenKind::Semicolon),
            b'+' => self.make_token(TokenKind::Plus),
            b'-' => self.make_token(TokenKind::Minus),
            b'*' => self.make_token(TokenKind::Star),
            b'/' => self.make_token(TokenKind::Slash),
            b'!' => {
                let kind = if self.matches(b'=') { TokenKind::BangEqual } else { TokenKind::Bang };
                self.make_token(kind)
            }
            b'=' => {
                let kind =
                    if self.matches(b'=') { TokenKind::EqualEqual } else { TokenKind::Equal };
                self.make_token(kind)
            }
            b'>' => {
                let kind =
                    if self.matches(b'=') { TokenKind::GreaterEqual } else { TokenKind::Greater };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') { TokenKind::LessEqual } else { TokenKind::Less };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.source[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() {
            0
        } else {
            self.source[self.current + 1]
        }
    }

    fn advance(&mut self) -> u8 {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    /// Skips whitespace and `//` line comments; there is no block-comment
    /// syntax in Ember.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b'\n' => {
                    self.line += 1;
                    self.current += 1;
                }
                b' ' | b'\r' | b'\t' => {
                    self.current += 1;
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.current += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.current += 1;
        }
        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }
        self.current += 1; // closing quote
        self.make_token(TokenKind::String)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_ascii_digit() {
            self.current += 1;
        }
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.current += 1;
            while self.peek().is_ascii_digit() {
                self.current += 1;
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || self.peek().is_ascii_digit() {
            self.current += 1;
        }
        self.make_token(self.identifier_kind())
    }

    /// Dispatches on the leading character, then confirms the remaining
    /// suffix, rather than a general keyword hash lookup — the trie shape
    /// the original scanner uses.
    fn identifier_kind(&self) -> TokenKind {
        let lexeme = &self.source[self.start..self.current];
        match lexeme.first() {
            Some(b'a') => self.check_keyword(1, "nd", TokenKind::And),
            Some(b'c') => self.check_keyword(1, "lass", TokenKind::Class),
            Some(b'e') => self.check_keyword(1, "lse", TokenKind::Else),
            Some(b'f') if lexeme.len() > 1 => match lexeme[1] {
                b'a' => self.check_keyword(2, "lse", TokenKind::False),
                b'o' => self.check_keyword(2, "r", TokenKind::For),
                b'u' => self.check_keyword(2, "n", TokenKind::Fun),
                _ => TokenKind::Identifier,
            },
            Some(b'i') => self.check_keyword(1, "f", TokenKind::If),
            Some(b'n') => self.check_keyword(1, "il", TokenKind::Nil),
            Some(b'o') => self.check_keyword(1, "r", TokenKind::Or),
            Some(b'p') => self.check_keyword(1, "rint", TokenKind::Print),
            Some(b'r') => self.check_keyword(1, "eturn", TokenKind::Return),
            Some(b's') => self.check_keyword(1, "uper", TokenKind::Super),
            Some(b't') if lexeme.len() > 1 => match lexeme[1] {
                b'h' => self.check_keyword(2, "is", TokenKind::This),
                b'r' => self.check_keyword(2, "ue", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            Some(b'v') => self.check_keyword(1, "ar", TokenKind::Var),
            Some(b'w') => self.check_keyword(1, "hile", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    fn check_keyword(&self, offset: usize, rest: &str, kind: TokenKind) -> TokenKind {
        let lexeme = &self.source[self.start..self.current];
        let candidate = &lexeme[offset.min(lexeme.len())..];
        if candidate.as_bytes() == rest.as_bytes() {
            kind
        } else {
            TokenKind::Identifier
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        // Safety: every byte between `start` and `current` was sourced
        // from the caller's `&str`, and the scanner only ever advances on
        // ASCII boundaries or inside a string literal that itself started
        // and ends on an ASCII quote, so the slice is always valid UTF-8.
        let lexeme = std::str::from_utf8(&self.source[self.start..self.current]).unwrap();
        Token { kind, lexeme, line: self.line }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token { kind: TokenKind::Error, lexeme: message, line: self.line }
    }
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let token = scanner.scan_token();
            let done = token.kind == TokenKind::Eof;
            out.push(token.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_keywords_and_identifiers_distinctly() {
        assert_eq!(kinds("for fork"), vec![TokenKind::For, TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(
            kinds("this that"),
            vec![TokenKind::This, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn skips_line_comments_but_not_slash_operator() {
        let ks = kinds("1 / 2 // trailing comment\n3");
        assert_eq!(
            ks,
            vec![TokenKind::Number, TokenKind::Slash, TokenKind::Number, TokenKind::Number, TokenKind::Eof]
        );
    }

    #[test]
    fn scans_numbers_with_optional_fraction() {
        let mut scanner = Scanner::new("12.5");
        let t = scanner.scan_token();
        assert_eq!(t.kind, TokenKind::Number);
        assert_eq!(t.lexeme, "12.5");
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut scanner = Scanner::new("\"abc");
        let t = scanner.scan_token();
        assert_eq!(t.kind, TokenKind::Error);
    }

    #[test]
    fn tracks_line_numbers_across_newlines() {
        let mut scanner = Scanner::new("1\n2\n3");
        assert_eq!(scanner.scan_token().line, 1);
        assert_eq!(scanner.scan_token().line, 2);
        assert_eq!(scanner.scan_token().line, 3);
    }
}
