use crate::token::{Span, SpannedToken, Token};
use moonstack_core::number::str_to_number;
use moonstack_core::string::StringInterner;
use std::fmt;

/// Lexer error. The message already carries its `near '...'` suffix.
#[derive(Clone, Debug, PartialEq)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for LexError {}

/// Pull-based lexer. Names and string literals are interned into the
/// caller's interner so the compiled prototype can refer to them by id.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    current: Result<SpannedToken, LexError>,
    pub strings: &'a mut StringInterner,
    /// Source text of the current token, for "near" messages.
    pub token_text: String,
    /// Line of the last consumed token.
    pub lastline: u32,
    /// One-token lookahead with its source text.
    ahead: Option<(Result<SpannedToken, LexError>, String)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a [u8], strings: &'a mut StringInterner) -> Self {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
            current: Ok(SpannedToken {
                token: Token::Eof,
                span: Span { line: 1, column: 1 },
            }),
            strings,
            token_text: String::new(),
            lastline: 1,
            ahead: None,
        };
        lexer.skip_shebang();
        lexer.current = lexer.scan_token();
        lexer
    }

    /// Peek at the current token without consuming.
    pub fn current(&self) -> Result<&SpannedToken, &LexError> {
        self.current.as_ref()
    }

    /// Consume the current token and scan the next one.
    pub fn advance(&mut self) -> Result<SpannedToken, LexError> {
        if let Ok(tok) = &self.current {
            self.lastline = tok.span.line;
        }
        let next = match self.ahead.take() {
            Some((tok, text)) => {
                self.token_text = text;
                tok
            }
            None => self.scan_token(),
        };
        std::mem::replace(&mut self.current, next)
    }

    /// The token after the current one, scanned without consuming anything.
    pub fn peek_token(&mut self) -> Result<&Token, LexError> {
        if self.ahead.is_none() {
            let saved = std::mem::take(&mut self.token_text);
            let tok = self.scan_token();
            let text = std::mem::replace(&mut self.token_text, saved);
            self.ahead = Some((tok, text));
        }
        match &self.ahead {
            Some((Ok(t), _)) => Ok(&t.token),
            Some((Err(e), _)) => Err(e.clone()),
            None => Ok(&Token::Eof),
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Line of the current (unconsumed) token.
    pub fn token_line(&self) -> u32 {
        match &self.current {
            Ok(t) => t.span.line,
            Err(e) => e.line,
        }
    }

    /// `near 'x'` text for the current token.
    pub fn near(&self) -> String {
        match &self.current {
            Ok(SpannedToken { token: Token::Eof, .. }) => "<eof>".to_string(),
            _ => self.token_text.clone(),
        }
    }

    // ---- Internal scanning ----

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        match ch {
            b'\n' | b'\r' => {
                // \n\r and \r\n each count as one line break
                let other = if ch == b'\n' { b'\r' } else { b'\n' };
                if self.peek() == Some(other) {
                    self.pos += 1;
                }
                self.line += 1;
                self.column = 1;
            }
            _ => self.column += 1,
        }
        Some(ch)
    }

    fn skip_shebang(&mut self) {
        if self.source.starts_with(b"#") {
            while let Some(ch) = self.peek() {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                self.advance_char();
            }
        }
    }

    fn error(&self, message: String, span: Span) -> LexError {
        LexError {
            message,
            line: span.line,
            column: span.column,
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while let Some(b' ' | b'\t' | b'\n' | b'\r' | b'\x0B' | b'\x0C') = self.peek() {
                self.advance_char();
            }
            if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                let span = Span {
                    line: self.line,
                    column: self.column,
                };
                self.advance_char();
                self.advance_char();
                if let Some(level) = self.check_long_bracket() {
                    self.scan_long_string_content(level, span, "comment")?;
                    continue;
                }
                while let Some(ch) = self.peek() {
                    if ch == b'\n' || ch == b'\r' {
                        break;
                    }
                    self.advance_char();
                }
                continue;
            }
            return Ok(());
        }
    }

    /// Level of a `[=*[` opener at the cursor, if there is one.
    fn check_long_bracket(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(level + 1) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(level + 1) == Some(b'[')).then_some(level)
    }

    fn scan_token(&mut self) -> Result<SpannedToken, LexError> {
        self.skip_whitespace_and_comments()?;
        let start = self.pos;
        let result = self.scan_token_inner();
        self.token_text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        result
    }

    fn scan_token_inner(&mut self) -> Result<SpannedToken, LexError> {
        let span = Span {
            line: self.line,
            column: self.column,
        };
        let tok = |token| Ok(SpannedToken { token, span });

        let Some(ch) = self.peek() else {
            return tok(Token::Eof);
        };

        // two-character operators first
        let pair = |second: u8, yes: Token, no: Token| (second, yes, no);
        let compound = match ch {
            b'=' => Some(pair(b'=', Token::Equal, Token::Assign)),
            b'<' => Some(pair(b'=', Token::LessEq, Token::Less)),
            b'>' => Some(pair(b'=', Token::GreaterEq, Token::Greater)),
            _ => None,
        };
        if let Some((second, yes, no)) = compound {
            self.advance_char();
            if self.peek() == Some(second) {
                self.advance_char();
                return tok(yes);
            }
            return tok(no);
        }

        let single = match ch {
            b'+' => Some(Token::Plus),
            b'-' => Some(Token::Minus),
            b'*' => Some(Token::Star),
            b'/' => Some(Token::Slash),
            b'%' => Some(Token::Percent),
            b'^' => Some(Token::Caret),
            b'#' => Some(Token::Hash),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'{' => Some(Token::LBrace),
            b'}' => Some(Token::RBrace),
            b']' => Some(Token::RBracket),
            b';' => Some(Token::Semi),
            b':' => Some(Token::Colon),
            b',' => Some(Token::Comma),
            _ => None,
        };
        if let Some(t) = single {
            self.advance_char();
            return tok(t);
        }

        match ch {
            b'~' => {
                self.advance_char();
                if self.peek() == Some(b'=') {
                    self.advance_char();
                    tok(Token::NotEqual)
                } else {
                    Err(self.error("unexpected symbol near '~'".into(), span))
                }
            }
            b'.' => {
                if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                    return self.scan_number(span);
                }
                self.advance_char();
                if self.peek() != Some(b'.') {
                    return tok(Token::Dot);
                }
                self.advance_char();
                if self.peek() == Some(b'.') {
                    self.advance_char();
                    tok(Token::DotDotDot)
                } else {
                    tok(Token::DotDot)
                }
            }
            b'[' => match self.check_long_bracket() {
                Some(level) => {
                    let bytes = self.scan_long_string_content(level, span, "string")?;
                    tok(Token::String(self.strings.intern(&bytes)))
                }
                None => {
                    self.advance_char();
                    tok(Token::LBracket)
                }
            },
            b'"' | b'\'' => self.scan_short_string(span),
            b'0'..=b'9' => self.scan_number(span),
            _ if is_ident_start(ch) => self.scan_name(span),
            _ => {
                self.advance_char();
                let near = if ch.is_ascii_graphic() {
                    format!("'{}'", ch as char)
                } else {
                    format!("'char({ch})'")
                };
                Err(self.error(format!("unexpected symbol near {near}"), span))
            }
        }
    }

    fn scan_name(&mut self, span: Span) -> Result<SpannedToken, LexError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.advance_char();
        }
        let name = &self.source[start..self.pos];
        let token = match Token::keyword_from_str(name) {
            Some(keyword) => keyword,
            None => Token::Name(self.strings.intern(name)),
        };
        Ok(SpannedToken { token, span })
    }

    /// Numerals are read greedily (digits, dots, an exponent sign, and any
    /// trailing alphanumerics) and then validated as a whole.
    fn scan_number(&mut self, span: Span) -> Result<SpannedToken, LexError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'.') {
            self.advance_char();
        }
        if let Some(b'e' | b'E') = self.peek() {
            self.advance_char();
            if let Some(b'+' | b'-') = self.peek() {
                self.advance_char();
            }
        }
        while self.peek().is_some_and(|c| is_ident_continue(c) || c == b'.') {
            self.advance_char();
        }
        let text = &self.source[start..self.pos];
        match str_to_number(text) {
            Some(n) => Ok(SpannedToken {
                token: Token::Number(n),
                span,
            }),
            None => Err(self.error(
                format!("malformed number near '{}'", String::from_utf8_lossy(text)),
                span,
            )),
        }
    }

    fn string_near(&self, start: usize) -> String {
        let end = self.pos.min(self.source.len());
        format!("'{}'", String::from_utf8_lossy(&self.source[start..end]))
    }

    fn scan_short_string(&mut self, span: Span) -> Result<SpannedToken, LexError> {
        let start = self.pos;
        let Some(quote) = self.advance_char() else {
            return Err(self.error("unfinished string near '<eof>'".into(), span));
        };
        let mut buf = Vec::new();

        loop {
            match self.peek() {
                None => return Err(self.error("unfinished string near '<eof>'".into(), span)),
                Some(b'\n' | b'\r') => {
                    let near = self.string_near(start);
                    return Err(self.error(format!("unfinished string near {near}"), span));
                }
                Some(ch) if ch == quote => {
                    self.advance_char();
                    break;
                }
                Some(b'\\') => {
                    self.advance_char();
                    self.scan_escape(&mut buf, start, span)?;
                }
                Some(ch) => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }

        Ok(SpannedToken {
            token: Token::String(self.strings.intern(&buf)),
            span,
        })
    }

    fn scan_escape(&mut self, buf: &mut Vec<u8>, start: usize, span: Span) -> Result<(), LexError> {
        let Some(ch) = self.peek() else {
            return Err(self.error("unfinished string near '<eof>'".into(), span));
        };
        let simple = match ch {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0C),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0B),
            b'\n' | b'\r' => Some(b'\n'),
            _ => None,
        };
        if let Some(byte) = simple {
            self.advance_char();
            buf.push(byte);
            return Ok(());
        }
        match ch {
            b'x' => {
                self.advance_char();
                let mut value = 0u8;
                for _ in 0..2 {
                    match self.peek().and_then(hex_value) {
                        Some(d) => {
                            self.advance_char();
                            value = (value << 4) | d;
                        }
                        None => {
                            let near = self.string_near(start);
                            return Err(
                                self.error(format!("hexadecimal digit expected near {near}"), span)
                            );
                        }
                    }
                }
                buf.push(value);
            }
            b'z' => {
                self.advance_char();
                while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
                    self.advance_char();
                }
            }
            b'0'..=b'9' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 3 && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    value = value * 10 + (self.peek().unwrap_or(b'0') - b'0') as u32;
                    self.advance_char();
                    digits += 1;
                }
                if value > 255 {
                    let near = self.string_near(start);
                    return Err(self.error(format!("escape sequence too large near {near}"), span));
                }
                buf.push(value as u8);
            }
            // any other escaped character stands for itself
            _ => {
                self.advance_char();
                buf.push(ch);
            }
        }
        Ok(())
    }

    /// Body of a long bracket. The cursor is on the opening `[`.
    fn scan_long_string_content(
        &mut self,
        level: usize,
        span: Span,
        what: &str,
    ) -> Result<Vec<u8>, LexError> {
        for _ in 0..level + 2 {
            self.advance_char();
        }
        // a newline right after the opener is skipped
        if let Some(b'\n' | b'\r') = self.peek() {
            self.advance_char();
        }
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(
                        self.error(format!("unfinished long {what} near '<eof>'"), span)
                    );
                }
                Some(b']') if self.check_closing_long_bracket(level) => {
                    for _ in 0..level + 2 {
                        self.advance_char();
                    }
                    return Ok(buf);
                }
                Some(b'\n' | b'\r') => {
                    self.advance_char();
                    buf.push(b'\n');
                }
                Some(ch) => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }
    }

    fn check_closing_long_bracket(&self, level: usize) -> bool {
        (1..=level).all(|i| self.peek_at(i) == Some(b'=')) && self.peek_at(level + 1) == Some(b']')
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn hex_value(ch: u8) -> Option<u8> {
    (ch as char).to_digit(16).map(|d| d as u8)
}
