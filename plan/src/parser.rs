//! Recursive-descent query parser with precedence OR < AND < NOT < atom.

use bumpalo::Bump;

use crate::error::ParseError;
use crate::streams::StreamConfiguration;
use crate::term::TermNode;

/// Bytes that end a gram; each must be backslash-escaped to appear in
/// one.
const SPECIAL: &[u8] = b"&|\\()\":-";

/// Byte-safe whitespace test.
///
/// The libc classifier this replaces trapped on high-bit bytes from
/// UTF-8 input; this accepts any byte value and treats only the six
/// ASCII space characters as whitespace.
pub(crate) fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

fn is_special(b: u8) -> bool {
    SPECIAL.contains(&b)
}

/// Escape `raw` so it parses back as a single literal gram: every
/// special byte and the common whitespace characters get a leading
/// backslash. Applying it twice escapes the inserted backslashes
/// again.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(
            c,
            ' ' | '\t' | '\x0C' | '\x0B' | '&' | '|' | '\\' | '(' | ')' | '"' | ':' | '-'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parse `input` into an arena-allocated term tree.
pub fn parse<'a>(
    input: &str,
    streams: &StreamConfiguration,
    arena: &'a Bump,
) -> Result<&'a TermNode<'a>, ParseError> {
    QueryParser::new(input, streams, arena).parse()
}

pub struct QueryParser<'a, 'i> {
    input: &'i [u8],
    pos: usize,
    streams: &'i StreamConfiguration,
    arena: &'a Bump,
}

impl<'a, 'i> QueryParser<'a, 'i> {
    pub fn new(input: &'i str, streams: &'i StreamConfiguration, arena: &'a Bump) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            streams,
            arena,
        }
    }

    /// Consume the whole input and return the root of the tree.
    pub fn parse(mut self) -> Result<&'a TermNode<'a>, ParseError> {
        let node = self.parse_or()?;
        self.skip_space();
        if self.pos < self.input.len() {
            return Err(ParseError::TrailingInput(self.pos));
        }
        Ok(node)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_space(&mut self) {
        while matches!(self.peek(), Some(b) if is_space(b)) {
            self.pos += 1;
        }
    }

    // OR := AND ( '|' AND )*
    fn parse_or(&mut self) -> Result<&'a TermNode<'a>, ParseError> {
        let mut children = vec![self.parse_and()?];
        loop {
            self.skip_space();
            if self.peek() == Some(b'|') {
                self.pos += 1;
                children.push(self.parse_and()?);
            } else {
                break;
            }
        }
        Ok(self.collapse(children, true))
    }

    // AND := UNARY ( ('&' | adjacency) UNARY )*
    fn parse_and(&mut self) -> Result<&'a TermNode<'a>, ParseError> {
        let mut children = vec![self.parse_unary()?];
        loop {
            self.skip_space();
            match self.peek() {
                Some(b'&') => {
                    self.pos += 1;
                    children.push(self.parse_unary()?);
                }
                // Anything that can start a primary continues the AND.
                None | Some(b'|') | Some(b')') => break,
                Some(_) => children.push(self.parse_unary()?),
            }
        }
        Ok(self.collapse(children, false))
    }

    fn collapse(&self, children: Vec<&'a TermNode<'a>>, or: bool) -> &'a TermNode<'a> {
        if children.len() == 1 {
            return children[0];
        }
        let children = self.arena.alloc_slice_copy(&children);
        self.arena.alloc(if or {
            TermNode::Or { children }
        } else {
            TermNode::And { children }
        })
    }

    // UNARY := '-' UNARY | PRIMARY
    fn parse_unary(&mut self) -> Result<&'a TermNode<'a>, ParseError> {
        self.skip_space();
        if self.peek() == Some(b'-') {
            self.pos += 1;
            let child = self.parse_unary()?;
            Ok(self.arena.alloc(TermNode::Not { child }))
        } else {
            self.parse_primary()
        }
    }

    // PRIMARY := '(' OR ')' | PHRASE | TERM
    fn parse_primary(&mut self) -> Result<&'a TermNode<'a>, ParseError> {
        self.skip_space();
        match self.peek() {
            None => Err(ParseError::EmptyExpression),
            Some(b'(') => {
                self.pos += 1;
                let node = self.parse_or()?;
                self.skip_space();
                if self.peek() != Some(b')') {
                    return Err(ParseError::UnbalancedParen);
                }
                self.pos += 1;
                Ok(node)
            }
            Some(b'"') => self.parse_phrase(),
            Some(_) => self.parse_term(),
        }
    }

    // TERM := [stream ':'] gram
    fn parse_term(&mut self) -> Result<&'a TermNode<'a>, ParseError> {
        let first = self.parse_gram()?;
        if self.peek() == Some(b':') {
            self.pos += 1;
            let stream = self
                .streams
                .stream_id(&first)
                .ok_or(ParseError::UnknownStream(first))?;
            let text = self.parse_gram()?;
            Ok(self.arena.alloc(TermNode::Unigram {
                text: self.arena.alloc_str(&text),
                stream,
            }))
        } else {
            Ok(self.arena.alloc(TermNode::Unigram {
                text: self.arena.alloc_str(&first),
                stream: 0,
            }))
        }
    }

    // PHRASE := '"' gram (whitespace gram)* '"'
    fn parse_phrase(&mut self) -> Result<&'a TermNode<'a>, ParseError> {
        self.pos += 1; // opening quote
        let mut grams: Vec<&'a str> = Vec::new();
        loop {
            self.skip_space();
            match self.peek() {
                None => return Err(ParseError::UnterminatedPhrase),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let gram = self.parse_gram()?;
                    grams.push(self.arena.alloc_str(&gram));
                }
            }
        }
        if grams.is_empty() {
            return Err(ParseError::EmptyGram);
        }
        Ok(self.arena.alloc(TermNode::Phrase {
            stream: 0,
            grams: self.arena.alloc_slice_copy(&grams),
        }))
    }

    /// One gram: non-special bytes plus `\X` escapes contributing the
    /// literal byte X.
    fn parse_gram(&mut self) -> Result<String, ParseError> {
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some(b'\\') => match self.input.get(self.pos + 1) {
                    Some(&escaped) => {
                        bytes.push(escaped);
                        self.pos += 2;
                    }
                    None => return Err(ParseError::DanglingEscape),
                },
                Some(b) if is_space(b) || is_special(b) => break,
                Some(b) => {
                    bytes.push(b);
                    self.pos += 1;
                }
            }
        }
        if bytes.is_empty() {
            return Err(ParseError::EmptyGram);
        }
        String::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)
    }
}
