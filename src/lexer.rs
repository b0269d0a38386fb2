//! Tokenizer for the C subset.
//!
//! Built on a `logos`-derived scanner. Tokens carry their raw text plus a
//! 1-based line/column pair; literal tokens additionally carry their decoded
//! values. Keywords are classified out of the identifier rule with a lookup
//! table, so the parser can match on token text for keywords and operators
//! and on `TokKind` for literal classes.

use logos::{FilterResult, Logos};

// `union` is tokenized as a keyword but no grammar rule accepts it; using
// it is a syntax error.
pub const KEYWORDS: [&str; 24] = [
    "bool", "break", "case", "char", "continue", "default", "do", "float", "for", "if", "else",
    "int", "return", "short", "signed", "struct", "switch", "union", "unsigned", "void", "while",
    "true", "false", "sizeof",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LexError {
    #[default]
    IllegalCharacter,
    UnterminatedBlockComment,
    UnmatchedSingleQuote,
    UnmatchedDoubleQuote,
}

impl LexError {
    pub fn message(&self) -> &'static str {
        match self {
            LexError::IllegalCharacter => "Illegal character",
            LexError::UnterminatedBlockComment => "Unterminated block comment",
            LexError::UnmatchedSingleQuote => "Unmatched single quote",
            LexError::UnmatchedDoubleQuote => "Unmatched double quote",
        }
    }
}

fn bad_single_quote(_lex: &mut logos::Lexer<RawTok>) -> FilterResult<(), LexError> {
    FilterResult::Error(LexError::UnmatchedSingleQuote)
}

fn bad_double_quote(_lex: &mut logos::Lexer<RawTok>) -> FilterResult<(), LexError> {
    FilterResult::Error(LexError::UnmatchedDoubleQuote)
}

fn block_comment(lex: &mut logos::Lexer<RawTok>) -> FilterResult<(), LexError> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            FilterResult::Error(LexError::UnterminatedBlockComment)
        }
    }
}

fn decode_char(slice: &str) -> Option<u8> {
    let inner = &slice[1..slice.len() - 1];
    let mut chars = inner.chars();
    let first = chars.next()?;
    if first != '\\' {
        return Some(first as u8);
    }
    match chars.next()? {
        'n' => Some(b'\n'),
        't' => Some(b'\t'),
        'b' => Some(0x08),
        '0' => Some(0),
        '\\' => Some(b'\\'),
        '\'' => Some(b'\''),
        '"' => Some(b'"'),
        '?' => Some(b'?'),
        other => Some(other as u8),
    }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"//[^\n]*")]
enum RawTok {
    #[token("\n")]
    Newline,

    #[token("/*", block_comment)]
    BlockComment,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    #[regex(r"0[0-7]+", |lex| i64::from_str_radix(&lex.slice()[1..], 8).ok())]
    #[regex(r"[1-9][0-9]*|0", |lex| lex.slice().parse::<i64>().ok())]
    IntConst(i64),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f32>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f32>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f32>().ok())]
    FloatConst(f32),

    #[regex(r"'(\\.|[^\\'\n])'", |lex| decode_char(lex.slice()).ok_or(LexError::UnmatchedSingleQuote))]
    CharConst(u8),

    #[regex(r"'[^'\n]*", callback = bad_single_quote, priority = 1)]
    BadChar,

    #[regex(r#""(\\.|[^"\\\n])*""#)]
    StrConst,

    #[regex(r#""[^"\n]*"#, callback = bad_double_quote, priority = 1)]
    BadStr,

    // Three-character operators first; logos picks the longest match anyway.
    #[token("<<=")]
    #[token(">>=")]
    #[token("+=")]
    #[token("-=")]
    #[token("*=")]
    #[token("/=")]
    #[token("%=")]
    #[token("&=")]
    #[token("|=")]
    #[token("^=")]
    #[token("&&")]
    #[token("||")]
    #[token("<<")]
    #[token(">>")]
    #[token("==")]
    #[token("!=")]
    #[token("<=")]
    #[token(">=")]
    #[token("++")]
    #[token("--")]
    #[token("->")]
    #[token("+")]
    #[token("-")]
    #[token("*")]
    #[token("/")]
    #[token("%")]
    #[token("=")]
    #[token("<")]
    #[token(">")]
    #[token("&")]
    #[token("|")]
    #[token("^")]
    #[token("~")]
    #[token("!")]
    #[token("?")]
    #[token(":")]
    #[token(";")]
    #[token(",")]
    #[token(".")]
    #[token("(")]
    #[token(")")]
    #[token("{")]
    #[token("}")]
    #[token("[")]
    #[token("]")]
    Op,
}

/// Coarse token class; keyword/operator identity lives in the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    Ident,
    Keyword,
    IntConst,
    FloatConst,
    CharConst,
    StrConst,
    Op,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokKind,
    pub text: String,
    pub line: usize,
    pub col: usize,
    pub int_val: i64,
    pub float_val: f32,
    pub char_val: u8,
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

impl Token {
    fn new(kind: TokKind, text: &str, line: usize, col: usize) -> Self {
        Token {
            kind,
            text: text.to_string(),
            line,
            col,
            int_val: 0,
            float_val: 0.0,
            char_val: 0,
        }
    }
}

/// A lexical diagnostic with its position.
#[derive(Debug, Clone)]
pub struct LexDiag {
    pub error: LexError,
    pub line: usize,
    pub col: usize,
    pub len: usize,
}

/// Scan the whole source. Returns the token stream and any lexical errors;
/// the stream covers everything that did scan, so the parser can still run
/// for error recovery when `diags` is non-empty.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexDiag>) {
    let mut tokens = Vec::new();
    let mut diags = Vec::new();
    let line_starts = line_start_table(source);

    let mut lexer = RawTok::lexer(source);
    while let Some(item) = lexer.next() {
        let span = lexer.span();
        let (line, col) = position(&line_starts, span.start);
        match item {
            Ok(RawTok::Newline) | Ok(RawTok::BlockComment) => {}
            Ok(RawTok::Ident) => {
                let text = lexer.slice();
                let kind = if KEYWORDS.contains(&text) {
                    TokKind::Keyword
                } else {
                    TokKind::Ident
                };
                tokens.push(Token::new(kind, text, line, col));
            }
            Ok(RawTok::IntConst(v)) => {
                let mut t = Token::new(TokKind::IntConst, lexer.slice(), line, col);
                t.int_val = v;
                tokens.push(t);
            }
            Ok(RawTok::FloatConst(v)) => {
                let mut t = Token::new(TokKind::FloatConst, lexer.slice(), line, col);
                t.float_val = v;
                tokens.push(t);
            }
            Ok(RawTok::CharConst(v)) => {
                let mut t = Token::new(TokKind::CharConst, lexer.slice(), line, col);
                t.char_val = v;
                t.int_val = v as i64;
                tokens.push(t);
            }
            Ok(RawTok::BadChar) | Ok(RawTok::BadStr) => unreachable!("always errors"),
            Ok(RawTok::StrConst) => {
                tokens.push(Token::new(TokKind::StrConst, lexer.slice(), line, col));
            }
            Ok(RawTok::Op) => {
                tokens.push(Token::new(TokKind::Op, lexer.slice(), line, col));
            }
            Err(e) => {
                diags.push(LexDiag {
                    error: e,
                    line,
                    col,
                    len: span.len().max(1),
                });
            }
        }
    }
    (tokens, diags)
}

fn line_start_table(source: &str) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// 1-based line and column for a byte offset.
fn position(starts: &[usize], offset: usize) -> (usize, usize) {
    let line = match starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i - 1,
    };
    (line + 1, offset - starts[line] + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<String> {
        let (toks, diags) = tokenize(src);
        assert!(diags.is_empty(), "unexpected diags: {:?}", diags);
        toks.into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn keywords_and_idents() {
        let (toks, _) = tokenize("int main while whiled");
        assert_eq!(toks[0].kind, TokKind::Keyword);
        assert_eq!(toks[1].kind, TokKind::Ident);
        assert_eq!(toks[2].kind, TokKind::Keyword);
        assert_eq!(toks[3].kind, TokKind::Ident);
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(texts("a <<= b >> c >= d"), vec!["a", "<<=", "b", ">>", "c", ">=", "d"]);
        assert_eq!(texts("p->x++ + ++y"), vec!["p", "->", "x", "++", "+", "++", "y"]);
    }

    #[test]
    fn integer_radixes_decode() {
        let (toks, _) = tokenize("10 0x1f 017 0");
        assert_eq!(toks[0].int_val, 10);
        assert_eq!(toks[1].int_val, 31);
        assert_eq!(toks[2].int_val, 15);
        assert_eq!(toks[3].int_val, 0);
    }

    #[test]
    fn float_forms() {
        let (toks, _) = tokenize("1.5 .25 2e3 1.0e-2");
        assert_eq!(toks[0].float_val, 1.5);
        assert_eq!(toks[1].float_val, 0.25);
        assert_eq!(toks[2].float_val, 2000.0);
        assert!((toks[3].float_val - 0.01).abs() < 1e-9);
    }

    #[test]
    fn char_escapes() {
        let (toks, _) = tokenize(r"'A' '\n' '\0' '\\'");
        assert_eq!(toks[0].char_val, b'A');
        assert_eq!(toks[1].char_val, b'\n');
        assert_eq!(toks[2].char_val, 0);
        assert_eq!(toks[3].char_val, b'\\');
    }

    #[test]
    fn line_and_column_are_one_based() {
        let (toks, _) = tokenize("int a;\n  float b;");
        assert_eq!((toks[0].line, toks[0].col), (1, 1));
        let f = toks.iter().find(|t| t.text == "float").unwrap();
        assert_eq!((f.line, f.col), (2, 3));
    }

    #[test]
    fn comments_are_skipped() {
        let t = texts("a /* x\ny */ b // tail\nc");
        assert_eq!(t, vec!["a", "b", "c"]);
    }

    #[test]
    fn unterminated_block_comment_reported() {
        let (_, diags) = tokenize("int a; /* no end");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].error, LexError::UnterminatedBlockComment);
    }

    #[test]
    fn unmatched_quotes_reported() {
        let (_, d1) = tokenize("char c = 'a;\n");
        assert!(d1.iter().any(|d| d.error == LexError::UnmatchedSingleQuote));
        let (_, d2) = tokenize("char *s = \"oops;\n");
        assert!(d2.iter().any(|d| d.error == LexError::UnmatchedDoubleQuote));
    }

    #[test]
    fn illegal_character_reported() {
        let (_, diags) = tokenize("int a = 3 @ 4;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].error, LexError::IllegalCharacter);
        assert_eq!(diags[0].line, 1);
    }
}
