// Lexer for .nnc program listings.
//
// Tokenizes a listing line by line. Entity references carry their sigil in
// the token type (`b3` is `Token::Buffer(3)`), so the parser never has to
// look at source text. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized words or characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

use crate::caps::Caps;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Instruction mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    AllocZeroed,
    AllocUndefined,
    Dealloc,
    Propagate,
    StoreStats,
    Backprop,
    Copy,
    Add,
    AddRows,
    CopyRows,
    AddRowsMulti,
    CopyRowsMulti,
    AddToRowsMulti,
    CopyToRowsMulti,
    AddRowRanges,
    NoOp,
    Marker,
}

impl Op {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::AllocZeroed => "alloc_zeroed",
            Op::AllocUndefined => "alloc_undefined",
            Op::Dealloc => "dealloc",
            Op::Propagate => "propagate",
            Op::StoreStats => "store_stats",
            Op::Backprop => "backprop",
            Op::Copy => "copy",
            Op::Add => "add",
            Op::AddRows => "add_rows",
            Op::CopyRows => "copy_rows",
            Op::AddRowsMulti => "add_rows_multi",
            Op::CopyRowsMulti => "copy_rows_multi",
            Op::AddToRowsMulti => "add_to_rows_multi",
            Op::CopyToRowsMulti => "copy_to_rows_multi",
            Op::AddRowRanges => "add_row_ranges",
            Op::NoOp => "noop",
            Op::Marker => "marker",
        }
    }

    /// Operand sigils in order, for error messages.
    pub fn signature(self) -> &'static str {
        match self {
            Op::AllocZeroed | Op::AllocUndefined | Op::Dealloc => "b",
            Op::Propagate => "k a v v",
            Op::StoreStats => "k v",
            Op::Backprop => "n a v v v v",
            Op::Copy | Op::Add => "v v",
            Op::AddRows | Op::CopyRows => "v v r",
            Op::AddRowsMulti | Op::CopyRowsMulti | Op::AddToRowsMulti | Op::CopyToRowsMulti => {
                "v p"
            }
            Op::AddRowRanges => "v v g",
            Op::NoOp | Op::Marker => "",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Listing token types.
///
/// Keywords, capability flags and mnemonics are fixed strings. References
/// are a one-letter sigil followed by a decimal index.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("component")]
    Component,
    #[token("node")]
    Node,
    #[token("precomputed")]
    Precomputed,
    #[token("buffer")]
    Buffer,
    #[token("view")]
    View,
    #[token("rows")]
    Rows,
    #[token("pairs")]
    Pairs,
    #[token("ranges")]
    Ranges,
    #[token("input")]
    Input,
    #[token("output")]
    Output,
    #[token("in")]
    In,
    #[token("out")]
    Out,

    // ── Capability flags ──
    #[token("propagate_in_place", |_| Caps::PROPAGATE_IN_PLACE)]
    #[token("backprop_in_place", |_| Caps::BACKPROP_IN_PLACE)]
    #[token("propagate_adds", |_| Caps::PROPAGATE_ADDS)]
    #[token("backprop_adds", |_| Caps::BACKPROP_ADDS)]
    #[token("stores_stats", |_| Caps::STORES_STATS)]
    #[token("updatable", |_| Caps::UPDATABLE)]
    #[token("simple", |_| Caps::SIMPLE)]
    #[token("backprop_needs_input", |_| Caps::BACKPROP_NEEDS_INPUT)]
    #[token("backprop_needs_output", |_| Caps::BACKPROP_NEEDS_OUTPUT)]
    Flag(Caps),

    // ── Mnemonics ──
    #[token("alloc_zeroed", |_| Op::AllocZeroed)]
    #[token("alloc_undefined", |_| Op::AllocUndefined)]
    #[token("dealloc", |_| Op::Dealloc)]
    #[token("propagate", |_| Op::Propagate)]
    #[token("store_stats", |_| Op::StoreStats)]
    #[token("backprop", |_| Op::Backprop)]
    #[token("copy", |_| Op::Copy)]
    #[token("add", |_| Op::Add)]
    #[token("add_rows", |_| Op::AddRows)]
    #[token("copy_rows", |_| Op::CopyRows)]
    #[token("add_rows_multi", |_| Op::AddRowsMulti)]
    #[token("copy_rows_multi", |_| Op::CopyRowsMulti)]
    #[token("add_to_rows_multi", |_| Op::AddToRowsMulti)]
    #[token("copy_to_rows_multi", |_| Op::CopyToRowsMulti)]
    #[token("add_row_ranges", |_| Op::AddRowRanges)]
    #[token("noop", |_| Op::NoOp)]
    #[token("marker", |_| Op::Marker)]
    Op(Op),

    // ── References ──
    #[regex(r"b[0-9]+", index)]
    BufferRef(u32),
    #[regex(r"v[0-9]+", index)]
    ViewRef(u32),
    #[regex(r"k[0-9]+", index)]
    ComponentRef(u32),
    #[regex(r"n[0-9]+", index)]
    NodeRef(u32),
    #[regex(r"a[0-9]+", index)]
    PrecomputedRef(u32),
    #[regex(r"r[0-9]+", index)]
    RowsRef(u32),
    #[regex(r"p[0-9]+", index)]
    PairsRef(u32),
    #[regex(r"g[0-9]+", index)]
    RangesRef(u32),
    /// Instruction label, as in `c12:`.
    #[regex(r"c[0-9]+", index)]
    Label(u32),

    // ── Symbols ──
    #[token("=")]
    Equals,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // ── Literals ──
    /// Signed decimal integer.
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    // ── Structure ──
    /// One or more newlines (significant, terminates a declaration).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Component => write!(f, "component"),
            Token::Node => write!(f, "node"),
            Token::Precomputed => write!(f, "precomputed"),
            Token::Buffer => write!(f, "buffer"),
            Token::View => write!(f, "view"),
            Token::Rows => write!(f, "rows"),
            Token::Pairs => write!(f, "pairs"),
            Token::Ranges => write!(f, "ranges"),
            Token::Input => write!(f, "input"),
            Token::Output => write!(f, "output"),
            Token::In => write!(f, "in"),
            Token::Out => write!(f, "out"),
            Token::Flag(c) => write!(f, "{c}"),
            Token::Op(op) => write!(f, "{op}"),
            Token::BufferRef(i) => write!(f, "b{i}"),
            Token::ViewRef(i) => write!(f, "v{i}"),
            Token::ComponentRef(i) => write!(f, "k{i}"),
            Token::NodeRef(i) => write!(f, "n{i}"),
            Token::PrecomputedRef(i) => write!(f, "a{i}"),
            Token::RowsRef(i) => write!(f, "r{i}"),
            Token::PairsRef(i) => write!(f, "p{i}"),
            Token::RangesRef(i) => write!(f, "g{i}"),
            Token::Label(i) => write!(f, "c{i}"),
            Token::Equals => write!(f, "="),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Newline => write!(f, "newline"),
        }
    }
}

// ── Callbacks ──

/// Index after the one-letter sigil; `None` on overflow.
fn index(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice()[1..].parse().ok()
}

// ── Public API ──

/// Lex a listing into tokens.
///
/// Returns all successfully lexed tokens together with any errors for
/// unrecognised input. Lexing is non-fatal: errors are collected and the
/// lexer continues past the bad input.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
