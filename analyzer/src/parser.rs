// Parser for .nnc program listings.
//
// Parses a token stream (from the lexer) into a listing AST. Uses chumsky
// combinators. Instruction operands are collected generically; their shape
// is checked against the mnemonic during assembly.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::id::*;
use crate::ir::EndpointRole;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub listing: Option<Listing>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a listing. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = listing_parser();
    let (listing, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        listing,
        errors: all_errors,
    }
}

// ── Main parser builder ──

fn listing_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Listing, extra::Err<Rich<'tokens, Token, SimpleSpan>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Terminals ──

    let int = select! { Token::Int(n) => n };
    let spanned_int = int.clone().map_with(|n, e| (n, e.span()));
    let buffer = select! { Token::BufferRef(i) => i };
    let view = select! { Token::ViewRef(i) => i };
    let component = select! { Token::ComponentRef(i) => i };
    let node = select! { Token::NodeRef(i) => i };
    let flag = select! { Token::Flag(c) => c };

    // ── component kN in=I out=O flag* ──

    let component_decl = just(Token::Component)
        .ignore_then(component.clone())
        .then_ignore(just(Token::In))
        .then_ignore(just(Token::Equals))
        .then(int.clone())
        .then_ignore(just(Token::Out))
        .then_ignore(just(Token::Equals))
        .then(int.clone())
        .then(flag.repeated().collect::<Vec<_>>())
        .map(|(((id, input_dim), output_dim), flags)| {
            ItemKind::Component(ComponentDecl {
                id,
                input_dim,
                output_dim,
                caps: flags.into_iter().fold(crate::caps::Caps::NONE, |a, b| a | b),
            })
        });

    // ── node nN role ──

    let node_role = choice((
        just(Token::Input).to(NodeRole::Input),
        just(Token::Output).to(NodeRole::Output),
        component.clone().map(NodeRole::Component),
    ));

    let node_decl = just(Token::Node)
        .ignore_then(node.clone())
        .then(node_role)
        .map(|(id, role)| ItemKind::Node(NodeDecl { id, role }));

    let precomputed_decl = just(Token::Precomputed)
        .ignore_then(int.clone())
        .map(ItemKind::Precomputed);

    // ── buffer / view ──

    let buffer_decl = just(Token::Buffer)
        .ignore_then(buffer.clone())
        .then(int.clone())
        .then(int.clone())
        .map(|((id, num_rows), num_cols)| {
            ItemKind::Buffer(BufferDecl {
                id,
                num_rows,
                num_cols,
            })
        });

    let view_decl = just(Token::View)
        .ignore_then(view.clone())
        .then(buffer.clone())
        .then(int.clone())
        .then(int.clone())
        .then(int.clone())
        .then(int.clone())
        .map(
            |(((((id, buffer), row_offset), num_rows), col_offset), num_cols)| {
                ItemKind::View(ViewDecl {
                    id,
                    buffer,
                    row_offset,
                    num_rows,
                    col_offset,
                    num_cols,
                })
            },
        );

    // ── Tables ──

    let rows_decl = just(Token::Rows)
        .ignore_then(select! { Token::RowsRef(i) => i })
        .then(
            spanned_int
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        )
        .map(|(id, rows)| ItemKind::Rows(RowsDecl { id, rows }));

    let pair_entry = choice((
        view.then_ignore(just(Token::Comma))
            .then(int.clone())
            .map(|(v, row)| PairEntry::View(v, row)),
        int.clone()
            .then_ignore(just(Token::Comma))
            .then(int.clone())
            .map(|(a, b)| PairEntry::Ints(a, b)),
    ))
    .delimited_by(just(Token::LParen), just(Token::RParen))
    .map_with(|entry, e| (entry, e.span()));

    let pairs_decl = just(Token::Pairs)
        .ignore_then(select! { Token::PairsRef(i) => i })
        .then(
            pair_entry
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        )
        .map(|(id, pairs)| ItemKind::Pairs(PairsDecl { id, pairs }));

    let range_entry = int
        .clone()
        .then_ignore(just(Token::Comma))
        .then(int)
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .map_with(|(start, end), e| (start, end, e.span()));

    let ranges_decl = just(Token::Ranges)
        .ignore_then(select! { Token::RangesRef(i) => i })
        .then(
            range_entry
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        )
        .map(|(id, ranges)| ItemKind::Ranges(RangesDecl { id, ranges }));

    // ── Endpoints ──

    let endpoint_decl = choice((
        just(Token::Input).to(EndpointRole::Input),
        just(Token::Output).to(EndpointRole::Output),
    ))
    .then(node)
    .then(buffer.clone())
    .then(buffer.or_not())
    .map(|(((role, node), value), deriv)| {
        ItemKind::Endpoint(EndpointDecl {
            role,
            node,
            value,
            deriv,
        })
    });

    // ── Instructions ──

    let operand = select! {
        Token::BufferRef(i) => Operand::Buffer(BufferId(i)),
        Token::ViewRef(i) => Operand::View(ViewId(i)),
        Token::ComponentRef(i) => Operand::Component(ComponentId(i)),
        Token::NodeRef(i) => Operand::Node(NodeId(i)),
        Token::PrecomputedRef(i) => Operand::Precomputed(PrecomputedId(i)),
        Token::RowsRef(i) => Operand::Rows(RowsTableId(i)),
        Token::PairsRef(i) => Operand::Pairs(PairsTableId(i)),
        Token::RangesRef(i) => Operand::Ranges(RangesTableId(i)),
    };

    let label = select! { Token::Label(i) = e => (i, e.span()) }.then_ignore(just(Token::Colon));

    let instr_stmt = label
        .or_not()
        .then(select! { Token::Op(op) => op })
        .then(operand.repeated().collect::<Vec<_>>())
        .map(|((label, op), operands)| ItemKind::Instr(InstrStmt { label, op, operands }));

    // ── Item dispatch ──

    let item = choice((
        component_decl,
        node_decl,
        precomputed_decl,
        buffer_decl,
        view_decl,
        rows_decl,
        pairs_decl,
        ranges_decl,
        endpoint_decl,
        instr_stmt,
    ))
    .map_with(|kind, e| Item {
        kind,
        span: e.span(),
    });

    // ── Listing ──

    nl.clone()
        .ignore_then(
            item.separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(|items, e| Listing {
            items,
            span: e.span(),
        })
}

// ── Tests ──
