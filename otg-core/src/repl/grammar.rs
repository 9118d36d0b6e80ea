#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the OTG REPL.
//!
//! The lexer uses `regal` to produce a bounded token stream and the parser
//! walks the [`catalog`](super::catalog) argument list with `winnow` parsers
//! over those tokens.

use super::catalog::{self, ArgKind, CommandSpec, CommandTag};
use core::fmt;
use core::ops::Range;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::Parser;
use winnow::error::ErrMode;

use crate::signals::{IdPin, Signal};
use crate::timers::OtgTimer;

/// Maximum number of tokens produced per REPL line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the REPL grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Duration literal ending in `us`, `ms` or `s`.
    #[regex(r"[0-9]+(?:us|ms|s)", priority = 2)]
    Duration,
    /// Unsuffixed integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// Identifier or keyword (case-insensitive match performed later).
    #[regex(r"[A-Za-z][A-Za-z0-9_-]*")]
    Ident,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer to avoid dynamic allocation in `no_std` environments.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    UnknownName {
        expected: &'static str,
        lexeme: &'a str,
        span: Range<usize>,
    },
    InvalidDuration {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::UnknownName {
                expected, lexeme, ..
            } => write!(f, "unknown {expected} `{lexeme}`"),
            GrammarErrorKind::InvalidDuration { span } => {
                write!(f, "invalid duration literal at {span:?}")
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Wrapper type enabling a consistent error surface for consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                None => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn unknown(expected: &'static str, token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::UnknownName {
                expected,
                lexeme: token.lexeme,
                span: token.span.clone(),
            },
        }
    }

    fn invalid_duration(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidDuration {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];
type PResult<'src, T> = Result<T, ErrMode<GrammarError<'src>>>;

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Set { signal: Signal, level: bool },
    Id(IdPin),
    Expire(OtgTimer),
    Wait(Duration),
    Timeout {
        timer: OtgTimer,
        duration: Option<Duration>,
    },
    Hnp,
    Run,
    Status,
    Trace,
    Help(HelpCommand<'a>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

pub(crate) fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut input = tokens;
    match command().parse_next(&mut input) {
        Ok(cmd) => Ok((cmd, input)),
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => Err(err),
        Err(ErrMode::Incomplete(_)) => Err(GrammarError::unexpected("token", input.first())),
    }
}

/// Tokenize the provided line.
///
/// # Errors
///
/// Fails when the line holds more than [`MAX_TOKENS`] tokens.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        push_token(
            &mut buffer,
            Token {
                kind: record.token,
                lexeme,
                span,
            },
        )?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let end = start + partial.fragment.len();
        push_token(
            &mut buffer,
            Token {
                kind: TokenKind::Error,
                lexeme: partial.fragment,
                span: start..end,
            },
        )?;
    }

    Ok(buffer)
}

fn push_token<'a>(buffer: &mut TokenBuffer<'a>, token: Token<'a>) -> Result<(), LexError> {
    buffer.push(token).map_err(|_| LexError::TooManyTokens {
        processed: MAX_TOKENS + 1,
    })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a REPL command from the provided line.
///
/// # Errors
///
/// Returns [`ParseError::Lex`] for lexer failures and
/// [`ParseError::Grammar`] for lines that do not match the catalog.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let (command, mut rest) =
        parse_tokens_partial(tokens.as_slice()).map_err(ParseError::Grammar)?;

    while let Some((token, remaining)) = rest.split_first() {
        if token.kind == TokenKind::Eol {
            rest = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "end of command",
                Some(token),
            )));
        }
    }

    Ok(command)
}

/// Argument values collected while walking a command's argument list.
#[derive(Default)]
struct Arguments<'src> {
    signal: Option<Signal>,
    level: Option<bool>,
    id: Option<IdPin>,
    timer: Option<OtgTimer>,
    duration: Option<Duration>,
    topic: Option<&'src str>,
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let keyword = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        let Some(spec) = catalog::find(keyword.lexeme) else {
            *input = snapshot;
            return Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&keyword),
            )));
        };

        let arguments = arguments(spec).parse_next(input)?;
        build(spec.tag, arguments)
    }
}

fn arguments<'src, 'slice>(
    spec: &'static CommandSpec,
) -> impl Parser<Input<'src, 'slice>, Arguments<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let mut arguments = Arguments::default();
        for arg in spec.args {
            let at_end = input
                .first()
                .is_none_or(|token| token.kind == TokenKind::Eol);
            if at_end {
                if arg.optional {
                    break;
                }
                return Err(ErrMode::Cut(GrammarError::unexpected(arg.label, None)));
            }
            argument(arg.kind, arg.label, input, &mut arguments)?;
        }
        Ok(arguments)
    }
}

fn argument<'src>(
    kind: ArgKind,
    label: &'static str,
    input: &mut Input<'src, '_>,
    arguments: &mut Arguments<'src>,
) -> PResult<'src, ()> {
    match kind {
        ArgKind::Signal => arguments.signal = Some(named(label, input, Signal::from_name)?),
        ArgKind::Level => arguments.level = Some(named(label, input, catalog::level_from_name)?),
        ArgKind::IdSide => arguments.id = Some(named(label, input, IdPin::from_name)?),
        ArgKind::Timer => arguments.timer = Some(named(label, input, OtgTimer::from_name)?),
        ArgKind::Duration => {
            let token = expect_kind(TokenKind::Duration, label)
                .parse_next(input)
                .map_err(cut)?;
            let duration = parse_duration(token.lexeme)
                .ok_or_else(|| ErrMode::Cut(GrammarError::invalid_duration(&token)))?;
            arguments.duration = Some(duration);
        }
        ArgKind::Topic => {
            let token = expect_word(label).parse_next(input).map_err(cut)?;
            arguments.topic = Some(token.lexeme);
        }
    }
    Ok(())
}

fn named<'src, T>(
    label: &'static str,
    input: &mut Input<'src, '_>,
    lookup: fn(&str) -> Option<T>,
) -> PResult<'src, T> {
    let token = expect_word(label).parse_next(input).map_err(cut)?;
    lookup(token.lexeme).ok_or_else(|| ErrMode::Cut(GrammarError::unknown(label, &token)))
}

fn build(tag: CommandTag, arguments: Arguments<'_>) -> PResult<'_, Command<'_>> {
    Ok(match tag {
        CommandTag::Set => Command::Set {
            signal: required(arguments.signal, "signal")?,
            level: required(arguments.level, "level")?,
        },
        CommandTag::Id => Command::Id(required(arguments.id, "side")?),
        CommandTag::Expire => Command::Expire(required(arguments.timer, "timer")?),
        CommandTag::Wait => Command::Wait(required(arguments.duration, "duration")?),
        CommandTag::Timeout => Command::Timeout {
            timer: required(arguments.timer, "timer")?,
            duration: arguments.duration,
        },
        CommandTag::Hnp => Command::Hnp,
        CommandTag::Run => Command::Run,
        CommandTag::Status => Command::Status,
        CommandTag::Trace => Command::Trace,
        CommandTag::Help => Command::Help(HelpCommand {
            topic: arguments.topic,
        }),
    })
}

fn required<'src, T>(slot: Option<T>, label: &'static str) -> PResult<'src, T> {
    slot.ok_or_else(|| ErrMode::Cut(GrammarError::unexpected(label, None)))
}

fn cut(error: ErrMode<GrammarError<'_>>) -> ErrMode<GrammarError<'_>> {
    match error {
        ErrMode::Backtrack(inner) => ErrMode::Cut(inner),
        other => other,
    }
}

/// Accepts identifiers and bare integers (`set a_bus_req 1`).
fn expect_word<'src, 'slice>(
    expected: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if matches!(token.kind, TokenKind::Ident | TokenKind::Integer) => {
            let token = token.clone();
            *input = rest;
            Ok(token)
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            expected,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(expected, None))),
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    expected: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            let token = token.clone();
            *input = rest;
            Ok(token)
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            expected,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(expected, None))),
    }
}

fn parse_duration(lexeme: &str) -> Option<Duration> {
    if let Some(value) = lexeme.strip_suffix("us") {
        value.parse().ok().map(Duration::from_micros)
    } else if let Some(value) = lexeme.strip_suffix("ms") {
        value.parse().ok().map(Duration::from_millis)
    } else {
        lexeme
            .strip_suffix('s')
            .and_then(|value| value.parse().ok())
            .map(Duration::from_secs)
    }
}
