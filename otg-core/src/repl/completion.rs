//! Tab completion for the REPL line editor.
//!
//! The word under the cursor is matched against whatever the catalog allows
//! at that position: a command name first, then the argument kinds of the
//! chosen command. Works on `&str` slices only, so it runs on the MCU.

use heapless::Vec as HeaplessVec;

use super::catalog::{self, ArgKind};
use super::grammar::{self, TokenKind};

const MAX_SUGGESTIONS: usize = 20;

/// Candidates for the word under the cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionResult {
    /// Text to splice in when one candidate is left or all of them share a
    /// longer prefix than what was typed.
    pub replacement: Option<Replacement>,
    /// Every candidate that matches the typed prefix. Empty when nothing
    /// can follow.
    pub options: HeaplessVec<&'static str, MAX_SUGGESTIONS>,
}

impl CompletionResult {
    const fn empty() -> Self {
        Self {
            replacement: None,
            options: HeaplessVec::new(),
        }
    }
}

/// Byte range of the buffer to overwrite with `value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replacement {
    pub start: usize,
    pub end: usize,
    pub value: &'static str,
    /// A further argument is expected, so the editor should add a space.
    pub append_space: bool,
}

#[derive(Default)]
pub struct CompletionEngine;

impl CompletionEngine {
    pub const fn new() -> Self {
        Self
    }

    /// Completes the word that ends at `cursor`.
    ///
    /// `cursor` must sit on a character boundary; the editor only accepts
    /// ASCII, so every index qualifies.
    pub fn complete(&self, buffer: &str, cursor: usize) -> CompletionResult {
        let Some(line) = buffer.get(..cursor) else {
            return CompletionResult::empty();
        };
        let start = line
            .rfind(|c: char| c == ' ' || c == '\t')
            .map_or(0, |index| index + 1);
        let (head, word) = line.split_at(start);
        let Some(slot) = Slot::locate(head) else {
            return CompletionResult::empty();
        };

        let mut options = HeaplessVec::new();
        for candidate in slot.candidates() {
            if has_prefix(candidate, word) {
                let _ = options.push(*candidate);
            }
        }

        let chosen = match options.as_slice() {
            [] => None,
            [only] => Some((*only, slot.wants_space(only))),
            many => {
                let shared = shared_prefix(many);
                (shared.len() > word.len()).then_some((shared, false))
            }
        };

        CompletionResult {
            replacement: chosen.map(|(value, append_space)| Replacement {
                start,
                end: cursor,
                value,
                append_space,
            }),
            options,
        }
    }
}

/// What the word under the cursor stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Command,
    Argument { kind: ArgKind, more: bool },
}

impl Slot {
    // `head` is everything before the word being completed.
    fn locate(head: &str) -> Option<Self> {
        let tokens = grammar::lex(head).ok()?;
        let Some((keyword, arguments)) = tokens.as_slice().split_first() else {
            return Some(Slot::Command);
        };
        if tokens
            .iter()
            .any(|token| matches!(token.kind, TokenKind::Error | TokenKind::Eol))
        {
            return None;
        }

        let spec = catalog::find(keyword.lexeme)?;
        let position = arguments.len();
        let arg = spec.args.get(position)?;
        Some(Slot::Argument {
            kind: arg.kind,
            more: position + 1 < spec.args.len(),
        })
    }

    const fn candidates(self) -> &'static [&'static str] {
        match self {
            Slot::Command => catalog::command_names(),
            Slot::Argument { kind, .. } => kind.candidates(),
        }
    }

    fn wants_space(self, candidate: &str) -> bool {
        match self {
            Slot::Command => catalog::find(candidate).is_some_and(|spec| !spec.args.is_empty()),
            Slot::Argument { more, .. } => more,
        }
    }
}

fn has_prefix(candidate: &str, word: &str) -> bool {
    candidate
        .get(..word.len())
        .is_some_and(|start| start.eq_ignore_ascii_case(word))
}

// Candidates are ASCII, so any byte count is a valid split point.
fn shared_prefix(candidates: &[&'static str]) -> &'static str {
    let Some((first, rest)) = candidates.split_first() else {
        return "";
    };
    let len = rest.iter().fold(first.len(), |len, other| {
        first
            .bytes()
            .zip(other.bytes())
            .take(len)
            .take_while(|(a, b)| a.eq_ignore_ascii_case(b))
            .count()
    });
    &first[..len]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_options(
        result: CompletionResult,
    ) -> (
        Option<Replacement>,
        HeaplessVec<&'static str, MAX_SUGGESTIONS>,
    ) {
        assert!(
            !result.options.is_empty(),
            "expected suggestions but got no match"
        );
        (result.replacement, result.options)
    }

    #[test]
    fn offers_root_commands_from_empty_buffer() {
        let engine = CompletionEngine::new();
        let (replacement, options) = expect_options(engine.complete("", 0));
        assert!(replacement.is_none());
        assert_eq!(options.as_slice(), catalog::command_names());
    }

    #[test]
    fn expands_unique_root_command_with_space_for_arguments() {
        let engine = CompletionEngine::new();
        let (replacement, options) = expect_options(engine.complete("exp", 3));
        let replacement = replacement.expect("expected replacement");
        assert_eq!(replacement.start, 0);
        assert_eq!(replacement.end, 3);
        assert_eq!(replacement.value, "expire");
        assert!(replacement.append_space);
        assert_eq!(options.as_slice(), ["expire"]);
    }

    #[test]
    fn does_not_append_space_for_status_command() {
        let engine = CompletionEngine::new();
        let (replacement, _) = expect_options(engine.complete("statu", 5));
        let replacement = replacement.expect("expected replacement");
        assert_eq!(replacement.value, "status");
        assert!(!replacement.append_space);
    }

    #[test]
    fn narrows_signal_names_to_shared_prefix() {
        let engine = CompletionEngine::new();
        let (replacement, options) = expect_options(engine.complete("set b_sess", 10));
        let replacement = replacement.expect("expected shared prefix");
        assert_eq!(replacement.start, 4);
        assert_eq!(replacement.value, "b_sess_");
        assert_eq!(options.as_slice(), ["b_sess_end", "b_sess_vld"]);
    }

    #[test]
    fn signal_completion_leaves_room_for_level() {
        let engine = CompletionEngine::new();
        let (replacement, _) = expect_options(engine.complete("set a_bus_dr", 12));
        let replacement = replacement.expect("expected replacement");
        assert_eq!(replacement.value, "a_bus_drop");
        assert!(replacement.append_space);
    }

    #[test]
    fn suggests_levels_after_signal() {
        let engine = CompletionEngine::new();
        let (replacement, options) = expect_options(engine.complete("set a_bus_req ", 14));
        assert!(replacement.is_none());
        assert_eq!(options.as_slice(), ["on", "off"]);
    }

    #[test]
    fn suggests_timers_case_insensitively() {
        let engine = CompletionEngine::new();
        let (replacement, options) = expect_options(engine.complete("expire B_SRP", 12));
        let replacement = replacement.expect("expected replacement");
        assert_eq!(replacement.value, "b_srp_fail");
        assert!(!replacement.append_space);
        assert_eq!(options.as_slice(), ["b_srp_fail"]);
    }

    #[test]
    fn provides_help_topics() {
        let engine = CompletionEngine::new();
        let (replacement, options) = expect_options(engine.complete("help t", 6));
        assert!(replacement.is_none());
        assert_eq!(options.as_slice(), ["timeout", "trace"]);

        let (replacement, _) = expect_options(engine.complete("help ti", 7));
        let replacement = replacement.expect("expected replacement");
        assert_eq!(replacement.start, 5);
        assert_eq!(replacement.value, "timeout");
        assert!(!replacement.append_space);
    }

    #[test]
    fn nothing_follows_argumentless_commands() {
        let engine = CompletionEngine::new();
        let result = engine.complete("status ", 7);
        assert!(result.options.is_empty());
        assert!(result.replacement.is_none());
    }
}
