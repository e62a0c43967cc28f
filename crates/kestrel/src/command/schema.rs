//! Declarative argument schema (spec §4.10): the trailing, order-independent
//! token arguments a command accepts after its fixed positional prefix (e.g.
//! `SET key value [EX s|PX ms|EXAT ts|PXAT ts|KEEPTTL] [NX|XX] [GET]`).
//!
//! Mirrors `module_redis_command.c`'s table-driven argument descriptors:
//! each command owns a `&'static [TokenArg]` built once and probed through a
//! per-command [`HashtableSpsc`] token table - the same "build once, read
//! many times" shape [`super::dispatcher::Dispatcher`] uses for command
//! names.

use crate::hashtable::spsc::HashtableSpsc;

/// How a token's value (if it takes one) should be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// An arbitrary byte string, materialized as-is (`MATCH pattern`).
    ShortString,
    Integer,
    Double,
}

/// One recognized token in a command's trailing option grammar.
#[derive(Debug, Clone, Copy)]
pub struct TokenArg {
    /// The literal token text, matched case-insensitively (`"EX"`, `"NX"`).
    pub token: &'static str,
    /// The name handlers look this argument's parsed value up by.
    pub name: &'static str,
    pub ty: ArgType,
    /// Whether a value follows the token (`EX 10`) or it's a bare flag
    /// (`NX`).
    pub takes_value: bool,
    /// Tokens sharing a `Some(group)` are mutually exclusive (spec §4.10's
    /// `ONEOF`): a second token from the same group is a syntax error.
    pub one_of_group: Option<usize>,
}

/// A command's declarative trailing-token schema.
pub struct TokenSchema {
    pub command: &'static str,
    pub tokens: &'static [TokenArg],
}

impl TokenSchema {
    /// Build the per-command token lookup table, case-insensitive.
    pub fn build_table(&self) -> HashtableSpsc<usize> {
        let mut table = HashtableSpsc::new(self.tokens.len().max(1), true);
        for (i, t) in self.tokens.iter().enumerate() {
            assert!(table.insert(t.token.as_bytes(), i), "token schema for {} overflowed its table", self.command);
        }
        table
    }
}
