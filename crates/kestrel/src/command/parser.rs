//! `ParserContext` (spec §4.10): walks a command's trailing arguments
//! against its [`TokenSchema`], binding each recognized token's value by
//! name. This is the "guessing rule" from the original implementation's
//! argument parser re-expressed over a fixed token table rather than a
//! positional cursor: every remaining token must name a schema entry, a
//! second token from the same `ONEOF` group is rejected, and a token
//! without `takes_value` is recorded present with no value to fetch.

use std::collections::{HashMap, HashSet};

use crate::error::CommandError;
use crate::hashtable::spsc::HashtableSpsc;

use super::handlers::util::{parse_f64, parse_i64};
use super::schema::{ArgType, TokenArg, TokenSchema};

enum ParsedValue {
    Bytes(Vec<u8>),
    Integer(i64),
    Double(f64),
    Present,
}

/// The result of matching a command's trailing arguments against its
/// [`TokenSchema`]. Handlers read parsed values back out by the schema's
/// `name` field.
pub struct ParserContext {
    values: HashMap<&'static str, ParsedValue>,
}

impl ParserContext {
    /// Parse `args` (the trailing tokens after a command's fixed positional
    /// arguments) against `schema`, using `table` for case-insensitive
    /// token lookup.
    pub fn parse(schema: &TokenSchema, table: &HashtableSpsc<usize>, args: &[Vec<u8>]) -> Result<Self, CommandError> {
        let mut ctx = ParserContext { values: HashMap::new() };
        let mut seen_tokens: HashSet<&'static str> = HashSet::new();
        let mut seen_groups: HashSet<usize> = HashSet::new();

        let mut i = 0;
        while i < args.len() {
            let Some(&token_idx) = table.get(&args[i]) else {
                return Err(CommandError::argument("ERR syntax error"));
            };
            let token: &TokenArg = &schema.tokens[token_idx];

            let first_of_its_kind = match token.one_of_group {
                Some(group) => seen_groups.insert(group),
                None => seen_tokens.insert(token.name),
            };
            if !first_of_its_kind {
                return Err(CommandError::argument("ERR syntax error"));
            }

            i += 1;
            if token.takes_value {
                let raw = args.get(i).ok_or_else(|| CommandError::argument("ERR syntax error"))?;
                ctx.values.insert(token.name, bind(token.ty, raw)?);
                i += 1;
            } else {
                ctx.values.insert(token.name, ParsedValue::Present);
            }
        }

        Ok(ctx)
    }

    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        match self.values.get(name) {
            Some(ParsedValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParsedValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn double(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParsedValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// Whether the token named `name` appeared at all (flag-style tokens
    /// like `NX`/`KEEPTTL` carry no value, only presence).
    pub fn present(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

fn bind(ty: ArgType, raw: &[u8]) -> Result<ParsedValue, CommandError> {
    Ok(match ty {
        ArgType::Integer => ParsedValue::Integer(parse_i64(raw)?),
        ArgType::Double => ParsedValue::Double(parse_f64(raw)?),
        ArgType::ShortString => ParsedValue::Bytes(raw.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENS: &[TokenArg] = &[
        TokenArg { token: "EX", name: "ex", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
        TokenArg { token: "KEEPTTL", name: "keepttl", ty: ArgType::Integer, takes_value: false, one_of_group: Some(0) },
        TokenArg { token: "NX", name: "nx", ty: ArgType::Integer, takes_value: false, one_of_group: Some(1) },
        TokenArg { token: "XX", name: "xx", ty: ArgType::Integer, takes_value: false, one_of_group: Some(1) },
        TokenArg { token: "GET", name: "get", ty: ArgType::Integer, takes_value: false, one_of_group: None },
    ];
    const SCHEMA: TokenSchema = TokenSchema { command: "TEST", tokens: TOKENS };

    fn args(strs: &[&str]) -> Vec<Vec<u8>> {
        strs.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn parses_a_value_token_and_a_flag() {
        let table = SCHEMA.build_table();
        let ctx = ParserContext::parse(&SCHEMA, &table, &args(&["EX", "10", "GET"])).unwrap();
        assert_eq!(ctx.integer("ex"), Some(10));
        assert!(ctx.present("get"));
        assert!(!ctx.present("nx"));
    }

    #[test]
    fn case_insensitive_token_matching() {
        let table = SCHEMA.build_table();
        let ctx = ParserContext::parse(&SCHEMA, &table, &args(&["nx"])).unwrap();
        assert!(ctx.present("nx"));
    }

    #[test]
    fn two_tokens_from_the_same_one_of_group_is_an_error() {
        let table = SCHEMA.build_table();
        assert!(ParserContext::parse(&SCHEMA, &table, &args(&["NX", "XX"])).is_err());
    }

    #[test]
    fn unknown_token_is_a_syntax_error() {
        let table = SCHEMA.build_table();
        assert!(ParserContext::parse(&SCHEMA, &table, &args(&["BOGUS"])).is_err());
    }

    #[test]
    fn value_token_missing_its_value_is_a_syntax_error() {
        let table = SCHEMA.build_table();
        assert!(ParserContext::parse(&SCHEMA, &table, &args(&["EX"])).is_err());
    }
}
