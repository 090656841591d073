//! Query tokenizer and recursive-descent compiler.

use std::collections::HashMap;

use crate::error::{SyncError, SyncResult};
use crate::types::{OrderBy, TagId};

use super::expression::{CompiledQuery, Operator};

/// Resolves tag names written in a query to tag ids.
pub trait TagResolver {
    /// `Ok(None)` means the name is unknown.
    fn resolve_tag(&self, name: &str) -> SyncResult<Option<TagId>>;
}

impl TagResolver for HashMap<String, TagId> {
    fn resolve_tag(&self, name: &str) -> SyncResult<Option<TagId>> {
        Ok(self.get(name).copied())
    }
}

/// Compiles a search string into an operator tree.
///
/// Blank input compiles to an unconstrained query without consulting the
/// resolver.
pub fn compile(text: &str, resolver: &dyn TagResolver) -> SyncResult<CompiledQuery> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(CompiledQuery::default());
    }

    let tokens = tokenize_query_input(trimmed)?;
    let mut parser = QueryParser {
        query: trimmed,
        tokens,
        index: 0,
        resolver,
        order_by: None,
    };
    let operator = parser.parse_sequence(0)?;
    if let Some(token) = parser.peek() {
        return Err(SyncError::syntax(
            trimmed,
            format!("unexpected ')' near byte {}", token.position),
        ));
    }

    Ok(CompiledQuery {
        text: trimmed.to_string(),
        operator,
        order_by: parser.order_by,
    })
}

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct QueryToken {
    kind: QueryTokenKind,
    position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryTokenKind {
    Word(String),
    Phrase(String),
    LParen,
    RParen,
    Bang,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    And,
    Or,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct QueryParser<'a> {
    query: &'a str,
    tokens: Vec<QueryToken>,
    index: usize,
    resolver: &'a dyn TagResolver,
    order_by: Option<OrderBy>,
}

impl QueryParser<'_> {
    /// Parses operands up to the end of input or a closing parenthesis.
    ///
    /// Returns `None` when the level holds no predicate (only an order clause).
    fn parse_sequence(&mut self, depth: usize) -> SyncResult<Option<Operator>> {
        let mut operands: Vec<Operator> = Vec::new();
        let mut saw_and = false;
        let mut saw_or = false;
        let mut pending: Option<Connector> = None;
        let mut saw_clause = false;

        while !self.is_end() && !self.next_is_group_close() {
            let connector = self.consume_connector();
            if let Some(connector) = connector {
                if pending.is_some() {
                    return Err(self.error(format!(
                        "unexpected '{}' after another connector",
                        connector_name(connector)
                    )));
                }
                if operands.is_empty() && !saw_clause {
                    return Err(self.error(format!(
                        "'{}' needs a term on its left",
                        connector_name(connector)
                    )));
                }
                if self.is_end() || self.next_is_group_close() {
                    return Err(self.error(format!(
                        "'{}' needs a term on its right",
                        connector_name(connector)
                    )));
                }
                pending = Some(connector);
                continue;
            }

            let Some(operand) = self.parse_unary(depth)? else {
                saw_clause = true;
                continue;
            };
            if !operands.is_empty() {
                match pending.take().unwrap_or(Connector::And) {
                    Connector::And => saw_and = true,
                    Connector::Or => saw_or = true,
                }
            }
            pending = None;
            operands.push(operand);
        }

        if saw_and && saw_or {
            return Err(SyncError::QueryAmbiguous {
                query: self.query.to_string(),
            });
        }

        let mut operands = operands.into_iter();
        let Some(first) = operands.next() else {
            return Ok(None);
        };
        let folded = operands.fold(first, |left, right| {
            if saw_or {
                Operator::or(left, right)
            } else {
                Operator::and(left, right)
            }
        });
        Ok(Some(folded))
    }

    fn parse_unary(&mut self, depth: usize) -> SyncResult<Option<Operator>> {
        let mut negate = false;
        while self.consume_not_prefix() {
            negate = !negate;
        }

        let operand = self.parse_primary(depth)?;
        match (operand, negate) {
            (Some(operand), true) => Ok(Some(Operator::negate(operand))),
            (Some(operand), false) => Ok(Some(operand)),
            (None, true) => Err(self.error("an order clause cannot be negated")),
            (None, false) => Ok(None),
        }
    }

    fn parse_primary(&mut self, depth: usize) -> SyncResult<Option<Operator>> {
        let token = self
            .next()
            .ok_or_else(|| self.error("expected query term but reached end of query"))?;

        match token.kind {
            QueryTokenKind::LParen => {
                let inner = self.parse_sequence(depth + 1)?;
                if !self.consume_group_close() {
                    return Err(self.error(format!(
                        "missing closing ')' for group opened at byte {}",
                        token.position
                    )));
                }
                inner
                    .map(Some)
                    .ok_or_else(|| self.error(format!("empty group at byte {}", token.position)))
            }
            QueryTokenKind::Word(raw) => self.parse_word(&raw, depth),
            QueryTokenKind::Phrase(name) => self.resolve_tag_name(&name).map(Some),
            QueryTokenKind::RParen => Err(self.error(format!(
                "unexpected ')' near byte {}",
                token.position
            ))),
            _ => Err(self.error(format!(
                "expected query term near byte {}",
                token.position
            ))),
        }
    }

    fn parse_word(&mut self, raw: &str, depth: usize) -> SyncResult<Option<Operator>> {
        if let Some((prefix, argument)) = raw.split_once(':') {
            match prefix.to_ascii_lowercase().as_str() {
                "tag" => {
                    return match argument.parse::<TagId>() {
                        Ok(id) => Ok(Some(Operator::Tag(id))),
                        Err(_) => self.resolve_tag_name(argument).map(Some),
                    };
                }
                "min_id" | "minid" => {
                    return self.parse_id_bound(prefix, argument).map(|id| Some(Operator::MinId(id)));
                }
                "max_id" | "maxid" => {
                    return self.parse_id_bound(prefix, argument).map(|id| Some(Operator::MaxId(id)));
                }
                "order" | "sort" => {
                    if depth > 0 {
                        return Err(self.error("order clauses are only allowed at the top level"));
                    }
                    if self.order_by.is_some() {
                        return Err(self.error("query contains more than one order clause"));
                    }
                    let order_by = match argument.to_ascii_lowercase().as_str() {
                        "id" => OrderBy::Id,
                        "hash" => OrderBy::Hash,
                        other => {
                            return Err(self.error(format!("unknown order {other:?}")));
                        }
                    };
                    self.order_by = Some(order_by);
                    return Ok(None);
                }
                _ => {}
            }
        }

        if let Some((key, value)) = raw.split_once('=') {
            if !key.is_empty() {
                if value.is_empty() {
                    return Err(self.error(format!("attribute {key:?} is missing a value")));
                }
                return Ok(Some(Operator::Attribute(key.to_string(), value.to_string())));
            }
        }

        self.resolve_tag_name(raw).map(Some)
    }

    fn parse_id_bound(&self, prefix: &str, argument: &str) -> SyncResult<u64> {
        argument
            .parse::<u64>()
            .map_err(|_| self.error(format!("{prefix}: expects a non-negative integer, got {argument:?}")))
    }

    fn resolve_tag_name(&self, name: &str) -> SyncResult<Operator> {
        if name.is_empty() {
            return Err(self.error("empty tag name"));
        }
        match self.resolver.resolve_tag(name)? {
            Some(id) => Ok(Operator::Tag(id)),
            None => Err(self.error(format!("unknown tag {name:?}"))),
        }
    }

    fn consume_connector(&mut self) -> Option<Connector> {
        let connector = match self.peek().map(|token| &token.kind) {
            Some(QueryTokenKind::And) => Connector::And,
            Some(QueryTokenKind::Or) => Connector::Or,
            _ => return None,
        };
        self.index += 1;
        Some(connector)
    }

    fn consume_not_prefix(&mut self) -> bool {
        matches!(
            self.peek().map(|token| &token.kind),
            Some(QueryTokenKind::Bang | QueryTokenKind::Not)
        ) && {
            self.index += 1;
            true
        }
    }

    fn consume_group_close(&mut self) -> bool {
        self.next_is_group_close() && {
            self.index += 1;
            true
        }
    }

    fn next_is_group_close(&self) -> bool {
        matches!(
            self.peek().map(|token| &token.kind),
            Some(QueryTokenKind::RParen)
        )
    }

    fn is_end(&self) -> bool {
        self.index >= self.tokens.len()
    }

    fn peek(&self) -> Option<&QueryToken> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<QueryToken> {
        let token = self.tokens.get(self.index).cloned()?;
        self.index += 1;
        Some(token)
    }

    fn error(&self, message: impl Into<String>) -> SyncError {
        SyncError::syntax(self.query, message)
    }
}

fn connector_name(connector: Connector) -> &'static str {
    match connector {
        Connector::And => "and",
        Connector::Or => "or",
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn tokenize_query_input(input: &str) -> SyncResult<Vec<QueryToken>> {
    let mut tokens = Vec::new();
    let mut cursor = 0usize;

    while let Some(ch) = input[cursor..].chars().next() {
        if ch.is_whitespace() {
            cursor += ch.len_utf8();
            continue;
        }

        let position = cursor;
        match ch {
            '(' | ')' | '!' | '-' => {
                let kind = match ch {
                    '(' => QueryTokenKind::LParen,
                    ')' => QueryTokenKind::RParen,
                    _ => QueryTokenKind::Bang,
                };
                tokens.push(QueryToken { kind, position });
                cursor += 1;
            }
            '"' => {
                let (phrase, next_cursor) = consume_quoted_phrase(input, cursor)?;
                tokens.push(QueryToken {
                    kind: QueryTokenKind::Phrase(phrase),
                    position,
                });
                cursor = next_cursor;
            }
            _ => {
                let mut word = String::new();
                let mut end = cursor;
                while let Some(next) = input[end..].chars().next() {
                    if next.is_whitespace() || matches!(next, '(' | ')') {
                        break;
                    }
                    if next == '"' && word.ends_with('=') {
                        // key="quoted value"
                        let (value, next_cursor) = consume_quoted_phrase(input, end)?;
                        word.push_str(&value);
                        end = next_cursor;
                        break;
                    }
                    word.push(next);
                    end += next.len_utf8();
                }

                let kind = if word.eq_ignore_ascii_case("and") {
                    QueryTokenKind::And
                } else if word.eq_ignore_ascii_case("or") {
                    QueryTokenKind::Or
                } else if word.eq_ignore_ascii_case("not") {
                    QueryTokenKind::Not
                } else {
                    QueryTokenKind::Word(word)
                };
                tokens.push(QueryToken { kind, position });
                cursor = end;
            }
        }
    }

    Ok(tokens)
}

fn consume_quoted_phrase(input: &str, start: usize) -> SyncResult<(String, usize)> {
    let mut cursor = start + 1;
    let mut phrase = String::new();
    let mut escaped = false;

    while let Some(ch) = input[cursor..].chars().next() {
        cursor += ch.len_utf8();

        if escaped {
            phrase.push(ch);
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            return Ok((phrase, cursor));
        }

        phrase.push(ch);
    }

    Err(SyncError::syntax(
        input,
        format!("missing closing quote near byte {start}"),
    ))
}
