//! ACL file format parser (§6 "ACL file format (v3)"). Handles the v3
//! grammar directly and translates the legacy v2 `allow read ...` form at
//! parse time, matching the donor LDIF reader's own line-oriented,
//! hand-rolled-tokenizer style rather than pulling in a parser-combinator
//! crate for a format this small.

use crate::acl::types::{Clause, ClauseType, Comparator, Expr};
use crate::common::Plist;
use crate::error::{DbError, Result};

/// One `acl "<tag>"; (allow|deny|authenticate) ... ;` declaration, not yet
/// assigned a sequence number (the compiler does that across the whole
/// file).
pub struct ParsedClause {
    pub clause_type: ClauseType,
    pub tag: String,
    pub absolute: bool,
    pub rights: Vec<String>,
    pub expr: Expr,
    pub auth_requirements: Option<Plist>,
}

struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Tokenizer<'a> {
        Tokenizer { rest: src }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn peek_char(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest.chars().next()
    }

    /// Consumes up to (not including) the next occurrence of `delim`,
    /// treating double-quoted spans as opaque so `;` inside a quoted
    /// string doesn't end the statement early.
    fn take_until(&mut self, delim: char) -> Result<&'a str> {
        let bytes = self.rest.as_bytes();
        let mut in_quotes = false;
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i] as char;
            if c == '"' {
                in_quotes = !in_quotes;
            } else if c == delim && !in_quotes {
                let (head, tail) = self.rest.split_at(i);
                self.rest = &tail[1..];
                return Ok(head);
            }
            i += 1;
        }
        Err(DbError::AclParse(format!("unterminated statement, expected '{delim}'")))
    }

    fn take_word(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let bytes = self.rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() && !(bytes[i] as char).is_whitespace() && bytes[i] != b'(' {
            i += 1;
        }
        if i == 0 {
            return None;
        }
        let (word, tail) = self.rest.split_at(i);
        self.rest = tail;
        Some(word)
    }

    fn expect_literal(&mut self, word: &str) -> Result<()> {
        self.skip_ws();
        if let Some(tail) = self.rest.strip_prefix(word) {
            self.rest = tail;
            Ok(())
        } else {
            Err(DbError::AclParse(format!("expected '{word}'")))
        }
    }
}

fn parse_quoted(tok: &mut Tokenizer<'_>) -> Result<String> {
    tok.skip_ws();
    if !tok.rest.starts_with('"') {
        return Err(DbError::AclParse("expected a quoted string".into()));
    }
    tok.rest = &tok.rest[1..];
    let end = tok.rest.find('"').ok_or_else(|| DbError::AclParse("unterminated quoted string".into()))?;
    let (value, tail) = tok.rest.split_at(end);
    tok.rest = &tail[1..];
    Ok(value.to_string())
}

fn parse_paren_list(tok: &mut Tokenizer<'_>) -> Result<Vec<String>> {
    tok.skip_ws();
    if !tok.rest.starts_with('(') {
        return Err(DbError::AclParse("expected '('".into()));
    }
    tok.rest = &tok.rest[1..];
    let inner = tok.take_until(')')?;
    Ok(inner.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
}

fn parse_comparator(tok: &mut Tokenizer<'_>) -> Result<Comparator> {
    tok.skip_ws();
    for (lit, cmp) in [
        ("!=", Comparator::Ne),
        (">=", Comparator::Ge),
        ("<=", Comparator::Le),
        ("=", Comparator::Eq),
        (">", Comparator::Gt),
        ("<", Comparator::Lt),
    ] {
        if let Some(tail) = tok.rest.strip_prefix(lit) {
            tok.rest = tail;
            return Ok(cmp);
        }
    }
    Err(DbError::AclParse("expected a comparator".into()))
}

/// Parses one `attr op "value"` term, or a parenthesised sub-expression
/// possibly preceded by `not`.
fn parse_primary(tok: &mut Tokenizer<'_>) -> Result<Expr> {
    tok.skip_ws();
    if tok.rest.starts_with("not ") || tok.rest.starts_with("not(") {
        tok.expect_literal("not")?;
        let inner = parse_primary(tok)?;
        return Ok(inner.not());
    }
    if tok.peek_char() == Some('(') {
        tok.rest = &tok.rest[tok.rest.find('(').unwrap() + 1..];
        let inner = parse_or(tok)?;
        tok.skip_ws();
        if !tok.rest.starts_with(')') {
            return Err(DbError::AclParse("expected ')'".into()));
        }
        tok.rest = &tok.rest[1..];
        return Ok(inner);
    }

    let attr = tok
        .take_word()
        .ok_or_else(|| DbError::AclParse("expected an attribute name".into()))?
        .to_string();
    let comparator = parse_comparator(tok)?;
    let value = parse_quoted(tok)?;
    Ok(Expr::term(attr, comparator, value))
}

fn parse_and(tok: &mut Tokenizer<'_>) -> Result<Expr> {
    let mut expr = parse_primary(tok)?;
    loop {
        tok.skip_ws();
        if tok.rest.starts_with("and ") || tok.rest == "and" {
            tok.expect_literal("and")?;
            let rhs = parse_primary(tok)?;
            expr = expr.and(rhs);
        } else {
            return Ok(expr);
        }
    }
}

fn parse_or(tok: &mut Tokenizer<'_>) -> Result<Expr> {
    let mut expr = parse_and(tok)?;
    loop {
        tok.skip_ws();
        if tok.rest.starts_with("or ") || tok.rest == "or" {
            tok.expect_literal("or")?;
            let rhs = parse_and(tok)?;
            expr = expr.or(rhs);
        } else {
            return Ok(expr);
        }
    }
}

fn parse_auth_block(tok: &mut Tokenizer<'_>) -> Result<Plist> {
    tok.skip_ws();
    if !tok.rest.starts_with('{') {
        return Err(DbError::AclParse("expected '{' to start an auth parameter block".into()));
    }
    tok.rest = &tok.rest[1..];
    let body = tok.take_until('}')?;
    let mut plist = Plist::new();
    for stmt in body.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        let (attr, value) = stmt
            .split_once('=')
            .ok_or_else(|| DbError::AclParse(format!("malformed auth parameter '{stmt}'")))?;
        let value = value.trim().trim_matches('"');
        plist.set(attr.trim().to_string(), value.to_string());
    }
    Ok(plist)
}

/// Parses one `acl "tag"; (allow|deny|authenticate) [absolute] (rights) expr;`
/// declaration starting right after the `acl "tag";` header has already
/// been consumed by the caller.
fn parse_clause_body(tok: &mut Tokenizer<'_>, tag: &str) -> Result<ParsedClause> {
    let keyword = tok.take_word().ok_or_else(|| DbError::AclParse("expected allow/deny/authenticate".into()))?;
    let clause_type = match keyword {
        "allow" => ClauseType::Allow,
        "deny" => ClauseType::Deny,
        "authenticate" => ClauseType::Auth,
        "response" => ClauseType::Response,
        other => return Err(DbError::AclParse(format!("unknown clause keyword '{other}'"))),
    };

    let mut absolute = false;
    tok.skip_ws();
    if tok.rest.starts_with("absolute") {
        tok.expect_literal("absolute")?;
        absolute = true;
    } else if tok.rest.starts_with("terminal") || tok.rest.starts_with("content") {
        // Recognised but carry no additional semantics in this evaluator.
        tok.take_word();
    }

    let rights = parse_paren_list(tok)?;
    let (expr, auth_requirements) = match clause_type {
        ClauseType::Auth => (Expr::term("true", Comparator::Eq, "true"), Some(parse_auth_block(tok)?)),
        ClauseType::Response => (Expr::term("true", Comparator::Eq, "true"), Some(parse_auth_block(tok)?)),
        _ => (parse_or(tok)?, None),
    };

    tok.skip_ws();
    if tok.rest.starts_with(';') {
        tok.rest = &tok.rest[1..];
    }

    Ok(ParsedClause { clause_type, tag: tag.to_string(), absolute, rights, expr, auth_requirements })
}

/// Translates the legacy v2 one-liner (`allow read (...)  user = "..." ;`
/// with no `acl`/`version` header and an implicit tag) into the same
/// `ParsedClause` shape the v3 path produces.
fn parse_v2_clause(line: &str) -> Result<ParsedClause> {
    let mut tok = Tokenizer::new(line);
    parse_clause_body(&mut tok, "legacy")
}

/// Parses a complete ACL source file: either the v3 form starting with
/// `version 3.0;` and one or more `acl "tag"; clause; clause; ...` bodies,
/// or a bare sequence of legacy v2 `allow ...;` lines.
pub fn parse_acl_file(source: &str) -> Result<Vec<ParsedClause>> {
    let trimmed = source.trim_start();
    if !trimmed.starts_with("version") {
        return source
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(parse_v2_clause)
            .collect();
    }

    let mut tok = Tokenizer::new(trimmed);
    tok.expect_literal("version")?;
    tok.take_until(';')?;

    let mut clauses = Vec::new();
    loop {
        tok.skip_ws();
        if tok.rest.is_empty() {
            break;
        }
        tok.expect_literal("acl")?;
        let tag = parse_quoted(&mut tok)?;
        tok.skip_ws();
        if tok.rest.starts_with(';') {
            tok.rest = &tok.rest[1..];
        }
        loop {
            tok.skip_ws();
            if tok.rest.is_empty() {
                break;
            }
            if tok.rest.starts_with("acl") {
                break;
            }
            clauses.push(parse_clause_body(&mut tok, &tag)?);
        }
    }
    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_allow_clause() {
        let src = r#"
            version 3.0;
            acl "read-access";
            allow (read, search)
                user = "anyone";
        "#;
        let clauses = parse_acl_file(src).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].clause_type, ClauseType::Allow);
        assert_eq!(clauses[0].rights, vec!["read", "search"]);
    }

    #[test]
    fn parses_absolute_deny_with_and_or_not() {
        let src = r#"
            version 3.0;
            acl "deny-outsiders";
            deny absolute (write)
                not (ip = "10.0.0.0/8" or dns = ".example.com") and user != "root";
        "#;
        let clauses = parse_acl_file(src).unwrap();
        assert!(clauses[0].absolute);
        assert_eq!(clauses[0].clause_type, ClauseType::Deny);
    }

    #[test]
    fn parses_auth_clause_parameter_block() {
        let src = r#"
            version 3.0;
            acl "auth-simple";
            authenticate (read)
                { authmethod = "simple"; dbname = "default"; };
        "#;
        let clauses = parse_acl_file(src).unwrap();
        assert_eq!(clauses[0].clause_type, ClauseType::Auth);
        let auth = clauses[0].auth_requirements.as_ref().unwrap();
        assert_eq!(auth.get_str("authmethod"), Some("simple"));
    }

    #[test]
    fn translates_legacy_v2_line() {
        let src = "allow (read) user = \"anyone\";";
        let clauses = parse_acl_file(src).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].tag, "legacy");
    }

    #[test]
    fn parses_response_clause_parameter_block() {
        let src = r#"
            version 3.0;
            acl "resp";
            response (read)
                { deny_type = "insufficient_access"; deny_message = "no such entry"; };
        "#;
        let clauses = parse_acl_file(src).unwrap();
        assert_eq!(clauses[0].clause_type, ClauseType::Response);
        let params = clauses[0].auth_requirements.as_ref().unwrap();
        assert_eq!(params.get_str("deny_message"), Some("no such entry"));
    }

    #[test]
    fn multiple_clauses_under_one_acl_tag() {
        let src = r#"
            version 3.0;
            acl "combo";
            allow (read) user = "anyone";
            deny (write) user = "guest";
        "#;
        let clauses = parse_acl_file(src).unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].tag, "combo");
        assert_eq!(clauses[1].tag, "combo");
    }
}
