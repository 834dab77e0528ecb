//! LDIF line accumulation and record parsing (§4.5 step 1, §6).
//!
//! A purpose-built accumulator rather than a general line-oriented parsing
//! library: allocation count must stay bounded on multi-gigabyte LDIF files
//! feeding a producer that may run for hours.

use std::io::{BufRead, BufReader, Read};

use base64::Engine;

use crate::error::{DbError, Result};

/// One raw, unparsed attribute line already unfolded (continuation lines
/// joined) and, if it ended in `::`, base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttrLine {
    pub name: String,
    pub value: Vec<u8>,
}

/// One LDIF record: the entry's DN plus its attribute lines, in file order.
/// The producer (§4.5) turns this into an `Entry`; it is intentionally
/// dumber than `Entry` so the accumulator has no schema knowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLdifRecord {
    pub dn: String,
    pub attrs: Vec<RawAttrLine>,
    pub source_line: u64,
}

/// The narrow interface a producer reads from (§4.12). Implemented by a
/// file reader, a stdin reader, and — outside this crate — a streamed
/// replication adapter.
pub trait LdifSource: Send {
    fn next_record(&mut self) -> Result<Option<RawLdifRecord>>;
}

/// Reads LDIF records from any `Read`, handling the optional `version: 1`
/// prolog, line folding, and blank-line entry boundaries.
pub struct LdifReader<R> {
    lines: std::io::Lines<BufReader<R>>,
    line_no: u64,
    pending: Option<String>,
    version_consumed: bool,
}

impl<R: Read> LdifReader<R> {
    pub fn new(reader: R) -> LdifReader<R> {
        LdifReader {
            lines: BufReader::with_capacity(8 * 1024, reader).lines(),
            line_no: 0,
            pending: None,
            version_consumed: false,
        }
    }

    fn next_raw_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        match self.lines.next() {
            Some(Ok(line)) => {
                self.line_no += 1;
                Ok(Some(line))
            }
            Some(Err(e)) => Err(DbError::from(e)),
            None => Ok(None),
        }
    }

    /// Reads one unfolded logical line (continuations starting with a
    /// single space are joined to the previous line), or `None` at EOF or
    /// a blank entry-terminator line.
    fn next_logical_line(&mut self) -> Result<Option<String>> {
        let mut line = match self.next_raw_line()? {
            Some(l) => l,
            None => return Ok(None),
        };
        if line.is_empty() {
            return Ok(None);
        }
        loop {
            match self.next_raw_line()? {
                Some(next) if next.starts_with(' ') => line.push_str(&next[1..]),
                other => {
                    self.pending = other;
                    break;
                }
            }
        }
        Ok(Some(line))
    }

    fn parse_attr_line(line: &str, line_no: u64) -> Result<RawAttrLine> {
        if let Some((name, rest)) = line.split_once("::") {
            let value = base64::engine::general_purpose::STANDARD
                .decode(rest.trim_start())
                .map_err(|e| DbError::LdifParse {
                    file: String::new(),
                    line: line_no,
                    message: format!("invalid base64 in {name}: {e}"),
                })?;
            Ok(RawAttrLine { name: name.to_string(), value })
        } else if let Some((name, rest)) = line.split_once(':') {
            Ok(RawAttrLine { name: name.to_string(), value: rest.trim_start().as_bytes().to_vec() })
        } else {
            Err(DbError::LdifParse {
                file: String::new(),
                line: line_no,
                message: format!("malformed attribute line: {line}"),
            })
        }
    }
}

impl<R: Read + Send> LdifSource for LdifReader<R> {
    fn next_record(&mut self) -> Result<Option<RawLdifRecord>> {
        if !self.version_consumed {
            self.version_consumed = true;
            if let Some(first) = self.next_logical_line()? {
                if first.trim() == "version: 1" {
                    // Consumed; fall through to read the next (blank then
                    // first real record) line normally.
                } else {
                    self.pending = Some(first);
                }
            }
        }

        // Skip any blank separator lines between records.
        let mut dn_line = None;
        loop {
            match self.next_logical_line()? {
                Some(l) if l.is_empty() => continue,
                Some(l) => {
                    dn_line = Some(l);
                    break;
                }
                None => break,
            }
        }
        let dn_line = match dn_line {
            Some(l) => l,
            None => return Ok(None),
        };
        let start_line = self.line_no;
        let dn_attr = Self::parse_attr_line(&dn_line, start_line)?;
        if !dn_attr.name.eq_ignore_ascii_case("dn") {
            return Err(DbError::LdifParse {
                file: String::new(),
                line: start_line,
                message: "record does not start with dn:".into(),
            });
        }
        let dn = String::from_utf8_lossy(&dn_attr.value).into_owned();

        let mut attrs = Vec::new();
        loop {
            match self.next_logical_line()? {
                Some(l) => attrs.push(Self::parse_attr_line(&l, self.line_no)?),
                None => break,
            }
        }
        Ok(Some(RawLdifRecord { dn, attrs, source_line: start_line }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_simple_entry() {
        let ldif = "version: 1\n\ndn: uid=bob,dc=x\nobjectclass: person\ncn: Bob\n";
        let mut reader = LdifReader::new(Cursor::new(ldif));
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.dn, "uid=bob,dc=x");
        assert_eq!(rec.attrs.len(), 2);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn folds_continuation_lines() {
        let ldif = "dn: uid=bob,dc=x\ndescription: a very\n long line\n";
        let mut reader = LdifReader::new(Cursor::new(ldif));
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.attrs[0].value, b"a very long line");
    }

    #[test]
    fn decodes_base64_dn() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("uid=bob,dc=x");
        let ldif = format!("dn:: {encoded}\ncn: Bob\n");
        let mut reader = LdifReader::new(Cursor::new(ldif));
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.dn, "uid=bob,dc=x");
    }

    #[test]
    fn multiple_records_separated_by_blank_lines() {
        let ldif = "dn: uid=a,dc=x\ncn: A\n\ndn: uid=b,dc=x\ncn: B\n";
        let mut reader = LdifReader::new(Cursor::new(ldif));
        let first = reader.next_record().unwrap().unwrap();
        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(first.dn, "uid=a,dc=x");
        assert_eq!(second.dn, "uid=b,dc=x");
        assert!(reader.next_record().unwrap().is_none());
    }
}
