//! Script Parser
//!
//! Consumes the lexer's token stream and builds a Document Tree: a rooted
//! tree of Document / Text / ForLoop / Echo nodes. Uses a node stack whose
//! top is the frame currently being appended to.

use thiserror::Error;

use crate::script::lexer::{Lexer, LexerError, Token};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lexer(#[from] LexerError),

    #[error("more ENDs than FORs")]
    UnbalancedEnd,

    #[error("unclosed FOR")]
    UnclosedFor,

    #[error("invalid variable name: {0:?}")]
    BadVariableName(String),

    #[error("FOR requires 3 or 4 arguments, got {0}")]
    BadForArity(usize),

    #[error("invalid element: {0:?}")]
    BadElement(String),

    #[error("invalid string literal: {0:?}")]
    BadString(String),

    #[error("echo tag has no elements")]
    EmptyEcho,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Variable(String),
    Str(String),
    Int(i64),
    Double(f64),
    Function(String),
    Operator(Operator),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub var: String,
    pub start: Element,
    pub end: Element,
    pub step: Element,
    pub body: Vec<DocNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocNode {
    Document(Vec<DocNode>),
    Text(String),
    ForLoop(ForLoop),
    Echo(Vec<Element>),
}

/// A stack frame under construction: either the document root or an
/// in-progress FOR loop body.
enum Frame {
    Document(Vec<DocNode>),
    ForLoop {
        var: String,
        start: Element,
        end: Element,
        step: Element,
        body: Vec<DocNode>,
    },
}

impl Frame {
    fn children_mut(&mut self) -> &mut Vec<DocNode> {
        match self {
            Frame::Document(c) => c,
            Frame::ForLoop { body, .. } => body,
        }
    }
}

pub fn parse(source: &str) -> Result<DocNode, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut stack: Vec<Frame> = vec![Frame::Document(Vec::new())];

    loop {
        let tok = lexer.next_token()?;
        match tok {
            Token::Eof => break,
            Token::Text(s) => stack.last_mut().unwrap().children_mut().push(DocNode::Text(s)),
            Token::For(body) => {
                let (var, start, end, step) = parse_for_body(&body)?;
                stack.push(Frame::ForLoop {
                    var,
                    start,
                    end,
                    step,
                    body: Vec::new(),
                });
            }
            Token::End => {
                if stack.len() <= 1 {
                    return Err(ParseError::UnbalancedEnd);
                }
                let frame = stack.pop().unwrap();
                let node = match frame {
                    Frame::ForLoop { var, start, end, step, body } => {
                        DocNode::ForLoop(ForLoop { var, start, end, step, body })
                    }
                    Frame::Document(_) => unreachable!("document frame can't be popped by END"),
                };
                stack.last_mut().unwrap().children_mut().push(node);
            }
            Token::Echo(body) => {
                let elements = parse_echo_body(&body)?;
                stack
                    .last_mut()
                    .unwrap()
                    .children_mut()
                    .push(DocNode::Echo(elements));
            }
        }
    }

    if stack.len() > 1 {
        return Err(ParseError::UnclosedFor);
    }
    match stack.pop().unwrap() {
        Frame::Document(children) => Ok(DocNode::Document(children)),
        Frame::ForLoop { .. } => unreachable!("loop above guarantees only the root frame remains"),
    }
}

fn parse_for_body(body: &str) -> Result<(String, Element, Element, Element), ParseError> {
    let pieces = split_elements(body);
    if pieces.len() != 3 && pieces.len() != 4 {
        return Err(ParseError::BadForArity(pieces.len()));
    }
    let var = match parse_variable_name(&pieces[0]) {
        Some(v) => v,
        None => return Err(ParseError::BadVariableName(pieces[0].clone())),
    };
    let start = parse_for_element(&pieces[1])?;
    let end = parse_for_element(&pieces[2])?;
    let step = if pieces.len() == 4 {
        parse_for_element(&pieces[3])?
    } else {
        Element::Int(1)
    };
    Ok((var, start, end, step))
}

fn parse_echo_body(body: &str) -> Result<Vec<Element>, ParseError> {
    let pieces = split_elements(body);
    if pieces.is_empty() {
        return Err(ParseError::EmptyEcho);
    }
    pieces.iter().map(|p| parse_echo_element(p)).collect()
}

/// Split a (whitespace-normalized) tag body into whitespace-separated
/// pieces, treating quoted substrings as atomic.
fn split_elements(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if c == '"' {
            in_quotes = !in_quotes;
            current.push(c);
            continue;
        }
        if c == '\\' && in_quotes {
            current.push(c);
            if let Some(nc) = chars.next() {
                current.push(nc);
            }
            continue;
        }
        if c == ' ' && !in_quotes {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn parse_variable_name(tok: &str) -> Option<String> {
    let mut chars = tok.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.clone().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(tok.to_string())
}

fn parse_number(tok: &str) -> Option<Element> {
    if let Ok(i) = tok.parse::<i64>() {
        return Some(Element::Int(i));
    }
    if !tok.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    tok.parse::<f64>().ok().map(Element::Double)
}

fn parse_quoted_string(tok: &str) -> Result<String, ParseError> {
    if tok.len() < 2 || !tok.starts_with('"') || !tok.ends_with('"') {
        return Err(ParseError::BadString(tok.to_string()));
    }
    let inner = &tok[1..tok.len() - 1];
    let mut out = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(_) | None => return Err(ParseError::BadString(tok.to_string())),
            }
        } else if c == '"' {
            // an unescaped quote before the final closing quote is malformed
            return Err(ParseError::BadString(tok.to_string()));
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Parse a piece allowed inside a FOR's start/end/step slots: variable,
/// quoted string, or number only.
fn parse_for_element(tok: &str) -> Result<Element, ParseError> {
    if tok.starts_with('"') {
        return Ok(Element::Str(parse_quoted_string(tok)?));
    }
    if let Some(n) = parse_number(tok) {
        return Ok(n);
    }
    if let Some(v) = parse_variable_name(tok) {
        return Ok(Element::Variable(v));
    }
    Err(ParseError::BadElement(tok.to_string()))
}

/// Parse a piece allowed inside an ECHO tag: variable, string, number,
/// function, or operator.
fn parse_echo_element(tok: &str) -> Result<Element, ParseError> {
    if tok.starts_with('"') {
        return Ok(Element::Str(parse_quoted_string(tok)?));
    }
    if let Some(name) = tok.strip_prefix('@') {
        return Ok(Element::Function(name.to_string()));
    }
    match tok {
        "+" => return Ok(Element::Operator(Operator::Add)),
        "-" => return Ok(Element::Operator(Operator::Sub)),
        "*" => return Ok(Element::Operator(Operator::Mul)),
        "/" => return Ok(Element::Operator(Operator::Div)),
        "^" => return Ok(Element::Operator(Operator::Pow)),
        _ => {}
    }
    if let Some(n) = parse_number(tok) {
        return Ok(n);
    }
    if let Some(v) = parse_variable_name(tok) {
        return Ok(Element::Variable(v));
    }
    Err(ParseError::BadElement(tok.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_for_loop_and_echo() {
        let tree = parse("{$ FOR i 1 3 1 $}i={$= i $}\n{$ END $}").unwrap();
        match tree {
            DocNode::Document(children) => {
                assert_eq!(children.len(), 1);
                match &children[0] {
                    DocNode::ForLoop(f) => {
                        assert_eq!(f.var, "i");
                        assert_eq!(f.start, Element::Int(1));
                        assert_eq!(f.end, Element::Int(3));
                        assert_eq!(f.step, Element::Int(1));
                        assert_eq!(f.body.len(), 3);
                    }
                    other => panic!("expected ForLoop, got {:?}", other),
                }
            }
            other => panic!("expected Document, got {:?}", other),
        }
    }

    #[test]
    fn for_loop_default_step() {
        let tree = parse("{$ FOR i 1 3 $}{$ END $}").unwrap();
        if let DocNode::Document(children) = tree {
            if let DocNode::ForLoop(f) = &children[0] {
                assert_eq!(f.step, Element::Int(1));
                return;
            }
        }
        panic!("unexpected tree shape");
    }

    #[test]
    fn end_without_for_fails() {
        assert_eq!(parse("{$ END $}"), Err(ParseError::UnbalancedEnd));
    }

    #[test]
    fn unclosed_for_fails() {
        assert_eq!(parse("{$ FOR i 1 10 $}"), Err(ParseError::UnclosedFor));
    }

    #[test]
    fn echo_with_function_and_operator() {
        let tree = parse(r#"{$= "a+b=" a @paramGet b @paramGet + $}"#).unwrap();
        if let DocNode::Document(children) = tree {
            if let DocNode::Echo(elements) = &children[0] {
                assert_eq!(
                    elements,
                    &vec![
                        Element::Str("a+b=".into()),
                        Element::Variable("a".into()),
                        Element::Function("paramGet".into()),
                        Element::Variable("b".into()),
                        Element::Function("paramGet".into()),
                        Element::Operator(Operator::Add),
                    ]
                );
                return;
            }
        }
        panic!("unexpected tree shape");
    }

    #[test]
    fn for_loop_rejects_function_in_slots() {
        assert!(matches!(
            parse("{$ FOR i 1 @foo $}{$ END $}"),
            Err(ParseError::BadElement(_))
        ));
    }

    #[test]
    fn bad_variable_name_fails() {
        assert!(matches!(
            parse("{$ FOR 1bad 1 10 $}{$ END $}"),
            Err(ParseError::BadVariableName(_))
        ));
    }

    #[test]
    fn quoted_string_escapes_expand() {
        let tree = parse(r#"{$= "line\n\ttab\"q" $}"#).unwrap();
        if let DocNode::Document(children) = tree {
            if let DocNode::Echo(elements) = &children[0] {
                assert_eq!(elements, &vec![Element::Str("line\n\ttab\"q".into())]);
                return;
            }
        }
        panic!("unexpected tree shape");
    }

    #[test]
    fn integer_double_distinction() {
        let tree = parse("{$= 3 2 / $}").unwrap();
        if let DocNode::Document(children) = tree {
            if let DocNode::Echo(elements) = &children[0] {
                assert_eq!(
                    elements,
                    &vec![
                        Element::Int(3),
                        Element::Int(2),
                        Element::Operator(Operator::Div)
                    ]
                );
                return;
            }
        }
        panic!("unexpected tree shape");

    }
}
