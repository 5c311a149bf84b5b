//! Recursive descent parser for marker expressions

use super::{MarkerError, MarkerExpression, MarkerOperator, MarkerTree, MarkerValue, MarkerVariable};
use crate::constraint::Operator;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Word(String),
    Op(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Open => "'('".to_string(),
            Token::Close => "')'".to_string(),
            Token::Str(s) => format!("string '{}'", s),
            Token::Word(w) => format!("'{}'", w),
            Token::Op(o) => format!("operator '{}'", o),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, MarkerError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match c {
            '(' => {
                tokens.push((start, Token::Open));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::Close));
                i += 1;
            }
            '\'' | '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&q) if q == c => break,
                        Some(&ch) => value.push(ch),
                        None => return Err(MarkerError::UnterminatedString(input.to_string())),
                    }
                    i += 1;
                }
                i += 1;
                tokens.push((start, Token::Str(value)));
            }
            '=' | '!' | '<' | '>' | '~' => {
                let mut op = String::new();
                while i < chars.len() && matches!(chars[i], '=' | '!' | '<' | '>' | '~') {
                    op.push(chars[i]);
                    i += 1;
                }
                tokens.push((start, Token::Op(op)));
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let mut word = String::new();
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    word.push(chars[i]);
                    i += 1;
                }
                tokens.push((start, Token::Word(word)));
            }
            other => {
                return Err(MarkerError::Unexpected {
                    marker: input.to_string(),
                    found: format!("'{}'", other),
                    position: start,
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Result<(usize, Token), MarkerError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| MarkerError::UnexpectedEnd(self.input.to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    fn unexpected(&self, position: usize, token: &Token) -> MarkerError {
        MarkerError::Unexpected {
            marker: self.input.to_string(),
            found: token.describe(),
            position,
        }
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == word)
    }

    fn parse_or(&mut self) -> Result<MarkerTree, MarkerError> {
        let mut children = vec![self.parse_and()?];
        while self.peek_word("or") {
            self.pos += 1;
            children.push(self.parse_and()?);
        }
        Ok(MarkerTree::or(children))
    }

    fn parse_and(&mut self) -> Result<MarkerTree, MarkerError> {
        let mut children = vec![self.parse_atom()?];
        while self.peek_word("and") {
            self.pos += 1;
            children.push(self.parse_atom()?);
        }
        Ok(MarkerTree::and(children))
    }

    fn parse_atom(&mut self) -> Result<MarkerTree, MarkerError> {
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let inner = self.parse_or()?;
            let (position, token) = self.next()?;
            if token != Token::Close {
                return Err(self.unexpected(position, &token));
            }
            return Ok(inner);
        }

        let lhs = self.parse_value()?;
        let operator = self.parse_operator()?;
        let rhs = self.parse_value()?;
        Ok(MarkerTree::Expression(MarkerExpression::new(lhs, operator, rhs)))
    }

    fn parse_value(&mut self) -> Result<MarkerValue, MarkerError> {
        let (position, token) = self.next()?;
        match token {
            Token::Str(value) => Ok(MarkerValue::Literal(value)),
            Token::Word(word) => MarkerVariable::parse(&word)
                .map(MarkerValue::Variable)
                .ok_or(MarkerError::UnknownVariable(word)),
            other => Err(self.unexpected(position, &other)),
        }
    }

    fn parse_operator(&mut self) -> Result<MarkerOperator, MarkerError> {
        let (position, token) = self.next()?;
        match &token {
            Token::Op(op) => op
                .parse::<Operator>()
                .map(MarkerOperator::Version)
                .map_err(|_| self.unexpected(position, &token)),
            Token::Word(w) if w == "in" => Ok(MarkerOperator::In),
            Token::Word(w) if w == "not" => {
                let (position, token) = self.next()?;
                match token {
                    Token::Word(ref w) if w == "in" => Ok(MarkerOperator::NotIn),
                    other => Err(self.unexpected(position, &other)),
                }
            }
            _ => Err(self.unexpected(position, &token)),
        }
    }
}

pub(super) fn parse(input: &str) -> Result<MarkerTree, MarkerError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(MarkerError::UnexpectedEnd(input.to_string()));
    }
    let mut parser = Parser { input, tokens, pos: 0 };
    let tree = parser.parse_or()?;
    if let Some((position, token)) = parser.tokens.get(parser.pos) {
        return Err(parser.unexpected(*position, token));
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let tree = parse("os_name == 'a' or os_name == 'b' and python_version > '3'").unwrap();
        match tree {
            MarkerTree::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], MarkerTree::And(_)));
            }
            other => panic!("expected or, got {:?}", other),
        }
    }

    #[test]
    fn test_not_in() {
        let tree = parse("platform_machine not in 'arm64 aarch64'").unwrap();
        assert_eq!(tree.to_string(), "platform_machine not in 'arm64 aarch64'");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse("foo == 'bar'"), Err(MarkerError::UnknownVariable(_))));
        assert!(matches!(parse("os_name == 'nt"), Err(MarkerError::UnterminatedString(_))));
        assert!(matches!(parse("os_name =="), Err(MarkerError::UnexpectedEnd(_))));
        assert!(matches!(parse("(os_name == 'nt'"), Err(MarkerError::UnexpectedEnd(_))));
        assert!(matches!(parse("os_name == 'nt')"), Err(MarkerError::Unexpected { .. })));
        assert!(parse("os_name => 'nt'").is_err());
        assert!(parse("").is_err());
    }
}
