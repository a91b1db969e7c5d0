// Monitor expression evaluator: a regex lexer over an ordered rule table, a
// rewrite pass that tells unary `-`/`*` apart from their binary forms, and a
// recursive evaluator over half-open token ranges. All arithmetic is unsigned
// 32-bit with wraparound.

use crate::memory::{Bus, Width};
use crate::processor::Cpu;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

const TOKEN_MAX: usize = 31;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TokenKind {
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Eq,
    Neq,
    And,
    Or,
    Num,
    Hex,
    Reg,
    // Post-lex rewrites of Minus and Star.
    Neg,
    Deref,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("no rule matches input at position {0}")]
    Lex(usize),
    #[error("bad literal '{0}'")]
    BadLiteral(String),
    #[error("unknown register '{0}'")]
    UnknownRegister(String),
    #[error("malformed expression")]
    Malformed,
    #[error("memory read at 0x{0:08x} out of bounds")]
    OutOfBounds(u32),
}

// Rules are used many times over; compile them once on first use. A rule with
// no token kind is skipped (whitespace).
fn rules() -> &'static [(Regex, Option<TokenKind>)] {
    static RULES: OnceLock<Vec<(Regex, Option<TokenKind>)>> = OnceLock::new();
    RULES.get_or_init(|| {
        let table: &[(&str, Option<TokenKind>)] = &[
            (r"^ +", None),
            (r"^\+", Some(TokenKind::Plus)),
            (r"^-", Some(TokenKind::Minus)),
            (r"^\*", Some(TokenKind::Star)),
            (r"^/", Some(TokenKind::Slash)),
            (r"^\(", Some(TokenKind::LParen)),
            (r"^\)", Some(TokenKind::RParen)),
            (r"^==", Some(TokenKind::Eq)),
            (r"^!=", Some(TokenKind::Neq)),
            (r"^&&", Some(TokenKind::And)),
            (r"^\|\|", Some(TokenKind::Or)),
            (r"^0[xX][0-9a-fA-F]+", Some(TokenKind::Hex)),
            (r"^[0-9]+", Some(TokenKind::Num)),
            (r"^\$[0-9a-zA-Z]+", Some(TokenKind::Reg)),
        ];
        table
            .iter()
            .map(|(pattern, kind)| (Regex::new(pattern).expect("bad lexer rule"), *kind))
            .collect()
    })
}

// Longest match at the cursor; ties go to the earlier rule.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut position = 0;
    while position < input.len() {
        let rest = &input[position..];
        let mut best: Option<(usize, Option<TokenKind>)> = None;
        for (regex, kind) in rules() {
            if let Some(found) = regex.find(rest) {
                let len = found.end();
                if best.map_or(true, |(blen, _)| len > blen) {
                    best = Some((len, *kind));
                }
            }
        }
        let (len, kind) = match best {
            Some(hit) => hit,
            None => return Err(ExprError::Lex(position)),
        };
        if let Some(kind) = kind {
            let mut text = rest[..len].to_string();
            text.truncate(TOKEN_MAX);
            tokens.push(Token { kind, text });
        }
        position += len;
    }
    rewrite_unary(&mut tokens);
    Ok(tokens)
}

// A `*` or `-` is unary iff nothing value-producing precedes it.
fn rewrite_unary(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        let unary = i == 0 || !is_value(tokens[i - 1].kind);
        if unary && tokens[i].kind == TokenKind::Star {
            tokens[i].kind = TokenKind::Deref;
        }
        if unary && tokens[i].kind == TokenKind::Minus {
            tokens[i].kind = TokenKind::Neg;
        }
    }
}

fn is_value(kind: TokenKind) -> bool {
    matches!(kind, TokenKind::Num | TokenKind::Hex | TokenKind::Reg | TokenKind::RParen)
}

fn precedence(kind: TokenKind) -> u32 {
    match kind {
        TokenKind::Or => 1,
        TokenKind::And => 2,
        TokenKind::Eq | TokenKind::Neq => 3,
        TokenKind::Plus | TokenKind::Minus => 4,
        TokenKind::Star | TokenKind::Slash => 5,
        TokenKind::Neg | TokenKind::Deref => 6,
        _ => 0,
    }
}

fn check_parentheses(tokens: &[Token], p: usize, q: usize) -> bool {
    if tokens[p].kind != TokenKind::LParen || tokens[q].kind != TokenKind::RParen {
        return false;
    }
    let mut depth = 0i32;
    for i in p..=q {
        match tokens[i].kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            _ => {}
        }
        if depth == 0 && i < q {
            return false;
        }
    }
    depth == 0
}

// The main operator is the last token at parenthesis depth zero whose
// precedence is <= the running minimum; ties therefore associate
// right-to-left.
fn find_main_op(tokens: &[Token], p: usize, q: usize) -> Option<usize> {
    let mut op = None;
    let mut min_pri = u32::MAX;
    let mut depth = 0i32;
    for i in p..=q {
        match tokens[i].kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            kind => {
                let pri = precedence(kind);
                if depth == 0 && pri > 0 && pri <= min_pri {
                    min_pri = pri;
                    op = Some(i);
                }
            }
        }
    }
    op
}

fn eval(
    tokens: &[Token],
    p: usize,
    q: usize,
    cpu: &Cpu,
    bus: &mut Bus,
) -> Result<u32, ExprError> {
    if p > q {
        return Err(ExprError::Malformed);
    }
    if p == q {
        let token = &tokens[p];
        return match token.kind {
            TokenKind::Num => u32::from_str_radix(&token.text, 10)
                .map_err(|_| ExprError::BadLiteral(token.text.clone())),
            TokenKind::Hex => u32::from_str_radix(&token.text[2..], 16)
                .map_err(|_| ExprError::BadLiteral(token.text.clone())),
            TokenKind::Reg => {
                let name = &token.text[1..];
                cpu.reg_by_name(name)
                    .ok_or_else(|| ExprError::UnknownRegister(name.to_string()))
            }
            _ => Err(ExprError::Malformed),
        };
    }
    if check_parentheses(tokens, p, q) {
        return eval(tokens, p + 1, q - 1, cpu, bus);
    }

    let op = find_main_op(tokens, p, q).ok_or(ExprError::Malformed)?;

    match tokens[op].kind {
        TokenKind::Neg => {
            let value = eval(tokens, op + 1, q, cpu, bus)?;
            return Ok(0u32.wrapping_sub(value));
        }
        TokenKind::Deref => {
            let addr = eval(tokens, op + 1, q, cpu, bus)?;
            return bus.read(addr, Width::Word).map_err(|_| ExprError::OutOfBounds(addr));
        }
        _ => {}
    }

    if op == p {
        return Err(ExprError::Malformed);
    }
    let val1 = eval(tokens, p, op - 1, cpu, bus)?;
    let val2 = eval(tokens, op + 1, q, cpu, bus)?;

    Ok(match tokens[op].kind {
        TokenKind::Plus => val1.wrapping_add(val2),
        TokenKind::Minus => val1.wrapping_sub(val2),
        TokenKind::Star => val1.wrapping_mul(val2),
        TokenKind::Slash => {
            if val2 == 0 {
                log::warn!("Divisor is zero. Output zero as default.");
                0
            } else {
                val1 / val2
            }
        }
        TokenKind::Eq => (val1 == val2) as u32,
        TokenKind::Neq => (val1 != val2) as u32,
        TokenKind::And => (val1 != 0 && val2 != 0) as u32,
        TokenKind::Or => (val1 != 0 || val2 != 0) as u32,
        _ => return Err(ExprError::Malformed),
    })
}

pub fn expr(input: &str, cpu: &Cpu, bus: &mut Bus) -> Result<u32, ExprError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError::Malformed);
    }
    eval(&tokens, 0, tokens.len() - 1, cpu, bus)
}
