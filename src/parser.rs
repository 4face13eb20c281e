// ABOUTME: The reader: surface syntax and the conduit wire format

use crate::cell::{cons, deref, list_of, Cell};
use crate::error::{ShellError, ShellResult};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, hex_digit1, multispace0},
    IResult, Parser,
};

/// Reader outcome the line editor can act on: a syntax failure is final,
/// but unbalanced input just needs more lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Incomplete,
    Failed(String),
}

impl From<ParseError> for ShellError {
    fn from(e: ParseError) -> ShellError {
        match e {
            ParseError::Incomplete => ShellError::parse("unexpected end of input"),
            ParseError::Failed(msg) => ShellError::parse(msg),
        }
    }
}

// ============================================================================
// Token-level parsers
// ============================================================================

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !";(){}|:\"'#".contains(c)
}

fn word(input: &str) -> IResult<&str, Cell> {
    let (input, text) = take_while1(is_word_char)(input)?;
    Ok((input, Cell::sym(text)))
}

/// `#<kind:hex>` — a cell that went through a textual conduit comes back
/// through the handle table; unknown kinds or handles yield Null
fn handle_token(input: &str) -> IResult<&str, Cell> {
    let (input, _) = tag("#<")(input)?;
    let (input, kind) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-')(input)?;
    let (input, _) = char(':')(input)?;
    let (input, digits) = hex_digit1(input)?;
    let (input, _) = char('>')(input)?;
    let handle = u64::from_str_radix(digits, 16).unwrap_or(0);
    Ok((input, deref(kind, handle)))
}

fn string_body(input: &str) -> IResult<&str, String> {
    let mut out = String::new();
    let mut rest = input;
    loop {
        let (after, chunk) = take_while(|c| c != '"' && c != '\\')(rest)?;
        out.push_str(chunk);
        let mut chars = after.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), out)),
            Some('\\') => match chars.next() {
                Some('n') => {
                    out.push('\n');
                    rest = chars.as_str();
                }
                Some('t') => {
                    out.push('\t');
                    rest = chars.as_str();
                }
                Some('r') => {
                    out.push('\r');
                    rest = chars.as_str();
                }
                Some('0') => {
                    out.push('\0');
                    rest = chars.as_str();
                }
                Some(c @ ('\\' | '"')) => {
                    out.push(c);
                    rest = chars.as_str();
                }
                Some(c) => {
                    out.push(c);
                    rest = chars.as_str();
                }
                None => {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        after,
                        nom::error::ErrorKind::Escaped,
                    )))
                }
            },
            _ => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    rest,
                    nom::error::ErrorKind::Char,
                )))
            }
        }
    }
}

fn string_lit(input: &str) -> IResult<&str, Cell> {
    let (input, _) = char('"')(input)?;
    let (input, body) = string_body(input)?;
    Ok((input, Cell::str(&body)))
}

// ============================================================================
// Wire format
// ============================================================================

fn wire_list(input: &str) -> IResult<&str, Cell> {
    let (mut input, _) = char('(')(input)?;
    let mut items: Vec<Cell> = Vec::new();
    let mut tail = Cell::Null;
    loop {
        let (rest, _) = multispace0(input)?;
        if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>(')')(rest) {
            input = rest;
            break;
        }
        if let Ok((rest, _)) = tag::<_, _, nom::error::Error<&str>>(". ")(rest) {
            let (rest, _) = multispace0(rest)?;
            let (rest, v) = wire_element(rest)?;
            let (rest, _) = multispace0(rest)?;
            let (rest, _) = char(')')(rest)?;
            tail = v;
            input = rest;
            break;
        }
        let (rest, v) = wire_element(rest)?;
        items.push(v);
        input = rest;
    }
    let mut out = tail;
    for item in items.into_iter().rev() {
        out = cons(item, out);
    }
    Ok((input, out))
}

fn wire_element(input: &str) -> IResult<&str, Cell> {
    alt((handle_token, string_lit, wire_list, word)).parse(input)
}

/// Parse one value in the conduit wire format (one line of `write` output)
pub fn parse_wire(input: &str) -> ShellResult<Cell> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Cell::Null);
    }
    match wire_element(trimmed) {
        Ok((rest, v)) if rest.trim().is_empty() => Ok(v),
        Ok((rest, _)) => Err(ShellError::parse(format!("trailing input: {}", rest))),
        Err(e) => Err(ShellError::parse(e.to_string())),
    }
}

// ============================================================================
// Surface tokens
// ============================================================================

#[derive(Debug, Clone)]
enum Tok {
    Elem(Cell),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Sep,
    Pipe,
    Colon,
    Member,
    Quote,
}

fn lex(src: &str) -> Result<Vec<Tok>, ParseError> {
    let mut toks = Vec::new();
    let mut rest = src;
    loop {
        rest = rest.trim_start_matches([' ', '\t']);
        // Backslash-newline continues the line
        if let Some(r) = rest.strip_prefix("\\\n") {
            rest = r;
            continue;
        }
        let Some(c) = rest.chars().next() else { break };
        match c {
            '\n' | ';' => {
                toks.push(Tok::Sep);
                rest = &rest[1..];
            }
            '(' => {
                toks.push(Tok::LParen);
                rest = &rest[1..];
            }
            ')' => {
                toks.push(Tok::RParen);
                rest = &rest[1..];
            }
            '{' => {
                toks.push(Tok::LBrace);
                rest = &rest[1..];
            }
            '}' => {
                toks.push(Tok::RBrace);
                rest = &rest[1..];
            }
            '|' => {
                toks.push(Tok::Pipe);
                rest = &rest[1..];
            }
            '\'' => {
                toks.push(Tok::Quote);
                rest = &rest[1..];
            }
            ':' => {
                if let Some(r) = rest.strip_prefix("::") {
                    toks.push(Tok::Member);
                    rest = r;
                } else {
                    toks.push(Tok::Colon);
                    rest = &rest[1..];
                }
            }
            '"' => match string_lit(rest) {
                Ok((r, cell)) => {
                    toks.push(Tok::Elem(cell));
                    rest = r;
                }
                Err(_) => return Err(ParseError::Incomplete),
            },
            '#' => {
                if rest.starts_with("#<") {
                    match handle_token(rest) {
                        Ok((r, cell)) => {
                            toks.push(Tok::Elem(cell));
                            rest = r;
                        }
                        Err(_) => {
                            return Err(ParseError::Failed("bad handle token".into()));
                        }
                    }
                } else {
                    // Comment to end of line
                    rest = rest.find('\n').map(|i| &rest[i..]).unwrap_or("");
                }
            }
            _ => match word(rest) {
                Ok((r, cell)) => {
                    toks.push(Tok::Elem(cell));
                    rest = r;
                }
                Err(_) => {
                    return Err(ParseError::Failed(format!(
                        "unexpected character: {:?}",
                        c
                    )))
                }
            },
        }
    }
    Ok(toks)
}

// ============================================================================
// Command assembly
// ============================================================================

struct Assembler {
    toks: Vec<Tok>,
    at: usize,
}

impl Assembler {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.at)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.at).cloned();
        if t.is_some() {
            self.at += 1;
        }
        t
    }

    fn skip_seps(&mut self) {
        while matches!(self.peek(), Some(Tok::Sep)) {
            self.at += 1;
        }
    }

    /// One element, including quote prefixes and member chains
    fn element(&mut self, in_parens: bool) -> Result<Cell, ParseError> {
        if in_parens {
            self.skip_seps();
        }
        let head = match self.next() {
            Some(Tok::Elem(cell)) => cell,
            Some(Tok::Quote) => {
                let quoted = self.element(in_parens)?;
                return Ok(list_of(&[Cell::sym("quote"), quoted]));
            }
            Some(Tok::LParen) => {
                let cmd = self.command(true)?;
                match self.next() {
                    Some(Tok::RParen) => cmd,
                    Some(t) => {
                        return Err(ParseError::Failed(format!("expected ')', got {:?}", t)))
                    }
                    None => return Err(ParseError::Incomplete),
                }
            }
            Some(Tok::LBrace) => self.block()?,
            Some(t) => {
                return Err(ParseError::Failed(format!("unexpected {:?}", t)));
            }
            None => return Err(ParseError::Incomplete),
        };
        // Member access chains: a::b::c
        let mut out = head;
        while matches!(self.peek(), Some(Tok::Member)) {
            self.at += 1;
            match self.next() {
                Some(Tok::Elem(Cell::Symbol(s))) => {
                    out = cons(out, Cell::Symbol(s));
                }
                Some(t) => {
                    return Err(ParseError::Failed(format!(
                        "expected member name, got {:?}",
                        t
                    )))
                }
                None => return Err(ParseError::Incomplete),
            }
        }
        Ok(out)
    }

    /// `{ ... }` reads as a `(block ...)` command handed to the syntax form
    fn block(&mut self) -> Result<Cell, ParseError> {
        let mut commands = vec![Cell::sym("block")];
        loop {
            self.skip_seps();
            match self.peek() {
                Some(Tok::RBrace) => {
                    self.at += 1;
                    return Ok(list_of(&commands));
                }
                None => return Err(ParseError::Incomplete),
                _ => commands.push(self.pipeline(false)?),
            }
        }
    }

    fn at_command_end(&self, in_parens: bool) -> bool {
        match self.peek() {
            None => true,
            Some(Tok::Sep) => !in_parens,
            Some(Tok::RParen | Tok::RBrace | Tok::Pipe) => true,
            _ => false,
        }
    }

    /// Elements up to a separator; a trailing `: rest` wraps the rest of
    /// the command as one final sub-command element
    fn command(&mut self, in_parens: bool) -> Result<Cell, ParseError> {
        let mut elems: Vec<Cell> = Vec::new();
        loop {
            if in_parens {
                self.skip_seps();
            }
            if self.at_command_end(in_parens) {
                break;
            }
            if matches!(self.peek(), Some(Tok::Colon)) {
                self.at += 1;
                if elems.is_empty() {
                    return Err(ParseError::Failed("command may not start with ':'".into()));
                }
                let sub = self.command(in_parens)?;
                if sub.is_null() {
                    return Err(ParseError::Failed("missing command after ':'".into()));
                }
                elems.push(sub);
                break;
            }
            elems.push(self.element(in_parens)?);
        }
        Ok(list_of(&elems))
    }

    /// `a | b` rewrites to the boot script's pipe-commands form
    fn pipeline(&mut self, in_parens: bool) -> Result<Cell, ParseError> {
        let mut out = self.command(in_parens)?;
        while matches!(self.peek(), Some(Tok::Pipe)) {
            self.at += 1;
            // A pipeline may continue on the next line
            self.skip_seps();
            let right = self.command(in_parens)?;
            if out.is_null() || right.is_null() {
                return Err(ParseError::Failed("empty pipeline stage".into()));
            }
            out = list_of(&[
                Cell::sym("pipe-commands"),
                list_of(&[Cell::sym("block"), out]),
                list_of(&[Cell::sym("block"), right]),
            ]);
        }
        Ok(out)
    }
}

/// Parse a program: a sequence of commands separated by newlines or `;`
pub fn parse_program(src: &str) -> Result<Vec<Cell>, ParseError> {
    let toks = lex(src)?;
    let mut asm = Assembler { toks, at: 0 };
    let mut commands = Vec::new();
    loop {
        asm.skip_seps();
        if asm.peek().is_none() {
            return Ok(commands);
        }
        match asm.peek() {
            Some(Tok::RParen | Tok::RBrace) => {
                return Err(ParseError::Failed("unbalanced closing bracket".into()))
            }
            _ => {}
        }
        let cmd = asm.pipeline(false)?;
        if !cmd.is_null() {
            commands.push(cmd);
        }
    }
}

/// Whether the source needs more lines before it can parse
pub fn needs_more(src: &str) -> bool {
    matches!(parse_program(src), Err(ParseError::Incomplete))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(src: &str) -> Cell {
        let cmds = parse_program(src).expect("parses");
        assert_eq!(cmds.len(), 1, "expected one command in {:?}", src);
        cmds.into_iter().next().expect("one command")
    }

    #[test]
    fn test_words_become_symbols() {
        assert_eq!(format!("{}", one("add x 4")), "(add x 4)");
        assert_eq!(format!("{}", one("echo $HOME")), "(echo $HOME)");
    }

    #[test]
    fn test_colon_wraps_rest_of_command() {
        assert_eq!(format!("{}", one("write: add x 4")), "(write (add x 4))");
        assert_eq!(
            format!("{}", one("define f: method (n) as: add n 1")),
            "(define f (method (n) as (add n 1)))"
        );
    }

    #[test]
    fn test_braces_read_as_block() {
        assert_eq!(
            format!("{}", one("spawn {c::write hello}")),
            "(spawn (block ((c . write) hello)))"
        );
        assert_eq!(
            format!("{}", one("if (eq n 0) {return 1} else {mul n 2}")),
            "(if (eq n 0) (block (return 1)) else (block (mul n 2)))"
        );
    }

    #[test]
    fn test_member_access_is_a_dotted_pair() {
        assert_eq!(format!("{}", one("c::read")), "((c . read))");
        assert_eq!(format!("{}", one("a::b::c x")), "(((a . b) . c) x)");
    }

    #[test]
    fn test_pipeline_rewrites_to_pipe_commands() {
        assert_eq!(
            format!("{}", one("echo foo | cat")),
            "(pipe-commands (block (echo foo)) (block (cat)))"
        );
    }

    #[test]
    fn test_semicolons_split_commands() {
        let cmds = parse_program("define x 1; write x").expect("parses");
        assert_eq!(cmds.len(), 2);
    }

    #[test]
    fn test_strings_and_comments() {
        assert_eq!(
            format!("{}", one("write \"a b\\n\" # trailing words")),
            "(write \"a b\\n\")"
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(format!("{}", one("write 'x")), "(write (quote x))");
    }

    #[test]
    fn test_incomplete_input() {
        assert!(needs_more("while (lt i 10) {"));
        assert!(needs_more("write \"unterminated"));
        assert!(needs_more("write (add 1"));
        assert!(!needs_more("write (add 1 2)"));
    }

    #[test]
    fn test_wire_round_trip() {
        let v = parse_wire("(1 two \"three\")").expect("parses");
        assert_eq!(format!("{}", v), "(1 two \"three\")");
        let v = parse_wire("(9 . 2)").expect("parses");
        assert_eq!(format!("{}", v), "(9 . 2)");
        assert!(parse_wire("").expect("parses").is_null());
    }
}
