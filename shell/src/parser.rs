//! Recursive descent from tokens to an executable command list.

use crate::Result;
use crate::ShellError;
use crate::lexer::Token;
use crate::lexer::Word;
use crate::lexer::tokenize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// `< file`
    In(Word),
    /// `> file`
    Out(Word),
    /// `>> file`
    Append(Word),
    /// `2> file`
    Err(Word),
    /// `2>&1`
    ErrToOut,
}

/// One simple command: optional leading `KEY=VALUE` assignments, the
/// command words, and redirections in written order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleCommand {
    pub assignments: Vec<(String, Word)>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<SimpleCommand>,
}

/// How an item chains onto the previous one's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    /// First item, or after `;`.
    Always,
    /// `&&`: run iff the previous status is zero.
    IfSuccess,
    /// `||`: run iff the previous status is non-zero.
    IfFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub op: ChainOp,
    pub pipeline: Pipeline,
    pub background: bool,
}

/// A fully parsed input line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandList {
    pub items: Vec<ListItem>,
}

impl CommandList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn parse(line: &str) -> Result<CommandList> {
    let tokens = tokenize(line)?;
    Parser { tokens, pos: 0 }.parse_list()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_list(mut self) -> Result<CommandList> {
        let mut items = Vec::new();
        let mut op = ChainOp::Always;
        loop {
            // Allow stray separators: `;;` or a trailing `;`.
            while matches!(self.peek(), Some(Token::Semi)) {
                self.bump();
                op = ChainOp::Always;
            }
            if self.peek().is_none() {
                break;
            }
            let pipeline = self.parse_pipeline()?;
            let mut background = false;
            let next_op = match self.bump() {
                None => None,
                Some(Token::Semi) => Some(ChainOp::Always),
                Some(Token::AndIf) => Some(ChainOp::IfSuccess),
                Some(Token::OrIf) => Some(ChainOp::IfFailure),
                Some(Token::Background) => {
                    background = true;
                    Some(ChainOp::Always)
                }
                Some(other) => {
                    return Err(ShellError::Syntax(format!(
                        "unexpected token {other:?}"
                    )));
                }
            };
            items.push(ListItem {
                op,
                pipeline,
                background,
            });
            match next_op {
                Some(next) => op = next,
                None => break,
            }
        }
        Ok(CommandList { items })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline> {
        let mut commands = vec![self.parse_simple_command()?];
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.bump();
            commands.push(self.parse_simple_command()?);
        }
        Ok(Pipeline { commands })
    }

    fn parse_simple_command(&mut self) -> Result<SimpleCommand> {
        let mut command = SimpleCommand::default();
        loop {
            match self.peek() {
                Some(Token::Word(_)) => {
                    let Some(Token::Word(word)) = self.bump() else {
                        unreachable!("peeked a word");
                    };
                    // Assignments only bind before the first command word.
                    if command.words.is_empty() {
                        if let Some(assignment) = split_assignment(&word) {
                            command.assignments.push(assignment);
                            continue;
                        }
                    }
                    command.words.push(word);
                }
                Some(Token::RedirectIn) => {
                    self.bump();
                    command.redirects.push(Redirect::In(self.redirect_target()?));
                }
                Some(Token::RedirectOut) => {
                    self.bump();
                    command.redirects.push(Redirect::Out(self.redirect_target()?));
                }
                Some(Token::RedirectAppend) => {
                    self.bump();
                    command
                        .redirects
                        .push(Redirect::Append(self.redirect_target()?));
                }
                Some(Token::RedirectErr) => {
                    self.bump();
                    command.redirects.push(Redirect::Err(self.redirect_target()?));
                }
                Some(Token::RedirectErrToOut) => {
                    self.bump();
                    command.redirects.push(Redirect::ErrToOut);
                }
                _ => break,
            }
        }
        if command.words.is_empty() && command.assignments.is_empty() {
            return Err(ShellError::Syntax("expected a command".to_string()));
        }
        Ok(command)
    }

    fn redirect_target(&mut self) -> Result<Word> {
        match self.bump() {
            Some(Token::Word(word)) => Ok(word),
            other => Err(ShellError::Syntax(format!(
                "redirect needs a target, got {other:?}"
            ))),
        }
    }
}

/// `KEY=VALUE` at the head of a command, `KEY` a valid identifier in an
/// unquoted segment. The value keeps its remaining segments for expansion.
fn split_assignment(word: &Word) -> Option<(String, Word)> {
    let first = word.segments.first()?;
    if first.quote != crate::lexer::Quote::None {
        return None;
    }
    let eq = first.text.find('=')?;
    let key = &first.text[..eq];
    if key.is_empty() || !is_identifier(key) {
        return None;
    }
    let mut value = Word::default();
    let rest = &first.text[eq + 1..];
    if !rest.is_empty() {
        value.segments.push(crate::lexer::Segment {
            text: rest.to_string(),
            quote: crate::lexer::Quote::None,
        });
    }
    value.segments.extend(word.segments[1..].iter().cloned());
    Some((key.to_string(), value))
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
