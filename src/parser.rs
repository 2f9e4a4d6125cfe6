use crate::error::{Result, ShellError};
use std::ffi::CString;

/// Role of a token within one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Normal,
    RedirectOperator,
    InputFilename,
    OutputFilenameOverwrite,
    OutputFilenameAppend,
}

/// A piece of a command line, with its quotes already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
}

impl Token {
    fn normal(text: String) -> Self {
        Token {
            text,
            kind: TokenKind::Normal,
        }
    }

    fn operator(text: &str) -> Self {
        Token {
            text: text.to_string(),
            kind: TokenKind::RedirectOperator,
        }
    }
}

/// Where a stage's stdout goes when it is redirected to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRedirect {
    Overwrite(String),
    Append(String),
}

impl OutputRedirect {
    pub fn path(&self) -> &str {
        match self {
            OutputRedirect::Overwrite(path) | OutputRedirect::Append(path) => path,
        }
    }
}

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Program to run; always equal to `argv[0]`.
    pub program_name: String,
    /// Command and its arguments.
    pub argv: Vec<String>,
    /// Stdin comes from the previous stage.
    pub reads_from_pipe: bool,
    /// Stdout feeds the next stage.
    pub writes_to_pipe: bool,
    /// Input redirection file, if any.
    pub infile: Option<String>,
    /// Output redirection target, if any.
    pub outfile: Option<OutputRedirect>,
}

impl Command {
    /// True when neither channel is wired to a pipe or a file.
    pub fn has_default_channels(&self) -> bool {
        !self.reads_from_pipe
            && !self.writes_to_pipe
            && self.infile.is_none()
            && self.outfile.is_none()
    }

    /// Checks that no channel is claimed by both a pipe and a file.
    pub fn check_channels(&self) -> Result<()> {
        if (self.reads_from_pipe && self.infile.is_some())
            || (self.writes_to_pipe && self.outfile.is_some())
        {
            return Err(ShellError::MalformedCommandLine);
        }
        Ok(())
    }

    /// NUL-terminated copies of argv, ready for exec.
    pub fn c_argv(&self) -> Result<Vec<CString>> {
        self.argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()).map_err(ShellError::from))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Whitespace,
    InToken,
    InQuote,
}

/// Character-level tokenizer for one pipeline stage.
///
/// Double quotes group text (whitespace included) into one token and
/// suppress operator recognition. Outside quotes, `<`, `>` and `>>` are
/// split off as operator tokens even when written without surrounding
/// spaces. An unterminated quote runs to the end of the input.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut state = State::Whitespace;
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Whitespace => match c {
                '"' => state = State::InQuote,
                ' ' | '\t' | '\n' | '\r' => {}
                '<' | '>' => push_operator(&mut tokens, c, &mut chars),
                _ => {
                    current.push(c);
                    state = State::InToken;
                }
            },
            State::InToken => match c {
                ' ' | '\t' | '\n' | '\r' => {
                    tokens.push(Token::normal(std::mem::take(&mut current)));
                    state = State::Whitespace;
                }
                '<' | '>' => {
                    if !current.is_empty() {
                        tokens.push(Token::normal(std::mem::take(&mut current)));
                    }
                    push_operator(&mut tokens, c, &mut chars);
                    state = State::Whitespace;
                }
                _ => current.push(c),
            },
            State::InQuote => match c {
                '"' => {
                    tokens.push(Token::normal(std::mem::take(&mut current)));
                    state = State::Whitespace;
                }
                _ => current.push(c),
            },
        }
    }

    match state {
        State::InToken => tokens.push(Token::normal(current)),
        // Unterminated quote: close it at end of input.
        State::InQuote => tokens.push(Token::normal(current)),
        State::Whitespace => {}
    }
    tokens
}

fn push_operator<I>(tokens: &mut Vec<Token>, c: char, chars: &mut std::iter::Peekable<I>)
where
    I: Iterator<Item = char>,
{
    if c == '>' && chars.peek() == Some(&'>') {
        chars.next();
        tokens.push(Token::operator(">>"));
    } else if c == '>' {
        tokens.push(Token::operator(">"));
    } else {
        tokens.push(Token::operator("<"));
    }
}

/// Builds one validated stage from its tokens and its position in the pipeline.
pub fn build_command(
    tokens: Vec<Token>,
    reads_from_pipe: bool,
    writes_to_pipe: bool,
) -> Result<Command> {
    // Pass 1: retype the token after each operator and drop the operator.
    let mut typed: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        if token.kind != TokenKind::RedirectOperator {
            typed.push(token);
            continue;
        }
        let kind = match token.text.as_str() {
            "<" => TokenKind::InputFilename,
            ">>" => TokenKind::OutputFilenameAppend,
            _ => TokenKind::OutputFilenameOverwrite,
        };
        match iter.next() {
            Some(target) if target.kind == TokenKind::Normal => typed.push(Token {
                text: target.text,
                kind,
            }),
            _ => return Err(ShellError::MalformedCommandLine),
        }
    }

    // Pass 2: filenames become redirections, the rest becomes argv.
    let mut argv = Vec::new();
    let mut infile = None;
    let mut outfile = None;
    for token in typed {
        match token.kind {
            TokenKind::Normal => argv.push(token.text),
            TokenKind::InputFilename => {
                if infile.replace(token.text).is_some() {
                    return Err(ShellError::MalformedCommandLine);
                }
            }
            TokenKind::OutputFilenameOverwrite => {
                if outfile.replace(OutputRedirect::Overwrite(token.text)).is_some() {
                    return Err(ShellError::MalformedCommandLine);
                }
            }
            TokenKind::OutputFilenameAppend => {
                if outfile.replace(OutputRedirect::Append(token.text)).is_some() {
                    return Err(ShellError::MalformedCommandLine);
                }
            }
            TokenKind::RedirectOperator => return Err(ShellError::MalformedCommandLine),
        }
    }

    let program_name = match argv.first() {
        Some(name) => name.clone(),
        None => return Err(ShellError::MalformedCommandLine),
    };

    let command = Command {
        program_name,
        argv,
        reads_from_pipe,
        writes_to_pipe,
        infile,
        outfile,
    };
    command.check_channels()?;
    Ok(command)
}

/// Splits a raw line into per-stage substrings on `|`.
///
/// Stops at the first newline. A `|` between double quotes belongs to the
/// stage and does not split it. Always yields at least one substring.
pub fn split_pipeline(line: &str) -> Vec<String> {
    let line = line.split('\n').next().unwrap_or("");
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '|' if !in_quote => stages.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    stages.push(current);
    stages
}

/// Parses a whole line into its pipeline stages.
///
/// Any malformed stage rejects the entire line, so nothing is launched.
pub fn parse_pipeline(line: &str) -> Result<Vec<Command>> {
    let stages = split_pipeline(line);
    let last = stages.len() - 1;
    let mut commands = Vec::with_capacity(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        let command = build_command(tokenize(stage), i > 0, i < last)?;
        log::debug!("stage {}: {:?}", i, command);
        commands.push(command);
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    fn parse_one(line: &str) -> Result<Command> {
        build_command(tokenize(line), false, false)
    }

    #[test]
    fn test_tokenize_simple() {
        let tokens = tokenize("ls -l\t/tmp");
        assert_eq!(texts(&tokens), vec!["ls", "-l", "/tmp"]);
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Normal));
    }

    #[test]
    fn test_tokenize_quotes_keep_whitespace() {
        let tokens = tokenize("echo \"a b\" c");
        assert_eq!(texts(&tokens), vec!["echo", "a b", "c"]);
    }

    #[test]
    fn test_tokenize_quote_suppresses_operators() {
        let tokens = tokenize("echo \"1 > 2\"");
        assert_eq!(texts(&tokens), vec!["echo", "1 > 2"]);
        assert_eq!(tokens[1].kind, TokenKind::Normal);
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        let tokens = tokenize("echo \"open ended");
        assert_eq!(texts(&tokens), vec!["echo", "open ended"]);
    }

    #[test]
    fn test_tokenize_operators_without_spaces() {
        let tight = tokenize("cmd>>file");
        let spaced = tokenize("cmd >> file");
        assert_eq!(tight, spaced);
        assert_eq!(tight[1].kind, TokenKind::RedirectOperator);
        assert_eq!(tight[1].text, ">>");

        let input = tokenize("sort<in.txt>out.txt");
        assert_eq!(texts(&input), vec!["sort", "<", "in.txt", ">", "out.txt"]);
    }

    #[test]
    fn test_overwrite_redirect() {
        let cmd = parse_one("a > out.txt").unwrap();
        assert_eq!(cmd.argv, vec!["a"]);
        assert_eq!(cmd.program_name, "a");
        assert_eq!(cmd.outfile, Some(OutputRedirect::Overwrite("out.txt".into())));
        assert_eq!(cmd.infile, None);
    }

    #[test]
    fn test_append_spacing_is_irrelevant() {
        let tight = parse_one("a>>out.txt").unwrap();
        let spaced = parse_one("a >> out.txt").unwrap();
        assert_eq!(tight, spaced);
        assert_eq!(tight.outfile, Some(OutputRedirect::Append("out.txt".into())));
    }

    #[test]
    fn test_input_and_output_together() {
        let cmd = parse_one("sort -r < in.txt > out.txt").unwrap();
        assert_eq!(cmd.argv, vec!["sort", "-r"]);
        assert_eq!(cmd.infile.as_deref(), Some("in.txt"));
        assert_eq!(cmd.outfile.as_ref().map(|o| o.path()), Some("out.txt"));
    }

    #[test]
    fn test_trailing_operator_is_malformed() {
        assert!(matches!(parse_one("a >"), Err(ShellError::MalformedCommandLine)));
        assert!(matches!(parse_one("a <"), Err(ShellError::MalformedCommandLine)));
        assert!(matches!(parse_one("a > > b"), Err(ShellError::MalformedCommandLine)));
    }

    #[test]
    fn test_duplicate_channel_is_malformed() {
        assert!(parse_one("a > x > y").is_err());
        assert!(parse_one("a > x >> y").is_err());
        assert!(parse_one("a < x < y").is_err());
    }

    #[test]
    fn test_missing_program_is_malformed() {
        assert!(parse_one("> out.txt").is_err());
        assert!(parse_one("   ").is_err());
    }

    #[test]
    fn test_split_pipeline() {
        assert_eq!(split_pipeline("a | b|c"), vec!["a ", " b", "c"]);
        assert_eq!(split_pipeline(""), vec![""]);
        assert_eq!(split_pipeline("a | b\nc | d"), vec!["a ", " b"]);
    }

    #[test]
    fn test_split_pipeline_respects_quotes() {
        assert_eq!(split_pipeline("echo \"x|y\" | cat"), vec!["echo \"x|y\" ", " cat"]);
    }

    #[test]
    fn test_parse_pipeline_sets_pipe_flags() {
        let cmds = parse_pipeline("grep foo < in.txt | sort | uniq > out.txt").unwrap();
        assert_eq!(cmds.len(), 3);
        assert!(!cmds[0].reads_from_pipe && cmds[0].writes_to_pipe);
        assert!(cmds[1].reads_from_pipe && cmds[1].writes_to_pipe);
        assert!(cmds[2].reads_from_pipe && !cmds[2].writes_to_pipe);
        assert_eq!(cmds[0].infile.as_deref(), Some("in.txt"));
        assert_eq!(cmds[2].argv, vec!["uniq"]);
    }

    #[test]
    fn test_pipe_and_file_conflict() {
        assert!(parse_pipeline("a > out | b").is_err());
        assert!(parse_pipeline("a | b < in").is_err());
        assert!(parse_pipeline("a | | b").is_err());
    }

    #[test]
    fn test_c_argv() {
        let cmd = parse_one("echo \"a b\" c").unwrap();
        let argv = cmd.c_argv().unwrap();
        assert_eq!(argv.len(), 3);
        assert_eq!(argv[1].to_str().unwrap(), "a b");
    }
}
