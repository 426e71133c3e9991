//! Line commands accepted on stdin in headless mode
//!
//! ```text
//! start <uin>          stop <uin>          restart <uin>
//! status [<uin>]       input <uin> <text>  quit
//! ```

/// A parsed stdin command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(u64),
    Stop(u64),
    Restart(u64),
    /// Status of one account, or of all when `None`
    Status(Option<u64>),
    /// Forward a line to the gateway's stdin
    Input(u64, String),
    Quit,
}

/// Why a line couldn't be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    BadUin(String),
    MissingArgument(&'static str),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::Unknown(cmd) => write!(f, "unknown command: {}", cmd),
            ParseError::BadUin(raw) => write!(f, "invalid uin: {}", raw),
            ParseError::MissingArgument(arg) => write!(f, "missing argument: {}", arg),
        }
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None => (line, ""),
        };

        match verb {
            "" => Err(ParseError::Empty),
            "q" | "quit" => Ok(Command::Quit),
            "start" => Ok(Command::Start(parse_uin(rest)?)),
            "stop" => Ok(Command::Stop(parse_uin(rest)?)),
            "restart" => Ok(Command::Restart(parse_uin(rest)?)),
            "status" if rest.is_empty() => Ok(Command::Status(None)),
            "status" => Ok(Command::Status(Some(parse_uin(rest)?))),
            "input" => {
                let (uin, text) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(ParseError::MissingArgument("text"))?;
                Ok(Command::Input(parse_uin(uin)?, text.to_string()))
            }
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn parse_uin(raw: &str) -> Result<u64, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParseError::MissingArgument("uin"));
    }
    raw.parse().map_err(|_| ParseError::BadUin(raw.to_string()))
}
