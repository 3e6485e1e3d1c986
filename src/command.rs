//! Command lines sent from client to server.
//!
//! A line is `VERB arg1 arg2 ...`, split on ASCII whitespace. Parsing happens in
//! two steps so the dispatcher can check registration between them:
//! [`CommandLine::tokenize`] resolves the verb, [`Command::from_parts`] checks the
//! arity and builds the typed command.

use std::fmt;

use crate::{Error, Result};

/// Known command verbs. Verbs are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Register,
    Store,
    Dir,
    Get,
    Unicast,
    Broadcast,
    Leave,
    Shutdown,
    Help,
}

impl Verb {
    pub const ALL: [Verb; 9] = [
        Verb::Register,
        Verb::Store,
        Verb::Dir,
        Verb::Get,
        Verb::Unicast,
        Verb::Broadcast,
        Verb::Leave,
        Verb::Shutdown,
        Verb::Help,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Register => "/register",
            Verb::Store => "/store",
            Verb::Dir => "/dir",
            Verb::Get => "/get",
            Verb::Unicast => "/unicast",
            Verb::Broadcast => "/broadcast",
            Verb::Leave => "/leave",
            Verb::Shutdown => "/shutdown",
            Verb::Help => "/?",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "/register" => Ok(Verb::Register),
            "/store" => Ok(Verb::Store),
            "/dir" => Ok(Verb::Dir),
            "/get" => Ok(Verb::Get),
            "/unicast" => Ok(Verb::Unicast),
            "/broadcast" => Ok(Verb::Broadcast),
            "/leave" => Ok(Verb::Leave),
            "/shutdown" => Ok(Verb::Shutdown),
            "/?" | "/help" => Ok(Verb::Help),
            _ => Err(Error::UnknownCommand(s.to_string())),
        }
    }

    /// Verbs that may only be used once the session has a handle.
    pub fn requires_handle(&self) -> bool {
        matches!(
            self,
            Verb::Store | Verb::Dir | Verb::Get | Verb::Shutdown | Verb::Unicast | Verb::Broadcast
        )
    }

    pub fn arity(&self) -> Arity {
        match self {
            Verb::Register | Verb::Store | Verb::Get => Arity::Exact(1),
            Verb::Dir | Verb::Leave | Verb::Shutdown | Verb::Help => Arity::Exact(0),
            Verb::Unicast => Arity::AtLeast(2),
            Verb::Broadcast => Arity::AtLeast(1),
        }
    }
}

/// Number of arguments a verb accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(expected) => n == expected,
            Arity::AtLeast(min) => n >= min,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// A tokenized line whose verb is known but whose arguments are unchecked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine<'a> {
    pub verb: Verb,
    pub args: Vec<&'a str>,
}

impl<'a> CommandLine<'a> {
    pub fn tokenize(line: &'a str) -> Result<Self> {
        let mut words = line.split_ascii_whitespace();
        let verb = words.next().ok_or(Error::EmptyCommand)?;
        let verb = Verb::parse(verb)?;
        Ok(CommandLine {
            verb,
            args: words.collect(),
        })
    }
}

/// A fully validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { handle: String },
    Store { filename: String },
    Dir,
    Get { filename: String },
    Unicast { target: String, message: String },
    Broadcast { message: String },
    Leave,
    Shutdown,
    Help,
}

impl Command {
    /// Check the argument count and build the command.
    ///
    /// Message bodies of `/unicast` and `/broadcast` are the remaining tokens
    /// joined with single spaces.
    pub fn from_parts(verb: Verb, args: &[&str]) -> Result<Self> {
        let arity = verb.arity();
        if !arity.accepts(args.len()) {
            return Err(Error::Arity {
                verb: verb.as_str(),
                expected: arity,
                actual: args.len(),
            });
        }

        let command = match verb {
            Verb::Register => Command::Register {
                handle: args[0].to_string(),
            },
            Verb::Store => Command::Store {
                filename: args[0].to_string(),
            },
            Verb::Dir => Command::Dir,
            Verb::Get => Command::Get {
                filename: args[0].to_string(),
            },
            Verb::Unicast => Command::Unicast {
                target: args[0].to_string(),
                message: args[1..].join(" "),
            },
            Verb::Broadcast => Command::Broadcast {
                message: args.join(" "),
            },
            Verb::Leave => Command::Leave,
            Verb::Shutdown => Command::Shutdown,
            Verb::Help => Command::Help,
        };
        Ok(command)
    }

    /// Parse a line without any session preconditions.
    pub fn parse(line: &str) -> Result<Self> {
        let parsed = CommandLine::tokenize(line)?;
        Command::from_parts(parsed.verb, &parsed.args)
    }

    pub fn verb(&self) -> Verb {
        match self {
            Command::Register { .. } => Verb::Register,
            Command::Store { .. } => Verb::Store,
            Command::Dir => Verb::Dir,
            Command::Get { .. } => Verb::Get,
            Command::Unicast { .. } => Verb::Unicast,
            Command::Broadcast { .. } => Verb::Broadcast,
            Command::Leave => Verb::Leave,
            Command::Shutdown => Verb::Shutdown,
            Command::Help => Verb::Help,
        }
    }

    /// Render the command as a wire line, without the trailing newline.
    pub fn to_line(&self) -> String {
        let verb = self.verb().as_str();
        match self {
            Command::Register { handle } => format!("{verb} {handle}"),
            Command::Store { filename } | Command::Get { filename } => {
                format!("{verb} {filename}")
            }
            Command::Unicast { target, message } => format!("{verb} {target} {message}"),
            Command::Broadcast { message } => format!("{verb} {message}"),
            Command::Dir | Command::Leave | Command::Shutdown | Command::Help => verb.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_line() {
        assert!(matches!(Command::parse(""), Err(Error::EmptyCommand)));
        assert!(matches!(Command::parse("   \t "), Err(Error::EmptyCommand)));
    }

    #[test]
    fn test_unknown_verb_is_named() {
        match Command::parse("/Register bob") {
            Err(Error::UnknownCommand(verb)) => assert_eq!(verb, "/Register"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_register_arity() {
        assert_eq!(
            Command::parse("/register bob").unwrap(),
            Command::Register {
                handle: "bob".to_string()
            }
        );
        match Command::parse("/register bob alice") {
            Err(Error::Arity {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Arity::Exact(1));
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            Command::parse("/register"),
            Err(Error::Arity { actual: 0, .. })
        ));
    }

    #[test]
    fn test_unicast_rejoins_body() {
        assert_eq!(
            Command::parse("/unicast bob  hello   there ").unwrap(),
            Command::Unicast {
                target: "bob".to_string(),
                message: "hello there".to_string()
            }
        );
        assert!(matches!(
            Command::parse("/unicast bob"),
            Err(Error::Arity {
                expected: Arity::AtLeast(2),
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_broadcast_and_help_aliases() {
        assert_eq!(
            Command::parse("/broadcast hi all").unwrap(),
            Command::Broadcast {
                message: "hi all".to_string()
            }
        );
        assert_eq!(Command::parse("/?").unwrap(), Command::Help);
        assert_eq!(Command::parse("/help").unwrap(), Command::Help);
        assert!(matches!(Command::parse("/dir now"), Err(Error::Arity { .. })));
    }

    #[test]
    fn test_tokenize_keeps_args_unchecked() {
        let line = CommandLine::tokenize("/store a b c").unwrap();
        assert_eq!(line.verb, Verb::Store);
        assert_eq!(line.args, vec!["a", "b", "c"]);
        assert!(line.verb.requires_handle());
        assert!(!Verb::Register.requires_handle());
    }

    #[test]
    fn test_to_line_parses_back() {
        let commands = [
            Command::Register {
                handle: "ADMIN".to_string(),
            },
            Command::Unicast {
                target: "bob".to_string(),
                message: "see you".to_string(),
            },
            Command::Dir,
            Command::Help,
        ];
        for command in commands {
            assert_eq!(Command::parse(&command.to_line()).unwrap(), command);
        }
    }
}
