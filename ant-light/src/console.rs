//! Console commands
//!
//! Positions are 1-based on the console and 0-based everywhere else.

use std::str::FromStr;

use ant_protocol::{Intensity, InvalidIntensity};
use thiserror::Error;

/// Help text listing every command
pub const HELP: &str = "\
Commands:
  search              search for lights on every free channel
  list                show connected lights
  set <n> <value>     set light n to value (0-100), acknowledged
  broadcast <n> <v>   set light n to value through broadcast data
  step <n> <value>    move light n to value relative to its last reading
  validate            drop lights whose channel is gone
  pause | resume      stop or restart receiving updates
  defaults            restore default settings (applies on restart)
  help                show this text
  quit                close every channel and exit";

/// Errors parsing a console line
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Blank line
    #[error("empty command")]
    Empty,

    /// Unrecognized command word
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    /// Wrong number of arguments
    #[error("usage: {0}")]
    Usage(&'static str),

    /// Light position is not a positive number
    #[error("invalid light number '{0}'")]
    InvalidPosition(String),

    /// Value is not a number
    #[error("invalid value '{0}'")]
    InvalidValue(String),

    /// Value outside 0-100
    #[error(transparent)]
    OutOfRange(#[from] InvalidIntensity),
}

/// A parsed console command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Start a search
    Search,
    /// Print the link list
    List,
    /// Absolute set via acknowledged data
    Set {
        /// 0-based position
        index: usize,
        /// Target value
        value: Intensity,
    },
    /// Absolute set via broadcast data
    Broadcast {
        /// 0-based position
        index: usize,
        /// Target value
        value: Intensity,
    },
    /// Relative step to a target value
    Step {
        /// 0-based position
        index: usize,
        /// Target value
        value: Intensity,
    },
    /// Evict dead links
    Validate,
    /// Detach event handlers
    Pause,
    /// Reattach event handlers
    Resume,
    /// Restore default settings
    Defaults,
    /// Print help
    Help,
    /// Exit
    Quit,
}

fn parse_position(arg: &str) -> Result<usize, CommandError> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(CommandError::InvalidPosition(arg.to_string())),
    }
}

fn parse_target(
    args: &[&str],
    usage: &'static str,
) -> Result<(usize, Intensity), CommandError> {
    let [position, value] = args else {
        return Err(CommandError::Usage(usage));
    };
    let index = parse_position(position)?;
    let raw = value
        .trim_end_matches('%')
        .parse::<u8>()
        .map_err(|_| CommandError::InvalidValue(value.to_string()))?;
    Ok((index, Intensity::new(raw)?))
}

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Err(CommandError::Empty);
        };
        let args: Vec<&str> = words.collect();

        let simple = |cmd: ConsoleCommand, usage: &'static str| {
            if args.is_empty() {
                Ok(cmd)
            } else {
                Err(CommandError::Usage(usage))
            }
        };

        match word.to_ascii_lowercase().as_str() {
            "search" | "s" => simple(ConsoleCommand::Search, "search"),
            "list" | "ls" => simple(ConsoleCommand::List, "list"),
            "set" => {
                let (index, value) = parse_target(&args, "set <n> <value>")?;
                Ok(ConsoleCommand::Set { index, value })
            }
            "broadcast" | "bc" => {
                let (index, value) = parse_target(&args, "broadcast <n> <value>")?;
                Ok(ConsoleCommand::Broadcast { index, value })
            }
            "step" => {
                let (index, value) = parse_target(&args, "step <n> <value>")?;
                Ok(ConsoleCommand::Step { index, value })
            }
            "validate" => simple(ConsoleCommand::Validate, "validate"),
            "pause" => simple(ConsoleCommand::Pause, "pause"),
            "resume" => simple(ConsoleCommand::Resume, "resume"),
            "defaults" => simple(ConsoleCommand::Defaults, "defaults"),
            "help" | "?" => simple(ConsoleCommand::Help, "help"),
            "quit" | "exit" | "q" => simple(ConsoleCommand::Quit, "quit"),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}
