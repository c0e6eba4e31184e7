use crate::config::AckMode;
use crate::{Error, Result};

/// Options for the `run` command; values are `None` when not provided on CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub device: Option<String>,
    pub baud: Option<u32>,
    pub root: Option<String>,
    pub memory: bool,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub ack_mode: Option<AckMode>,
}

/// Parsed command-line intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunOptions),
    ShowHelp,
    ShowVersion,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        if args.is_empty() {
            return Ok(Command::Run(RunOptions::default()));
        }

        let mut iter = args.iter();
        match iter.next().map(|s| s.as_str()) {
            Some("run") => Ok(Command::Run(parse_run_options(&mut iter)?)),
            Some("--help") | Some("-h") => Ok(Command::ShowHelp),
            Some("--version") | Some("-V") => Ok(Command::ShowVersion),
            Some(flag) if flag.starts_with('-') => {
                // `run` may be omitted; reparse everything as run flags.
                let mut iter = args.iter();
                Ok(Command::Run(parse_run_options(&mut iter)?))
            }
            Some(cmd) => Err(Error::InvalidArgs(format!(
                "unknown command '{cmd}', try --help"
            ))),
            None => Ok(Command::Run(RunOptions::default())),
        }
    }

    pub fn help() -> &'static str {
        concat!(
            "toffee-module - display module filesystem daemon\n",
            "\n",
            "USAGE:\n",
            "  toffee-module run [--device <path>] [--baud <number>] [--root <dir> | --memory]\n",
            "                    [--log-level <level>] [--log-file <path>] [--ack <packet|text>]\n",
            "  toffee-module --help\n",
            "  toffee-module --version\n",
            "\n",
            "OPTIONS:\n",
            "  --device <path>      Serial device path (default: /dev/ttyGS0)\n",
            "  --baud <number>      Baud rate (default: 115200)\n",
            "  --root <dir>         Host directory backing the flash partition\n",
            "  --memory             Use a volatile in-memory filesystem\n",
            "  --log-level <level>  error, warn, info, debug or trace (default: info)\n",
            "  --log-file <path>    Also append logs to this file\n",
            "  --ack <mode>         packet (default) or text: add OK/ERROR after each response\n",
            "  -h, --help           Show this help\n",
            "  -V, --version        Show version\n",
            "\n",
            "Settings are read from ~/.toffee_module/config.toml; flags override them.\n",
        )
    }

    pub fn print_help() {
        println!("{}", Self::help());
    }
}

fn parse_run_options(iter: &mut std::slice::Iter<String>) -> Result<RunOptions> {
    let mut opts = RunOptions::default();

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--device" => {
                opts.device = Some(take_value(flag, iter)?);
            }
            "--baud" => {
                let raw = take_value(flag, iter)?;
                opts.baud = Some(
                    raw.parse()
                        .map_err(|_| Error::InvalidArgs("baud must be a positive integer".to_string()))?,
                );
            }
            "--root" => {
                opts.root = Some(take_value(flag, iter)?);
            }
            "--memory" => {
                opts.memory = true;
            }
            "--log-level" => {
                let raw = take_value(flag, iter)?;
                if raw.parse::<crate::app::LogLevel>().is_err() {
                    return Err(Error::InvalidArgs(format!(
                        "unknown log level '{raw}', expected error|warn|info|debug|trace"
                    )));
                }
                opts.log_level = Some(raw);
            }
            "--log-file" => {
                opts.log_file = Some(take_value(flag, iter)?);
            }
            "--ack" => {
                let raw = take_value(flag, iter)?;
                opts.ack_mode = Some(raw.parse().map_err(Error::InvalidArgs)?);
            }
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown flag '{other}', try --help"
                )));
            }
        }
    }

    if opts.memory && opts.root.is_some() {
        return Err(Error::InvalidArgs(
            "--memory and --root cannot be combined".to_string(),
        ));
    }

    Ok(opts)
}

fn take_value(flag: &str, iter: &mut std::slice::Iter<String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidArgs(format!("expected a value after {flag}")))
}
