// SPDX-License-Identifier: PMPL-1.0-or-later

//! faultline: create, destroy and inspect chaos experiments.

use clap::{Parser, Subcommand, ValueEnum};
use faultline::config::Config;
use faultline::lifecycle::{Engine, PrepareArgs, StatusKind, StatusQuery};
use faultline::report::{self, OutputFormat};
use faultline::transport::{Code, Response};
use faultline::types::AgentKind;
use faultline::{diagnostics, flags, logging};
use std::process::ExitCode;

const PROGRAM: &str = "faultline";

#[derive(Parser)]
#[command(name = "faultline")]
#[command(version)]
#[command(about = "Inject and revert OS, container and application faults")]
#[command(long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    /// How to print the response
    #[arg(short, long, global = true, value_enum, default_value = "json")]
    output: OutputArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an experiment, e.g. `create network delay --interface eth0 --time 3000`
    #[command(alias = "c")]
    Create {
        /// Target, optional sub-target, action, then `--flag value` pairs
        #[arg(
            value_name = "TARGET ACTION [FLAGS]",
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        args: Vec<String>,
    },

    /// Destroy an experiment by uid, or every experiment matching a command
    #[command(alias = "d")]
    Destroy {
        /// `<uid>`, or target, action and the flags to match
        #[arg(
            value_name = "UID | TARGET ACTION [FLAGS]",
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        args: Vec<String>,
    },

    /// Attach an agent so application-level faults can run
    #[command(alias = "p")]
    Prepare {
        #[command(subcommand)]
        agent: PrepareCommands,
    },

    /// Undo a preparation
    #[command(alias = "r")]
    Revoke {
        #[arg(value_name = "UID")]
        uid: String,
    },

    /// Query experiments or preparations
    #[command(alias = "s")]
    Status {
        /// create|destroy for experiments, prepare|revoke for preparations
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        uid: Option<String>,
        /// Experiment target, or preparation type
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        action: Option<String>,
        /// Substring the stored flags must contain
        #[arg(long = "flag-filter")]
        flag: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// `count` or `offset,count`
        #[arg(long)]
        limit: Option<String>,
        #[arg(long)]
        asc: bool,
    },

    /// Look up flag values on this host: `network interface`, `disk mount-point`
    #[command(alias = "q")]
    Query {
        #[arg(value_name = "TARGET")]
        target: String,
        #[arg(value_name = "TYPE")]
        arg: String,
    },

    /// Check the host for the tools faults depend on
    Check,

    /// Print the version
    Version,
}

#[derive(Subcommand)]
enum PrepareCommands {
    /// Attach the sandbox agent to a java process
    Jvm {
        /// Substring of the java command line
        #[arg(long)]
        process: Option<String>,
        #[arg(long)]
        pid: Option<String>,
        /// Agent port; picked automatically when absent
        #[arg(short = 'P', long)]
        port: Option<u16>,
    },
    /// Start the cplus proxy
    Cplus {
        #[arg(short, long)]
        port: u16,
        #[arg(short, long)]
        ip: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputArg {
    Json,
    Pretty,
    Text,
}

impl From<OutputArg> for OutputFormat {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Json => OutputFormat::Json,
            OutputArg::Pretty => OutputFormat::PrettyJson,
            OutputArg::Text => OutputFormat::Text,
        }
    }
}

/// Pulls `--debug` and `-o/--output` out of trailing experiment args, where
/// clap leaves them once they follow the action.
fn take_globals(args: Vec<String>, debug: &mut bool, output: &mut OutputArg) -> Result<Vec<String>, String> {
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let value = match arg.as_str() {
            "--debug" => {
                *debug = true;
                continue;
            }
            "-o" | "--output" => iter.next().ok_or_else(|| format!("{} needs a value", arg))?,
            _ => match arg.strip_prefix("--output=").or_else(|| arg.strip_prefix("-o=")) {
                Some(value) => value.to_string(),
                None => {
                    rest.push(arg);
                    continue;
                }
            },
        };
        *output = OutputArg::from_str(&value, true)
            .map_err(|_| format!("illegal output format {:?}, use json, pretty or text", value))?;
    }
    Ok(rest)
}

fn main() -> ExitCode {
    let mut cli = Cli::parse();
    if let Commands::Create { args } | Commands::Destroy { args } = &mut cli.command {
        match take_globals(std::mem::take(args), &mut cli.debug, &mut cli.output) {
            Ok(rest) => *args = rest,
            Err(err) => {
                return emit(
                    &Response::fail(Code::IllegalParameters, err),
                    OutputFormat::from(cli.output),
                )
            }
        }
    }
    let format = OutputFormat::from(cli.output);

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            return emit(
                &Response::fail(Code::ServerError, format!("load config: {:#}", err)),
                format,
            )
        }
    };
    logging::init(&config.log_dir, cli.debug);

    match cli.command {
        Commands::Check => {
            return match diagnostics::run_check(&config) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("{}", err);
                    ExitCode::FAILURE
                }
            };
        }
        Commands::Version => {
            return emit(&Response::success(env!("CARGO_PKG_VERSION")), format);
        }
        _ => {}
    }

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(err) => {
            return emit(
                &Response::fail(Code::DatabaseError, format!("{:#}", err)),
                format,
            )
        }
    };

    let response = match cli.command {
        Commands::Create { args } => {
            let (words, parsed) = flags::from_args(&args);
            let path = format!("{} create {}", PROGRAM, words.join(" "));
            engine.create(&path, &parsed)
        }
        Commands::Destroy { args } => {
            let (words, parsed) = flags::from_args(&args);
            match words.as_slice() {
                [uid] if parsed.is_empty() => engine.destroy(uid),
                _ => {
                    let path = format!("{} destroy {}", PROGRAM, words.join(" "));
                    engine.destroy_by_command(&path, &parsed)
                }
            }
        }
        Commands::Prepare { agent } => match agent {
            PrepareCommands::Jvm { process, pid, port } => engine.prepare(
                AgentKind::Jvm,
                &PrepareArgs {
                    process,
                    pid,
                    port,
                    ip: None,
                },
            ),
            PrepareCommands::Cplus { port, ip } => engine.prepare(
                AgentKind::Cplus,
                &PrepareArgs {
                    port: Some(port),
                    ip,
                    ..PrepareArgs::default()
                },
            ),
        },
        Commands::Revoke { uid } => engine.revoke(&uid),
        Commands::Query { target, arg } => engine.query(&target, &arg),
        Commands::Status {
            kind,
            uid,
            target,
            action,
            flag,
            status,
            limit,
            asc,
        } => {
            let kind = match kind.as_deref().map(|value| (value, StatusKind::parse(value))) {
                Some((value, None)) => {
                    return emit(
                        &Response::fail(
                            Code::IllegalParameters,
                            format!("illegal --type {:?}, use create, destroy, prepare or revoke", value),
                        ),
                        format,
                    )
                }
                Some((_, kind)) => kind,
                None => None,
            };
            engine.status(&StatusQuery {
                kind,
                uid,
                target,
                action,
                flag,
                status,
                limit,
                asc,
            })
        }
        Commands::Check | Commands::Version => Response::success_empty(),
    };
    emit(&response, format)
}

fn emit(response: &Response, format: OutputFormat) -> ExitCode {
    report::print_response(response, format);
    if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn trailing_globals_are_taken_out() {
        let mut debug = false;
        let mut output = OutputArg::Json;
        let rest = take_globals(
            args("network delay --interface eth0 --debug --time 3000 -o text"),
            &mut debug,
            &mut output,
        )
        .expect("globals should parse");
        assert_eq!(rest, args("network delay --interface eth0 --time 3000"));
        assert!(debug);
        assert!(matches!(output, OutputArg::Text));

        let rest = take_globals(args("cpu fullload --output=pretty"), &mut debug, &mut output)
            .expect("globals should parse");
        assert_eq!(rest, args("cpu fullload"));
        assert!(matches!(output, OutputArg::Pretty));
    }

    #[test]
    fn bad_trailing_output_is_reported() {
        let mut debug = false;
        let mut output = OutputArg::Json;
        assert!(take_globals(args("cpu fullload -o yaml"), &mut debug, &mut output).is_err());
        assert!(take_globals(args("cpu fullload --output"), &mut debug, &mut output).is_err());
    }
}
