//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use webrpc_peer::CheckKind;

/// webrpc - call functions, read values and open pipes on a webrpc peer
#[derive(Debug, Parser)]
#[command(name = "webrpc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "WEBRPC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Path to the peer socket
    #[arg(long, env = "WEBRPC_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Request timeout in seconds (0 waits forever)
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the demo functions on the socket until interrupted
    Serve {
        /// Maximum concurrent connections
        #[arg(long)]
        max_connections: Option<usize>,
    },

    /// Call a remote function and print its result
    Call {
        /// Dotted function name
        name: String,

        /// Arguments; each is parsed as JSON, or taken as a string
        args: Vec<String>,

        /// Do not wait for a result
        #[arg(long)]
        notify: bool,
    },

    /// Read or write a remote value
    Var {
        /// Dotted value path
        path: String,

        /// Value to write (JSON, or a string)
        #[arg(long)]
        set: Option<String>,

        /// Read as null unless the value is of this kind
        #[arg(long, value_enum, conflicts_with = "set")]
        check: Option<Kind>,
    },

    /// Send chunks through a remote echo pipe and print what comes back
    Echo {
        /// Chunks to send; each is parsed as JSON, or taken as a string
        #[arg(required = true)]
        chunks: Vec<String>,

        /// Pipe constructor to open
        #[arg(long, default_value = "pipe.echo")]
        pipe: String,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Value kinds accepted by `var --check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    String,
    Number,
    Boolean,
    Undefined,
    Object,
    Function,
}

impl From<Kind> for CheckKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::String => CheckKind::String,
            Kind::Number => CheckKind::Number,
            Kind::Boolean => CheckKind::Boolean,
            Kind::Undefined => CheckKind::Undefined,
            Kind::Object => CheckKind::Object,
            Kind::Function => CheckKind::Function,
        }
    }
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Show configuration file path
    Path,
}
