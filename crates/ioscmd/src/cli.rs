use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(author, version, about = "Talk to iOS devices through usbmuxd")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Device UDID (required when more than one device is attached)
    #[arg(short, long, global = true)]
    pub udid: Option<String>,

    /// Dial this address directly instead of going through usbmuxd
    #[arg(short, long, global = true)]
    pub ip: Option<String>,

    /// Remote port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// SSH user
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// SSH password
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// usbmuxd address: a Unix socket path or host:port
    #[arg(long, global = true)]
    pub socket: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            socket: self.socket.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            port: self.port,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List attached devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the daemon's system BUID
    Buid,

    /// Print attach and detach events until interrupted
    Watch,

    /// Expose the device port on a local TCP port
    Relay {
        /// Local port to listen on (0 picks a free one)
        #[arg(short, long, default_value_t = 0)]
        local_port: u16,
    },

    /// Open an interactive shell on the device
    Ssh,

    /// Run a command on the device
    Shell {
        /// Command and arguments to execute
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },

    /// Upload a file or directory
    Push { local: PathBuf, remote: PathBuf },

    /// Download a file
    Pull { remote: PathBuf, local: PathBuf },

    /// Install a .deb package
    Install { deb: PathBuf },
}
