use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const DEFAULT_CONFIG_PATH: &str = "kodofs.toml";
pub const CONFIG_ENV: &str = "KODOFS_CONFIG";

#[derive(Parser, Debug)]
#[command(name = "kodofs", about = "File operations against configured object-storage buckets")]
pub struct Cli {
    /// Disk configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        env = CONFIG_ENV,
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    /// Bucket alias to operate on instead of the first configured one
    #[arg(short, long, global = true, value_name = "ALIAS")]
    pub bucket: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Upload a local file
    Put { local: PathBuf, key: String },
    /// Download to a file, or stdout
    Get { key: String, local: Option<PathBuf> },
    /// List a directory
    #[command(name = "ls")]
    List {
        prefix: Option<String>,
        /// Every key below the prefix instead of one level
        #[arg(short, long)]
        recursive: bool,
    },
    /// Print object metadata
    Stat { key: String },
    /// Exit 0 if the key exists, 1 otherwise
    Exists { key: String },
    /// Delete one key
    #[command(name = "rm")]
    Remove { key: String },
    /// Delete every key under a prefix
    #[command(name = "rmdir")]
    RemoveDir { prefix: String },
    /// Move, optionally into another bucket
    #[command(name = "mv")]
    Move {
        src: String,
        dst: String,
        #[arg(long, value_name = "ALIAS")]
        to: Option<String>,
    },
    /// Copy, optionally into another bucket
    #[command(name = "cp")]
    Copy {
        src: String,
        dst: String,
        #[arg(long, value_name = "ALIAS")]
        to: Option<String>,
    },
    /// Print a signed download URL
    Url { key: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    fn parse_line(line: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("kodofs").chain(line.split_whitespace()))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_put_with_globals() {
        let cli =
            parse_line("--config /etc/kodofs.toml --bucket image put ./cat.png photos/cat.png")
                .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/kodofs.toml"));
        assert_eq!(cli.bucket.as_deref(), Some("image"));
        assert_eq!(
            cli.command,
            Command::Put {
                local: PathBuf::from("./cat.png"),
                key: "photos/cat.png".into()
            }
        );
    }

    #[test]
    fn test_globals_after_subcommand() {
        let cli = parse_line("stat a.png -b archive -c other.toml").unwrap();
        assert_eq!(cli.bucket.as_deref(), Some("archive"));
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }

    #[test]
    fn test_parse_list_flags() {
        let cli = parse_line("ls photos -r").unwrap();
        assert_eq!(
            cli.command,
            Command::List {
                prefix: Some("photos".into()),
                recursive: true
            }
        );
        let cli = parse_line("ls").unwrap();
        assert_eq!(
            cli.command,
            Command::List {
                prefix: None,
                recursive: false
            }
        );
    }

    #[test]
    fn test_parse_move_to_bucket() {
        let cli = parse_line("mv a.png b.png --to archive").unwrap();
        assert_eq!(
            cli.command,
            Command::Move {
                src: "a.png".into(),
                dst: "b.png".into(),
                to: Some("archive".into())
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("").is_err());
        assert!(parse_line("put only-one").is_err());
        assert!(parse_line("frobnicate x").is_err());
        assert!(parse_line("ls --bogus").is_err());
        assert!(parse_line("--config").is_err());
    }
}
