//! # lode CLI
//!
//! Command-line front end for lode repositories. Every command runs against
//! the repository containing the current directory, driven through `git`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lode_cas::{derive_key_for_file, ContentKey};
use lode_config::path::find_repo_root;
use lode_config::{init_logging, log_cli_debug, Config, LogLevel};
use lode_repo::{AddOutcome, Repo};
use lode_vcs::GitVcs;

mod show;

/// lode - track large files in git by content key
#[derive(Parser)]
#[command(name = "lode")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Print machine-readable JSON where a command supports it
    #[arg(long, global = true)]
    json: bool,

    /// Log level, overriding configuration (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Give this git repository a replica id and a metadata history
    Init {
        /// Description of this replica (defaults to the directory name)
        #[arg(value_name = "DESCRIPTION")]
        description: Option<String>,
    },

    /// Move files into the object store and stage links in their place
    Add {
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },

    /// Fetch remotes, merge their metadata and branches, repair conflicts
    Sync {
        /// Remotes to sync with (defaults to configured, then all)
        #[arg(value_name = "REMOTE")]
        remotes: Vec<String>,
    },

    /// Print the content key a file would get
    Calckey {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print where content for a key is stored here, present or not
    Contentlocation {
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Print where a file's content would be stored
    Calclocation {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print this replica's id
    Uuid,

    /// List known replicas
    Repos,

    /// Show which replicas hold the content of annexed files
    Whereis {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },

    /// Print a file from the metadata history
    #[command(name = "metadata-cat")]
    MetadataCat {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Change this replica's description
    Describe {
        #[arg(value_name = "DESCRIPTION")]
        description: String,
    },

    /// Remove local content of annexed files
    Drop {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Drop even when too few other replicas are known to hold it
        #[arg(long)]
        force: bool,
    },

    /// Object store statistics
    Stats,

    /// Re-hash every stored object against its key
    Fsck,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file locations
    Path,
}

impl Commands {
    /// Operation name used in the failure line.
    fn name(&self) -> &'static str {
        match self {
            Commands::Init { .. } => "init",
            Commands::Add { .. } => "add",
            Commands::Sync { .. } => "sync",
            Commands::Calckey { .. } => "calckey",
            Commands::Contentlocation { .. } => "contentlocation",
            Commands::Calclocation { .. } => "calclocation",
            Commands::Uuid => "uuid",
            Commands::Repos => "repos",
            Commands::Whereis { .. } => "whereis",
            Commands::MetadataCat { .. } => "metadata-cat",
            Commands::Describe { .. } => "describe",
            Commands::Drop { .. } => "drop",
            Commands::Stats => "stats",
            Commands::Fsck => "fsck",
            Commands::Config { .. } => "config",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let op = cli.command.name();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lode: {}: {:#}", op, e);
            ExitCode::FAILURE
        }
    }
}

/// Settings shared by every command.
struct Session {
    cwd: PathBuf,
    git_dir: Option<PathBuf>,
    config: Config,
    json: bool,
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot read current directory")?;
    let git_dir = find_repo_root(&cwd).map(|root| root.join(".git"));
    let config = Config::load(git_dir.as_deref())?;
    init_logging(cli.log_level.unwrap_or_else(|| config.log_level()));
    log_cli_debug!(command = cli.command.name(), cwd = %cwd.display(), "starting");

    let session = Session {
        cwd,
        git_dir,
        config,
        json: cli.json,
    };

    match cli.command {
        Commands::Init { description } => {
            let vcs = session.vcs()?;
            let repo = Repo::init(vcs, session.config.clone(), description.as_deref())?;
            println!("init {} ok", repo.replica());
            Ok(())
        }
        Commands::Add { paths } => {
            let mut repo = session.repo()?;
            for path in &paths {
                for outcome in repo.add(&session.cwd.join(path))? {
                    if session.json {
                        println!("{}", serde_json::to_string(&outcome)?);
                    } else if let AddOutcome::Added { path, .. } = &outcome {
                        println!("add {} ok", path);
                    }
                }
            }
            Ok(())
        }
        Commands::Sync { remotes } => {
            let mut repo = session.repo()?;
            let report = repo.sync(&remotes)?;
            for remote in &report.remotes {
                print!("{}", show::remote_sync(remote));
            }
            Ok(())
        }
        Commands::Calckey { file } => {
            let chunk = session.config.hashing.chunk_size;
            let key = derive_key_for_file(&session.cwd.join(file), chunk)?;
            println!("{}", key);
            Ok(())
        }
        Commands::Contentlocation { key } => {
            let repo = session.repo()?;
            let key = ContentKey::parse(&key)?;
            let path = repo.content_location(&key);
            println!("{}", show::relative(&path, repo.work_tree()));
            Ok(())
        }
        Commands::Calclocation { file } => {
            let repo = session.repo()?;
            let path = repo.calc_location(&session.cwd.join(file))?;
            println!("{}", show::relative(&path, repo.work_tree()));
            Ok(())
        }
        Commands::Uuid => {
            let repo = session.repo()?;
            println!("{}", repo.replica());
            Ok(())
        }
        Commands::Repos => {
            let mut repo = session.repo()?;
            let infos = repo.replicas()?;
            if session.json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                for info in &infos {
                    println!("{}", show::replica(info));
                }
            }
            Ok(())
        }
        Commands::Whereis { files } => {
            let mut repo = session.repo()?;
            for file in &files {
                let whereis = repo.whereis(&session.cwd.join(file))?;
                if session.json {
                    println!("{}", serde_json::to_string(&whereis)?);
                } else {
                    print!("{}", show::whereis(&whereis));
                }
            }
            Ok(())
        }
        Commands::MetadataCat { path } => {
            let mut repo = session.repo()?;
            match repo.metadata_cat(&path)? {
                Some(text) => {
                    print!("{}", text);
                    Ok(())
                }
                None => bail!("{}: not on the metadata history", path),
            }
        }
        Commands::Describe { description } => {
            let mut repo = session.repo()?;
            repo.describe(&description)?;
            println!("describe {} ok", repo.replica());
            Ok(())
        }
        Commands::Drop { files, force } => {
            let mut repo = session.repo()?;
            for file in &files {
                let key = repo.drop_content(&session.cwd.join(file), force)?;
                println!("drop {} ({}) ok", file.display(), key);
            }
            Ok(())
        }
        Commands::Stats => {
            let repo = session.repo()?;
            let stats = repo.object_stats()?;
            if session.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", show::stats(&stats));
            }
            Ok(())
        }
        Commands::Fsck => {
            let repo = session.repo()?;
            let checks = repo.verify_objects()?;
            let bad: Vec<_> = checks.iter().filter(|c| c.problem.is_some()).collect();
            if session.json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                for check in &bad {
                    println!("{}: {}", check.key, check.problem.as_deref().unwrap_or_default());
                }
                println!("checked {} objects, {} bad", checks.len(), bad.len());
            }
            if !bad.is_empty() {
                bail!("{} objects failed verification", bad.len());
            }
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", toml::to_string_pretty(&session.config)?);
                Ok(())
            }
            ConfigCommands::Path => {
                if let Some(global) = Config::global_config_path() {
                    println!("global: {}", global.display());
                }
                if let Some(git_dir) = &session.git_dir {
                    println!("repository: {}", Config::repo_config_path(git_dir).display());
                }
                Ok(())
            }
        },
    }
}

impl Session {
    fn vcs(&self) -> Result<GitVcs> {
        GitVcs::open(&self.cwd, &self.config.vcs.git_program)
            .with_context(|| format!("{} is not in a git repository", self.cwd.display()))
    }

    fn repo(&self) -> Result<Repo<GitVcs>> {
        let vcs = self.vcs()?;
        Ok(Repo::open(vcs, self.config.clone())?)
    }
}
