use backuproll::backup::backup_config::BackupRollConfig;
use backuproll::backup::compress::Compression;
use backuproll::backup::file_ext::tar_file_ext;
use backuproll::backup::result_error::error::{Error, ErrorKind};
use backuproll::backup::result_error::result::Result;
use backuproll::backup::roll::{Activity, BackupRoll, RollOptions};
use backuproll::backup::runner::{RestoreHooks, RestoreScope};
use backuproll::backup::select::{RestoreRequest, RestoreSelection, Screen};
use backuproll::backup::store::snapshot::DEFAULT_STREAM_BUFFER_SIZE;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

static DEFAULT_CONFIG: &str = "/opt/wurstmineberg/config/backuproll2.json";

/// Rolling hardlinked backups of Minecraft worlds
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file, JSON or YAML
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Only log what would be done
    #[arg(short, long)]
    simulate: bool,
    #[arg(short, long)]
    verbose: bool,
    /// Wait for a running backuproll to finish instead of failing
    #[arg(long)]
    wait: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct WorldArgs {
    /// World to work on; every configured world when omitted
    world: Option<String>,
    /// Work on every configured world
    #[arg(long, conflicts_with = "world")]
    all: bool,
}

impl WorldArgs {
    fn selected(&self) -> Vec<String> {
        if self.all {
            return Vec::new();
        }
        self.world.iter().cloned().collect()
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up, then rotate
    Cron {
        #[command(flatten)]
        worlds: WorldArgs,
        /// Remove unfinished backups first
        #[arg(long)]
        cleanup: bool,
        #[arg(long)]
        no_backup: bool,
        #[arg(long)]
        no_rotation: bool,
    },
    /// Back up into the recent group
    Backup {
        #[command(flatten)]
        worlds: WorldArgs,
    },
    /// Promote and evict backups
    Rotate {
        #[command(flatten)]
        worlds: WorldArgs,
    },
    /// Remove unfinished backups
    Cleanup {
        #[command(flatten)]
        worlds: WorldArgs,
    },
    /// Restore the latest backup taken at or before a point in time
    Restore {
        world: String,
        /// `YYYY-MM-DD [HH:MM[:SS]]` or a timestamp in the configured format
        #[arg(required = true, num_args = 1..)]
        when: Vec<String>,
        /// Restore the whole world directory, not only its `world` subdirectory
        #[arg(long)]
        everything: bool,
        #[arg(long)]
        no_pre_restore: bool,
        #[arg(long)]
        no_post_restore: bool,
    },
    /// Pick a backup to restore from numbered menus
    RestoreInteractive,
    /// List backups
    List { world: Option<String> },
    /// Write a tar archive of one backup
    Archive {
        world: String,
        group: String,
        backup: String,
        /// Directory inside the backup to archive, defaults to the world directory
        #[arg(long)]
        subdir: Option<PathBuf>,
        /// none, gzip or xz
        #[arg(long, default_value = "none")]
        compression: String,
        /// Output file or directory; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Args {
    fn roll(&self, config: Arc<BackupRollConfig>, worlds: Vec<String>, use_pid_file: bool) -> Result<BackupRoll> {
        BackupRoll::new(
            config,
            RollOptions::builder()
                .simulate(self.simulate)
                .verbose(self.verbose)
                .wait_for_lock(self.wait)
                .use_pid_file(use_pid_file)
                .selected_worlds(worlds)
                .build(),
        )
    }
}

fn run_activity(args: &Args, config: Arc<BackupRollConfig>, worlds: &WorldArgs, activity: Activity) -> Result<()> {
    args.roll(config, worlds.selected(), true)?.do_activity(activity)
}

fn list(roll: &BackupRoll) -> Result<()> {
    let mut out = io::stdout().lock();
    for world in roll.selected_worlds() {
        let collection = match roll.runner().get_collection(world) {
            Err(e) if e.kind() == ErrorKind::CollectionNotFound => {
                warn!("World {} has no backups yet", world);
                continue;
            }
            res => res?,
        };
        for group in collection.list_retain_groups()? {
            for backup in group.list_all_backups()? {
                let marker = if backup.in_progress() { " (in progress)" } else { "" };
                writeln!(out, "{}\t{}\t{}{}", world, group.name(), backup.name(), marker)?;
            }
        }
    }
    Ok(())
}

fn archive(
    roll: &BackupRoll,
    world: &str,
    group: &str,
    backup: &str,
    subdir: Option<&Path>,
    compression: &str,
    output: Option<&Path>,
) -> Result<()> {
    let compression: Compression = compression.parse()?;
    let backup = roll
        .runner()
        .get_collection(world)?
        .retain_group(group)?
        .get_backup(backup)?
        .ok_or_else(|| Error::BackupNotFound(format!("{backup} in group {group} of world {world}")))?;

    match output {
        Some(path) => {
            let path = if path.is_dir() {
                path.join(format!("{}.{}", backup.name(), tar_file_ext(&compression)))
            } else {
                path.to_path_buf()
            };
            backup.create_tar_file(path, subdir, compression)
        }
        None => {
            let mut out = io::stdout().lock();
            for chunk in backup.tar_file_generator(subdir, DEFAULT_STREAM_BUFFER_SIZE, compression)? {
                out.write_all(&chunk?)?;
            }
            out.flush()?;
            Ok(())
        }
    }
}

/// Drives a [`RestoreSelection`] from stdin; `None` when the user backs out.
fn select_interactively(mut selection: RestoreSelection<'_>) -> Result<Option<RestoreRequest>> {
    let mut lines = io::stdin().lock().lines();
    let mut out = io::stdout().lock();
    while !selection.is_finished() {
        writeln!(out, "\n{}", selection.title())?;
        for (index, item) in selection.items().iter().enumerate() {
            writeln!(out, "{}. {}", index + 1, item)?;
        }
        let back = if selection.screen() == Screen::Worlds { "exit" } else { "back" };
        write!(out, "0. {back}\n> ")?;
        out.flush()?;

        let Some(line) = lines.next() else {
            return Ok(None);
        };
        match line?.trim().parse::<usize>() {
            Ok(0) => selection.back(),
            Ok(choice) => match selection.select(choice - 1) {
                Err(e) if e.kind() == ErrorKind::InvalidSelection => {
                    writeln!(out, "There is no item {choice}")?
                }
                res => res?,
            },
            Err(_) => writeln!(out, "Please enter the number of a menu item")?,
        }
    }
    Ok(selection.outcome())
}

fn run(args: &Args) -> Result<()> {
    let config = Arc::new(BackupRollConfig::load(&args.config)?);
    match &args.command {
        Command::Cron {
            worlds,
            cleanup,
            no_backup,
            no_rotation,
        } => run_activity(
            args,
            config,
            worlds,
            Activity {
                cleanup: *cleanup,
                backup: !no_backup,
                rotation: !no_rotation,
            },
        ),
        Command::Backup { worlds } => run_activity(
            args,
            config,
            worlds,
            Activity {
                cleanup: false,
                backup: true,
                rotation: false,
            },
        ),
        Command::Rotate { worlds } => run_activity(
            args,
            config,
            worlds,
            Activity {
                cleanup: false,
                backup: false,
                rotation: true,
            },
        ),
        Command::Cleanup { worlds } => run_activity(
            args,
            config,
            worlds,
            Activity {
                cleanup: true,
                backup: false,
                rotation: false,
            },
        ),
        Command::Restore {
            world,
            when,
            everything,
            no_pre_restore,
            no_post_restore,
        } => {
            let roll = args.roll(config, vec![world.clone()], true)?;
            let backup = roll.find_backup(world, &when.join(" "))?;
            let scope = if *everything {
                RestoreScope::Everything
            } else {
                RestoreScope::WorldOnly
            };
            let hooks = RestoreHooks {
                run_pre: !no_pre_restore,
                run_post: !no_post_restore,
            };
            roll.do_restore(&backup, scope, hooks)
        }
        Command::RestoreInteractive => {
            let roll = args.roll(config, Vec::new(), true)?;
            if !roll.restore_selected(select_interactively)? {
                info!("Restore aborted");
            }
            Ok(())
        }
        Command::List { world } => list(&args.roll(config, world.iter().cloned().collect(), false)?),
        Command::Archive {
            world,
            group,
            backup,
            subdir,
            compression,
            output,
        } => archive(
            &args.roll(config, vec![world.clone()], false)?,
            world,
            group,
            backup,
            subdir.as_deref(),
            compression,
            output.as_deref(),
        ),
    }
}

fn main() {
    let args = Args::parse();
    let level = if args.verbose || args.simulate {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(&args) {
        error!("{e}");
        exit(1);
    }
}
