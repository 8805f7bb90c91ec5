mod commands;

use clap::{Parser, Subcommand};
use commands::{Globals, EXIT_FAILURE};
use relkit_core::Phase;
use relkit_store::{DEFAULT_BLOB_PREFIX, DEFAULT_MAX_AGE_DAYS};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "relkit",
    version,
    about = "Publish, replicate and garbage-collect OS image releases"
)]
struct Cli {
    /// Publishing configuration file.
    #[arg(long, default_value = "publishing-cfg.yaml", global = true)]
    cfg: PathBuf,

    /// Name of the publishing configuration to use.
    #[arg(long, default_value = "default", global = true)]
    cfg_name: String,

    /// Flavour-set definitions.
    #[arg(long, default_value = "flavours.yaml", global = true)]
    flavours: PathBuf,

    /// Feature table used to canonicalise modifiers. Without it modifiers
    /// are only sorted and deduplicated.
    #[arg(long, global = true, conflicts_with = "feature_command")]
    features: Option<PathBuf>,

    /// Program printing the canonical feature list of a flavour, called as
    /// `<program> --feature-dir <dir> --features <list> --arch <a> --version <v> features`.
    #[arg(long, global = true)]
    feature_command: Option<PathBuf>,

    /// Feature directory handed to --feature-command.
    #[arg(long, default_value = "features", global = true)]
    feature_dir: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
struct ReleaseArgs {
    /// Release version, e.g. 1443.3.
    #[arg(long)]
    version: Option<String>,
    /// Build commit, full or abbreviated.
    #[arg(long)]
    commit: Option<String>,
    /// Take version and commit from a named publishing version.
    #[arg(long, conflicts_with_all = ["version", "commit"])]
    publishing_version: Option<String>,
    /// Publishing-version definitions.
    #[arg(long, default_value = "publishing-versions.yaml")]
    publishing_versions: PathBuf,
    /// Repository used to expand abbreviated commits.
    #[arg(long)]
    repo: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the publish pipeline for one release.
    Publish {
        /// Flavour set whose manifests make up the release.
        #[arg(long)]
        flavour_set: String,
        #[command(flatten)]
        release: ReleaseArgs,
        /// Only publish to this platform (repeatable).
        #[arg(long = "platform")]
        platforms: Vec<String>,
        /// Publish even if a manifest is already published.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// First phase to run.
        #[arg(long)]
        start_from: Option<Phase>,
        /// Last phase to run.
        #[arg(long)]
        stop_after: Option<Phase>,
        /// Abort instead of skipping platforms without a publishing target.
        #[arg(long, default_value_t = false)]
        fail_on_missing_cfg: bool,
        /// In sync-images, only verify replicas instead of replicating.
        #[arg(long, default_value_t = false)]
        check_replicas_only: bool,
        /// Print the component descriptor after the run.
        #[arg(long, default_value_t = false)]
        print_component_descriptor: bool,
    },
    /// Copy release artefacts into every replica bucket.
    Replicate {
        #[arg(long)]
        flavour_set: String,
        #[command(flatten)]
        release: ReleaseArgs,
        /// Only verify replicas; exit non-zero if any is missing or differs.
        #[arg(long, default_value_t = false)]
        check_only: bool,
    },
    /// Look up release manifests.
    Find {
        /// Release version.
        #[arg(long)]
        version: String,
        /// Build commit, full or abbreviated.
        #[arg(long)]
        commit: String,
        /// Repository used to expand abbreviated commits.
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Look up a single flavour on this platform.
        #[arg(long, conflicts_with = "flavour_set")]
        platform: Option<String>,
        #[arg(long, default_value = "amd64")]
        arch: String,
        /// Modifier of the flavour (repeatable).
        #[arg(long = "modifier")]
        modifiers: Vec<String>,
        /// Look up every flavour of this set.
        #[arg(long)]
        flavour_set: Option<String>,
    },
    /// Remove published images of a release.
    Cleanup {
        #[arg(long)]
        flavour_set: String,
        /// Release version.
        #[arg(long)]
        version: String,
        /// Build commit; read from the stored component descriptor when omitted.
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Only clean up on this platform (repeatable).
        #[arg(long = "platform")]
        platforms: Vec<String>,
        /// Only report what would be removed.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Garbage-collect manifests and unreferenced artefacts.
    Gc {
        #[command(subcommand)]
        target: GcTarget,
    },
}

#[derive(Debug, Subcommand)]
enum GcTarget {
    /// Delete single release manifests older than the age limit.
    Manifests {
        /// Key prefix to purge under; all single manifests by default.
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = DEFAULT_MAX_AGE_DAYS)]
        max_age_days: i64,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Delete manifest sets older than the age limit.
    Sets {
        /// Key prefix to purge under, e.g. meta/sets/snapshot.
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = DEFAULT_MAX_AGE_DAYS)]
        max_age_days: i64,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Delete artefacts no stored manifest or manifest set references.
    Orphans {
        /// Key prefix of the artefacts to sweep.
        #[arg(long, default_value = DEFAULT_BLOB_PREFIX)]
        prefix: String,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RELKIT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let globals = Globals {
        cfg: cli.cfg,
        cfg_name: cli.cfg_name,
        flavours: cli.flavours,
        features: cli.features,
        feature_command: cli.feature_command,
        feature_dir: cli.feature_dir,
        json: cli.json,
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Publish {
                flavour_set,
                release,
                platforms,
                force,
                start_from,
                stop_after,
                fail_on_missing_cfg,
                check_replicas_only,
                print_component_descriptor,
            } => {
                commands::publish::run(
                    &globals,
                    &flavour_set,
                    &release.into(),
                    commands::publish::Flags {
                        platforms,
                        force,
                        start_from,
                        stop_after,
                        fail_on_missing_cfg,
                        check_replicas_only,
                        print_component_descriptor,
                    },
                )
                .await
            }
            Commands::Replicate {
                flavour_set,
                release,
                check_only,
            } => commands::replicate::run(&globals, &flavour_set, &release.into(), check_only).await,
            Commands::Find {
                version,
                commit,
                repo,
                platform,
                arch,
                modifiers,
                flavour_set,
            } => {
                let selection = match (platform, flavour_set) {
                    (Some(platform), _) => commands::find::Selection::Flavour {
                        platform,
                        arch,
                        modifiers,
                    },
                    (None, Some(name)) => commands::find::Selection::FlavourSet(name),
                    (None, None) => {
                        eprintln!("error: pass --platform or --flavour-set");
                        return Ok(EXIT_FAILURE);
                    }
                };
                commands::find::run(&globals, &version, &commit, repo.as_deref(), selection).await
            }
            Commands::Cleanup {
                flavour_set,
                version,
                commit,
                repo,
                platforms,
                dry_run,
            } => {
                commands::cleanup::run(
                    &globals,
                    &flavour_set,
                    &version,
                    commit.as_deref(),
                    repo.as_deref(),
                    &platforms,
                    dry_run,
                )
                .await
            }
            Commands::Gc { target } => match target {
                GcTarget::Manifests {
                    prefix,
                    max_age_days,
                    dry_run,
                } => {
                    commands::gc::purge(
                        &globals,
                        commands::gc::Purge::Manifests,
                        prefix.as_deref(),
                        max_age_days,
                        dry_run,
                    )
                    .await
                }
                GcTarget::Sets {
                    prefix,
                    max_age_days,
                    dry_run,
                } => {
                    commands::gc::purge(
                        &globals,
                        commands::gc::Purge::Sets,
                        prefix.as_deref(),
                        max_age_days,
                        dry_run,
                    )
                    .await
                }
                GcTarget::Orphans { prefix, dry_run } => {
                    commands::gc::orphans(&globals, &prefix, dry_run).await
                }
            },
        }
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

impl From<ReleaseArgs> for commands::ReleaseSelector {
    fn from(args: ReleaseArgs) -> Self {
        Self {
            version: args.version,
            commit: args.commit,
            publishing_version: args.publishing_version,
            publishing_versions: args.publishing_versions,
            repo: args.repo,
        }
    }
}
