//! Mount-surface driver: parses the overlay's argument convention,
//! performs requested host premounts, builds the engine, and reports
//! the options a kernel binding should be started with.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use upfs::config::Config;
use upfs::mount::{parse_roots, plan_premount, rewrite_options, run_premount};
use upfs::resolve::NamePolicy;
use upfs::vfs::{Caller, Vfs as _};
use upfs::{MountMode, UpFs};

#[derive(Parser)]
#[command(name = "upfsctl", about = "Set up an UpFS overlay mount")]
struct Args {
    /// `<perm root>:<store root>` for a split mount, or a single root
    /// for permissions-in-store.
    roots: String,

    /// Guest mount point.
    mountpoint: PathBuf,

    /// Comma-separated mount options; engine-private ones are consumed
    /// here.
    #[arg(short = 'o', long = "options", default_value = "")]
    options: String,

    /// TOML defaults file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("upfsctl: {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log.filter.clone())),
        )
        .init();

    let split_roots = parse_roots(&args.roots);
    let mode = if split_roots.is_some() { MountMode::Split } else { MountMode::PermsInStore };

    let mut option_string = args.options.clone();
    for extra in &config.mount.options {
        if !option_string.is_empty() {
            option_string.push(',');
        }
        option_string.push_str(extra);
    }
    let (options, premounts) = rewrite_options(&option_string, mode);

    let engine = match split_roots {
        Some((perm, store)) => {
            let store = match premount(&store, &args.mountpoint, premounts.store) {
                Some(store) => store,
                None => return ExitCode::FAILURE,
            };
            let perm = match premount(&perm, &args.mountpoint, premounts.perm) {
                Some(perm) => perm,
                None => return ExitCode::FAILURE,
            };
            UpFs::split(&perm, &store, config.name_policy())
        }
        None => {
            let root = PathBuf::from(&args.roots);
            let root = match premount(&root, &args.mountpoint, premounts.root) {
                Some(root) => root,
                None => return ExitCode::FAILURE,
            };
            UpFs::perms_in_store(&root, config.name_policy())
        }
    };

    let engine = match engine {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("upfsctl: {}: {err}", args.roots);
            return ExitCode::FAILURE;
        }
    };

    // Smoke the merged tree before handing anything to a binding.
    let caller = Caller::new(0, 0, 0o022);
    if let Err(err) = engine.get_attr(&caller, Path::new("/")).await {
        eprintln!("upfsctl: {}: root not statable: {err}", args.roots);
        return ExitCode::FAILURE;
    }

    println!(
        "{} ready on {} (-o {})",
        match engine.mode() {
            MountMode::Split => "split overlay",
            MountMode::PermsInStore => "permissions-in-store overlay",
        },
        args.mountpoint.display(),
        options.join(",")
    );
    ExitCode::SUCCESS
}

/// Run the premount for one root when requested; returns the effective
/// root afterwards (device mounts land at the mount point).
fn premount(root: &Path, target: &Path, requested: bool) -> Option<PathBuf> {
    if !requested {
        return Some(root.to_path_buf());
    }
    let Some(plan) = plan_premount(root, target) else {
        eprintln!("upfsctl: {}: cannot stat premount root", root.display());
        return None;
    };
    if !run_premount(&plan) {
        return None;
    }
    Some(plan.remapped_root.unwrap_or_else(|| root.to_path_buf()))
}
