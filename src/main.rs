use clap::{Parser, ValueEnum};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use declsync_native::{ContextHint, CorpusWalker, FileOutcome, SyncConfig, Synchronizer, WalkOptions};

#[derive(Parser)]
#[command(
    name = "declsync",
    about = "Keep exactly one correctly scoped handle declaration per scope that uses it"
)]
struct Cli {
    /// Roots to walk, relative to --base; defaults to the configured roots.
    roots: Vec<PathBuf>,

    /// Project directory holding declsync.json and the cache.
    #[arg(long, default_value = ".")]
    base: PathBuf,

    /// Configuration file; defaults to <base>/declsync.json when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report what would change without writing any file.
    #[arg(long)]
    dry_run: bool,

    /// Context for files without a directive; overrides the configured default.
    #[arg(long, value_enum)]
    context: Option<ContextArg>,

    /// Print the summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Ignore and do not update the converged-file cache.
    #[arg(long)]
    no_cache: bool,

    /// Read one file from stdin and print the synchronized text.
    #[arg(long)]
    stdin: bool,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ContextArg {
    Client,
    Server,
    Unknown,
}

impl From<ContextArg> for ContextHint {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::Client => ContextHint::Client,
            ContextArg::Server => ContextHint::Server,
            ContextArg::Unknown => ContextHint::Unknown,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<SyncConfig, String> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path),
        None => SyncConfig::discover(&cli.base),
    }
    .map_err(|e| e.to_string())?;
    if !cli.roots.is_empty() {
        config.corpus.roots = cli.roots.clone();
    }
    Ok(config)
}

fn run_stdin(config: &SyncConfig, hint: ContextHint) -> i32 {
    let mut text = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut text) {
        error!(error = %e, "failed to read stdin");
        return 2;
    }
    let synchronizer = match Synchronizer::new(&config.handle) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return 2;
        }
    };
    match synchronizer.synchronize(&text, hint) {
        Ok(result) => {
            for diagnostic in &result.diagnostics {
                eprintln!("<stdin>:{}", diagnostic);
            }
            let mut out = std::io::stdout();
            if out.write_all(result.new_text.as_bytes()).is_err() {
                return 2;
            }
            0
        }
        Err(e) => {
            error!(code = e.code(), error = %e, "synchronization failed");
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            process::exit(2);
        }
    };
    let hint = cli
        .context
        .map(ContextHint::from)
        .unwrap_or(config.default_context);

    if cli.stdin {
        process::exit(run_stdin(&config, hint));
    }

    let options = WalkOptions {
        dry_run: cli.dry_run,
        use_cache: !cli.no_cache,
        context: cli.context.map(ContextHint::from),
    };
    let walker = match CorpusWalker::new(&cli.base, config, options) {
        Ok(walker) => walker,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(2);
        }
    };

    let missing = walker.missing_roots();
    if !missing.is_empty() && missing.len() == walker.root_count() {
        for root in &missing {
            error!(root = %root.display(), "root does not exist");
        }
        process::exit(2);
    }

    let summary = walker.run();

    if cli.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!(error = %e, "failed to serialize summary");
                process::exit(2);
            }
        }
    } else {
        for report in &summary.reports {
            for diagnostic in &report.diagnostics {
                println!("{}:{}", report.path.display(), diagnostic);
            }
            match &report.outcome {
                FileOutcome::Rewritten { edits } => {
                    let verb = if summary.dry_run { "would rewrite" } else { "rewrote" };
                    println!("{} {} ({} edits)", verb, report.path.display(), edits);
                }
                FileOutcome::Failed { code, error } => {
                    println!("{}: [{}] {}", report.path.display(), code, error);
                }
                FileOutcome::Unchanged | FileOutcome::Cached => {}
            }
        }
        println!(
            "{} files: {} rewritten, {} unchanged, {} cached, {} failed, {} diagnostics",
            summary.files,
            summary.rewritten,
            summary.unchanged,
            summary.cached,
            summary.failed,
            summary.diagnostics
        );
    }

    process::exit(if summary.failed > 0 { 1 } else { 0 });
}
