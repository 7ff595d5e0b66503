use anyhow::Context as _;
use apkshield::config::{load_dictionary, ProtectOptions};
use apkshield::sink::FacadeSink;
use apkshield::{Outcome, Protector};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Package to protect (.apk, or an .apks/.xapk bundle)
    #[arg(short, long)]
    input: PathBuf,

    #[arg(short, long)]
    output: PathBuf,

    /// JSON options file; command line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resource type to leave untouched ("*" keeps all); repeatable
    #[arg(short = 'k', long = "keep-type")]
    keep_types: Vec<String>,

    #[arg(long)]
    skip_manifest: bool,

    /// Dex confusion level, 0 disables it
    #[arg(long)]
    dex_level: Option<u8>,

    /// Directory name dictionary, one token per line
    #[arg(long)]
    dir_dict: Option<PathBuf>,

    /// File name dictionary, one token per line
    #[arg(long)]
    file_dict: Option<PathBuf>,

    /// Do not flag entries as encrypted in the zip headers
    #[arg(long)]
    no_encrypt_flag: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn read_dictionary(path: &Path) -> anyhow::Result<Vec<String>> {
    load_dictionary(path).with_context(|| format!("reading dictionary {}", path.display()))
}

fn build_options(args: &Args) -> anyhow::Result<ProtectOptions> {
    let mut options = match &args.config {
        Some(path) => ProtectOptions::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => ProtectOptions::default(),
    };
    options.keep_types.extend(args.keep_types.iter().cloned());
    options.skip_manifest |= args.skip_manifest;
    if let Some(level) = args.dex_level {
        options.dex_level = level;
    }
    if let Some(path) = &args.dir_dict {
        options.dir_dictionary = read_dictionary(path)?;
    }
    if let Some(path) = &args.file_dict {
        options.file_dictionary = read_dictionary(path)?;
    }
    if args.no_encrypt_flag {
        options.encrypt_entries = false;
    }
    Ok(options)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let options = build_options(&args)?;
    tracing::debug!(?options, "resolved options");

    println!("Protecting {} -> {}", args.input.display(), args.output.display());

    let sink = FacadeSink;
    let mut protector = Protector::new(options, &sink)?;
    match protector
        .protect(&args.input, &args.output)
        .with_context(|| format!("protecting {}", args.input.display()))?
    {
        Outcome::Protected => println!("Success! Output written to {}", args.output.display()),
        Outcome::AlreadyProtected => {
            println!("{} is already protected, nothing written", args.input.display())
        }
    }

    Ok(())
}
