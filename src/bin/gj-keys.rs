//! gj-keys - self-service SSH key enrollment.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use git_junction::input::{self, FieldContext, FieldKind};
use git_junction::keys::{FinalizeReport, KeyManager, KeyPolicy, KeyTools, StoredKey};
use git_junction::login::{self, DigestSizes};
use git_junction::metadata::CgitrcStore;
use git_junction::repos::{self, RepositoryScan};
use git_junction::{init_tracing, Config, Identity};

#[derive(Parser, Debug)]
#[command(name = "gj-keys")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identity to act for (defaults to $GJUSER)
    #[arg(short, long)]
    identity: Option<String>,

    /// Log filter (trace, debug, info, warn, error); overrides $GJ_LOG
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List enrolled keys with their fingerprints
    #[command(alias = "ls")]
    List,

    /// Enroll a public key, prompting for anything not given
    Add {
        /// Label shown next to the key
        #[arg(short, long)]
        label: Option<String>,

        /// Key data, with or without the leading `ssh-rsa`
        key: Option<String>,
    },

    /// Remove a key by its 1-based index
    #[command(alias = "rm")]
    Remove {
        index: Option<usize>,

        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show both fingerprints of one key
    Fingerprint { index: usize },

    /// List repositories owned by the identity
    Repos,

    /// Derive a login directory name from a secret read on stdin
    DirectoryName,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let identity = match &cli.identity {
        Some(raw) => Identity::bind(raw, config.identity_size),
        None => Identity::from_env(config.identity_size),
    }
    .context("binding identity")?;

    match cli.command {
        Commands::List => list(&config, identity),
        Commands::Add { label, key } => add(&config, identity, label, key),
        Commands::Remove { index, yes } => remove(&config, identity, index, yes),
        Commands::Fingerprint { index } => fingerprint(&config, identity, index),
        Commands::Repos => list_repositories(&config, &identity),
        Commands::DirectoryName => directory_name(&config, &identity),
    }
}

fn open(config: &Config, identity: Identity) -> Result<KeyManager> {
    let dir = config.keys_dir(identity.as_str());
    KeyManager::open(
        &dir,
        identity,
        KeyPolicy::from_config(config),
        KeyTools::from_config(config),
    )
    .with_context(|| format!("opening key storage {}", dir.display()))
}

fn field_context<'a>(config: &'a Config, key_count: usize) -> FieldContext<'a> {
    FieldContext {
        identity_size: config.identity_size,
        label_max: config.key_label_max,
        key_data_sizes: &config.key_data_sizes,
        key_count,
    }
}

/// Validates `given`, or prompts on the terminal until a value is accepted.
fn field(
    given: Option<String>,
    prompt: &str,
    kind: FieldKind,
    ctx: &FieldContext<'_>,
) -> Result<String> {
    match given {
        Some(value) => input::validate(kind, &value, ctx).map_err(anyhow::Error::msg),
        None => {
            let stdin = io::stdin();
            let mut reader = stdin.lock();
            Ok(input::read_field(&mut reader, &mut io::stdout(), prompt, kind, ctx)?)
        }
    }
}

fn describe(key: &StoredKey) -> String {
    let added = Local
        .timestamp_opt(key.timestamp, 0)
        .single()
        .map(|t| t.format("%d.%m.%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| key.timestamp.to_string());
    let label = if key.label.is_empty() { "-" } else { key.label.as_str() };
    let state = if key.disabled { " (disabled)" } else { "" };
    format!("{}) {label}, added {added}{state}", key.index + 1)
}

/// Prints the key with its fingerprints. Returns false when the
/// fingerprints could not be produced and the key cannot be vouched for.
fn show(manager: &KeyManager, key: &StoredKey) -> bool {
    println!("{}", describe(key));
    match manager.fingerprints(key) {
        Ok(prints) => {
            for print in prints {
                println!("   {print}");
            }
            true
        }
        Err(e) => {
            println!("   {e}");
            false
        }
    }
}

fn list(config: &Config, identity: Identity) -> Result<()> {
    let manager = open(config, identity)?;
    if manager.keys().is_empty() {
        println!("no keys");
    }
    for key in manager.keys() {
        show(&manager, key);
    }
    for corrupt in manager.corrupt() {
        eprintln!("!) {}", corrupt.error);
    }
    Ok(())
}

fn add(config: &Config, identity: Identity, label: Option<String>, key: Option<String>) -> Result<()> {
    let mut manager = open(config, identity)?;
    let ctx = field_context(config, manager.keys().len());

    let label = field(label, "label: ", FieldKind::Label, &ctx)?;
    let data = field(key, "key: ", FieldKind::KeyData, &ctx)?;
    if data.is_empty() {
        bail!("no key given");
    }

    let key = manager.add(&label, &data)?.clone();
    if !show(&manager, &key) {
        bail!("key not enrolled: it could not be fingerprinted");
    }
    finish(manager.finalize())
}

fn remove(config: &Config, identity: Identity, index: Option<usize>, yes: bool) -> Result<()> {
    let mut manager = open(config, identity)?;
    let ctx = field_context(config, manager.keys().len());

    let index = field(index.map(|i| i.to_string()), "remove key #: ", FieldKind::KeyIndex, &ctx)?;
    let index: usize = index.parse().context("parsing key index")?;
    let key = &manager.keys()[index - 1];
    println!("{}", describe(key));

    if !yes {
        let answer = field(None, "remove this key [yes/no] ? ", FieldKind::YesNo, &ctx)?;
        if answer != "yes" {
            println!("nothing removed");
            return Ok(());
        }
    }

    manager.remove(index)?;
    finish(manager.finalize())
}

fn fingerprint(config: &Config, identity: Identity, index: usize) -> Result<()> {
    let manager = open(config, identity)?;
    let Some(key) = index.checked_sub(1).and_then(|i| manager.keys().get(i)) else {
        bail!("invalid key index, 1-{}", manager.keys().len());
    };
    if !show(&manager, key) {
        bail!("fingerprints unavailable");
    }
    Ok(())
}

fn finish(report: FinalizeReport) -> Result<()> {
    for (from, to) in &report.renamed {
        println!("renamed {from} -> {to}");
    }
    for (filename, error) in &report.failures {
        eprintln!("{filename}: {error}");
    }
    let failures = report.failures.len();
    report.install.context("installing keys")?;
    if failures > 0 {
        bail!("{failures} key file(s) could not be updated");
    }
    Ok(())
}

fn list_repositories(config: &Config, identity: &Identity) -> Result<()> {
    let scan = RepositoryScan::new(&config.base_path);
    let mut found = repos::owned_by(&scan, &CgitrcStore, identity.as_str())
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("scanning {}", config.base_path.display()))?;
    found.sort();

    for path in found {
        let shown = path.strip_prefix(&config.base_path).unwrap_or(&path);
        println!("{}", shown.display());
    }
    Ok(())
}

fn directory_name(config: &Config, identity: &Identity) -> Result<()> {
    let mut secret = String::new();
    io::stdin().lock().read_line(&mut secret).context("reading secret")?;
    let secret = secret.trim_end_matches(['\r', '\n']);

    let name = login::directory_name(
        identity,
        secret,
        &config.hashsum,
        &config.salt,
        DigestSizes::from_config(config),
    )?;
    let mut out = io::stdout();
    writeln!(out, "{name}")?;
    Ok(())
}
