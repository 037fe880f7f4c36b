//! Command-line front-end
//!
//! Thin shell over the library: selects a product, flavour, and
//! parameter bundle from the registry, then dispatches one core call
//! per invocation. Exit codes: 0 on success, 1 for invalid input or a
//! failed validation, 2 for configuration problems (bad parameter file,
//! unknown product, inconsistent curve data).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use keymill::confid::ConfirmationId;
use keymill::pidgen2::{self, Pidgen2Info};
use keymill::pidgen3::{self, KeyInfo, Pidgen3};
use keymill::registry::{FlavourEntry, ProductEntry, Registry};

#[derive(Parser)]
#[command(
    name = "keymill",
    version,
    about = "Product key issuance and validation toolkit"
)]
struct Cli {
    /// Override the embedded parameter file.
    #[arg(long, global = true, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Informational output (selected parameters, product IDs).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Algorithm-level debug output.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate product keys (the default verb).
    Generate(GenerateArgs),
    /// Validate a product key.
    Validate {
        /// The key, with or without dashes.
        key: String,
        #[command(flatten)]
        select: SelectArgs,
    },
    /// Derive a Confirmation ID from an Installation ID.
    Confirmationid {
        /// The 41- or 45-digit Installation ID.
        #[arg(long = "installationid", value_name = "DIGITS")]
        installation_id: String,
        /// Product ID, required by Office-branded activation curves.
        #[arg(long = "productid", value_name = "DIGITS")]
        product_id: Option<String>,
        #[command(flatten)]
        select: SelectArgs,
    },
    /// List known products and BINK parameter sets.
    List,
}

#[derive(Args, Clone)]
struct SelectArgs {
    /// Product code.
    #[arg(long, default_value = "WINXP")]
    product: String,

    /// Product flavour (defaults to the product's own default).
    #[arg(long)]
    flavour: Option<String>,

    /// Explicit BINK ID, overriding the flavour's choice.
    #[arg(long)]
    bink: Option<String>,

    /// Select the OEM variant.
    #[arg(long)]
    oem: bool,
}

#[derive(Args)]
struct GenerateArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Channel ID (000-999); drawn from the product's ranges if absent.
    #[arg(long = "channelid")]
    channel_id: Option<u32>,

    /// Serial number (0-999999, BINK1998 and PIDGEN2 only).
    #[arg(long)]
    serial: Option<u32>,

    /// Auth data (BINK2002 only).
    #[arg(long = "authdata")]
    auth_data: Option<u32>,

    /// Generate an upgrade key.
    #[arg(long)]
    upgrade: bool,

    /// How many keys to generate.
    #[arg(long, default_value_t = 1)]
    number: u32,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        "keymill=debug"
    } else if cli.verbose {
        "keymill=info"
    } else {
        "keymill=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let registry = match load_registry(cli.file.as_deref()) {
        Ok(reg) => reg,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(2);
        }
    };

    let outcome = match cli.command.unwrap_or(Command::Generate(GenerateArgs {
        select: SelectArgs {
            product: "WINXP".into(),
            flavour: None,
            bink: None,
            oem: false,
        },
        channel_id: None,
        serial: None,
        auth_data: None,
        upgrade: false,
        number: 1,
    })) {
        Command::Generate(args) => generate(&registry, &args),
        Command::Validate { key, select } => validate(&registry, &key, &select),
        Command::Confirmationid { installation_id, product_id, select } => {
            confirmation_id(&registry, &installation_id, product_id.as_deref(), &select)
        }
        Command::List => list(&registry),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn load_registry(path: Option<&std::path::Path>) -> Result<Registry> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading parameter file {}", path.display()))?;
            Ok(Registry::from_json_str(&text)?)
        }
        None => Ok(Registry::embedded()?),
    }
}

fn resolve<'a>(
    registry: &'a Registry,
    select: &SelectArgs,
) -> Result<(&'a ProductEntry, FlavourEntry)> {
    let product = registry.product(&select.product)?;
    let flavour = product.flavour(select.flavour.as_deref())?;
    Ok((product, flavour))
}

fn is_pidgen2(product: &ProductEntry) -> bool {
    product.meta.kind.as_deref() == Some("PIDGEN2")
}

/// Draw a channel ID: the caller's choice, else a non-evaluation DPC
/// range of the selected BINK, else anything below 1000.
fn choose_channel(
    flavour: &FlavourEntry,
    bink_id: &str,
    requested: Option<u32>,
) -> u32 {
    let mut rng = rand::thread_rng();
    if let Some(channel) = requested {
        return channel % 1000;
    }
    if let Some(ranges) = flavour.dpc.get(bink_id) {
        let usable: Vec<_> = ranges.iter().filter(|r| !r.is_evaluation).collect();
        if !usable.is_empty() {
            let range = usable[rng.gen_range(0..usable.len())];
            return rng.gen_range(range.min..=range.max) % 1000;
        }
    }
    rng.gen_range(0..1000)
}

fn generate(registry: &Registry, args: &GenerateArgs) -> Result<bool> {
    let (product, flavour) = resolve(registry, &args.select)?;

    if is_pidgen2(product) {
        let info = Pidgen2Info {
            is_oem: args.select.oem,
            is_office: product.meta.tags.iter().any(|t| t == "office"),
            day: 1,
            year: 95,
            channel_id: args.channel_id.unwrap_or_else(|| rand::thread_rng().gen_range(0..1000)),
            serial: args.serial.unwrap_or_else(|| rand::thread_rng().gen_range(0..1_000_000)),
        };
        for _ in 0..args.number {
            let key = pidgen2::generate(&info);
            println!("{}", pidgen2::format_key(&key));
            if !pidgen2::validate(&key) {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    let bink_id = match &args.select.bink {
        Some(id) => id.as_str(),
        None => flavour.bink_id(args.select.oem)?,
    };
    let params = registry.bink(bink_id)?.curve_params()?;
    let engine = Pidgen3::new(params);

    let channel_id = choose_channel(&flavour, bink_id, args.channel_id);
    tracing::info!(product = %product.name, bink_id, channel_id, "generating");

    if args.serial.is_some() && !engine.is_bink1998() {
        eprintln!("warning: discarding user-supplied serial for BINK2002");
    }

    let mut rng = rand::thread_rng();
    let serial = args.serial.unwrap_or_else(|| rng.gen_range(0..1_000_000)) % 1_000_000;
    for _ in 0..args.number {
        let info = KeyInfo {
            upgrade: args.upgrade,
            channel_id,
            serial,
            auth_info: args.auth_data.unwrap_or_else(|| rng.gen_range(0..1024)) & 0x3FF,
        };
        let key = engine.generate(&info, &mut rng);
        println!("{}", pidgen3::format_key(&key));
        if !engine.validate(&key) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn validate(registry: &Registry, key: &str, select: &SelectArgs) -> Result<bool> {
    let (product, flavour) = resolve(registry, select)?;

    if is_pidgen2(product) {
        let Some(bare) = pidgen2::strip_key(key) else {
            eprintln!("product key is in an incorrect format");
            return Ok(false);
        };
        println!("{}", pidgen2::format_key(&bare));
        if pidgen2::validate(&bare) {
            println!("key validated successfully");
            return Ok(true);
        }
        eprintln!("product key is invalid");
        return Ok(false);
    }

    let bink_id = match &select.bink {
        Some(id) => id.as_str(),
        None => flavour.bink_id(select.oem)?,
    };
    let engine = Pidgen3::new(registry.bink(bink_id)?.curve_params()?);

    let Some(bare) = pidgen3::strip_key(key) else {
        eprintln!("product key is in an incorrect format");
        return Ok(false);
    };
    println!("{}", pidgen3::format_key(&bare));
    if engine.validate(&bare) {
        println!("key validated successfully");
        Ok(true)
    } else {
        eprintln!("product key is invalid (wrong BINK ID?)");
        Ok(false)
    }
}

fn confirmation_id(
    registry: &Registry,
    installation_id: &str,
    product_id: Option<&str>,
    select: &SelectArgs,
) -> Result<bool> {
    let product = registry.product(&select.product)?;
    let reference = product
        .meta
        .activation
        .as_ref()
        .ok_or_else(|| anyhow!("product \"{}\" has no known activation values", select.product))?;
    let entry = registry.activation(&reference.flavour)?;
    let generator = ConfirmationId::new(entry.confid_params(reference)?);

    match generator.generate(installation_id, product_id) {
        Ok(confirmation) => {
            println!("{confirmation}");
            Ok(true)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(false)
        }
    }
}

fn list(registry: &Registry) -> Result<bool> {
    println!("Products:");
    for (code, product) in registry.products() {
        let flavours: Vec<&str> = product.flavours.keys().map(String::as_str).collect();
        if flavours.is_empty() {
            println!("  {code:<10} {}", product.name);
        } else {
            println!("  {code:<10} {} (flavours: {})", product.name, flavours.join(", "));
        }
    }
    println!();
    println!("BINK parameter sets:");
    for id in registry.bink_ids() {
        println!("  {id}");
    }
    Ok(true)
}
