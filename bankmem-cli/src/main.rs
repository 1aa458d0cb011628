use anyhow::Context;
use bankmem_core::{BankedMemory, LayoutConfig, SpaceId, StoreId};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// A raw image to copy into a store before anything runs.
#[derive(Debug, Clone, Deserialize)]
struct ImageConfig {
    store: StoreId,
    path: PathBuf,
    #[serde(default)]
    offset: usize,
}

/// A layout file plus the images that seed its stores.
#[derive(Debug, Deserialize)]
struct MachineFile {
    #[serde(flatten)]
    layout: LayoutConfig,
    #[serde(default)]
    images: Vec<ImageConfig>,
}

impl MachineFile {
    fn from_toml_file(path: &Path) -> Result<Self, anyhow::Error> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("error reading layout file from '{}'", path.display()))?;
        let mut machine: Self = toml::from_str(&config_str)
            .with_context(|| format!("error parsing memory layout from '{}'", path.display()))?;

        // Image paths are relative to the layout file
        if let Some(dir) = path.parent() {
            for image in &mut machine.images {
                image.path = dir.join(&image.path);
            }
        }

        Ok(machine)
    }
}

fn parse_image(s: &str) -> Result<ImageConfig, String> {
    let (store, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected STORE=PATH[@OFFSET], got '{s}'"))?;
    let store = store
        .parse::<u32>()
        .map_err(|err| format!("invalid store id '{store}': {err}"))?;

    let (path, offset) = match rest.rsplit_once('@') {
        Some((path, offset)) => (path, parse_number(offset)?),
        None => (rest, 0),
    };

    Ok(ImageConfig {
        store: StoreId(store),
        path: path.into(),
        offset,
    })
}

fn parse_number(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix('$')) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("invalid number '{s}': {err}"))
}

fn parse_address(s: &str) -> Result<u16, String> {
    let n = parse_number(s)?;
    u16::try_from(n).map_err(|_| format!("address {s} is larger than 0xFFFF"))
}

#[derive(Subcommand)]
enum Command {
    /// List the windows of a space in resolution order
    Structure {
        /// Include windows that are currently switched out
        #[arg(short = 'a', long = "all")]
        all: bool,
    },
    /// Hex dump of an address range
    Dump {
        #[arg(value_parser = parse_address)]
        from: u16,
        #[arg(value_parser = parse_address)]
        to: u16,
    },
    /// Show the byte at an address without triggering device side effects
    Peek {
        #[arg(value_parser = parse_address)]
        address: u16,
    },
}

#[derive(Parser)]
struct Cli {
    /// TOML memory layout
    #[arg(short = 'l', long = "layout")]
    layout_path: PathBuf,
    /// Extra image to load, as STORE=PATH or STORE=PATH@OFFSET
    #[arg(short = 'i', long = "image", value_parser = parse_image)]
    images: Vec<ImageConfig>,
    /// Space to inspect instead of the primary space
    #[arg(short = 's', long = "space")]
    space: Option<u32>,
    #[command(subcommand)]
    command: Command,
}

fn load_images(memory: &mut BankedMemory, images: &[ImageConfig]) -> Result<(), anyhow::Error> {
    for image in images {
        let bytes = fs::read(&image.path)
            .with_context(|| format!("error reading image file '{}'", image.path.display()))?;
        memory
            .load_store(image.store, &bytes, image.offset)
            .with_context(|| format!("error loading '{}'", image.path.display()))?;

        log::info!(
            "Loaded {} bytes from '{}' into {} at offset {:#06X}",
            bytes.len(),
            image.path.display(),
            image.store,
            image.offset
        );
    }

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();

    let mut machine = MachineFile::from_toml_file(&args.layout_path)?;
    machine.images.extend(args.images);

    log::info!("Layout config:\n{}", machine.layout);

    let mut memory =
        bankmem_core::build_memory(&machine.layout).context("error building memory")?;
    load_images(&mut memory, &machine.images)?;
    memory.freeze_defaults();

    let space = args.space.map_or(memory.primary_space_id(), SpaceId);

    match args.command {
        Command::Structure { all } => {
            let structure = memory
                .structure_of(space, !all)
                .with_context(|| format!("layout has no {space}"))?;
            print!("{structure}");
        }
        Command::Dump { from, to } => {
            let dump = memory
                .dump_space(space, from, to)
                .with_context(|| format!("layout has no {space}"))?;
            print!("{dump}");
        }
        Command::Peek { address } => {
            let dump = memory
                .dump_space(space, address, address)
                .with_context(|| format!("layout has no {space}"))?;
            for value in dump.bytes() {
                println!("{address:04X}: {value:02X}");
            }
        }
    }

    Ok(())
}
