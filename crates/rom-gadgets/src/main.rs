use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use hackasm::text::decode_hex_bytes;
use hackasm::{Tables, TargetConfig};
use rom_gadgets::{find_equivalent_addresses, load_rom};

#[derive(Parser, Debug)]
#[command(author, version, about = "List ROM addresses equivalent to a gadget", long_about = None)]
struct Cli {
    /// ROM image
    #[arg(long, value_name = "BINFILE")]
    rom: PathBuf,
    /// Skip N bytes at start of file before loading
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Limit bytes loaded (default: to EOF after --skip)
    #[arg(long)]
    len: Option<usize>,
    /// Target configuration providing the key table and disassembly
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Instructions of disassembly to show under each address
    #[arg(short = 'n', long, default_value_t = 0usize)]
    preview: usize,
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
    /// Gadget bytes as hex, e.g. `8ef2` for `pop pc`
    #[arg(value_name = "HEX")]
    pattern: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
struct Candidate {
    address: u32,
    cost: u32,
    keys: String,
    preview: Vec<String>,
}

fn candidates(addrs: impl IntoIterator<Item = u32>, tables: &Tables, preview: usize) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = addrs
        .into_iter()
        .map(|a| tables.keys.optimize_address(a))
        .map(|address| Candidate {
            address,
            cost: tables.keys.cost_address(address),
            keys: tables.keys.address_keys(address),
            preview: tables
                .disasm
                .preview(address, preview)
                .into_iter()
                .map(|(_, m)| m.to_string())
                .collect(),
        })
        .collect();
    out.sort_by_key(|c| (c.cost, c.address));
    out
}

fn load_tables(config: Option<&Path>) -> Result<Tables> {
    match config {
        Some(path) => {
            let cfg = TargetConfig::load(path)?;
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            Tables::load(&cfg, &dir)
        }
        None => Ok(Tables::default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let pattern = decode_hex_bytes(&cli.pattern).with_context(|| format!("invalid pattern `{}`", cli.pattern))?;
    let rom = load_rom(&cli.rom, cli.skip, cli.len)?;
    let tables = load_tables(cli.config.as_deref())?;

    let found = find_equivalent_addresses(&rom, &pattern)?;
    let list = candidates(found, &tables, cli.preview);
    match cli.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&list)?),
        Format::Text => {
            for c in &list {
                println!("{:05x}  {:3}    {:20}", c.address, c.cost, c.keys);
                for m in &c.preview {
                    println!("    {m}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hackasm::keys::UNTYPABLE;
    use hackasm::KeyCost;

    #[test]
    fn candidates_sort_by_cost_and_take_cheaper_parity() {
        let mut np = [UNTYPABLE; 256];
        np[0x31] = 1;
        np[0x30] = 1;
        np[0x20] = 2;
        let mut tables = Tables::default();
        tables.keys = KeyCost::new(np, Vec::new());
        tables.disasm.insert(0x3030, "pop pc");
        let list = candidates([0x2020, 0x3031], &tables, 1);
        assert_eq!(list[0].address, 0x3031);
        assert_eq!(list[0].cost, 2);
        assert_eq!(list[0].preview, vec!["pop pc".to_string()]);
        assert_eq!(list[1].address, 0x2020);
    }
}
