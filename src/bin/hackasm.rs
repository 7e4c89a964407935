use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use hackasm::{decompile, Assembler, OutputFormat, Tables, TargetConfig, TargetMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Hackstring assembler and decompiler for nX-U8 calculators")]
struct Cli {
    /// Target configuration (JSON); table paths inside it are relative to it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a program
    Compile {
        #[arg(short, long, value_enum, default_value_t = Target::None)]
        target: Target,
        #[arg(short, long, value_enum, default_value_t = Format::Hex)]
        format: Format,
        /// Stack pointer right after the overflow (hex or dec)
        #[arg(long, default_value = "0x8DA4")]
        sp: String,
        /// Print the resolved label table after the output
        #[arg(long)]
        labels: bool,
        /// Source file; stdin when omitted
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,
    },
    /// Turn a hex hackstring back into source
    Decompile {
        /// Hex file; stdin when omitted
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Target {
    None,
    Overflow,
    Loader,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Hex,
    Key,
}

impl From<Target> for TargetMode {
    fn from(t: Target) -> Self {
        match t {
            Target::None => TargetMode::None,
            Target::Overflow => TargetMode::Overflow,
            Target::Loader => TargetMode::Loader,
        }
    }
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Hex => OutputFormat::Hex,
            Format::Key => OutputFormat::Keystroke,
        }
    }
}

fn parse_u32(s: &str) -> Result<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(u32::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse::<u32>()?)
    }
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display())),
        None => {
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s)?;
            Ok(s)
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (cfg, base_dir) = match &cli.config {
        Some(path) => {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (TargetConfig::load(path)?, dir)
        }
        None => (TargetConfig::default(), PathBuf::from(".")),
    };
    let tables = Tables::load(&cfg, &base_dir)?;

    match cli.cmd {
        Command::Compile { target, format, sp, labels, input } => {
            let source = read_input(input.as_deref())?;
            let sp = parse_u32(&sp).with_context(|| format!("invalid --sp `{sp}`"))?;
            let asm = Assembler::from_tables(&tables, &cfg);
            let out = asm.compile(&source, target.into(), format.into(), sp)?;
            for note in &out.notes {
                eprintln!("{note}");
            }
            println!("{}", out.render(format.into(), &tables.keys, &cfg.layout));
            if labels {
                for (name, addr) in &out.labels {
                    println!("{addr:#06x} {name}");
                }
            }
        }
        Command::Decompile { input } => {
            let text = read_input(input.as_deref())?;
            let out = decompile(
                &text,
                &tables.disasm,
                &tables.decompile_gadgets,
                &tables.decompile_labels,
                cfg.decompile,
            )?;
            print!("{}", out.text());
        }
    }
    Ok(())
}
