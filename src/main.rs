//! vscompat CLI
//!
//! Inspects program files and the system-call table. Running a program needs
//! an instruction interpreter implementing `vscompat::cpu::Cpu`, which the
//! embedding emulator provides.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;
use vscompat::addr::{Addr, Ring};
use vscompat::syscall::{self, SYSCALLS};
use vscompat::{EmulatorConfig, ProgramImage};

#[derive(Parser)]
#[command(name = "vscompat")]
#[command(about = "Legacy system-call compatibility layer", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Host directory standing in for the legacy root (reported by `inspect`)
    #[arg(long, value_name = "DIR", global = true)]
    root: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the system-call dispatch table
    Syscalls,

    /// Show the entry conditions of a program file
    Inspect {
        /// Program file (.PR)
        program: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let mut config = match &cli.config {
        Some(path) => {
            log::info!("Loading config from: {}", path.display());
            EmulatorConfig::from_file(path)?
        }
        None => EmulatorConfig::default(),
    };
    if let Some(root) = cli.root {
        config.virtual_root = root;
    }

    match cli.command {
        Commands::Syscalls => {
            println!("{:>5}  {:<10} {:<5} HANDLER", "ID", "NAME", "ALIAS");
            for call in SYSCALLS {
                let handler = if call.id == syscall::RETURN {
                    "task loop"
                } else if call.handler.is_some() {
                    "bound"
                } else {
                    "none"
                };
                println!("{:>5o}  {:<10} {:<5} {}", call.id, call.name, call.alias, handler);
            }
        }

        Commands::Inspect { program } => {
            let image = ProgramImage::read(&program)?;
            let p = &image.preamble;
            let ring = Ring::new(config.user_ring);
            println!("Program:   {}", image.program_name());
            println!("Words:     {}", image.words.len());
            println!("Revision:  {}", p.revision);
            println!("Mode:      {:?}", p.mode);
            println!("Start:     {}", Addr::new(ring, p.start));
            println!(
                "Stack:     base {:#o} limit {:#o} sp {:#o} fp {:#o} fault {:#o}",
                p.stack.wsb, p.stack.wsl, p.stack.wsp, p.stack.wfp, p.stack.wsfh
            );
            println!("Root:      {}", config.virtual_root.display());
        }
    }

    Ok(())
}
