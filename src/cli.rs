//! The `bootmon` command line tool.
//!
//! Host-side companion to the monitors: inspect and validate FIP files the
//! way the update monitor will before they are sent to a device, and list
//! the serial command vocabulary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::fip::{self, EncHeader, TocHeader};
use crate::monitor::Command;

#[derive(Parser, Debug)]
#[command(version, about = "Firmware image package and monitor protocol tool", long_about = None)]
pub struct Cli {
    /// More log output per occurrence
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect firmware image packages
    Fip {
        #[command(subcommand)]
        subcommand: FipCommands,
    },
    /// List the serial monitor command vocabulary
    Commands {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum FipCommands {
    /// List the table of contents of a FIP file
    Info {
        file: PathBuf,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Validate a FIP file the way the update monitor would
    Check { file: PathBuf },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct FipReport {
    serial_number: u32,
    entries: Vec<EntryReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct EntryReport {
    uuid: uuid::Uuid,
    offset: u64,
    size: u64,
    encrypted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct CommandReport {
    code: char,
    name: Command,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Fip { subcommand } => match subcommand {
            FipCommands::Info { file, json } => fip_info(&file, json),
            FipCommands::Check { file } => fip_check(&file),
        },
        Commands::Commands { json } => list_commands(json),
    }
}

fn load_report(file: &Path) -> Result<FipReport> {
    let image = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let entries = fip::entries(&image)?;
    let (_, header) = TocHeader::parse(&image).map_err(|_| fip::Error::BadHeader)?;

    let entries = entries
        .iter()
        .map(|entry| EntryReport {
            uuid: entry.uuid,
            offset: entry.offset,
            size: entry.size,
            // In range: entries() bounds-checked every entry.
            encrypted: EncHeader::sniff(&image[entry.offset as usize..(entry.offset + entry.size) as usize]),
        })
        .collect();

    Ok(FipReport {
        serial_number: header.serial_number,
        entries,
    })
}

fn fip_info(file: &Path, json: bool) -> Result<()> {
    let report = load_report(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("serial number {:#x}, {} entries", report.serial_number, report.entries.len());
    for entry in &report.entries {
        println!(
            "{}  offset {:#10x}  size {:#10x}  {}",
            entry.uuid,
            entry.offset,
            entry.size,
            if entry.encrypted { "encrypted" } else { "plain" },
        );
    }
    Ok(())
}

fn fip_check(file: &Path) -> Result<()> {
    let report = load_report(file)?;
    println!("OK: FIP with {} entries", report.entries.len());
    Ok(())
}

fn list_commands(json: bool) -> Result<()> {
    let commands: Vec<CommandReport> = enum_iterator::all::<Command>()
        .map(|command| CommandReport {
            code: char::from(u8::from(command)),
            name: command,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&commands)?);
        return Ok(());
    }

    for command in &commands {
        println!("{}  {}", command.code, command.name);
    }
    Ok(())
}
