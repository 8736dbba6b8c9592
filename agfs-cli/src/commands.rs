//! Subcommands and their output.

use agfs_mount::MountRouter;
use agfs_types::{FileInfo, FsError, WriteFlag};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::io::Write;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List mounted providers
    Mounts,
    /// Show metadata for a path
    Stat { path: String },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print file contents
    Cat {
        path: String,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Bytes to read; negative reads to the end
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        size: i64,
    },
    /// Write DATA to a file, replacing it unless --append is given
    Write {
        path: String,
        data: String,
        #[arg(long)]
        append: bool,
    },
    /// Create an empty file
    Touch { path: String },
    /// Create a directory
    Mkdir {
        path: String,
        /// Octal mode
        #[arg(long, default_value = "755")]
        mode: String,
    },
    /// Remove a file or directory
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Rename within one mount
    Mv { from: String, to: String },
    /// Change a file's mode
    Chmod {
        /// Octal mode
        mode: String,
        path: String,
    },
    /// Print the readme of the provider serving PATH
    Readme { path: String },
}

pub fn parse_mode(mode: &str) -> Result<u32, FsError> {
    let digits = mode.strip_prefix("0o").unwrap_or(mode);
    u32::from_str_radix(digits, 8).map_err(|_| FsError::invalid_argument(format!("bad mode '{mode}'")))
}

/// `drwxr-xr-x` style rendering.
pub fn mode_string(mode: u32, is_dir: bool) -> String {
    let mut out = String::with_capacity(10);
    out.push(if is_dir { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

pub fn format_entry(info: &FileInfo) -> String {
    let modified = chrono::DateTime::from_timestamp(info.mod_time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {:>10} {} {}",
        mode_string(info.mode, info.is_dir),
        info.size,
        modified,
        info.name
    )
}

fn print_json(out: &mut dyn Write, value: &impl serde::Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("failed to encode output")?;
    writeln!(out)?;
    Ok(())
}

/// Runs one command against the router, writing results to `out`.
pub async fn execute(router: &MountRouter, command: &Command, json: bool, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Mounts => {
            let mounts = router.mounts();
            if json {
                print_json(out, &mounts)?;
            } else {
                for m in mounts {
                    writeln!(out, "{}\t{}\t{}\t{}", m.prefix, m.kind, m.provider, m.id)?;
                }
            }
        }
        Command::Stat { path } => {
            let info = router.stat(path).await?;
            if json {
                print_json(out, &info)?;
            } else {
                writeln!(out, "{}", format_entry(&info))?;
            }
        }
        Command::Ls { path } => {
            let entries = router.readdir(path).await?;
            if json {
                print_json(out, &entries)?;
            } else {
                for entry in &entries {
                    writeln!(out, "{}", format_entry(entry))?;
                }
            }
        }
        Command::Cat { path, offset, size } => {
            let data = router.read(path, *offset, *size).await?;
            out.write_all(&data)?;
        }
        Command::Write { path, data, append } => {
            let written = if *append {
                router
                    .write_at(path, data.as_bytes(), -1, WriteFlag::CREATE | WriteFlag::APPEND)
                    .await?
            } else {
                router.write(path, data.as_bytes()).await?
            };
            if json {
                print_json(out, &serde_json::json!({ "written": written }))?;
            }
        }
        Command::Touch { path } => router.create(path).await?,
        Command::Mkdir { path, mode } => router.mkdir(path, parse_mode(mode)?).await?,
        Command::Rm { path, recursive } => router.remove(path, *recursive).await?,
        Command::Mv { from, to } => router.rename(from, to).await?,
        Command::Chmod { mode, path } => router.chmod(path, parse_mode(mode)?).await?,
        Command::Readme { path } => {
            let (provider, _) = router.resolve(path)?;
            writeln!(out, "{}", provider.reader().readme())?;
        }
    }
    Ok(())
}
