use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    ClearResult, InfoResult, ListResult, OwnershipResult, PrimeReport, RunReport, StatusResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_prime(result: &PrimeReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_ownership(result: &OwnershipResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_list(result: &ListResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for entry in &result.entries {
            let marker = if entry.owned { "*" } else { " " };
            let canonical = entry.canonical.as_deref().unwrap_or("-");
            writeln!(
                stdout,
                "{marker} #{:04}  {:<24} ({canonical})",
                entry.id, entry.localized
            )?;
        }
        writeln!(
            stdout,
            "owned: {} / {}",
            result.owned_count, result.max_id
        )?;
        Ok(())
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "#{:04} {}", result.id, result.localized)?;
        writeln!(stdout, "canonical: {}", result.canonical)?;
        if result.placeholder {
            writeln!(stdout, "localized name not resolved yet")?;
        }
        writeln!(stdout, "owned: {}", if result.owned { "yes" } else { "no" })?;
        Ok(())
    }

    pub fn print_ownership(result: &OwnershipResult) -> io::Result<()> {
        let state = if result.owned { "owned" } else { "not owned" };
        writeln!(
            io::stdout(),
            "#{:04} is now {state} ({} owned)",
            result.id, result.owned_count
        )
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "cache: {}", result.cache_path)?;
        if result.cached {
            writeln!(
                stdout,
                "entries: {} / {} ({} resolved, {} placeholders)",
                result.entries, result.max_id, result.resolved, result.placeholders
            )?;
        } else {
            writeln!(stdout, "entries: none (run `dex-cache load`)")?;
        }
        writeln!(stdout, "owned: {}", result.owned_count)?;
        Ok(())
    }

    pub fn print_run(result: &RunReport) -> io::Result<()> {
        let outcome = if result.cancelled { "cancelled" } else { "finished" };
        writeln!(
            io::stdout(),
            "{} run {outcome}: {} attempted, {} resolved, {} unresolved, {} fallbacks, {} entries cached",
            result.strategy,
            result.attempted,
            result.resolved,
            result.unresolved,
            result.fallbacks,
            result.entries
        )
    }
}
