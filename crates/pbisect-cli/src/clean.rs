//! `pbisect clean`

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use pbisect_config::{log_cli_info, Layout};

use crate::status::{format_bytes, format_number, list_runs};

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Also delete the CAS (every later run refetches all content)
    #[arg(long)]
    cas: bool,
}

pub fn run(layout: &Layout, args: CleanArgs) -> Result<()> {
    let runs = list_runs(layout.bisect_dir())?;
    let mut freed = 0;
    for run in &runs {
        freed += disk_usage(run);
        fs::remove_dir_all(run).with_context(|| format!("Failed to remove {}", run.display()))?;
    }
    log_cli_info!("Removed run workspaces", runs = runs.len());
    println!(
        "  {} {} run(s), {}",
        style("Removed").green(),
        format_number(runs.len() as u64),
        format_bytes(freed)
    );

    if args.cas && layout.cas_dir().exists() {
        let size = disk_usage(layout.cas_dir());
        fs::remove_dir_all(layout.cas_dir())
            .with_context(|| format!("Failed to remove {}", layout.cas_dir().display()))?;
        println!("  {} CAS, {}", style("Removed").green(), format_bytes(size));
    }
    Ok(())
}

/// Bytes held by regular files under `dir`; links are not followed.
fn disk_usage(dir: &Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_runs_and_cas() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure().unwrap();

        let ws = layout.run_dir("abc").join("rev1");
        fs::create_dir_all(&ws).unwrap();
        fs::write(ws.join("file"), "12345").unwrap();
        fs::write(layout.cas_dir().join("blob"), "x").unwrap();
        assert_eq!(disk_usage(&layout.run_dir("abc")), 5);

        run(&layout, CleanArgs { cas: false }).unwrap();
        assert!(!layout.run_dir("abc").exists());
        assert!(layout.cas_dir().exists());

        run(&layout, CleanArgs { cas: true }).unwrap();
        assert!(!layout.cas_dir().exists());
    }
}
