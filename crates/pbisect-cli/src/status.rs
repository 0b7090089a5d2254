//! `pbisect status`

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use pbisect_cas::CasStore;
use pbisect_config::Layout;

pub fn run(layout: &Layout) -> Result<()> {
    println!();
    println!("  {}", style("pbisect storage").bold());
    println!();
    println!("  Base path:   {}", layout.base().display());

    if layout.cas_dir().exists() {
        let cas = CasStore::new(layout.cas_dir()).context("Failed to open CAS")?;
        let stats = cas.stats().context("Failed to scan CAS")?;
        println!(
            "  Blobs:       {} ({} executable)",
            format_number(stats.blob_count),
            format_number(stats.executable_blobs)
        );
        println!(
            "  CAS size:    {} (avg {})",
            format_bytes(stats.total_bytes),
            format_bytes(stats.avg_blob_size())
        );
    } else {
        println!("  Blobs:       0 (no CAS yet)");
    }

    let runs = list_runs(layout.bisect_dir())?;
    let workspaces: usize = runs
        .iter()
        .map(|run| count_dirs(run).unwrap_or(0))
        .sum();
    println!("  Runs:        {}", format_number(runs.len() as u64));
    println!("  Workspaces:  {}", format_number(workspaces as u64));
    println!();
    Ok(())
}

/// Run directories under the bisect root; a missing root has none.
pub fn list_runs(bisect_dir: &Path) -> io::Result<Vec<std::path::PathBuf>> {
    let entries = match fs::read_dir(bisect_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut runs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            runs.push(entry.path());
        }
    }
    runs.sort();
    Ok(runs)
}

/// Revision workspaces of one run (the logs directory excluded).
fn count_dirs(run: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(run)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.file_name() != "logs" {
            count += 1;
        }
    }
    Ok(count)
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format number with comma separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 bytes");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_list_runs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_runs(&dir.path().join("missing")).unwrap().is_empty());

        fs::create_dir_all(dir.path().join("run-b/rev1")).unwrap();
        fs::create_dir_all(dir.path().join("run-b/logs")).unwrap();
        fs::create_dir_all(dir.path().join("run-a")).unwrap();
        fs::write(dir.path().join("stray"), "x").unwrap();

        let runs = list_runs(dir.path()).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].ends_with("run-a"));
        assert_eq!(count_dirs(&runs[1]).unwrap(), 1);
    }
}
