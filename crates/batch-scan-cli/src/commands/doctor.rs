//! Doctor command implementation.
//!
//! Checks that the external tools a scan shells out to are installed.

use std::path::{Path, PathBuf};

use anyhow::Result;
use batch_scan_ops::Config;

/// Execute the doctor command.
pub fn execute(config: &Config) -> Result<()> {
    println!("🩺 bscan Doctor");
    println!("{:─<50}", "");

    let mut missing = vec![];
    for tool in ["git", config.scanner_bin.as_str()] {
        match find_executable(tool) {
            Some(path) => println!("✅ {:<20} {}", tool, path.display()),
            None => {
                println!("❌ {:<20} not found on PATH", tool);
                missing.push(tool.to_string());
            }
        }
    }

    println!(
        "{} {:<20} {}",
        if config.github_tokens.is_empty() { "⚠️ " } else { "✅" },
        "github tokens",
        config.github_tokens.len()
    );
    println!("📂 {:<20} {}", "work dir", config.work_dir.display());

    if !missing.is_empty() {
        anyhow::bail!("missing tools: {}", missing.join(", "));
    }
    Ok(())
}

/// Resolve `name` the way a shell would: as a path when it has a separator,
/// otherwise by searching `PATH`.
fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
