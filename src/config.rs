use anyhow::{Context, Result, bail};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::subclass::DEFAULT_SCSI_ROOT;

pub const ROOT_ENV: &str = "DEV_STRESS_ROOT";
pub const DEFAULT_ROOT: &str = "/dev";

/// Fully resolved run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressConfig {
    pub instances: u32,
    pub timeout: Option<Duration>,
    pub max_ops: Option<u64>,
    pub root: String,
    pub scsi_root: PathBuf,
    pub max_restarts: u32,
}

impl StressConfig {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let root = resolve_root(cli)?;
        Ok(Self {
            instances: resolve_instances(cli.instances),
            timeout: cli.timeout.map(Duration::from_secs),
            max_ops: cli.ops.filter(|n| *n > 0),
            root,
            scsi_root: cli
                .scsi_root
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCSI_ROOT)),
            max_restarts: cli.max_restarts,
        })
    }
}

pub fn resolve_root(cli: &Cli) -> Result<String> {
    let root = match cli.root.clone() {
        Some(p) => p,
        None => env::var(ROOT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT)),
    };
    check_root(&root)?;

    let root = root
        .to_str()
        .with_context(|| format!("Device root is not valid UTF-8: {}", root.display()))?;
    let trimmed = root.trim_end_matches('/');
    Ok(if trimmed.is_empty() { "/" } else { trimmed }.to_string())
}

fn check_root(root: &Path) -> Result<()> {
    let meta = std::fs::metadata(root)
        .with_context(|| format!("Failed to read device root: {}", root.display()))?;
    if !meta.is_dir() {
        bail!("Device root is not a directory: {}", root.display());
    }
    Ok(())
}

fn resolve_instances(requested: u32) -> u32 {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn explicit_flags_win() {
        let base = temp_dir("dev-stress-config");
        std::fs::create_dir_all(&base).unwrap();
        let root_arg = format!("{}/", base.display());

        let cli = Cli::parse_from([
            "dev-stress",
            "--root",
            root_arg.as_str(),
            "--instances",
            "3",
            "--timeout",
            "5",
            "--ops",
            "0",
            "--scsi-root",
            "/nowhere",
            "--max-restarts",
            "2",
        ]);
        let config = StressConfig::resolve(&cli).unwrap();

        assert_eq!(config.root, base.to_str().unwrap());
        assert_eq!(config.instances, 3);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_ops, None);
        assert_eq!(config.scsi_root, PathBuf::from("/nowhere"));
        assert_eq!(config.max_restarts, 2);

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["dev-stress", "--root", "/"]);
        let config = StressConfig::resolve(&cli).unwrap();
        assert_eq!(config.root, "/");
        assert_eq!(config.instances, 1);
        assert_eq!(config.timeout, None);
        assert_eq!(config.scsi_root, PathBuf::from(DEFAULT_SCSI_ROOT));
        assert_eq!(config.max_restarts, crate::supervisor::DEFAULT_MAX_RESTARTS);
    }

    #[test]
    fn zero_instances_means_one_per_cpu() {
        assert!(resolve_instances(0) >= 1);
        assert_eq!(resolve_instances(7), 7);
    }

    #[test]
    fn missing_or_non_directory_root_is_an_error() {
        let base = temp_dir("dev-stress-config-bad");
        let err = StressConfig::resolve(&Cli::parse_from([
            "dev-stress",
            "--root",
            base.to_str().unwrap(),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read device root"));

        std::fs::write(&base, b"").unwrap();
        let err = StressConfig::resolve(&Cli::parse_from([
            "dev-stress",
            "--root",
            base.to_str().unwrap(),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
        let _ = std::fs::remove_file(&base);
    }
}
