use serde_json::Value;
use std::os::unix::fs::PermissionsExt;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(name: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "dev_stress_cli_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn fake_root(name: &str) -> anyhow::Result<std::path::PathBuf> {
    let base = temp_dir(name);
    std::fs::create_dir_all(base.join("pts"))?;
    std::fs::set_permissions(base.join("pts"), std::fs::Permissions::from_mode(0o755))?;
    std::fs::write(base.join("ttyS0"), b"")?;
    Ok(base)
}

fn run_json(args: &[&str], envs: &[(&str, &str)]) -> anyhow::Result<Value> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dev-stress"));
    cmd.args(args);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let out = cmd.output()?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

#[test]
fn timed_run_reports_success() -> anyhow::Result<()> {
    let root = fake_root("timed")?;
    let report = run_json(
        &["--root", root.to_str().unwrap(), "--timeout", "1"],
        &[],
    )?;

    assert_eq!(report["stressor"], "dev");
    assert_eq!(report["instances"], 1);
    assert_eq!(report["status"], "success");
    assert_eq!(report["per_instance"].as_array().map(Vec::len), Some(1));
    assert_eq!(report["per_instance"][0]["status"], "success");
    assert!(report["duration_secs"].as_f64().unwrap() >= 1.0);
    assert!(report["bogo_ops"].as_u64().unwrap() >= 1);

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn op_capped_instances_share_the_env_root() -> anyhow::Result<()> {
    let root = fake_root("ops")?;
    let report = run_json(
        &["--instances", "2", "--ops", "5", "--timeout", "30"],
        &[("DEV_STRESS_ROOT", root.to_str().unwrap())],
    )?;

    assert_eq!(report["instances"], 2);
    assert_eq!(report["status"], "success");
    for instance in report["per_instance"].as_array().unwrap() {
        assert!(instance["bogo_ops"].as_u64().unwrap() >= 5);
    }
    assert!(report["bogo_ops"].as_u64().unwrap() >= 10);

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn missing_root_is_rejected_before_any_fork() -> anyhow::Result<()> {
    let root = temp_dir("missing");
    let out = Command::new(env!("CARGO_BIN_EXE_dev-stress"))
        .args(["--root", root.to_str().unwrap(), "--timeout", "1"])
        .output()?;

    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Failed to read device root"));
    Ok(())
}
