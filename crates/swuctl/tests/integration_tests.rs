//! Integration tests for swuctl
//!
//! Each command is run as a process against a temporary medium and sysroot,
//! checking output and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Custom predicate to check if output is valid JSON
fn is_json() -> impl predicates::Predicate<[u8]> {
    predicates::function::function(|s: &[u8]| {
        std::str::from_utf8(s).is_ok_and(|text| serde_json::from_str::<Value>(text).is_ok())
    })
}

fn swuctl() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("swuctl")?;
    cmd.env_remove("SWU_MEDIUM").env_remove("SWU_SYSROOT").env_remove("RUST_LOG");
    Ok(cmd)
}

/// Medium and sysroot with an eMMC boot partition
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Result<Self, std::io::Error> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("medium"))?;
        fs::create_dir_all(dir.path().join("root/dev/mmc3.0"))?;
        Ok(Self { dir })
    }

    fn medium(&self) -> PathBuf {
        self.dir.path().join("medium")
    }

    fn sysroot(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    fn image(&self, name: &str, data: &[u8]) -> Result<PathBuf, std::io::Error> {
        let path = self.medium().join(name);
        fs::write(&path, data)?;
        let digest = hex::encode(swu_update::DigestAlgorithm::Md5.digest(data));
        fs::write(self.medium().join(format!("{name}.md5sum")), format!("{digest}\n"))?;
        Ok(path)
    }

    fn config(&self, body: &str) -> Result<(), std::io::Error> {
        fs::write(self.medium().join("swupdate.cfg"), format!("#<ver=1.0>\n{body}"))
    }

    fn command(&self) -> Result<Command, Box<dyn std::error::Error>> {
        let mut cmd = swuctl()?;
        cmd.arg("--medium").arg(self.medium()).arg("--sysroot").arg(self.sysroot());
        Ok(cmd)
    }
}

#[test]
fn test_cli_help() -> TestResult {
    swuctl()?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("removable media"));
    Ok(())
}

#[test]
fn test_cli_version() -> TestResult {
    swuctl()?
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("swuctl"));
    Ok(())
}

#[test]
fn test_resolve_pair_json() -> TestResult {
    swuctl()?
        .args(["resolve", "kernel", "emmc", "--json"])
        .assert()
        .success()
        .stdout(is_json())
        .stdout(predicate::str::contains("/dev/mmc3.0"))
        .stdout(predicate::str::contains("\"file\""));
    Ok(())
}

#[test]
fn test_resolve_table_lists_every_class() -> TestResult {
    let output = swuctl()?.args(["resolve", "--json"]).output()?;
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout)?;
    let targets = json.get("targets").and_then(Value::as_array).ok_or("targets missing")?;
    assert_eq!(targets.len(), swu_update::target::supported_targets().count());
    Ok(())
}

#[test]
fn test_resolve_unknown_family_exit_code() -> TestResult {
    swuctl()?
        .args(["resolve", "kernel", "nand"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown device family"));
    Ok(())
}

#[test]
fn test_resolve_unsupported_pair_exit_code() -> TestResult {
    swuctl()?
        .args(["resolve", "rootfs", "flash", "--json"])
        .assert()
        .code(3)
        .stdout(is_json())
        .stdout(predicate::str::contains("\"success\": false"));
    Ok(())
}

#[test]
fn test_check_config_lists_entries() -> TestResult {
    let fixture = Fixture::new()?;
    fixture.config("KERNEL_IMAGE=zImage\n# comment\nOS_TARGET_DEV=emmc\n")?;

    fixture
        .command()?
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("KERNEL_IMAGE"))
        .stdout(predicate::str::contains("version 1.0"));
    Ok(())
}

#[test]
fn test_check_config_bad_version_exit_code() -> TestResult {
    let fixture = Fixture::new()?;
    fs::write(fixture.medium().join("swupdate.cfg"), "#<ver=0.9>\nKERNEL_IMAGE=zImage\n")?;

    fixture
        .command()?
        .arg("check-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not supported"));
    Ok(())
}

#[test]
fn test_verify_source() -> TestResult {
    let fixture = Fixture::new()?;
    let image = fixture.image("zImage", b"kernel image")?;

    swuctl()?
        .arg("verify")
        .arg(&image)
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));

    fs::write(&image, b"kernel imagf")?;
    swuctl()?
        .arg("verify")
        .arg(&image)
        .arg("--json")
        .assert()
        .code(1)
        .stdout(is_json())
        .stdout(predicate::str::contains("mismatch"));
    Ok(())
}

#[test]
fn test_detect_dtb() -> TestResult {
    let fixture = Fixture::new()?;
    for name in ["imx6q-ppc_12000.dtb", "imx6q-ppc_12104.dtb", "oftree"] {
        fs::write(fixture.medium().join(name), b"")?;
    }

    fixture
        .command()?
        .args(["detect-dtb", "104"])
        .assert()
        .success()
        .stdout(predicate::str::contains("imx6q-ppc_12104.dtb"));

    fixture
        .command()?
        .args(["detect-dtb", "999", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"default\": true"));
    Ok(())
}

#[test]
fn test_run_kernel_update() -> TestResult {
    let fixture = Fixture::new()?;
    fixture.image("zImage", b"kernel image")?;
    fixture.config("KERNEL_IMAGE=zImage\n")?;

    let output = fixture.command()?.args(["run", "--json"]).output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: Value = serde_json::from_slice(&output.stdout)?;
    let report = json.get("report").ok_or("report missing")?;
    assert_eq!(report.get("result").and_then(Value::as_str), Some("success"));
    assert_eq!(
        fs::read(fixture.sysroot().join("dev/mmc3.0/zImage"))?,
        b"kernel image"
    );
    assert_eq!(
        fs::read_to_string(fixture.sysroot().join("env/nv/boot.default"))?.trim(),
        "/dev/mmc3"
    );
    Ok(())
}

#[test]
fn test_run_failed_image_exit_code() -> TestResult {
    let fixture = Fixture::new()?;
    fixture.config("KERNEL_IMAGE=missing-kernel\n")?;

    fixture
        .command()?
        .arg("run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Update failed"))
        .stderr(predicate::str::contains("fail"));
    Ok(())
}

#[test]
fn test_run_without_config_exit_code() -> TestResult {
    let fixture = Fixture::new()?;

    fixture
        .command()?
        .args(["run", "--json"])
        .assert()
        .code(2)
        .stdout(is_json())
        .stdout(predicate::str::contains("config file not found"));
    Ok(())
}
