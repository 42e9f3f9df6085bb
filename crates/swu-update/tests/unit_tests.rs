//! Focused tests of the public API: panel settings, verification and config loading

use std::fs;

use swu_update::config::ConfigFile;
use swu_update::env::keys;
use swu_update::fdt::{Node, Reservation};
use swu_update::prelude::*;
use swu_update::verify::VerifyReason;
use swu_update::{DeviceTree, ErrorCategory, PanelSettings, PatchError};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn channel_tree() -> DeviceTree {
    let channel = Node::new("lvds-channel@1")
        .with_property("status", b"okay\0".to_vec())
        .with_property("fsl,data-mapping", b"spwg\0".to_vec())
        .with_property("reg", 1u32.to_be_bytes().to_vec());
    let ldb = Node::new("ldb")
        .with_property("compatible", b"fsl,imx6q-ldb\0".to_vec())
        .with_child(channel);
    DeviceTree {
        root: Node::new("")
            .with_property("model", b"PPC\0".to_vec())
            .with_child(ldb),
        ..DeviceTree::default()
    }
}

#[test]
fn test_disabled_panel_needs_no_other_parameter() -> TestResult {
    let env: MemoryEnv = [("TFT_LVDS_PANEL_OUTPUT", "disabled")].into_iter().collect();
    let settings = PanelSettings::from_env(&env)?;
    assert!(settings.is_disabled());

    let mut tree = channel_tree();
    settings.apply(&mut tree)?;

    let channel = tree.find_path("/ldb/lvds-channel@1").ok_or("channel missing")?;
    let status = tree.node(&channel).and_then(|n| n.property("status")).and_then(|p| p.as_str());
    assert_eq!(status, Some("disabled"));
    Ok(())
}

#[test]
fn test_disabled_patch_round_trip_changes_only_status() -> TestResult {
    let env: MemoryEnv = [("TFT_LVDS_PANEL_OUTPUT", "disabled")].into_iter().collect();
    let original = channel_tree();
    let mut patched = original.clone();
    PanelSettings::from_env(&env)?.apply(&mut patched)?;

    let reloaded = FlatDeviceTree.unflatten(&FlatDeviceTree.flatten(&patched)?)?;
    assert_eq!(reloaded, patched);

    let mut expected = original;
    let channel = expected.find_path("/ldb/lvds-channel@1").ok_or("channel missing")?;
    expected
        .node_mut(&channel)
        .ok_or("channel missing")?
        .set_property("status", b"disabled\0".to_vec());
    assert_eq!(reloaded, expected);
    Ok(())
}

const FULL_PANEL: [(&str, &str); 15] = [
    ("TFT_LVDS_PANEL_OUTPUT", "okay"),
    ("TFT_LVDS_PANEL_BITCONFIG_COLOURMAPPING", "jeida"),
    ("TFT_LVDS_PANEL_BITCONFIG_SINGLE_DUAL_LINK", "1"),
    ("TFT_LVDS_PANEL_BITCONFIG_18_24", "24"),
    ("TFT_LVDS_PANEL_TIMING_PIXELCLK_HZ", "0x43ce660"),
    ("TFT_LVDS_PANEL_TIMING_H_ACTIVE_LINES", "1280"),
    ("TFT_LVDS_PANEL_TIMING_V_ACTIVE_LINES", "800"),
    ("TFT_LVDS_PANEL_TIMING_H_FPORCH", "72"),
    ("TFT_LVDS_PANEL_TIMING_HSYNC_BPORCH", "88"),
    ("TFT_LVDS_PANEL_TIMING_HSYNC_WIDTH", "010"),
    ("TFT_LVDS_PANEL_SIGNAL_HSYNC_POL_ACTIVE", "0"),
    ("TFT_LVDS_PANEL_TIMING_V_BLANC", "3"),
    ("TFT_LVDS_PANEL_TIMING_VSYNC_OFFSET", "15"),
    ("TFT_LVDS_PANEL_TIMING_VSYNC_WIDTH", "10"),
    ("TFT_LVDS_PANEL_SIGNAL_VSYNC_POL_ACTIVE", "1"),
];

fn cell(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Board tree with unrelated nodes around the panel, including a sibling
/// that carries properties with panel names.
fn board_tree() -> DeviceTree {
    let timing = Node::new("timing0")
        .with_property("clock-frequency", cell(33_500_000))
        .with_property("hactive", cell(800))
        .with_property("vactive", cell(480))
        .with_property("hfront-porch", cell(40))
        .with_property("hback-porch", cell(88))
        .with_property("hsync-len", cell(128))
        .with_property("hsync-active", cell(1))
        .with_property("vfront-porch", cell(10))
        .with_property("vback-porch", cell(33))
        .with_property("vsync-len", cell(2))
        .with_property("vsync-active", cell(0))
        .with_property("pixelclk-active", cell(1));
    let channel = Node::new("lvds-channel@0")
        .with_property("reg", cell(0))
        .with_property("status", b"disabled\0".to_vec())
        .with_property("fsl,data-mapping", b"spwg\0".to_vec())
        .with_property("fsl,data-width", b"18\0".to_vec())
        .with_child(
            Node::new("display-timings")
                .with_property("native-mode", cell(7))
                .with_child(timing),
        );
    let second = Node::new("lvds-channel@1")
        .with_property("reg", cell(1))
        .with_property("status", b"disabled\0".to_vec())
        .with_property("fsl,data-mapping", b"spwg\0".to_vec())
        .with_property("fsl,data-width", b"18\0".to_vec());
    let ldb = Node::new("ldb")
        .with_property("compatible", b"fsl,imx6q-ldb\0fsl,imx53-ldb\0".to_vec())
        .with_property("#address-cells", cell(1))
        .with_property("#size-cells", cell(0))
        .with_child(channel)
        .with_child(second);
    let i2c = Node::new("i2c@21a0000")
        .with_property("clock-frequency", cell(100_000))
        .with_property("status", b"okay\0".to_vec());
    let soc = Node::new("soc")
        .with_property("#address-cells", cell(1))
        .with_property("ranges", Vec::new())
        .with_child(i2c)
        .with_child(ldb);
    DeviceTree {
        root: Node::new("")
            .with_property("model", b"DMO i.MX6 PPC\0".to_vec())
            .with_property("#address-cells", cell(1))
            .with_property("#size-cells", cell(1))
            .with_child(
                Node::new("chosen").with_property("bootargs", b"console=ttymxc0\0".to_vec()),
            )
            .with_child(soc),
        reservations: vec![Reservation {
            address: 0x1000_0000,
            size: 0x10_0000,
        }],
        boot_cpuid_phys: 0,
    }
}

#[test]
fn test_full_patch_round_trip_changes_only_panel_values() -> TestResult {
    let env: MemoryEnv = FULL_PANEL.into_iter().collect();
    let original = board_tree();
    let mut patched = original.clone();
    PanelSettings::from_env(&env)?.apply(&mut patched)?;

    let reloaded = FlatDeviceTree.unflatten(&FlatDeviceTree.flatten(&patched)?)?;
    assert_eq!(reloaded, patched);

    let mut expected = original.clone();
    let channel = expected.find_path("/soc/ldb/lvds-channel@0").ok_or("channel missing")?;
    let node = expected.node_mut(&channel).ok_or("channel missing")?;
    node.set_property("status", b"okay\0".to_vec());
    node.set_property("fsl,data-mapping", b"jeida\0".to_vec());
    node.set_property("fsl,data-width", b"24\0".to_vec());

    let ldb = expected.find_path("/soc/ldb").ok_or("ldb missing")?;
    expected
        .node_mut(&ldb)
        .ok_or("ldb missing")?
        .set_property("fsl,dual-channel", Vec::new());

    let timing = expected
        .find_path("/soc/ldb/lvds-channel@0/display-timings/timing0")
        .ok_or("timing missing")?;
    let node = expected.node_mut(&timing).ok_or("timing missing")?;
    for (property, value) in [
        ("clock-frequency", 71_100_000),
        ("hactive", 1280),
        ("vactive", 800),
        ("hfront-porch", 72),
        ("hback-porch", 88),
        ("hsync-len", 8),
        ("hsync-active", 0),
        ("vfront-porch", 3),
        ("vback-porch", 15),
        ("vsync-len", 10),
        ("vsync-active", 1),
    ] {
        node.set_property(property, cell(value));
    }
    assert_eq!(reloaded, expected);

    for path in ["/", "/chosen", "/soc", "/soc/i2c@21a0000", "/soc/ldb/lvds-channel@1"] {
        let before = original.find_path(path).and_then(|p| original.node(&p).cloned());
        let after = reloaded.find_path(path).and_then(|p| reloaded.node(&p).cloned());
        let before = before.ok_or(path)?;
        let after = after.ok_or(path)?;
        assert_eq!(after.properties(), before.properties(), "{path}");
    }
    assert_eq!(reloaded.reservations, original.reservations);
    Ok(())
}

#[test]
fn test_missing_panel_parameter_named() {
    let env: MemoryEnv = [("TFT_LVDS_PANEL_OUTPUT", "okay")].into_iter().collect();
    let result = PanelSettings::from_env(&env);
    assert!(matches!(
        result,
        Err(PatchError::MissingParameter("TFT_LVDS_PANEL_BITCONFIG_COLOURMAPPING"))
    ));
}

#[test]
fn test_no_sidecar_passes_as_skipped() -> TestResult {
    let dir = tempfile::tempdir()?;
    let image = dir.path().join("rootfs.ext4");
    fs::write(&image, b"filesystem")?;

    let result = Verifier::default().verify_source(&image)?;
    assert!(result.verified);
    assert_eq!(result.reason, VerifyReason::Skipped);
    Ok(())
}

#[test]
fn test_sha256_sidecar() -> TestResult {
    let dir = tempfile::tempdir()?;
    let image = dir.path().join("barebox.bin");
    fs::write(&image, b"barebox")?;
    let digest = hex::encode(DigestAlgorithm::Sha256.digest(b"barebox"));
    fs::write(dir.path().join("barebox.bin.sha256sum"), format!("{digest}  barebox.bin\n"))?;

    let verifier = Verifier::new(DigestAlgorithm::Sha256);
    assert_eq!(verifier.verify_source(&image)?.reason, VerifyReason::Matched);
    Ok(())
}

#[test]
fn test_loader_sets_last_line_without_newline() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("swupdate.cfg");
    fs::write(&path, "#<ver=1.0>\nOS_TARGET_DEV=sata\nKERNEL_IMAGE=zImage")?;

    let mut env = MemoryEnv::new();
    ConfigLoader::default().load(&path, &mut env)?;
    assert_eq!(env.get(keys::KERNEL_IMAGE), Some("zImage"));
    assert_eq!(env.get(keys::OS_TARGET_DEV), Some("sata"));
    Ok(())
}

#[test]
fn test_rejected_header_stores_nothing() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("swupdate.cfg");
    fs::write(&path, "KERNEL_IMAGE=zImage\n#<ver=1.0>\n")?;

    let mut env = MemoryEnv::new();
    let result = ConfigLoader::default().load(&path, &mut env);
    assert!(matches!(result, Err(ConfigError::MissingHeader(_))));
    assert!(env.is_empty());
    Ok(())
}

#[test]
fn test_config_lines_trimmed() -> TestResult {
    let file = ConfigFile::parse("#<ver=1.0>\n  KERNEL_IMAGE = zImage  \nnot an entry\n", "1.0")?;
    assert_eq!(file.get("KERNEL_IMAGE"), Some("zImage"));
    assert_eq!(file.entries.len(), 1);
    Ok(())
}

#[test]
fn test_error_categories() {
    let config = SwuError::from(ConfigError::MediumMissing("/mnt/usb".into()));
    assert_eq!(config.category(), ErrorCategory::Configuration);
    assert!(config.is_fatal());

    let resolution = resolve(ImageClass::Rootfs, DeviceFamily::Flash);
    assert!(matches!(&resolution, Err(e) if e.category() == ErrorCategory::Resolution));

    let capacity = SwuError::Capacity {
        device: "/dev/m25p0.barebox".to_string(),
        required: 2,
        available: 1,
    };
    assert_eq!(capacity.category(), ErrorCategory::Verification);
    assert!(!capacity.is_fatal());
}
