//! Property-based tests for resolution, verification, config parsing and panel patching

use std::fs;

use proptest::prelude::*;
use swu_update::config::ConfigFile;
use swu_update::fdt::Node;
use swu_update::panel::{PANEL_PARAMS, ParamKind, parse_cell};
use swu_update::prelude::*;
use swu_update::target::supported_targets;
use swu_update::{DeviceTree, PanelSettings};

const TIMING_PROPERTIES: [&str; 11] = [
    "clock-frequency",
    "hactive",
    "vactive",
    "hfront-porch",
    "hback-porch",
    "hsync-len",
    "hsync-active",
    "vfront-porch",
    "vback-porch",
    "vsync-len",
    "vsync-active",
];

fn fail(error: impl std::fmt::Display) -> TestCaseError {
    TestCaseError::fail(error.to_string())
}

fn arb_class() -> impl Strategy<Value = ImageClass> {
    prop::sample::select(ImageClass::ALL.to_vec())
}

fn arb_family() -> impl Strategy<Value = DeviceFamily> {
    prop::sample::select(DeviceFamily::ALL.to_vec())
}

fn panel_tree(dual: bool) -> DeviceTree {
    let timing = TIMING_PROPERTIES
        .into_iter()
        .fold(Node::new("timing0"), |node, name| {
            node.with_property(name, 0u32.to_be_bytes().to_vec())
        });
    let mut channel = Node::new("lvds-channel@0")
        .with_property("status", b"disabled\0".to_vec())
        .with_property("fsl,data-mapping", b"spwg\0".to_vec())
        .with_property("fsl,data-width", b"18\0".to_vec())
        .with_child(Node::new("display-timings").with_child(timing));
    if dual {
        channel = channel.with_property("fsl,dual-channel", Vec::new());
    }
    DeviceTree {
        root: Node::new("")
            .with_child(Node::new("soc").with_child(Node::new("ldb").with_child(channel))),
        ..DeviceTree::default()
    }
}

fn arb_panel_env() -> impl Strategy<Value = MemoryEnv> {
    (
        prop::collection::vec(any::<u32>(), PANEL_PARAMS.len()),
        any::<bool>(),
        prop::sample::select(vec!["spwg", "jeida"]),
    )
        .prop_map(|(cells, dual, mapping)| {
            let mut env = MemoryEnv::new();
            for (param, cell) in PANEL_PARAMS.iter().zip(cells) {
                let value = match param.kind {
                    ParamKind::U32 => format!("{cell:#x}"),
                    ParamKind::Flag => (if dual { "1" } else { "0" }).to_string(),
                    ParamKind::Str if param.property == "status" => "okay".to_string(),
                    ParamKind::Str if param.property == "fsl,data-width" => "24".to_string(),
                    ParamKind::Str => mapping.to_string(),
                };
                env.set(param.key, &value);
            }
            env
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_resolve_is_pure(class in arb_class(), family in arb_family()) {
        let first = resolve(class, family).ok();
        let second = resolve(class, family).ok();
        prop_assert_eq!(&first, &second);
        if let Some(target) = first {
            prop_assert_eq!(target.image_class, class);
            prop_assert_eq!(target.device_family, family);
        }
    }

    #[test]
    fn prop_resolve_matches_table(class in arb_class(), family in arb_family()) {
        let listed = supported_targets().any(|pair| pair == (class, family));
        prop_assert_eq!(resolve(class, family).is_ok(), listed);
    }

    #[test]
    fn prop_parse_cell_bases(value in any::<u32>()) {
        prop_assert_eq!(parse_cell(&value.to_string()), Some(value));
        prop_assert_eq!(parse_cell(&format!("{value:#x}")), Some(value));
        prop_assert_eq!(parse_cell(&format!("0{value:o}")), Some(value));
    }

    #[test]
    fn prop_parse_cell_rejects_trailing_garbage(value in any::<u32>(), suffix in "[g-z ]{1,3}") {
        prop_assert_eq!(parse_cell(&format!("{value}{suffix}")), None);
    }

    #[test]
    fn prop_single_byte_flip_detected(
        data in prop::collection::vec(any::<u8>(), 1..512),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let dir = tempfile::tempdir().map_err(fail)?;
        let source = dir.path().join("image.bin");
        let digest = hex::encode(DigestAlgorithm::Md5.digest(&data));
        fs::write(&source, &data).map_err(fail)?;
        fs::write(dir.path().join("image.bin.md5sum"), format!("{digest}\n")).map_err(fail)?;

        let verifier = Verifier::default();
        let intact = verifier.verify_buffer(&source, &data).map_err(fail)?;
        prop_assert!(intact.verified);

        let mut corrupted = data.clone();
        if let Some(byte) = corrupted.get_mut(index.index(data.len())) {
            *byte ^= flip;
        }
        let result = verifier.verify_buffer(&source, &corrupted).map_err(fail)?;
        prop_assert!(!result.verified);
    }

    #[test]
    fn prop_config_last_value_wins(
        key in "[A-Z][A-Z_]{0,15}",
        values in prop::collection::vec("[a-z0-9./]{1,12}", 1..5),
    ) {
        let body: String = values.iter().map(|v| format!("{key}={v}\n")).collect();
        let file = ConfigFile::parse(&format!("#<ver=1.0>\r\n{body}"), "1.0").map_err(fail)?;
        prop_assert_eq!(file.get(&key), values.last().map(String::as_str));
        prop_assert_eq!(file.entries.len(), values.len());
    }

    #[test]
    fn prop_config_other_version_rejected(major in 2u32..10, minor in 0u32..10) {
        let text = format!("#<ver={major}.{minor}>\nKERNEL_IMAGE=zImage\n");
        let rejected = matches!(
            ConfigFile::parse(&text, "1.0"),
            Err(ConfigError::VersionMismatch { .. })
        );
        prop_assert!(rejected);
    }

    #[test]
    fn prop_panel_patch_idempotent(env in arb_panel_env(), dual in any::<bool>()) {
        let settings = PanelSettings::from_env(&env).map_err(fail)?;

        let mut once = panel_tree(dual);
        settings.apply(&mut once).map_err(fail)?;
        let mut twice = once.clone();
        settings.apply(&mut twice).map_err(fail)?;
        prop_assert_eq!(&once, &twice);

        let blob = FlatDeviceTree.flatten(&once).map_err(fail)?;
        let reloaded = FlatDeviceTree.unflatten(&blob).map_err(fail)?;
        prop_assert_eq!(&reloaded, &once);
    }

    #[test]
    fn prop_panel_cells_written_big_endian(env in arb_panel_env()) {
        let settings = PanelSettings::from_env(&env).map_err(fail)?;
        let mut tree = panel_tree(false);
        settings.apply(&mut tree).map_err(fail)?;

        let timing = tree
            .find_path("/soc/ldb/lvds-channel@0/display-timings/timing0")
            .ok_or_else(|| TestCaseError::fail("timing node missing"))?;
        let node = tree.node(&timing).ok_or_else(|| TestCaseError::fail("timing node missing"))?;
        for param in PANEL_PARAMS.iter().filter(|p| p.kind == ParamKind::U32) {
            let expected = env.get(param.key).and_then(parse_cell);
            prop_assert_eq!(node.property(param.property).and_then(|p| p.as_u32()), expected);
        }
    }
}
