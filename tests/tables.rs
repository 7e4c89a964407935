use std::fs;
use std::path::PathBuf;

use hackasm::{Assembler, OutputFormat, Tables, TargetConfig, TargetMode};
use pretty_assertions::assert_eq;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hackasm-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn config_points_at_table_files() {
    let dir = scratch("tables");
    fs::write(
        dir.join("target.json"),
        r#"{
            "name": "test",
            "layout": { "ram_end": 36352 },
            "tables": {
                "gadgets": "gadgets.txt",
                "data_labels": "labels.txt",
                "keys": "keys.txt",
                "charset": "chars.txt",
                "decompile_gadgets": "gadgets.txt"
            }
        }"#,
    )
    .unwrap();
    fs::write(dir.join("gadgets.txt"), "02222 pop er0\n0abcd {warning: slow} slow thing\n").unwrap();
    fs::write(dir.join("labels.txt"), "d180 buffer\n").unwrap();
    fs::write(dir.join("keys.txt"), "31 1 1\n32 1 2\n").unwrap();
    fs::write(dir.join("chars.txt"), "A 31\nspace 32\n").unwrap();

    let cfg = TargetConfig::load(&dir.join("target.json")).unwrap();
    assert_eq!(cfg.layout.ram_end, 0x8e00);
    let tables = Tables::load(&cfg, &dir).unwrap();
    assert_eq!(tables.registry.command("pop er0").unwrap().address, 0x2222);
    assert_eq!(tables.registry.data_label("buffer"), Some(0xd180));
    assert_eq!(tables.keys.cost(0x31), 1);
    assert_eq!(tables.decompile_gadgets.get(0xabcd), Some("{warning: slow} slow thing"));

    let asm = Assembler::from_tables(&tables, &cfg);
    let out = asm
        .compile("org 0x8d00\nbuffer\nstr \"A A\"\nslow thing", TargetMode::None, OutputFormat::Hex, 0)
        .unwrap();
    assert_eq!(out.bytes, vec![0x80, 0xd1, 0x31, 0x32, 0x31, 0xcd, 0xab, 0x00, 0x00]);
    assert_eq!(out.notes.len(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn bad_config_is_reported() {
    let dir = scratch("badcfg");
    let path = dir.join("target.json");
    fs::write(&path, r#"{ "layout": { "stride": 0 } }"#).unwrap();
    assert!(TargetConfig::load(&path).is_err());
    let _ = fs::remove_dir_all(&dir);
}
