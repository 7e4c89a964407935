use hackasm::config::DecompileRange;
use hackasm::error::Error;
use hackasm::text::spaced_hex;
use hackasm::{decompile, AddressTable, Assembler, Charset, Disassembly, ErrorClass, KeyCost, OutputFormat, Registry};
use hackasm::{TargetConfig, TargetMode};
use pretty_assertions::assert_eq;

struct Tables {
    disasm: Disassembly,
    gadgets: AddressTable,
    labels: AddressTable,
}

fn tables() -> Tables {
    let gadgets = AddressTable::parse(
        "\
# decompiler gadget table
01000 pop xr0
02000 sp=er6,pop er8
@02100 mov r0, 1, pop er4
02200 pop pc
02300 nop
",
    );
    let labels = AddressTable::parse("12344 restore regs pop er0\n05000 print_line\n");
    let mut disasm = Disassembly::new();
    for (addr, insn) in [(0x3000, "push lr"), (0x3002, "pop er4"), (0x3004, "pop lr"), (0x3006, "rt")] {
        disasm.insert(addr, insn);
    }
    disasm.insert(0x3100, "add sp, 4");
    disasm.insert(0x3102, "leave");
    disasm.insert(0x3104, "pop pc");
    Tables { disasm, gadgets, labels }
}

fn run(t: &Tables, text: &str) -> Result<Vec<String>, hackasm::DecompileError> {
    let out = decompile(text, &t.disasm, &t.gadgets, &t.labels, DecompileRange::default())?;
    Ok(out.lines)
}

fn body(lines: Vec<String>) -> Vec<String> {
    lines.into_iter().skip(2).collect()
}

#[test]
fn header_sets_org_and_is_range_checked() {
    let t = tables();
    let err = run(&t, ":8000 0000").unwrap_err();
    assert_eq!(err.offset, 0);
    assert_eq!(err.source.class(), ErrorClass::Range);
    assert!(matches!(err.source, Error::OrgOutOfRange { addr: 0x8000, .. }));

    let out = run(&t, ": 9100\n").unwrap();
    assert_eq!(out, vec!["org 0x9100".to_string(), String::new()]);

    let out = run(&t, "00 50 00 00").unwrap();
    assert_eq!(out[0], "org 0x9000");

    for header in [":100000000 00", ":ffffffffffffffffffff"] {
        let err = run(&t, header).unwrap_err();
        assert_eq!(err.source.class(), ErrorClass::Range, "{header}");
    }
    let err = run(&t, ":9x00").unwrap_err();
    assert!(matches!(err.source, Error::BadHex(_)));
}

#[test]
fn empty_input_is_rejected() {
    let err = run(&tables(), "  \n ").unwrap_err();
    assert_eq!(err.source, Error::EmptyInput);
}

#[test]
fn label_with_pop_tail_consumes_its_data() {
    let t = tables();
    let out = decompile("44 23 31 30 aa bb", &t.disasm, &t.gadgets, &t.labels, DecompileRange::default()).unwrap();
    assert_eq!(body(out.lines), vec!["restore regs pop er0", "hex aa bb"]);
    assert_eq!(out.covered, 6);
}

#[test]
fn gadget_pops_become_register_loads() {
    let t = tables();
    let out = run(&t, "00 10 00 00 01 02 03 04 00 20 00 00").unwrap();
    assert_eq!(body(out), vec!["xr0 = hex 01 02 03 04", "sp=er6,pop er8"]);
}

#[test]
fn gadgets_without_enough_data() {
    let t = tables();
    // text before `pop` survives, a bare `pop` gadget is dropped
    let out = run(&t, "00 21 00 00 ff").unwrap();
    assert_eq!(body(out), vec!["mov r0, 1, pop er4", "hex ff"]);

    let out = run(&t, "00 23 00 00 00 22 00 00").unwrap();
    assert_eq!(body(out), vec!["nop"]);
}

#[test]
fn degrade_search_finds_nearby_entries() {
    let t = tables();
    let out = run(&t, "03 50 00 00").unwrap();
    assert_eq!(body(out), vec!["print_line"]);
}

#[test]
fn disassembly_walk_counts_pops() {
    let t = tables();
    let out = run(&t, "00 30 00 00 aa bb 00 31 00 00").unwrap();
    // `leave` needs twelve bytes which are not there
    assert_eq!(body(out), vec!["call 0x3000", "hex aa bb", "call 0x3100"]);
}

#[test]
fn unknown_and_out_of_range_words() {
    let t = tables();
    let out = run(&t, "34 12 00 00 ff ff 0f 00 01 02 03").unwrap();
    assert_eq!(body(out), vec!["call 0x1234", "hex ff ff 0f 00", "hex 01 02 03"]);
}

#[test]
fn literal_runs_and_comments_pass_through() {
    let t = tables();
    let out = decompile("[0102](hello)00 50 00 00 [ab]", &t.disasm, &t.gadgets, &t.labels, DecompileRange::default())
        .unwrap();
    assert_eq!(body(out.lines), vec!["hex 01 02", "# hello", "print_line", "hex ab"]);
    assert_eq!(out.covered, 7);

    let err = run(&t, "[0g]").unwrap_err();
    assert!(matches!(err.source, Error::BadHex(_)));
}

#[test]
fn decompiling_a_compiled_program_covers_every_byte() {
    let mut registry = Registry::new();
    registry.add_command("pop xr0", 0x1000, vec!["rt".into()]).unwrap();
    registry.add_command("sp=er6,pop er8", 0x2000, vec![]).unwrap();
    registry.add_command("pop er6", 0x2400, vec!["rt".into()]).unwrap();
    let keys = KeyCost::default();
    let charset = Charset::default();
    let config = TargetConfig::default();
    let src = "\
org 0x8d00
home:
xr0 = 0x01020304
call 0x12345
hex 99
loop:
goto loop
0x0a0b";
    let asm = Assembler::new(&registry, &keys, &charset, &config)
        .compile(src, TargetMode::None, OutputFormat::Hex, 0)
        .unwrap();

    let t = tables();
    let out = decompile(&spaced_hex(&asm.bytes), &t.disasm, &t.gadgets, &t.labels, DecompileRange::default()).unwrap();
    assert_eq!(out.covered, asm.bytes.len());
    assert_eq!(out.lines[2], "xr0 = hex 04 03 02 01");
}
