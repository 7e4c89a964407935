use hackasm::KeyCost;
use pretty_assertions::assert_eq;

const TABLE: &str = "\
# byte npress symbol
30 1 0
31 1 1
32 1 2
33 1 3
40 2 x
41 3 sin(
00 2
0a 4 cos(
";

#[test]
fn optimized_address_is_a_cheapest_parity() {
    let k = KeyCost::parse(TABLE).unwrap();
    for addr in (0..0x4_0000u32).step_by(0x0fe7) {
        let best = k.optimize_address(addr);
        assert!(best == addr || best == addr ^ 1, "{addr:#x} -> {best:#x}");
        assert!(k.cost_address(best) <= k.cost_address(best ^ 1), "{addr:#x}");
    }
}

#[test]
fn split_sum_pairs_add_up() {
    let k = KeyCost::parse(TABLE).unwrap();
    for total in [0x0000, 0x0202, 0x6130, 0x8d9c, 0xfffe] {
        let (a, b) = k.optimize_split_sum(total);
        assert_eq!((a + b) & 0xffff, total, "{total:#x}");
    }
    // 0x6161 = 0x3030 + 0x3131: four presses in total
    let (a, b) = k.optimize_split_sum(0x6161);
    assert_eq!(k.cost_address(a) + k.cost_address(b), 4);
}

#[test]
fn address_keys_include_the_segment() {
    let k = KeyCost::parse(TABLE).unwrap();
    assert_eq!(k.address_keys(0x33231), "1 2 3");
    assert_eq!(k.cost_address(0x33231), 3);
    assert_eq!(k.keys(&[0x00, 0x41, 0x0a]), vec!["<NUL>", "sin(", "cos("]);
}
