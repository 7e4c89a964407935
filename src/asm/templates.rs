//! Canned ROP chains expanded by `loop580`, `loop880`, `backup580`,
//! `backup880` and `setup_loop`.

/// Block-copy routine called by `backup580`.
pub const BACKUP_COPY_580: u32 = 0x09450;
/// Block-copy routine called by `backup880`.
pub const BACKUP_COPY_880: u32 = 0x14DE8;
/// Return target pushed after the copy arguments on 580-class targets.
pub const LOOP_RETURN_580: u16 = 0x8932;
/// Same slot on 880-class targets.
pub const LOOP_RETURN_880: [u8; 2] = [0xe6, 0x4d];

fn lines(text: String) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// `src` may be written as `[label]`; the templates use it as an `adr_of` operand.
fn label(src: &str) -> &str {
    src.trim().trim_start_matches('[').trim_end_matches(']')
}

pub fn loop580(src: &str, backup: &str, tail_hex: &str) -> Vec<String> {
    let src = label(src);
    lines(format!(
        "set_segment:
setlr
di,rt
call pop xr0
adr_of length
0x0001
[er0]=er2,rt
call pop qr0
pr_length
{backup}
adr_of {src}
adr_of [-2] {src}
0x{LOOP_RETURN_580:04x}
length:
hex {tail_hex}
0x0000
sp=er6,pop er8"
    ))
}

pub fn loop880(src: &str, backup: &str) -> Vec<String> {
    let src = label(src);
    let [r0, r1] = LOOP_RETURN_880;
    lines(format!(
        "set_segment:
setlr
di,rt
call pop xr0
adr_of length
0x0001
[er0]=er2,rt
loop:
call pop qr0
adr_of {src}
{backup}
pr_length
adr_of [-2] {src}
hex {r0:02x} {r1:02x}
length:
remaining_length
0x0000
call sp=er6,pop er8"
    ))
}

pub fn backup580(src: &str, backup: &str) -> Vec<String> {
    let src = label(src);
    lines(format!(
        "backup:
call pop xr0
{backup}
adr_of {src}
call 0x{BACKUP_COPY_580:05x}
pr_length"
    ))
}

pub fn backup880(src: &str, backup: &str) -> Vec<String> {
    let src = label(src);
    lines(format!(
        "backup:
call pop xr0
{backup}
adr_of {src}
call 0x{BACKUP_COPY_880:05x}
pr_length
0x0000"
    ))
}

/// Restores `src` from `backup`, then jumps back to `label`.
pub fn setup_loop(src: &str, backup: &str, label: &str) -> Vec<String> {
    lines(format!(
        "restore:
setlr
di,rt
xr0 = adr_of length, 0x01, 0x00
[er0] = er2,rt
qr0 = pr_length, {backup}, {src}, 0x0000
0x{LOOP_RETURN_580:04x}
length:
0x0800
0x0000
set_sp:
er6 = adr_of [-2] {label}
sp = er6,pop er8"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_substitute_variables() {
        let l = backup880("[buf]", "0xd522");
        assert_eq!(l[2], "0xd522");
        assert_eq!(l[3], "adr_of buf");
        assert_eq!(l[4], "call 0x14de8");
        assert_eq!(loop880("a", "b")[13], "hex e6 4d");
        assert_eq!(setup_loop("s", "b", "home").last().map(String::as_str), Some("sp = er6,pop er8"));
    }
}
