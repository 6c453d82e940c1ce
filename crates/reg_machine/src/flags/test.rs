use super::*;

fn flags(carry: bool, zero: bool, sign: bool, overflow: bool) -> Flags {
    Flags {
        carry,
        zero,
        sign,
        overflow,
    }
}

#[test]
fn add_table() {
    #[rustfmt::skip]
    let cases = [
        // dst,    src,    result, carry, zero,  sign,  overflow
        (5,      3,      8,      false, false, false, false),
        (0x7FFF, 1,      0x8000, false, false, true,  true),
        (0xFFFF, 1,      0,      true,  true,  false, false),
        (0x8000, 0x8000, 0,      true,  true,  false, true),
        (0xFFFF, 0xFFFF, 0xFFFE, true,  false, true,  false),
    ];
    for (dst, src, result, carry, zero, sign, overflow) in cases {
        let mut f = Flags::default();
        assert_eq!(f.add(dst, src), result, "{dst:#x} + {src:#x}");
        assert_eq!(f, flags(carry, zero, sign, overflow), "{dst:#x} + {src:#x}");
    }
}

#[test]
fn subtract_table() {
    #[rustfmt::skip]
    let cases = [
        // dst,    src,    result, carry, zero,  sign,  overflow
        (5,      5,      0,      false, true,  false, false),
        (3,      5,      0xFFFE, true,  false, true,  false),
        (0x7FFF, 0xFFFF, 0x8000, true,  false, true,  false),
        (0x8000, 1,      0x7FFF, false, false, false, false),
        (1,      0xFFFF, 2,      true,  false, false, true),
        (0,      0x8000, 0x8000, true,  false, true,  false),
    ];
    for (dst, src, result, carry, zero, sign, overflow) in cases {
        let mut f = Flags::default();
        assert_eq!(f.subtract(dst, src), result, "{dst:#x} - {src:#x}");
        assert_eq!(f, flags(carry, zero, sign, overflow), "{dst:#x} - {src:#x}");
    }
}

#[test]
fn negate_is_subtract_from_zero() {
    let mut f = Flags::default();
    assert_eq!(f.negate(1), 0xFFFF);
    assert!(f.carry);
    assert!(f.sign);
    assert!(!f.zero);

    assert_eq!(f.negate(0), 0);
    assert_eq!(f, flags(false, true, false, false));
}

#[test]
fn mul_flags() {
    let mut f = Flags::default();
    assert_eq!(f.mul(0x100, 0x100), 0);
    assert!(f.carry && f.overflow);
    assert!(!f.zero);

    assert_eq!(f.mul(300, 2), 600);
    assert_eq!(f, flags(false, false, false, false));

    assert_eq!(f.mul(0, 9), 0);
    assert!(f.zero);
}

#[test]
fn imul_flags() {
    let mut f = Flags::default();
    assert_eq!(f.imul(0xFFFF, 3), 0xFFFD);
    assert_eq!(f, flags(false, false, true, false));

    assert_eq!(f.imul(0x4000, 2), 0x8000);
    assert!(f.carry && f.overflow);
    assert!(f.sign);
}

#[test]
fn logic_clears_carry_and_overflow() {
    let mut f = flags(true, false, false, true);
    assert_eq!(f.and(0xF0F0, 0x0F0F), 0);
    assert_eq!(f, flags(false, true, false, false));

    let mut f = flags(true, false, false, true);
    assert_eq!(f.or(0x8000, 1), 0x8001);
    assert_eq!(f, flags(false, false, true, false));

    assert_eq!(f.xor(0xFFFF, 0xFFFF), 0);
    assert!(f.zero);

    assert_eq!(f.not(0), 0xFFFF);
    assert_eq!(f, flags(false, false, true, false));
}

#[test]
fn inc_dec_keep_carry() {
    let mut f = flags(true, false, false, false);
    assert_eq!(f.inc(0x7FFF), 0x8000);
    assert_eq!(f, flags(true, false, true, true));

    assert_eq!(f.dec(0x8000), 0x7FFF);
    assert_eq!(f, flags(true, false, false, true));

    let mut f = Flags::default();
    assert_eq!(f.inc(0xFFFF), 0);
    assert_eq!(f, flags(false, true, false, false));
}

#[test]
fn signed_relations_after_subtract() {
    let mut f = Flags::default();
    f.subtract(3, 5);
    assert!(f.less() && f.less_or_equal());
    assert!(!f.greater() && !f.greater_or_equal() && !f.equal());

    f.subtract(5, 3);
    assert!(f.greater() && f.greater_or_equal());

    f.subtract(4, 4);
    assert!(f.equal() && f.greater_or_equal() && f.less_or_equal());
    assert!(!f.greater() && !f.less());

    // -3 < -2
    f.subtract(0xFFFD, 0xFFFE);
    assert!(f.less());
}
