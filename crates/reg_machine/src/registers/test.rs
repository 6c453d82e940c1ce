use super::*;

#[test]
fn default_banks() {
    let registers = RegisterFile::default();
    assert_eq!(registers.len16(), 12);
    assert_eq!(registers.len32(), 24);
    assert_eq!(registers.len64(), 32);
    assert_eq!(registers.get16(11), 0);
}

#[test]
fn sizes_are_clamped() {
    let registers = RegisterFile::new(100, 3, 1000);
    assert_eq!(registers.len16(), 12);
    assert_eq!(registers.len32(), 3);
    assert_eq!(registers.len64(), 32);
}

#[test]
fn out_of_range_reads_all_ones() {
    let registers = RegisterFile::new(2, 2, 2);
    assert_eq!(registers.get16(2), 0xFFFF);
    assert_eq!(registers.get32(5), u32::MAX);
    assert_eq!(registers.get64(99), u64::MAX);
}

#[test]
fn out_of_range_writes_are_dropped() {
    let mut registers = RegisterFile::new(2, 2, 2);
    registers.set16(1, 9);
    registers.set16(2, 9);
    registers.set32(7, 1);
    registers.set64(0, 0x1_0000_0000);
    assert_eq!(registers.registers16(), &[0, 9]);
    assert_eq!(registers.get64(0), 0x1_0000_0000);

    registers.clear();
    assert_eq!(registers.get16(1), 0);
    assert_eq!(registers.get64(0), 0);
}
