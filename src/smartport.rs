//! SmartPort / ProDOSブロックデバイスカード
//!
//! スロットにロードされるカードROMにはトラップ命令（$FB n）が
//! 2箇所埋めてあり、ゲストのファームウェア呼び出しはホスト側の
//! ブロックI/Oに落ちる。ProDOS入口はゼロページ$42-$47で、SmartPort
//! 入口はスタック上のリターンアドレス経由でパラメータを受け取る
//! （1984年のtechnote方式）。
//!
//! https://www.1000bit.it/support/manuali/apple/technotes/smpt/tn.smpt.1.html

use std::path::Path;

use crate::blockdev::{BlockDevice, BLOCK_SIZE};
use crate::cpu::{flags, MemoryBus, Registers};

/// カードあたりのドライブ数
pub const SM_DRIVE_COUNT: usize = 2;

// SmartPortのエラーコード
const SP_ERR_BAD_STATUS: u8 = 0x21;
const SP_ERR_BAD_UNIT: u8 = 0x28;
const SP_ERR_IO: u8 = 0x2D;
const SP_ERR_NO_DEVICE: u8 = 0x2F;

/// カードROM。ProDOS入口（$CnC0）とSmartPort入口（$CnC3）が
/// それぞれ$Cn D1 / $Cn E1のトラップ命令に分岐する。
/// トラップ番号はカード登録時に$D2/$E2へパッチされる。
const CARD_ROM: [u8; 256] = [
    0xA2, 0x20, 0xA9, 0x00, 0xA2, 0x03, 0xA9, 0x00, 0x2C, 0xFF, 0xCF, 0xA0, 0x00, 0x84, 0x44, 0x84,
    0x46, 0x84, 0x47, 0xC8, 0x84, 0x42, 0xA9, 0x4C, 0x8D, 0xFD, 0x07, 0xA9, 0xC0, 0x8D, 0xFE, 0x07,
    0x20, 0x58, 0xFF, 0xBA, 0xBD, 0x00, 0x01, 0x8D, 0xFF, 0x07, 0x0A, 0x0A, 0x0A, 0x0A, 0x85, 0x43,
    0xA9, 0x08, 0x85, 0x45, 0x64, 0x44, 0x64, 0x46, 0x64, 0x47, 0x20, 0xFD, 0x07, 0xB0, 0x1E, 0xA9,
    0x0A, 0x85, 0x45, 0xA9, 0x01, 0x85, 0x46, 0x20, 0xFD, 0x07, 0xB0, 0x11, 0xAD, 0x01, 0x08, 0xF0,
    0x0C, 0xA9, 0x01, 0xCD, 0x00, 0x08, 0xD0, 0x05, 0xA6, 0x43, 0x4C, 0x01, 0x08, 0xAD, 0xFF, 0x07,
    0xC9, 0xC1, 0xF0, 0x08, 0xC5, 0x01, 0xD0, 0x04, 0xA5, 0x00, 0xF0, 0x03, 0x4C, 0x00, 0xE0, 0xA9,
    0x92, 0x85, 0x44, 0xAD, 0xFF, 0x07, 0x85, 0x45, 0xA0, 0x00, 0xB1, 0x44, 0xF0, 0x06, 0x99, 0x55,
    0x07, 0xC8, 0x80, 0xF6, 0xAD, 0xFF, 0x07, 0x29, 0x0F, 0x3A, 0x09, 0xB0, 0x99, 0x55, 0x07, 0x4C,
    0xBA, 0xFA, 0x8E, 0xEF, 0xA0, 0x93, 0xED, 0xE1, 0xF2, 0xF4, 0x90, 0xEF, 0xF2, 0xF4, 0xA0, 0x84,
    0xE9, 0xF3, 0xE3, 0xAC, 0xA0, 0x82, 0xEF, 0xEF, 0xF4, 0xE9, 0xEE, 0xE7, 0xA0, 0x93, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xEA, 0x80, 0x0D, 0x80, 0x1B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xEB, 0xFB, 0x00, 0x80, 0x1B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xEB, 0xFB, 0x00, 0x80, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xB0, 0x03, 0xA9, 0x00, 0x60, 0xA9, 0x27, 0x60, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x17, 0xC0,
];

/// ROM内のトラップ番号パッチ位置
pub const HD_TRAP_OFFSET: usize = 0xD2;
pub const SM_TRAP_OFFSET: usize = 0xE2;

/// SmartPortカード本体
#[derive(Default)]
pub struct SmartPortCard {
    pub slot: u8,
    pub drives: [Option<BlockDevice>; SM_DRIVE_COUNT],
}

#[inline]
fn read_word<M: MemoryBus>(mem: &mut M, addr: u16) -> u16 {
    let lo = mem.read(addr) as u16;
    let hi = mem.read(addr.wrapping_add(1)) as u16;
    (hi << 8) | lo
}

#[inline]
fn write_word<M: MemoryBus>(mem: &mut M, addr: u16, value: u16) {
    mem.write(addr, value as u8);
    mem.write(addr.wrapping_add(1), (value >> 8) as u8);
}

impl SmartPortCard {
    pub fn new(slot: u8) -> Self {
        SmartPortCard {
            slot,
            drives: [None, None],
        }
    }

    /// トラップ番号をパッチしたカードROMを返す
    pub fn rom_with_traps(&self, trap_hd: u8, trap_sm: u8) -> [u8; 256] {
        let mut rom = CARD_ROM;
        rom[HD_TRAP_OFFSET] = trap_hd;
        rom[SM_TRAP_OFFSET] = trap_sm;
        rom
    }

    /// ブロックイメージをユニットにマウントする
    pub fn mount(&mut self, unit: usize, path: &Path) -> Result<(), String> {
        if unit >= SM_DRIVE_COUNT {
            return Err(format!("smartport: invalid unit {}", unit));
        }
        self.drives[unit] = Some(BlockDevice::open(path)?);
        Ok(())
    }

    pub fn eject(&mut self, unit: usize) {
        if unit < SM_DRIVE_COUNT {
            self.drives[unit] = None;
        }
    }

    /// ProDOSブロックデバイスのトラップ。
    /// パラメータはゼロページ: $42=コマンド $43=ユニット
    /// $44/45=バッファ $46/47=ブロック。
    /// 読み取り時はOOB通知用に書いた範囲を返す。
    pub fn hd_trap<M: MemoryBus>(
        &mut self,
        mem: &mut M,
        regs: &mut Registers,
    ) -> Option<(u16, u16)> {
        let command = mem.read(0x42);
        let unit = (mem.read(0x43) >> 7) as usize;
        let buffer = read_word(mem, 0x44);
        let block = read_word(mem, 0x46) as u32;

        match command {
            0 => {
                // ステータス: ブロック数をX:Yに返す
                match &self.drives[unit] {
                    None => {
                        regs.x = 0;
                        regs.y = 0;
                        regs.set_flag(flags::CARRY, true);
                    }
                    Some(dev) => {
                        let blocks = dev.block_count();
                        regs.x = blocks as u8;
                        regs.y = (blocks >> 8) as u8;
                        regs.set_flag(flags::CARRY, false);
                    }
                }
                None
            }
            1 => {
                // ブロック読み取り
                let Some(dev) = self.drives[unit].as_mut() else {
                    regs.set_flag(flags::CARRY, true);
                    return None;
                };
                if block >= dev.block_count() {
                    regs.set_flag(flags::CARRY, true);
                    return None;
                }
                let mut buf = [0u8; BLOCK_SIZE];
                match dev.read_block(block, &mut buf) {
                    Ok(()) => {
                        for (i, &b) in buf.iter().enumerate() {
                            mem.write(buffer.wrapping_add(i as u16), b);
                        }
                        regs.set_flag(flags::CARRY, false);
                        Some((buffer, BLOCK_SIZE as u16))
                    }
                    Err(e) => {
                        log::warn!("smartport: {}", e);
                        regs.set_flag(flags::CARRY, true);
                        None
                    }
                }
            }
            2 => {
                // ブロック書き込み
                let Some(dev) = self.drives[unit].as_mut() else {
                    regs.set_flag(flags::CARRY, true);
                    return None;
                };
                if block >= dev.block_count() {
                    regs.set_flag(flags::CARRY, true);
                    return None;
                }
                let mut buf = [0u8; BLOCK_SIZE];
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = mem.read(buffer.wrapping_add(i as u16));
                }
                match dev.write_block(block, &buf) {
                    Ok(()) => regs.set_flag(flags::CARRY, false),
                    Err(e) => {
                        log::warn!("smartport: {}", e);
                        regs.set_flag(flags::CARRY, true);
                    }
                }
                None
            }
            _ => {
                log::debug!(
                    "smartport: unhandled hd command {:02x} unit {} buffer {:04x} blk {:04x}",
                    command,
                    unit,
                    buffer,
                    block
                );
                regs.set_flag(flags::CARRY, true);
                None
            }
        }
    }

    /// SmartPortのトラップ。
    /// JSR直後のリターンアドレスからコマンドとパラメータブロックを
    /// 取り出し、リターンアドレスを3バイト進めて戻す。
    pub fn sm_trap<M: MemoryBus>(
        &mut self,
        mem: &mut M,
        regs: &mut Registers,
    ) -> Option<(u16, u16)> {
        let sp = 0x0100u16 + regs.sp as u16 + 1;
        let mut call_addr = read_word(mem, sp);
        let command = mem.read(call_addr.wrapping_add(1));
        let params = read_word(mem, call_addr.wrapping_add(2));
        call_addr = call_addr.wrapping_add(3);
        write_word(mem, sp, call_addr);

        let pcount = mem.read(params);
        let unit = mem.read(params.wrapping_add(1)) as usize;
        let buffer = read_word(mem, params.wrapping_add(2));

        match command {
            0 => {
                self.sm_status(mem, regs, pcount, unit, params, buffer);
                None
            }
            1 => self.sm_read(mem, regs, pcount, unit, params, buffer),
            2 => {
                self.sm_write(mem, regs, pcount, unit, params, buffer);
                None
            }
            _ => {
                log::debug!("smartport: unhandled sp command {:02x}", command);
                regs.a = SP_ERR_BAD_STATUS;
                regs.set_flag(flags::CARRY, true);
                None
            }
        }
    }

    fn sm_status<M: MemoryBus>(
        &mut self,
        mem: &mut M,
        regs: &mut Registers,
        pcount: u8,
        unit: usize,
        params: u16,
        mut buffer: u16,
    ) {
        if pcount != 3 {
            regs.set_flag(flags::CARRY, true);
            return;
        }
        let status_code = mem.read(params.wrapping_add(4));
        // デバイス存在ビットは後で立てる
        let mut st = 0x80 | 0x40 | 0x20;
        match status_code {
            0 => {
                regs.set_flag(flags::CARRY, false);
                regs.a = 0;
                if unit == 0 {
                    // IIcリファレンスはステータスバイトだが、実際の
                    // ホストはドライブ数を期待する
                    mem.write(buffer, SM_DRIVE_COUNT as u8);
                    mem.write(buffer.wrapping_add(1), 0x00);
                    mem.write(buffer.wrapping_add(2), 0x01);
                    mem.write(buffer.wrapping_add(3), 0x13);
                } else if unit <= SM_DRIVE_COUNT {
                    let mut bsize = 0u32;
                    if let Some(dev) = &self.drives[unit - 1] {
                        st |= 0x10;
                        bsize = dev.block_count();
                    }
                    mem.write(buffer, st);
                    mem.write(buffer.wrapping_add(1), bsize as u8);
                    mem.write(buffer.wrapping_add(2), (bsize >> 8) as u8);
                    mem.write(buffer.wrapping_add(3), (bsize >> 16) as u8);
                } else {
                    regs.a = SP_ERR_BAD_STATUS;
                    regs.set_flag(flags::CARRY, true);
                }
            }
            3 => {
                // DIB（Device Information Block）
                regs.set_flag(flags::CARRY, false);
                regs.a = 0;
                if unit > 0 && unit <= SM_DRIVE_COUNT {
                    let mut bsize = 0u32;
                    if let Some(dev) = &self.drives[unit - 1] {
                        st |= 0x10;
                        bsize = dev.block_count();
                    }
                    mem.write(buffer, st);
                    buffer = buffer.wrapping_add(1);
                    for b in [bsize as u8, (bsize >> 8) as u8, (bsize >> 16) as u8] {
                        mem.write(buffer, b);
                        buffer = buffer.wrapping_add(1);
                    }
                    let mut name = *b"\x08A2E HD 0        ";
                    name[8] = b'0' + (unit - 1) as u8;
                    for b in name {
                        mem.write(buffer, b);
                        buffer = buffer.wrapping_add(1);
                    }
                    // Profileタイプ + バージョン
                    for b in [0x02u8, 0x00, 0x01, 0x13] {
                        mem.write(buffer, b);
                        buffer = buffer.wrapping_add(1);
                    }
                } else {
                    regs.a = SP_ERR_BAD_STATUS;
                    regs.set_flag(flags::CARRY, true);
                }
            }
            _ => {
                log::debug!("smartport: unit {} bad status {}", unit, status_code);
                regs.a = SP_ERR_BAD_STATUS;
                regs.set_flag(flags::CARRY, true);
            }
        }
    }

    fn sm_read<M: MemoryBus>(
        &mut self,
        mem: &mut M,
        regs: &mut Registers,
        pcount: u8,
        unit: usize,
        params: u16,
        buffer: u16,
    ) -> Option<(u16, u16)> {
        regs.set_flag(flags::CARRY, false);
        regs.a = 0;
        if pcount != 3 {
            regs.set_flag(flags::CARRY, true);
            return None;
        }
        if unit == 0 || unit > SM_DRIVE_COUNT {
            regs.a = SP_ERR_BAD_UNIT;
            regs.set_flag(flags::CARRY, true);
            return None;
        }
        let block = mem.read(params.wrapping_add(4)) as u32
            | ((mem.read(params.wrapping_add(5)) as u32) << 8)
            | ((mem.read(params.wrapping_add(6)) as u32) << 16);
        let Some(dev) = self.drives[unit - 1].as_mut() else {
            regs.a = SP_ERR_NO_DEVICE;
            regs.set_flag(flags::CARRY, true);
            return None;
        };
        if block >= dev.block_count() {
            log::debug!("smartport: block {} out of range", block);
            regs.a = SP_ERR_IO;
            regs.set_flag(flags::CARRY, true);
            return None;
        }
        let mut buf = [0u8; BLOCK_SIZE];
        match dev.read_block(block, &mut buf) {
            Ok(()) => {
                for (i, &b) in buf.iter().enumerate() {
                    mem.write(buffer.wrapping_add(i as u16), b);
                }
                Some((buffer, BLOCK_SIZE as u16))
            }
            Err(e) => {
                log::warn!("smartport: {}", e);
                regs.a = SP_ERR_IO;
                regs.set_flag(flags::CARRY, true);
                None
            }
        }
    }

    fn sm_write<M: MemoryBus>(
        &mut self,
        mem: &mut M,
        regs: &mut Registers,
        pcount: u8,
        unit: usize,
        params: u16,
        buffer: u16,
    ) {
        regs.set_flag(flags::CARRY, false);
        regs.a = 0;
        if pcount != 3 {
            regs.set_flag(flags::CARRY, true);
            return;
        }
        if unit == 0 || unit > SM_DRIVE_COUNT {
            regs.a = SP_ERR_BAD_UNIT;
            regs.set_flag(flags::CARRY, true);
            return;
        }
        let block = mem.read(params.wrapping_add(4)) as u32
            | ((mem.read(params.wrapping_add(5)) as u32) << 8)
            | ((mem.read(params.wrapping_add(6)) as u32) << 16);
        let Some(dev) = self.drives[unit - 1].as_mut() else {
            regs.a = SP_ERR_NO_DEVICE;
            regs.set_flag(flags::CARRY, true);
            return;
        };
        if block >= dev.block_count() {
            regs.a = SP_ERR_IO;
            regs.set_flag(flags::CARRY, true);
            return;
        }
        let mut buf = [0u8; BLOCK_SIZE];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = mem.read(buffer.wrapping_add(i as u16));
        }
        if let Err(e) = dev.write_block(block, &buf) {
            log::warn!("smartport: {}", e);
            regs.a = SP_ERR_IO;
            regs.set_flag(flags::CARRY, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// フラットな64KB RAMのテストバス
    struct TestBus {
        ram: Vec<u8>,
    }

    impl TestBus {
        fn new() -> Self {
            TestBus {
                ram: vec![0; 65536],
            }
        }
    }

    impl MemoryBus for TestBus {
        fn read(&mut self, address: u16) -> u8 {
            self.ram[address as usize]
        }
        fn write(&mut self, address: u16, value: u8) {
            self.ram[address as usize] = value;
        }
    }

    fn temp_image(name: &str, blocks: usize) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("a2emu_test_sp_{}_{}.po", name, std::process::id()));
        let mut img = vec![0u8; blocks * BLOCK_SIZE];
        for (i, b) in img.iter_mut().enumerate() {
            *b = (i / BLOCK_SIZE) as u8;
        }
        std::fs::write(&p, &img).unwrap();
        p
    }

    #[test]
    fn rom_carries_patched_trap_ids() {
        let card = SmartPortCard::new(7);
        let rom = card.rom_with_traps(0x11, 0x22);
        assert_eq!(rom[HD_TRAP_OFFSET - 1], 0xFB);
        assert_eq!(rom[HD_TRAP_OFFSET], 0x11);
        assert_eq!(rom[SM_TRAP_OFFSET - 1], 0xFB);
        assert_eq!(rom[SM_TRAP_OFFSET], 0x22);
        // ProDOSシグネチャの入口オフセット
        assert_eq!(rom[0xFF], 0xC0);
    }

    #[test]
    fn hd_status_returns_block_count() {
        let img = temp_image("status", 280);
        let mut card = SmartPortCard::new(7);
        card.mount(0, &img).unwrap();
        let mut bus = TestBus::new();
        let mut regs = Registers::default();
        bus.ram[0x42] = 0; // status
        bus.ram[0x43] = 0; // unit 0
        card.hd_trap(&mut bus, &mut regs);
        assert!(!regs.get_flag(flags::CARRY));
        assert_eq!(regs.x as u16 | ((regs.y as u16) << 8), 280);
        let _ = std::fs::remove_file(img);
    }

    #[test]
    fn hd_read_copies_block_into_guest_memory() {
        let img = temp_image("read", 16);
        let mut card = SmartPortCard::new(7);
        card.mount(0, &img).unwrap();
        let mut bus = TestBus::new();
        let mut regs = Registers::default();
        bus.ram[0x42] = 1; // read
        bus.ram[0x43] = 0;
        bus.ram[0x44] = 0x00; // buffer = $2000
        bus.ram[0x45] = 0x20;
        bus.ram[0x46] = 5; // block 5
        bus.ram[0x47] = 0;
        let oob = card.hd_trap(&mut bus, &mut regs);
        assert!(!regs.get_flag(flags::CARRY));
        assert_eq!(oob, Some((0x2000, 512)));
        assert_eq!(bus.ram[0x2000], 5);
        assert_eq!(bus.ram[0x21FF], 5);
        let _ = std::fs::remove_file(img);
    }

    #[test]
    fn hd_read_out_of_range_sets_carry() {
        let img = temp_image("range", 4);
        let mut card = SmartPortCard::new(7);
        card.mount(0, &img).unwrap();
        let mut bus = TestBus::new();
        let mut regs = Registers::default();
        bus.ram[0x42] = 1;
        bus.ram[0x46] = 100;
        card.hd_trap(&mut bus, &mut regs);
        assert!(regs.get_flag(flags::CARRY));
        let _ = std::fs::remove_file(img);
    }

    /// SmartPort呼び出しのスタック/パラメータブロックを組み立てる
    fn setup_sm_call(bus: &mut TestBus, regs: &mut Registers, command: u8, params: u16) {
        // JSR命令の戻り番地 - 1 がスタックに積まれている状態を作る
        let call_site = 0x0800u16;
        regs.sp = 0xFD;
        bus.ram[0x01FE] = call_site as u8;
        bus.ram[0x01FF] = (call_site >> 8) as u8;
        bus.ram[call_site as usize + 1] = command;
        bus.ram[call_site as usize + 2] = params as u8;
        bus.ram[call_site as usize + 3] = (params >> 8) as u8;
    }

    #[test]
    fn sm_status_unit0_reports_drive_count() {
        let img = temp_image("smstat", 8);
        let mut card = SmartPortCard::new(7);
        card.mount(0, &img).unwrap();
        let mut bus = TestBus::new();
        let mut regs = Registers::default();
        setup_sm_call(&mut bus, &mut regs, 0, 0x300);
        bus.ram[0x300] = 3; // pcount
        bus.ram[0x301] = 0; // unit 0
        bus.ram[0x302] = 0x00; // buffer = $400
        bus.ram[0x303] = 0x04;
        bus.ram[0x304] = 0; // status code 0
        card.sm_trap(&mut bus, &mut regs);
        assert!(!regs.get_flag(flags::CARRY));
        assert_eq!(bus.ram[0x400], SM_DRIVE_COUNT as u8);
        // リターンアドレスが3バイト進んでいる
        let ret = bus.ram[0x01FE] as u16 | ((bus.ram[0x01FF] as u16) << 8);
        assert_eq!(ret, 0x0803);
        let _ = std::fs::remove_file(img);
    }

    #[test]
    fn sm_read_block_and_errors() {
        let img = temp_image("smread", 8);
        let mut card = SmartPortCard::new(7);
        card.mount(0, &img).unwrap();
        let mut bus = TestBus::new();
        let mut regs = Registers::default();
        setup_sm_call(&mut bus, &mut regs, 1, 0x300);
        bus.ram[0x300] = 3;
        bus.ram[0x301] = 1; // unit 1 = ドライブ0
        bus.ram[0x302] = 0x00;
        bus.ram[0x303] = 0x30; // buffer = $3000
        bus.ram[0x304] = 2; // block 2
        let oob = card.sm_trap(&mut bus, &mut regs);
        assert!(!regs.get_flag(flags::CARRY));
        assert_eq!(oob, Some((0x3000, 512)));
        assert_eq!(bus.ram[0x3000], 2);

        // 存在しないユニット
        let mut regs = Registers::default();
        setup_sm_call(&mut bus, &mut regs, 1, 0x300);
        bus.ram[0x301] = 2; // unit 2 = ドライブ1（空）
        card.sm_trap(&mut bus, &mut regs);
        assert!(regs.get_flag(flags::CARRY));
        assert_eq!(regs.a, SP_ERR_NO_DEVICE);
        let _ = std::fs::remove_file(img);
    }
}
