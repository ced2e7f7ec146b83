//! オペコードの実装
//!
//! 65C02の全命令。ディスパッチはアドレッシングモードをパラメータに
//! した共通ヘルパー（read_at / store_at / modify_at）に畳み込む。

use super::{flags, AddrMode, Cpu, MemoryBus, TRAP_OPCODE};
use AddrMode::*;

impl Cpu {
    //--------------------------------------------------
    // 命令本体（オペランド解決済み）
    //--------------------------------------------------

    fn lda(&mut self, value: u8) {
        self.regs.a = value;
        self.regs.update_zero_negative_flags(value);
    }

    fn ldx(&mut self, value: u8) {
        self.regs.x = value;
        self.regs.update_zero_negative_flags(value);
    }

    fn ldy(&mut self, value: u8) {
        self.regs.y = value;
        self.regs.update_zero_negative_flags(value);
    }

    fn and_a(&mut self, value: u8) {
        self.regs.a &= value;
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn ora_a(&mut self, value: u8) {
        self.regs.a |= value;
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn eor_a(&mut self, value: u8) {
        self.regs.a ^= value;
        self.regs.update_zero_negative_flags(self.regs.a);
    }

    fn do_adc(&mut self, value: u8) {
        let carry = if self.regs.get_flag(flags::CARRY) { 1u16 } else { 0u16 };

        if self.regs.get_flag(flags::DECIMAL) {
            // BCDモード
            let mut low = (self.regs.a & 0x0F) as u16 + (value & 0x0F) as u16 + carry;
            let mut high = (self.regs.a >> 4) as u16 + (value >> 4) as u16;
            if low > 9 {
                low -= 10;
                high += 1;
            }
            let result = if high > 9 {
                self.regs.set_flag(flags::CARRY, true);
                (((high - 10) << 4) | (low & 0x0F)) as u8
            } else {
                self.regs.set_flag(flags::CARRY, false);
                ((high << 4) | (low & 0x0F)) as u8
            };
            // 65C02はBCDでもZNを正しく更新する
            self.regs.update_zero_negative_flags(result);
            self.regs.a = result;
            self.cycles += 1;
        } else {
            let result = self.regs.a as u16 + value as u16 + carry;
            let result8 = result as u8;
            self.regs.set_flag(flags::CARRY, result > 0xFF);
            self.regs.set_flag(
                flags::OVERFLOW,
                ((self.regs.a ^ result8) & (value ^ result8) & 0x80) != 0,
            );
            self.regs.update_zero_negative_flags(result8);
            self.regs.a = result8;
        }
    }

    fn do_sbc(&mut self, value: u8) {
        if self.regs.get_flag(flags::DECIMAL) {
            let borrow = if self.regs.get_flag(flags::CARRY) { 0i16 } else { 1i16 };
            let mut low = (self.regs.a & 0x0F) as i16 - (value & 0x0F) as i16 - borrow;
            let mut high = (self.regs.a >> 4) as i16 - (value >> 4) as i16;
            if low < 0 {
                low += 10;
                high -= 1;
            }
            let result = if high < 0 {
                self.regs.set_flag(flags::CARRY, false);
                (((high + 10) << 4) | (low & 0x0F)) as u8
            } else {
                self.regs.set_flag(flags::CARRY, true);
                ((high << 4) | (low & 0x0F)) as u8
            };
            self.regs.update_zero_negative_flags(result);
            self.regs.a = result;
            self.cycles += 1;
        } else {
            // 2進数モードはADCの補数
            self.do_adc(!value);
        }
    }

    fn do_compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.regs.set_flag(flags::CARRY, register >= value);
        self.regs.update_zero_negative_flags(result);
    }

    fn do_bit(&mut self, value: u8) {
        self.regs.set_flag(flags::ZERO, (self.regs.a & value) == 0);
        self.regs.set_flag(flags::NEGATIVE, (value & 0x80) != 0);
        self.regs.set_flag(flags::OVERFLOW, (value & 0x40) != 0);
    }

    fn asl(cpu: &mut Cpu, value: u8) -> u8 {
        cpu.regs.set_flag(flags::CARRY, (value & 0x80) != 0);
        value << 1
    }

    fn lsr(cpu: &mut Cpu, value: u8) -> u8 {
        cpu.regs.set_flag(flags::CARRY, (value & 0x01) != 0);
        value >> 1
    }

    fn rol(cpu: &mut Cpu, value: u8) -> u8 {
        let carry = if cpu.regs.get_flag(flags::CARRY) { 1 } else { 0 };
        cpu.regs.set_flag(flags::CARRY, (value & 0x80) != 0);
        (value << 1) | carry
    }

    fn ror(cpu: &mut Cpu, value: u8) -> u8 {
        let carry = if cpu.regs.get_flag(flags::CARRY) { 0x80 } else { 0 };
        cpu.regs.set_flag(flags::CARRY, (value & 0x01) != 0);
        (value >> 1) | carry
    }

    /// アキュムレータ対象のシフト
    fn shift_a(&mut self, f: fn(&mut Cpu, u8) -> u8) {
        let a = self.regs.a;
        let result = f(self, a);
        self.regs.a = result;
        self.regs.update_zero_negative_flags(result);
        self.cycles += 1;
    }

    /// TSB/TRB: Zフラグは A & 旧値 から決まる
    fn test_bits<M: MemoryBus>(&mut self, memory: &mut M, mode: AddrMode, set: bool) {
        let addr = self.resolve(memory, mode, true);
        let value = memory.read(addr);
        self.regs.set_flag(flags::ZERO, (self.regs.a & value) == 0);
        let result = if set {
            value | self.regs.a
        } else {
            value & !self.regs.a
        };
        memory.write(addr, result);
        self.cycles += 3;
    }

    /// RMB/SMB: ゼロページの1ビット操作（フラグは変化しない）
    fn memory_bit<M: MemoryBus>(&mut self, memory: &mut M, bit: u8, set: bool) {
        let addr = self.fetch_byte(memory) as u16;
        let value = memory.read(addr);
        let result = if set {
            value | (1 << bit)
        } else {
            value & !(1 << bit)
        };
        memory.write(addr, result);
        self.cycles += 3;
    }

    /// BBR/BBS: ゼロページのビット条件分岐
    fn branch_on_bit<M: MemoryBus>(&mut self, memory: &mut M, bit: u8, set: bool) {
        let addr = self.fetch_byte(memory) as u16;
        let value = memory.read(addr);
        self.cycles += 2;
        let cond = ((value >> bit) & 1 != 0) == set;
        self.branch(memory, cond);
    }

    fn jsr<M: MemoryBus>(&mut self, memory: &mut M) {
        let low = self.fetch_byte(memory) as u16;
        let high = self.fetch_byte(memory) as u16;
        // リターンアドレスは次命令の1バイト手前
        self.push_word(memory, self.regs.pc.wrapping_sub(1));
        self.regs.pc = (high << 8) | low;
        self.cycles += 3;
    }

    fn rts<M: MemoryBus>(&mut self, memory: &mut M) {
        self.regs.pc = self.pop_word(memory).wrapping_add(1);
        self.cycles += 5;
    }

    fn brk<M: MemoryBus>(&mut self, memory: &mut M) {
        // BRKは2バイト命令（パディングバイトを読み飛ばす）
        let _ = self.fetch_byte(memory);
        self.push_word(memory, self.regs.pc);
        let status = self.regs.status | flags::BREAK | flags::UNUSED;
        self.push_byte(memory, status);
        self.regs.set_flag(flags::IRQ_DISABLE, true);
        self.regs.set_flag(flags::DECIMAL, false);
        let low = memory.read(0xFFFE) as u16;
        let high = memory.read(0xFFFF) as u16;
        self.regs.pc = (high << 8) | low;
        self.cycles += 5;
    }

    fn rti<M: MemoryBus>(&mut self, memory: &mut M) {
        self.regs.status = self.pop_byte(memory);
        self.regs.set_flag(flags::UNUSED, true);
        self.regs.set_flag(flags::BREAK, false);
        self.regs.pc = self.pop_word(memory);
        self.cycles += 5;
    }

    //--------------------------------------------------
    // ディスパッチ
    //--------------------------------------------------
    pub(super) fn execute<M: MemoryBus>(&mut self, memory: &mut M, opcode: u8) {
        match opcode {
            // LDA
            0xA9 => { let v = self.get_immediate(memory); self.lda(v); }
            0xA5 => { let v = self.read_at(memory, ZeroPage); self.lda(v); }
            0xB5 => { let v = self.read_at(memory, ZeroPageX); self.lda(v); }
            0xAD => { let v = self.read_at(memory, Absolute); self.lda(v); }
            0xBD => { let v = self.read_at(memory, AbsoluteX); self.lda(v); }
            0xB9 => { let v = self.read_at(memory, AbsoluteY); self.lda(v); }
            0xA1 => { let v = self.read_at(memory, IndirectX); self.lda(v); }
            0xB1 => { let v = self.read_at(memory, IndirectY); self.lda(v); }
            0xB2 => { let v = self.read_at(memory, Indirect); self.lda(v); }

            // LDX
            0xA2 => { let v = self.get_immediate(memory); self.ldx(v); }
            0xA6 => { let v = self.read_at(memory, ZeroPage); self.ldx(v); }
            0xB6 => { let v = self.read_at(memory, ZeroPageY); self.ldx(v); }
            0xAE => { let v = self.read_at(memory, Absolute); self.ldx(v); }
            0xBE => { let v = self.read_at(memory, AbsoluteY); self.ldx(v); }

            // LDY
            0xA0 => { let v = self.get_immediate(memory); self.ldy(v); }
            0xA4 => { let v = self.read_at(memory, ZeroPage); self.ldy(v); }
            0xB4 => { let v = self.read_at(memory, ZeroPageX); self.ldy(v); }
            0xAC => { let v = self.read_at(memory, Absolute); self.ldy(v); }
            0xBC => { let v = self.read_at(memory, AbsoluteX); self.ldy(v); }

            // STA
            0x85 => { let a = self.regs.a; self.store_at(memory, ZeroPage, a); }
            0x95 => { let a = self.regs.a; self.store_at(memory, ZeroPageX, a); }
            0x8D => { let a = self.regs.a; self.store_at(memory, Absolute, a); }
            0x9D => { let a = self.regs.a; self.store_at(memory, AbsoluteX, a); }
            0x99 => { let a = self.regs.a; self.store_at(memory, AbsoluteY, a); }
            0x81 => { let a = self.regs.a; self.store_at(memory, IndirectX, a); }
            0x91 => { let a = self.regs.a; self.store_at(memory, IndirectY, a); }
            0x92 => { let a = self.regs.a; self.store_at(memory, Indirect, a); }

            // STX / STY / STZ
            0x86 => { let x = self.regs.x; self.store_at(memory, ZeroPage, x); }
            0x96 => { let x = self.regs.x; self.store_at(memory, ZeroPageY, x); }
            0x8E => { let x = self.regs.x; self.store_at(memory, Absolute, x); }
            0x84 => { let y = self.regs.y; self.store_at(memory, ZeroPage, y); }
            0x94 => { let y = self.regs.y; self.store_at(memory, ZeroPageX, y); }
            0x8C => { let y = self.regs.y; self.store_at(memory, Absolute, y); }
            0x64 => self.store_at(memory, ZeroPage, 0),
            0x74 => self.store_at(memory, ZeroPageX, 0),
            0x9C => self.store_at(memory, Absolute, 0),
            0x9E => self.store_at(memory, AbsoluteX, 0),

            // Transfer
            0xAA => { self.regs.x = self.regs.a; let x = self.regs.x; self.regs.update_zero_negative_flags(x); self.cycles += 1; }
            0x8A => { self.regs.a = self.regs.x; let a = self.regs.a; self.regs.update_zero_negative_flags(a); self.cycles += 1; }
            0xA8 => { self.regs.y = self.regs.a; let y = self.regs.y; self.regs.update_zero_negative_flags(y); self.cycles += 1; }
            0x98 => { self.regs.a = self.regs.y; let a = self.regs.a; self.regs.update_zero_negative_flags(a); self.cycles += 1; }
            0xBA => { self.regs.x = self.regs.sp; let x = self.regs.x; self.regs.update_zero_negative_flags(x); self.cycles += 1; }
            0x9A => { self.regs.sp = self.regs.x; self.cycles += 1; }

            // Stack
            0x48 => { let a = self.regs.a; self.push_byte(memory, a); self.cycles += 2; }
            0x68 => { self.regs.a = self.pop_byte(memory); let a = self.regs.a; self.regs.update_zero_negative_flags(a); self.cycles += 3; }
            0xDA => { let x = self.regs.x; self.push_byte(memory, x); self.cycles += 2; }
            0xFA => { self.regs.x = self.pop_byte(memory); let x = self.regs.x; self.regs.update_zero_negative_flags(x); self.cycles += 3; }
            0x5A => { let y = self.regs.y; self.push_byte(memory, y); self.cycles += 2; }
            0x7A => { self.regs.y = self.pop_byte(memory); let y = self.regs.y; self.regs.update_zero_negative_flags(y); self.cycles += 3; }
            0x08 => {
                let status = self.regs.status | flags::BREAK | flags::UNUSED;
                self.push_byte(memory, status);
                self.cycles += 2;
            }
            0x28 => {
                self.regs.status = self.pop_byte(memory);
                self.regs.set_flag(flags::UNUSED, true);
                self.regs.set_flag(flags::BREAK, false);
                self.cycles += 3;
            }

            // ADC
            0x69 => { let v = self.get_immediate(memory); self.do_adc(v); }
            0x65 => { let v = self.read_at(memory, ZeroPage); self.do_adc(v); }
            0x75 => { let v = self.read_at(memory, ZeroPageX); self.do_adc(v); }
            0x6D => { let v = self.read_at(memory, Absolute); self.do_adc(v); }
            0x7D => { let v = self.read_at(memory, AbsoluteX); self.do_adc(v); }
            0x79 => { let v = self.read_at(memory, AbsoluteY); self.do_adc(v); }
            0x61 => { let v = self.read_at(memory, IndirectX); self.do_adc(v); }
            0x71 => { let v = self.read_at(memory, IndirectY); self.do_adc(v); }
            0x72 => { let v = self.read_at(memory, Indirect); self.do_adc(v); }

            // SBC
            0xE9 => { let v = self.get_immediate(memory); self.do_sbc(v); }
            0xE5 => { let v = self.read_at(memory, ZeroPage); self.do_sbc(v); }
            0xF5 => { let v = self.read_at(memory, ZeroPageX); self.do_sbc(v); }
            0xED => { let v = self.read_at(memory, Absolute); self.do_sbc(v); }
            0xFD => { let v = self.read_at(memory, AbsoluteX); self.do_sbc(v); }
            0xF9 => { let v = self.read_at(memory, AbsoluteY); self.do_sbc(v); }
            0xE1 => { let v = self.read_at(memory, IndirectX); self.do_sbc(v); }
            0xF1 => { let v = self.read_at(memory, IndirectY); self.do_sbc(v); }
            0xF2 => { let v = self.read_at(memory, Indirect); self.do_sbc(v); }

            // CMP / CPX / CPY
            0xC9 => { let v = self.get_immediate(memory); let a = self.regs.a; self.do_compare(a, v); }
            0xC5 => { let v = self.read_at(memory, ZeroPage); let a = self.regs.a; self.do_compare(a, v); }
            0xD5 => { let v = self.read_at(memory, ZeroPageX); let a = self.regs.a; self.do_compare(a, v); }
            0xCD => { let v = self.read_at(memory, Absolute); let a = self.regs.a; self.do_compare(a, v); }
            0xDD => { let v = self.read_at(memory, AbsoluteX); let a = self.regs.a; self.do_compare(a, v); }
            0xD9 => { let v = self.read_at(memory, AbsoluteY); let a = self.regs.a; self.do_compare(a, v); }
            0xC1 => { let v = self.read_at(memory, IndirectX); let a = self.regs.a; self.do_compare(a, v); }
            0xD1 => { let v = self.read_at(memory, IndirectY); let a = self.regs.a; self.do_compare(a, v); }
            0xD2 => { let v = self.read_at(memory, Indirect); let a = self.regs.a; self.do_compare(a, v); }
            0xE0 => { let v = self.get_immediate(memory); let x = self.regs.x; self.do_compare(x, v); }
            0xE4 => { let v = self.read_at(memory, ZeroPage); let x = self.regs.x; self.do_compare(x, v); }
            0xEC => { let v = self.read_at(memory, Absolute); let x = self.regs.x; self.do_compare(x, v); }
            0xC0 => { let v = self.get_immediate(memory); let y = self.regs.y; self.do_compare(y, v); }
            0xC4 => { let v = self.read_at(memory, ZeroPage); let y = self.regs.y; self.do_compare(y, v); }
            0xCC => { let v = self.read_at(memory, Absolute); let y = self.regs.y; self.do_compare(y, v); }

            // INC / DEC
            0xE6 => self.modify_at(memory, ZeroPage, |_, v| v.wrapping_add(1)),
            0xF6 => self.modify_at(memory, ZeroPageX, |_, v| v.wrapping_add(1)),
            0xEE => self.modify_at(memory, Absolute, |_, v| v.wrapping_add(1)),
            0xFE => self.modify_at(memory, AbsoluteX, |_, v| v.wrapping_add(1)),
            0xC6 => self.modify_at(memory, ZeroPage, |_, v| v.wrapping_sub(1)),
            0xD6 => self.modify_at(memory, ZeroPageX, |_, v| v.wrapping_sub(1)),
            0xCE => self.modify_at(memory, Absolute, |_, v| v.wrapping_sub(1)),
            0xDE => self.modify_at(memory, AbsoluteX, |_, v| v.wrapping_sub(1)),
            0x1A => { self.regs.a = self.regs.a.wrapping_add(1); let a = self.regs.a; self.regs.update_zero_negative_flags(a); self.cycles += 1; }
            0x3A => { self.regs.a = self.regs.a.wrapping_sub(1); let a = self.regs.a; self.regs.update_zero_negative_flags(a); self.cycles += 1; }
            0xE8 => { self.regs.x = self.regs.x.wrapping_add(1); let x = self.regs.x; self.regs.update_zero_negative_flags(x); self.cycles += 1; }
            0xC8 => { self.regs.y = self.regs.y.wrapping_add(1); let y = self.regs.y; self.regs.update_zero_negative_flags(y); self.cycles += 1; }
            0xCA => { self.regs.x = self.regs.x.wrapping_sub(1); let x = self.regs.x; self.regs.update_zero_negative_flags(x); self.cycles += 1; }
            0x88 => { self.regs.y = self.regs.y.wrapping_sub(1); let y = self.regs.y; self.regs.update_zero_negative_flags(y); self.cycles += 1; }

            // AND
            0x29 => { let v = self.get_immediate(memory); self.and_a(v); }
            0x25 => { let v = self.read_at(memory, ZeroPage); self.and_a(v); }
            0x35 => { let v = self.read_at(memory, ZeroPageX); self.and_a(v); }
            0x2D => { let v = self.read_at(memory, Absolute); self.and_a(v); }
            0x3D => { let v = self.read_at(memory, AbsoluteX); self.and_a(v); }
            0x39 => { let v = self.read_at(memory, AbsoluteY); self.and_a(v); }
            0x21 => { let v = self.read_at(memory, IndirectX); self.and_a(v); }
            0x31 => { let v = self.read_at(memory, IndirectY); self.and_a(v); }
            0x32 => { let v = self.read_at(memory, Indirect); self.and_a(v); }

            // ORA
            0x09 => { let v = self.get_immediate(memory); self.ora_a(v); }
            0x05 => { let v = self.read_at(memory, ZeroPage); self.ora_a(v); }
            0x15 => { let v = self.read_at(memory, ZeroPageX); self.ora_a(v); }
            0x0D => { let v = self.read_at(memory, Absolute); self.ora_a(v); }
            0x1D => { let v = self.read_at(memory, AbsoluteX); self.ora_a(v); }
            0x19 => { let v = self.read_at(memory, AbsoluteY); self.ora_a(v); }
            0x01 => { let v = self.read_at(memory, IndirectX); self.ora_a(v); }
            0x11 => { let v = self.read_at(memory, IndirectY); self.ora_a(v); }
            0x12 => { let v = self.read_at(memory, Indirect); self.ora_a(v); }

            // EOR
            0x49 => { let v = self.get_immediate(memory); self.eor_a(v); }
            0x45 => { let v = self.read_at(memory, ZeroPage); self.eor_a(v); }
            0x55 => { let v = self.read_at(memory, ZeroPageX); self.eor_a(v); }
            0x4D => { let v = self.read_at(memory, Absolute); self.eor_a(v); }
            0x5D => { let v = self.read_at(memory, AbsoluteX); self.eor_a(v); }
            0x59 => { let v = self.read_at(memory, AbsoluteY); self.eor_a(v); }
            0x41 => { let v = self.read_at(memory, IndirectX); self.eor_a(v); }
            0x51 => { let v = self.read_at(memory, IndirectY); self.eor_a(v); }
            0x52 => { let v = self.read_at(memory, Indirect); self.eor_a(v); }

            // シフト/ローテート
            0x0A => self.shift_a(Cpu::asl),
            0x06 => self.modify_at(memory, ZeroPage, Cpu::asl),
            0x16 => self.modify_at(memory, ZeroPageX, Cpu::asl),
            0x0E => self.modify_at(memory, Absolute, Cpu::asl),
            0x1E => self.modify_at(memory, AbsoluteX, Cpu::asl),
            0x4A => self.shift_a(Cpu::lsr),
            0x46 => self.modify_at(memory, ZeroPage, Cpu::lsr),
            0x56 => self.modify_at(memory, ZeroPageX, Cpu::lsr),
            0x4E => self.modify_at(memory, Absolute, Cpu::lsr),
            0x5E => self.modify_at(memory, AbsoluteX, Cpu::lsr),
            0x2A => self.shift_a(Cpu::rol),
            0x26 => self.modify_at(memory, ZeroPage, Cpu::rol),
            0x36 => self.modify_at(memory, ZeroPageX, Cpu::rol),
            0x2E => self.modify_at(memory, Absolute, Cpu::rol),
            0x3E => self.modify_at(memory, AbsoluteX, Cpu::rol),
            0x6A => self.shift_a(Cpu::ror),
            0x66 => self.modify_at(memory, ZeroPage, Cpu::ror),
            0x76 => self.modify_at(memory, ZeroPageX, Cpu::ror),
            0x6E => self.modify_at(memory, Absolute, Cpu::ror),
            0x7E => self.modify_at(memory, AbsoluteX, Cpu::ror),

            // BIT
            0x24 => { let v = self.read_at(memory, ZeroPage); self.do_bit(v); }
            0x2C => { let v = self.read_at(memory, Absolute); self.do_bit(v); }
            0x34 => { let v = self.read_at(memory, ZeroPageX); self.do_bit(v); }
            0x3C => { let v = self.read_at(memory, AbsoluteX); self.do_bit(v); }
            0x89 => {
                // BIT #imm はZフラグのみ変化
                let v = self.get_immediate(memory);
                let a = self.regs.a;
                self.regs.set_flag(flags::ZERO, (a & v) == 0);
            }

            // TSB / TRB
            0x04 => self.test_bits(memory, ZeroPage, true),
            0x0C => self.test_bits(memory, Absolute, true),
            0x14 => self.test_bits(memory, ZeroPage, false),
            0x1C => self.test_bits(memory, Absolute, false),

            // 分岐
            0x10 => { let c = !self.regs.get_flag(flags::NEGATIVE); self.branch(memory, c); }
            0x30 => { let c = self.regs.get_flag(flags::NEGATIVE); self.branch(memory, c); }
            0x50 => { let c = !self.regs.get_flag(flags::OVERFLOW); self.branch(memory, c); }
            0x70 => { let c = self.regs.get_flag(flags::OVERFLOW); self.branch(memory, c); }
            0x90 => { let c = !self.regs.get_flag(flags::CARRY); self.branch(memory, c); }
            0xB0 => { let c = self.regs.get_flag(flags::CARRY); self.branch(memory, c); }
            0xD0 => { let c = !self.regs.get_flag(flags::ZERO); self.branch(memory, c); }
            0xF0 => { let c = self.regs.get_flag(flags::ZERO); self.branch(memory, c); }
            0x80 => self.branch(memory, true), // BRA

            // ジャンプ/コール
            0x4C => {
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                self.regs.pc = (high << 8) | low;
            }
            0x6C => {
                // 65C02はページ跨ぎのバグがない
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                let ptr = (high << 8) | low;
                let l = memory.read(ptr) as u16;
                let h = memory.read(ptr.wrapping_add(1)) as u16;
                self.regs.pc = (h << 8) | l;
                self.cycles += 3;
            }
            0x7C => {
                // JMP (abs,X)
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                let ptr = ((high << 8) | low).wrapping_add(self.regs.x as u16);
                let l = memory.read(ptr) as u16;
                let h = memory.read(ptr.wrapping_add(1)) as u16;
                self.regs.pc = (h << 8) | l;
                self.cycles += 3;
            }
            0x20 => self.jsr(memory),
            0x60 => self.rts(memory),
            0x00 => self.brk(memory),
            0x40 => self.rti(memory),

            // フラグ操作
            0x18 => { self.regs.set_flag(flags::CARRY, false); self.cycles += 1; }
            0x38 => { self.regs.set_flag(flags::CARRY, true); self.cycles += 1; }
            0x58 => { self.regs.set_flag(flags::IRQ_DISABLE, false); self.cycles += 1; }
            0x78 => { self.regs.set_flag(flags::IRQ_DISABLE, true); self.cycles += 1; }
            0xB8 => { self.regs.set_flag(flags::OVERFLOW, false); self.cycles += 1; }
            0xD8 => { self.regs.set_flag(flags::DECIMAL, false); self.cycles += 1; }
            0xF8 => { self.regs.set_flag(flags::DECIMAL, true); self.cycles += 1; }

            // NOP
            0xEA => self.cycles += 1,

            // RMB / SMB
            0x07 => self.memory_bit(memory, 0, false),
            0x17 => self.memory_bit(memory, 1, false),
            0x27 => self.memory_bit(memory, 2, false),
            0x37 => self.memory_bit(memory, 3, false),
            0x47 => self.memory_bit(memory, 4, false),
            0x57 => self.memory_bit(memory, 5, false),
            0x67 => self.memory_bit(memory, 6, false),
            0x77 => self.memory_bit(memory, 7, false),
            0x87 => self.memory_bit(memory, 0, true),
            0x97 => self.memory_bit(memory, 1, true),
            0xA7 => self.memory_bit(memory, 2, true),
            0xB7 => self.memory_bit(memory, 3, true),
            0xC7 => self.memory_bit(memory, 4, true),
            0xD7 => self.memory_bit(memory, 5, true),
            0xE7 => self.memory_bit(memory, 6, true),
            0xF7 => self.memory_bit(memory, 7, true),

            // BBR / BBS
            0x0F => self.branch_on_bit(memory, 0, false),
            0x1F => self.branch_on_bit(memory, 1, false),
            0x2F => self.branch_on_bit(memory, 2, false),
            0x3F => self.branch_on_bit(memory, 3, false),
            0x4F => self.branch_on_bit(memory, 4, false),
            0x5F => self.branch_on_bit(memory, 5, false),
            0x6F => self.branch_on_bit(memory, 6, false),
            0x7F => self.branch_on_bit(memory, 7, false),
            0x8F => self.branch_on_bit(memory, 0, true),
            0x9F => self.branch_on_bit(memory, 1, true),
            0xAF => self.branch_on_bit(memory, 2, true),
            0xBF => self.branch_on_bit(memory, 3, true),
            0xCF => self.branch_on_bit(memory, 4, true),
            0xDF => self.branch_on_bit(memory, 5, true),
            0xEF => self.branch_on_bit(memory, 6, true),
            0xFF => self.branch_on_bit(memory, 7, true),

            // トラップ命令（$FB n）: カードロジックへのディスパッチ
            TRAP_OPCODE => {
                let code = self.fetch_byte(memory);
                let handled = memory.trap(code, &mut self.regs);
                if !handled {
                    log::debug!("cpu: unregistered trap ${:02X} at ${:04X}", code,
                        self.regs.pc.wrapping_sub(2));
                }
                self.cycles += 1;
            }

            // WAI / STP は割り込み待ちをしないのでNOP相当
            0xCB | 0xDB => self.cycles += 1,

            // 65C02のカラム3/Bの未定義オペコードは1バイトNOP
            0x03 | 0x13 | 0x23 | 0x33 | 0x43 | 0x53 | 0x63 | 0x73 | 0x83 | 0x93 | 0xA3
            | 0xB3 | 0xC3 | 0xD3 | 0xE3 | 0xF3 | 0x0B | 0x1B | 0x2B | 0x3B | 0x4B | 0x5B
            | 0x6B | 0x7B | 0x8B | 0x9B | 0xAB | 0xBB | 0xEB => self.cycles += 1,

            // 既知の複数バイトNOP
            0x02 | 0x22 | 0x42 | 0x62 | 0x82 | 0xC2 | 0xE2 => {
                let _ = self.fetch_byte(memory);
                self.cycles += 1;
            }
            0x44 | 0x54 | 0xD4 | 0xF4 => {
                let _ = self.fetch_byte(memory);
                self.cycles += 2;
            }
            0x5C | 0xDC | 0xFC => {
                let _ = self.fetch_byte(memory);
                let _ = self.fetch_byte(memory);
                self.cycles += 4;
            }

            // 未定義オペコードは2バイトNOP扱い（エミュレーションは継続）
            _ => {
                log::debug!("cpu: undefined opcode ${:02X} at ${:04X}", opcode,
                    self.regs.pc.wrapping_sub(1));
                let _ = self.fetch_byte(memory);
                self.cycles += 1;
            }
        }
    }
}
