//! アドレッシングモードの実装
//!
//! 65C02のアドレッシングモードと、オペランド解決のヘルパー群。
//! サイクル加算（ページ跨ぎペナルティを含む）はここで行う。

use super::{Cpu, MemoryBus};

/// アドレッシングモードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// ゼロページ - $nn
    ZeroPage,
    /// ゼロページ,X - $nn,X
    ZeroPageX,
    /// ゼロページ,Y - $nn,Y
    ZeroPageY,
    /// 絶対 - $nnnn
    Absolute,
    /// 絶対,X - $nnnn,X
    AbsoluteX,
    /// 絶対,Y - $nnnn,Y
    AbsoluteY,
    /// 間接,X（プリインデックス） - ($nn,X)
    IndirectX,
    /// 間接,Y（ポストインデックス） - ($nn),Y
    IndirectY,
    /// 間接（ゼロページ、65C02） - ($nn)
    Indirect,
}

impl Cpu {
    /// 即値を取得
    pub(super) fn get_immediate<M: MemoryBus>(&mut self, memory: &mut M) -> u8 {
        self.fetch_byte(memory)
    }

    /// モードに応じて実効アドレスを解決する
    ///
    /// `write`がtrueの場合、インデックス系モードはページ跨ぎの有無に
    /// かかわらずペナルティサイクルを払う（ストア/RMW用）。
    pub(super) fn resolve<M: MemoryBus>(
        &mut self,
        memory: &mut M,
        mode: AddrMode,
        write: bool,
    ) -> u16 {
        match mode {
            AddrMode::ZeroPage => {
                let addr = self.fetch_byte(memory) as u16;
                addr
            }
            AddrMode::ZeroPageX => {
                let base = self.fetch_byte(memory);
                self.cycles += 1;
                base.wrapping_add(self.regs.x) as u16
            }
            AddrMode::ZeroPageY => {
                let base = self.fetch_byte(memory);
                self.cycles += 1;
                base.wrapping_add(self.regs.y) as u16
            }
            AddrMode::Absolute => {
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                (high << 8) | low
            }
            AddrMode::AbsoluteX => {
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                let base = (high << 8) | low;
                let addr = base.wrapping_add(self.regs.x as u16);
                if write || (base & 0xFF00) != (addr & 0xFF00) {
                    self.cycles += 1;
                }
                addr
            }
            AddrMode::AbsoluteY => {
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                let base = (high << 8) | low;
                let addr = base.wrapping_add(self.regs.y as u16);
                if write || (base & 0xFF00) != (addr & 0xFF00) {
                    self.cycles += 1;
                }
                addr
            }
            AddrMode::IndirectX => {
                let base = self.fetch_byte(memory);
                let ptr = base.wrapping_add(self.regs.x);
                let low = memory.read(ptr as u16) as u16;
                let high = memory.read(ptr.wrapping_add(1) as u16) as u16;
                self.cycles += 3;
                (high << 8) | low
            }
            AddrMode::IndirectY => {
                let ptr = self.fetch_byte(memory);
                let low = memory.read(ptr as u16) as u16;
                let high = memory.read(ptr.wrapping_add(1) as u16) as u16;
                let base = (high << 8) | low;
                let addr = base.wrapping_add(self.regs.y as u16);
                self.cycles += 2;
                if write || (base & 0xFF00) != (addr & 0xFF00) {
                    self.cycles += 1;
                }
                addr
            }
            AddrMode::Indirect => {
                let ptr = self.fetch_byte(memory);
                let low = memory.read(ptr as u16) as u16;
                let high = memory.read(ptr.wrapping_add(1) as u16) as u16;
                self.cycles += 2;
                (high << 8) | low
            }
        }
    }

    /// 実効アドレスの値を読む（ロード/ALU命令用）
    pub(super) fn read_at<M: MemoryBus>(&mut self, memory: &mut M, mode: AddrMode) -> u8 {
        let addr = self.resolve(memory, mode, false);
        let value = memory.read(addr);
        self.cycles += 1;
        value
    }

    /// 実効アドレスに値を書く（ストア命令用）
    pub(super) fn store_at<M: MemoryBus>(&mut self, memory: &mut M, mode: AddrMode, value: u8) {
        let addr = self.resolve(memory, mode, true);
        memory.write(addr, value);
        self.cycles += 1;
    }

    /// リード・モディファイ・ライト。
    /// `f`の戻り値をメモリに書き戻し、ZNフラグを更新する。
    pub(super) fn modify_at<M, F>(&mut self, memory: &mut M, mode: AddrMode, f: F)
    where
        M: MemoryBus,
        F: FnOnce(&mut Self, u8) -> u8,
    {
        let addr = self.resolve(memory, mode, true);
        let value = memory.read(addr);
        let result = f(self, value);
        memory.write(addr, result);
        self.regs.update_zero_negative_flags(result);
        self.cycles += 3;
    }

    /// ブランチを実行（共通ロジック）
    pub(super) fn branch<M: MemoryBus>(&mut self, memory: &mut M, condition: bool) {
        let offset = self.fetch_byte(memory) as i8;
        if condition {
            let old_pc = self.regs.pc;
            self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
            self.cycles += 1;
            // ページ境界を越えた場合、追加サイクル
            if (old_pc & 0xFF00) != (self.regs.pc & 0xFF00) {
                self.cycles += 1;
            }
        }
    }
}
