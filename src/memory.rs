//! メモリサブシステム
//!
//! MAIN/AUXバンク、ROM、ランゲージカード、ソフトスイッチページの
//! ディスパッチ。PSRAM無し構成ではMAIN/AUXがページング仮想RAMに載る。
//! スピーカー・ビデオ系スイッチ・カードIOはバス（apple2）が先に
//! 横取りし、ここには残りが来る。

use crate::bank::{Bank, BankHook};
use crate::switches::{bits, sw, SoftSwitches};
use crate::vram::Vram;

/// PSRAM無し構成のページプールサイズ
pub const SMALL_POOL_PAGES: usize = 66;

/// スロット割り当て
pub const DISK2_SLOT: u8 = 6;
pub const SMARTPORT_SLOT: u8 = 7;

/// メモリシステム本体
pub struct Memory {
    /// メインDRAM ($0000-$BFFF)
    pub main: Bank,
    /// 補助DRAM ($0000-$BFFF)
    pub aux: Bank,
    /// メインROM ($C000-$FFFF)
    pub rom: Bank,
    /// カードROM ($C100-$C7FF)
    pub card_rom: Bank,
    /// ランゲージカードRAM ($D000-$FFFF)
    pub lc_ram: Box<[u8; 16384]>,
    /// LCバンク2の$D000オーバーレイ
    pub lc_ram2: Box<[u8; 4096]>,
    /// パックされたソフトスイッチ
    pub switches: SoftSwitches,
    /// キーボードラッチ（bit7=ストローブ）
    pub keyboard_strobe: u8,
    /// ゲームポート
    pub buttons: [bool; 3],
    pub paddles: [u8; 4],
    pub paddle_trigger_cycle: u64,
    /// パドル読み取り時のCPUサイクル（バスが設定する）
    pub paddle_read_cycle: u64,
}

impl Memory {
    /// メモリを構築する。psram_enabledがfalseなら小さいプールの
    /// ページングRAMがMAIN/AUXを受け持つ。
    pub fn new(psram_enabled: bool, swap_dir: &std::path::Path) -> Result<Memory, String> {
        let (main, aux) = if psram_enabled {
            (Bank::raw("main", 0, 192), Bank::raw("aux", 0, 192))
        } else {
            // インスタンスごとに固有のスワップファイル名にする
            static SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
            let seq = SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let pid = std::process::id();
            let main_vram = Vram::new(
                SMALL_POOL_PAGES,
                swap_dir.join(format!("a2emu_swap_{}_{}.bin", pid, seq)),
            )?;
            let aux_vram = Vram::new(
                SMALL_POOL_PAGES,
                swap_dir.join(format!("a2emu_swap_aux_{}_{}.bin", pid, seq)),
            )?;
            (
                Bank::paged("main", 0, 192, main_vram),
                Bank::paged("aux", 0, 192, aux_vram),
            )
        };
        let mut card_rom = Bank::raw("card_rom", 0xC100, 7);
        card_rom.install_hook(BankHook::Card(DISK2_SLOT), 0xC6, 0xC6);
        card_rom.install_hook(BankHook::Card(SMARTPORT_SLOT), 0xC7, 0xC7);
        Ok(Memory {
            main,
            aux,
            rom: Bank::rom("rom", 0xC000, vec![0xFF; 16384]),
            card_rom,
            lc_ram: Box::new([0; 16384]),
            lc_ram2: Box::new([0; 4096]),
            switches: SoftSwitches::default(),
            keyboard_strobe: 0,
            buttons: [false; 3],
            paddles: [128; 4],
            paddle_trigger_cycle: 0,
            paddle_read_cycle: 0,
        })
    }

    /// メインROMをロードする（16KB、$C000-$FFFF）
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), String> {
        if data.len() != 16384 {
            return Err(format!("rom must be 16384 bytes, got {}", data.len()));
        }
        self.rom.load(0xC000, data);
        let lo = data[0x3FFC];
        let hi = data[0x3FFD];
        log::info!("memory: rom loaded, reset vector ${:02X}{:02X}", hi, lo);
        Ok(())
    }

    /// キー入力をラッチする
    pub fn set_key(&mut self, key: u8) {
        self.keyboard_strobe = key | 0x80;
    }

    pub fn has_key_strobe(&self) -> bool {
        self.keyboard_strobe & 0x80 != 0
    }

    pub fn set_button(&mut self, button: usize, pressed: bool) {
        if button < 3 {
            self.buttons[button] = pressed;
        }
    }

    pub fn set_paddle(&mut self, paddle: usize, value: u8) {
        if paddle < 4 {
            self.paddles[paddle] = value;
        }
    }

    /// ゲストRAMをゼロにする（コールドリセット）
    pub fn clear_ram(&mut self) {
        self.main.clear();
        self.aux.clear();
        self.lc_ram.fill(0);
        self.lc_ram2.fill(0);
    }

    /// アドレスに対するMAIN/AUX選択。
    /// 80STOREが立っている間、テキストページ（とHIRES時の$2000）は
    /// RAMRD/RAMWRTではなくPAGE2で切り替わる。
    fn use_aux(&self, addr: u16, write: bool) -> bool {
        let s = &self.switches;
        if addr < 0x0200 {
            return s.get(bits::ALTZP);
        }
        if s.get(bits::STORE80) {
            if (0x0400..0x0800).contains(&addr) {
                return s.get(bits::PAGE2);
            }
            if s.get(bits::HIRES) && (0x2000..0x4000).contains(&addr) {
                return s.get(bits::PAGE2);
            }
        }
        if write {
            s.get(bits::RAMWRT)
        } else {
            s.get(bits::RAMRD)
        }
    }

    /// DRAM領域の読み取り（$0000-$BFFF）
    pub fn read_ram(&mut self, addr: u16) -> u8 {
        if self.use_aux(addr, false) {
            self.aux.peek(addr)
        } else {
            self.main.peek(addr)
        }
    }

    /// DRAM領域の書き込み
    pub fn write_ram(&mut self, addr: u16, value: u8) {
        if self.use_aux(addr, true) {
            self.aux.poke(addr, value);
        } else {
            self.main.poke(addr, value);
        }
    }

    /// $D000-$FFFFの読み取り（LC/ROM）
    pub fn read_high(&mut self, addr: u16) -> u8 {
        let s = &self.switches;
        if s.get(bits::LC_READ) {
            if addr < 0xE000 && s.get(bits::LC_BANK2) {
                self.lc_ram2[(addr - 0xD000) as usize]
            } else {
                self.lc_ram[(addr - 0xD000) as usize]
            }
        } else {
            self.rom.peek(addr)
        }
    }

    /// $D000-$FFFFの書き込み
    pub fn write_high(&mut self, addr: u16, value: u8) {
        if !self.switches.get(bits::LC_WRITE) {
            return;
        }
        if addr < 0xE000 && self.switches.get(bits::LC_BANK2) {
            self.lc_ram2[(addr - 0xD000) as usize] = value;
        } else {
            self.lc_ram[(addr - 0xD000) as usize] = value;
        }
    }

    /// ソフトスイッチページの読み取り（バスが横取りしなかった分）
    pub fn read_soft_switch(&mut self, addr: u16) -> u8 {
        let s = self.switches;
        match addr {
            0xC000..=0xC00F => self.keyboard_strobe,
            sw::KBDSTRB => {
                let result = self.keyboard_strobe;
                self.keyboard_strobe &= 0x7F;
                result
            }
            sw::RDLCBNK2 => s.flag(bits::LC_BANK2),
            sw::RDLCRAM => s.flag(bits::LC_READ),
            sw::RDRAMRD => s.flag(bits::RAMRD),
            sw::RDRAMWRT => s.flag(bits::RAMWRT),
            0xC015 => 0x00, // 常に外部スロットROM
            sw::RDALTZP => s.flag(bits::ALTZP),
            0xC017 => 0x00, // スロット3 ROM
            sw::RD80STORE => s.flag(bits::STORE80),
            sw::RDVBL => s.flag(bits::VBL),
            sw::RDTEXT => s.flag(bits::TEXT),
            sw::RDMIXED => s.flag(bits::MIXED),
            sw::RDPAGE2 => s.flag(bits::PAGE2),
            sw::RDHIRES => s.flag(bits::HIRES),
            sw::RDALTCHAR => s.flag(bits::ALTCHARSET),
            sw::RD80COL => s.flag(bits::COL80),
            0xC020..=0xC02F => 0x00, // カセットI/O
            0xC040..=0xC04F => 0x00, // ユーティリティストローブ
            sw::TEXTOFF => {
                self.switches.set(bits::TEXT, false);
                0x00
            }
            sw::TEXTON => {
                self.switches.set(bits::TEXT, true);
                0x00
            }
            sw::MIXEDOFF => {
                self.switches.set(bits::MIXED, false);
                0x00
            }
            sw::MIXEDON => {
                self.switches.set(bits::MIXED, true);
                0x00
            }
            sw::PAGE2OFF => {
                self.switches.set(bits::PAGE2, false);
                0x00
            }
            sw::PAGE2ON => {
                self.switches.set(bits::PAGE2, true);
                0x00
            }
            sw::HIRESOFF => {
                self.switches.set(bits::HIRES, false);
                0x00
            }
            sw::HIRESON => {
                self.switches.set(bits::HIRES, true);
                0x00
            }
            // アナンシエータ0-2はどこにも繋がっていない
            0xC058..=0xC05D => 0x00,
            0xC060 => 0x00, // カセット入力
            sw::BUTTON0 => {
                if self.buttons[0] {
                    0x80
                } else {
                    0x00
                }
            }
            sw::BUTTON1 => {
                if self.buttons[1] {
                    0x80
                } else {
                    0x00
                }
            }
            sw::BUTTON2 => {
                if self.buttons[2] {
                    0x80
                } else {
                    0x00
                }
            }
            sw::PADDLE0..=sw::PADDLE3 => {
                // トリガーから パドル値 x 11 サイクルの間Highを返す
                let idx = (addr - sw::PADDLE0) as usize;
                let timeout = self.paddles[idx] as u64 * 11;
                let elapsed = self
                    .paddle_read_cycle
                    .saturating_sub(self.paddle_trigger_cycle);
                if elapsed < timeout {
                    0x80
                } else {
                    0x00
                }
            }
            0xC068..=0xC06F => 0x00,
            0xC070..=0xC07D => {
                self.paddle_trigger_cycle = self.paddle_read_cycle;
                0x00
            }
            sw::IOUDISON => s.flag(bits::IOUDIS),
            sw::IOUDISOFF => s.flag(bits::DHIRES),
            sw::LC_FIRST..=sw::LC_LAST => self.language_card(addr as u8),
            _ => 0x00,
        }
    }

    /// ソフトスイッチページの書き込み
    pub fn write_soft_switch(&mut self, addr: u16, _value: u8) {
        match addr {
            0xC010..=0xC01F => {
                self.keyboard_strobe &= 0x7F;
            }
            sw::STORE80OFF => self.switches.set(bits::STORE80, false),
            sw::STORE80ON => self.switches.set(bits::STORE80, true),
            sw::RAMRDOFF => self.switches.set(bits::RAMRD, false),
            sw::RAMRDON => self.switches.set(bits::RAMRD, true),
            sw::RAMWRTOFF => self.switches.set(bits::RAMWRT, false),
            sw::RAMWRTON => self.switches.set(bits::RAMWRT, true),
            sw::ALTZPOFF => self.switches.set(bits::ALTZP, false),
            sw::ALTZPON => self.switches.set(bits::ALTZP, true),
            sw::TEXTOFF => self.switches.set(bits::TEXT, false),
            sw::TEXTON => self.switches.set(bits::TEXT, true),
            sw::MIXEDOFF => self.switches.set(bits::MIXED, false),
            sw::MIXEDON => self.switches.set(bits::MIXED, true),
            sw::PAGE2OFF => self.switches.set(bits::PAGE2, false),
            sw::PAGE2ON => self.switches.set(bits::PAGE2, true),
            sw::HIRESOFF => self.switches.set(bits::HIRES, false),
            sw::HIRESON => self.switches.set(bits::HIRES, true),
            sw::IOUDISON => self.switches.set(bits::IOUDIS, true),
            sw::IOUDISOFF => self.switches.set(bits::IOUDIS, false),
            sw::PDLTRIG..=0xC07D => {
                self.paddle_trigger_cycle = self.paddle_read_cycle;
            }
            sw::LC_FIRST..=sw::LC_LAST => {
                self.language_card(addr as u8);
            }
            _ => {}
        }
    }

    /// ランゲージカードのバンク切り替え（$C080-$C08F）
    fn language_card(&mut self, addr: u8) -> u8 {
        let s = &mut self.switches;
        let bank2 = addr & 0x08 == 0;
        s.set(bits::LC_BANK2, bank2);
        match addr & 0x03 {
            0x0 => {
                s.set(bits::LC_READ, true);
                s.set(bits::LC_WRITE, false);
                s.set(bits::LC_PREWRITE, false);
            }
            0x1 => {
                s.set(bits::LC_READ, false);
                if s.get(bits::LC_PREWRITE) {
                    s.set(bits::LC_WRITE, true);
                }
                let pre = s.get(bits::LC_PREWRITE);
                s.set(bits::LC_PREWRITE, !pre);
            }
            0x2 => {
                s.set(bits::LC_READ, false);
                s.set(bits::LC_WRITE, false);
                s.set(bits::LC_PREWRITE, false);
            }
            _ => {
                s.set(bits::LC_READ, true);
                if s.get(bits::LC_PREWRITE) {
                    s.set(bits::LC_WRITE, true);
                }
                let pre = s.get(bits::LC_PREWRITE);
                s.set(bits::LC_PREWRITE, !pre);
            }
        }
        0x00
    }
}
