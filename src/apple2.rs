//! Apple IIeエミュレータ本体
//!
//! CPU・メモリ・ビデオ・オーディオ・ディスクを束ね、バスの
//! ディスパッチとフレームループを受け持つ。CPUから見えるバスは
//! MemoryBusの実装で、$C0xxページとカードROMページをここで振り分ける。

use std::path::Path;

use crate::audio::AudioMixer;
use crate::bank::BankHook;
use crate::config::Config;
use crate::cpu::{Cpu, MemoryBus, Registers};
use crate::disk2::Disk2Card;
use crate::loader;
use crate::memory::{Memory, DISK2_SLOT, SMARTPORT_SLOT};
use crate::rom::RomRegistry;
use crate::smartport::SmartPortCard;
use crate::switches::{bits, sw};
use crate::timer::{TimerId, TimerKind, TimerWheel};
use crate::video::Video;

/// 1フレームのCPUサイクル数（NTSC 60Hz）
pub const CYCLES_PER_FRAME: u64 = 17_030;

/// ディスクメニューを開く予約キーコード
pub const KEY_DISK_MENU: u8 = 0xFB;

/// トラップテーブルのディスパッチ先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// ProDOSブロックデバイス入口
    SmartPortHd,
    /// SmartPort入口
    SmartPortSm,
}

/// エミュレータ本体
pub struct Apple2 {
    pub cpu: Cpu,
    pub memory: Memory,
    pub video: Video,
    pub audio: AudioMixer,
    pub disk2: Disk2Card,
    pub smartport: SmartPortCard,
    pub roms: RomRegistry,
    pub timers: TimerWheel,
    /// バスから見える累積サイクル（クリックのタイムスタンプ等）
    pub total_cycles: u64,
    pub frame_count: u64,
    pub running: bool,
    trap_table: [Option<TrapKind>; 256],
    next_trap: u8,
    vbl_timer: TimerId,
    motor_timer: TimerId,
    /// タイマー発火の作業バッファ
    due: Vec<TimerId>,
}

impl MemoryBus for Apple2 {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0xC000..=0xC0FF => self.io_access(address, 0, false),
            0xC100..=0xC7FF => self.card_page_read(address),
            0xC800..=0xCFFF => self.memory.rom.peek(address),
            0xD000..=0xFFFF => self.memory.read_high(address),
            _ => self.memory.read_ram(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0xC000..=0xC0FF => {
                self.io_access(address, value, true);
            }
            0xC100..=0xCFFF => {} // カードROMへの書き込みは無視
            0xD000..=0xFFFF => self.memory.write_high(address, value),
            _ => self.memory.write_ram(address, value),
        }
    }

    fn trap(&mut self, code: u8, regs: &mut Registers) -> bool {
        let Some(kind) = self.trap_table[code as usize] else {
            return false;
        };
        // カードを取り出してからバス（self）を渡す
        let mut card = std::mem::take(&mut self.smartport);
        let oob = match kind {
            TrapKind::SmartPortHd => card.hd_trap(self, regs),
            TrapKind::SmartPortSm => card.sm_trap(self, regs),
        };
        self.smartport = card;
        if let Some((addr, len)) = oob {
            self.oob_write_check(addr, len);
        }
        true
    }
}

impl Apple2 {
    pub fn new(config: &Config) -> Result<Apple2, String> {
        let swap_dir = std::env::temp_dir();
        let memory = Memory::new(config.psram_enabled, &swap_dir)?;
        let mut video = Video::new();
        video.set_mode(config.palette_index);
        video.rom_bank = config.video_rom_bank;

        let mut emu = Apple2 {
            cpu: Cpu::new(),
            memory,
            video,
            audio: AudioMixer::new(config.sample_rate_hz),
            disk2: Disk2Card::new(),
            smartport: SmartPortCard::new(SMARTPORT_SLOT),
            roms: RomRegistry::new(),
            timers: TimerWheel::new(),
            total_cycles: 0,
            frame_count: 0,
            running: true,
            trap_table: [None; 256],
            next_trap: 1,
            vbl_timer: 0,
            motor_timer: 0,
            due: Vec::with_capacity(4),
        };

        // タイマーは登録順 = 発火順
        emu.vbl_timer = emu
            .timers
            .register(TimerKind::Vbl, crate::video::VBL_DOWN_CYCLES, "vbl_timer");
        emu.motor_timer = emu.timers.register(TimerKind::MotorOff, 0, "motor_off");
        emu.video.timer_id = emu.vbl_timer;

        // SmartPortカード: トラップを確保してROMをパッチ
        let trap_hd = emu.register_trap(TrapKind::SmartPortHd);
        let trap_sm = emu.register_trap(TrapKind::SmartPortSm);
        let sp_rom = emu.smartport.rom_with_traps(trap_hd, trap_sm);
        emu.memory.card_rom.load(0xC700, &sp_rom);
        emu.roms
            .register("card", "smartport", "SmartPort card ROM", sp_rom.to_vec());

        Ok(emu)
    }

    /// トラップ番号を確保する
    fn register_trap(&mut self, kind: TrapKind) -> u8 {
        let id = self.next_trap;
        self.next_trap = self.next_trap.wrapping_add(1);
        self.trap_table[id as usize] = Some(kind);
        log::debug!("trap {:02x} -> {:?}", id, kind);
        id
    }

    /// メインROM（16KB）をロードする。オフセット$0600にDisk IIの
    /// P5ブートROMが埋まっていればカードにも渡す。
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), String> {
        self.memory.load_rom(data)?;
        self.roms
            .register("main", "iiee", "Apple IIe Enhanced ROM", data.to_vec());
        if data.len() >= 0x0700 && data[0x0600] == 0xA2 && data[0x0601] == 0x20 {
            self.disk2.set_boot_rom(&data[0x0600..0x0700]);
            log::info!("apple2: disk2 boot rom extracted from main rom");
        }
        Ok(())
    }

    /// 文字ROM（4KB/8KB）をロードする
    pub fn load_char_rom(&mut self, data: &[u8]) {
        self.roms
            .register("video", "iiee_video", "Apple IIe Video ROM", data.to_vec());
        self.video.set_char_rom(data.to_vec());
    }

    /// 外部のDisk II P5ブートROM（256バイト）をロードする
    pub fn load_disk_rom(&mut self, data: &[u8]) -> Result<(), &'static str> {
        if data.len() != 256 {
            return Err("Disk II ROM must be 256 bytes");
        }
        if data[0] != 0xA2 || data[1] != 0x20 {
            return Err("Invalid Disk II ROM (should start with A2 20)");
        }
        self.roms
            .register("card", "disk2", "Disk II P5 boot ROM", data.to_vec());
        self.disk2.set_boot_rom(data);
        Ok(())
    }

    //--------------------------------------------------
    // バスディスパッチ
    //--------------------------------------------------

    /// カードROMページ（$C100-$C7FF）の読み取り
    fn card_page_read(&mut self, addr: u16) -> u8 {
        match self.memory.card_rom.hook_for(addr) {
            Some(BankHook::Card(DISK2_SLOT)) => self.disk2.read_rom((addr & 0xFF) as u8),
            Some(BankHook::Card(SMARTPORT_SLOT)) => self.memory.card_rom.peek(addr),
            _ => self.memory.rom.peek(addr),
        }
    }

    /// ビーム位置由来の「蒸気」読み取り
    fn vapor(&mut self) -> u8 {
        let remaining = self.timers.get(self.vbl_timer);
        self.video
            .vapor_peek(self.memory.switches, &mut self.memory.main, remaining)
    }

    /// $C000-$C0FFのアクセス。ビデオ・オーディオ・ディスクに
    /// 関係するスイッチはここで横取りし、残りはメモリに委ねる。
    fn io_access(&mut self, addr: u16, value: u8, write: bool) -> u8 {
        match addr {
            // 80COL: 読み書きどちらのアクセスでもトグル
            // （BITでオンにするゲストがいる）
            sw::COL80OFF | sw::COL80ON => {
                self.memory.switches.set(bits::COL80, addr & 1 != 0);
                self.video.frame_dirty = true;
                if write {
                    0
                } else {
                    self.vapor()
                }
            }
            // ALTCHARSET: 読み書きどちらでもトグル、点滅テキスト再描画
            sw::ALTCHARSETOFF | sw::ALTCHARSETON => {
                self.memory.switches.set(bits::ALTCHARSET, addr & 1 != 0);
                self.video.frame_dirty = true;
                if write {
                    0
                } else {
                    self.vapor()
                }
            }
            // スピーカー
            0xC030..=0xC03F => {
                self.audio.click(self.total_cycles);
                if write {
                    0
                } else {
                    self.vapor()
                }
            }
            // ビデオモードスイッチは切り替え後に蒸気を返す
            sw::TEXTOFF..=sw::HIRESON => {
                if write {
                    self.memory.write_soft_switch(addr, value);
                    0
                } else {
                    self.memory.read_soft_switch(addr);
                    self.vapor()
                }
            }
            // DHIRES / AN3
            0xC05E | 0xC05F => {
                if self.memory.switches.get(bits::IOUDIS) {
                    let on = addr & 1 != 0; // $C05FがAN3オン
                    self.video.dhires_access(&mut self.memory.switches, on);
                }
                if write {
                    0
                } else {
                    self.vapor()
                }
            }
            // パドル系はアクセス時刻が要る
            0xC060..=0xC07F => {
                self.memory.paddle_read_cycle = self.total_cycles;
                if write {
                    self.memory.write_soft_switch(addr, value);
                    0
                } else {
                    self.memory.read_soft_switch(addr)
                }
            }
            // Disk II IO（スロット6）
            0xC0E0..=0xC0EF => {
                let v = self.disk2.io_access(
                    addr,
                    value,
                    write,
                    self.total_cycles,
                    &mut self.timers,
                    self.motor_timer,
                );
                // ヘッドのステップでトラックをストレージから読み直した
                // 場合、溜まった負のremainingでVBLが止まらないよう
                // タイマーを立て直す
                if self.disk2.take_track_reload() {
                    let next = self.video.reset_vbl(&mut self.memory.switches);
                    self.timers.set(self.vbl_timer, next);
                }
                if write {
                    0
                } else {
                    v
                }
            }
            _ => {
                if write {
                    self.memory.write_soft_switch(addr, value);
                    0
                } else {
                    self.memory.read_soft_switch(addr)
                }
            }
        }
    }

    /// CPU以外（カードのDMA）の書き込みをビデオに知らせる
    pub fn oob_write_check(&mut self, _addr: u16, _len: u16) {
        self.video.frame_dirty = true;
    }

    //--------------------------------------------------
    // 実行
    //--------------------------------------------------

    /// 指定サイクル数だけCPUを実行し、タイマーを駆動する。
    /// タイマーコールバックによる先取りで早めに戻ることがある。
    pub fn run_cycles(&mut self, n: u64) {
        let target = self.total_cycles + n;
        self.cpu.instruction_run = u32::MAX;
        while self.running && self.total_cycles < target {
            let mut cpu = std::mem::take(&mut self.cpu);
            let cycles = cpu.step(self);
            self.cpu = cpu;
            self.total_cycles += cycles as u64;
            self.run_timers(cycles as u64);
            if self.cpu.instruction_run == 0 {
                break;
            }
        }
    }

    /// 満了したタイマーを登録順に発火させる
    fn run_timers(&mut self, cycles: u64) {
        let mut due = std::mem::take(&mut self.due);
        due.clear();
        self.timers.advance(cycles, &mut due);
        for &id in due.iter() {
            match self.timers.kind(id) {
                Some(TimerKind::Vbl) => {
                    let next = self
                        .video
                        .vbl_tick(&mut self.memory.switches, self.cpu.speed);
                    self.timers.rearm(id, next);
                }
                Some(TimerKind::MotorOff) => {
                    self.disk2.motor_expired();
                    self.timers.rearm(id, 0);
                }
                None => {}
            }
        }
        self.due = due;
    }

    /// 1フレームぶん実行して画面を描画する
    pub fn run_frame(&mut self) {
        self.run_cycles(CYCLES_PER_FRAME);
        self.frame_count += 1;
        let motor = self.disk2.motor_state();
        self.video.render(
            self.memory.switches,
            &mut self.memory.main,
            &mut self.memory.aux,
            motor,
        );
    }

    /// リセット。coldならゲストRAMをゼロにする。
    pub fn reset(&mut self, cold: bool) {
        self.memory.switches = Default::default();
        self.memory.keyboard_strobe = 0;
        if cold {
            self.memory.clear_ram();
        }
        // 実機のPower-on状態: テキストページはスペースで埋まる
        for addr in 0x0400..=0x07FF {
            self.memory.main.poke(addr, 0xA0);
        }
        let next = self.video.reset_vbl(&mut self.memory.switches);
        self.timers.set(self.vbl_timer, next);
        self.audio.sync(self.total_cycles);

        let mut cpu = std::mem::take(&mut self.cpu);
        cpu.reset(self);
        self.cpu = cpu;
        self.total_cycles += 7;
        log::info!(
            "apple2: reset ({}), PC=${:04X}",
            if cold { "cold" } else { "warm" },
            self.cpu.regs.pc
        );
    }

    /// キー入力（Apple II ASCII 0x00-0x7F）
    pub fn keypress(&mut self, key: u8) {
        self.memory.set_key(key & 0x7F);
    }

    /// ディスクイメージをマウントする。マウント後はVBLタイマーを
    /// 再アームし、オーディオを再同期する（長いSDアクセス対策）。
    pub fn mount_disk(&mut self, drive: usize, path: &Path, preserve: bool) -> Result<(), String> {
        let res = loader::mount(&mut self.disk2, drive, path, preserve);
        // マウント中のトラックロード通知はここの再アームが兼ねる
        self.disk2.take_track_reload();
        let next = self.video.reset_vbl(&mut self.memory.switches);
        self.timers.set(self.vbl_timer, next);
        self.audio.sync(self.total_cycles);
        res
    }

    /// ドライブを空にする
    pub fn eject_disk(&mut self, drive: usize) {
        loader::eject(&mut self.disk2, drive);
    }

    /// ブロックデバイスをSmartPortユニットにマウントする
    pub fn mount_block_device(&mut self, unit: usize, path: &Path) -> Result<(), String> {
        self.smartport.mount(unit, path)
    }
}

/// テスト用ROMを生成する。
/// リセットで$F000に飛び、テキストページをクリアして行0に
/// 反転表示のバナーを書き、VBLをポーリングし続ける。
pub fn create_test_rom() -> Vec<u8> {
    let mut rom = vec![0xEAu8; 16384]; // $C000-$FFFF
    let program: &[u8] = &[
        0xAD, 0x51, 0xC0, // LDA $C051 (TEXT ON)
        0xAD, 0x54, 0xC0, // LDA $C054 (PAGE1)
        0xA9, 0xA0, // LDA #$A0
        0xA2, 0x00, // LDX #$00
        // $F00A: 画面クリア
        0x9D, 0x00, 0x04, // STA $0400,X
        0x9D, 0x00, 0x05, // STA $0500,X
        0x9D, 0x00, 0x06, // STA $0600,X
        0x9D, 0x00, 0x07, // STA $0700,X
        0xE8, // INX
        0xD0, 0xF1, // BNE $F00A
        // $F019: バナーを行0へ（反転表示）
        0xA2, 0x00, // LDX #$00
        // $F01B:
        0xBD, 0x30, 0xF0, // LDA $F030,X
        0x9D, 0x00, 0x04, // STA $0400,X
        0xE8, // INX
        0xE0, 0x09, // CPX #$09
        0xD0, 0xF5, // BNE $F01B
        // $F026: VBLポーリングループ
        0xAD, 0x19, 0xC0, // LDA $C019
        0x80, 0xFB, // BRA $F026
    ];
    let offset = 0x3000; // $F000 - $C000
    rom[offset..offset + program.len()].copy_from_slice(program);
    // $F030: "APPLE IIE" の反転表示コード
    let banner: [u8; 9] = [0x01, 0x10, 0x10, 0x0C, 0x05, 0x20, 0x09, 0x09, 0x05];
    rom[0x3030..0x3039].copy_from_slice(&banner);
    // リセットベクター -> $F000
    rom[0x3FFC] = 0x00;
    rom[0x3FFD] = 0xF0;
    // NMI/IRQベクターも$F026のループへ
    rom[0x3FFA] = 0x26;
    rom[0x3FFB] = 0xF0;
    rom[0x3FFE] = 0x26;
    rom[0x3FFF] = 0xF0;
    rom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emu_with_test_rom() -> Apple2 {
        let config = Config::default();
        let mut emu = Apple2::new(&config).unwrap();
        emu.load_rom(&create_test_rom()).unwrap();
        emu
    }

    #[test]
    fn cold_boot_writes_banner_and_counts_vbl() {
        let mut emu = emu_with_test_rom();
        emu.reset(true);
        emu.run_cycles(1_000_000);
        // 行0にバナーが反転表示で書かれている
        let expected: [u8; 9] = [0x01, 0x10, 0x10, 0x0C, 0x05, 0x20, 0x09, 0x09, 0x05];
        for (i, &b) in expected.iter().enumerate() {
            assert_eq!(emu.memory.main.peek(0x0400 + i as u16), b, "col {}", i);
        }
        // 残りはスペース
        assert_eq!(emu.memory.main.peek(0x0409), 0xA0);
        // VBLは 1_000_000 / 17_030 = 58回トグルしている
        assert_eq!(emu.video.frame_count, 58);
    }

    #[test]
    fn vbl_bit_duty_cycle() {
        let mut emu = emu_with_test_rom();
        emu.reset(true);
        // 数フレーム飛ばしてから1フレーム分サンプリングする
        emu.run_cycles(40_000);
        let mut high = 0u64;
        let mut ran = 0u64;
        while ran < 17_030 {
            let before = emu.total_cycles;
            emu.run_cycles(1); // 1命令ずつ
            let step = emu.total_cycles - before;
            if emu.memory.switches.get(bits::VBL) {
                high += step;
            }
            ran += step;
        }
        // 17030中4550サイクルがブランキング（命令粒度の丸めを許容）
        assert!((4_400..=4_700).contains(&high), "high={}", high);
    }

    #[test]
    fn keyboard_strobe_reaches_guest() {
        let mut emu = emu_with_test_rom();
        emu.reset(true);
        emu.keypress(0x41);
        let mut emu2 = emu;
        assert_eq!(MemoryBus::read(&mut emu2, 0xC000), 0xC1);
        MemoryBus::read(&mut emu2, 0xC010);
        assert_eq!(MemoryBus::read(&mut emu2, 0xC000), 0x41);
    }

    #[test]
    fn speaker_access_queues_click() {
        let mut emu = emu_with_test_rom();
        emu.reset(true);
        emu.total_cycles = 100_000;
        MemoryBus::read(&mut emu, 0xC030);
        emu.total_cycles = 200_000;
        MemoryBus::read(&mut emu, 0xC030);
        assert!(emu.audio.ready() > 0);
    }

    #[test]
    fn smartport_rom_visible_in_slot7() {
        let mut emu = emu_with_test_rom();
        // $C700はカードROMの先頭（LDX #$20）
        assert_eq!(MemoryBus::read(&mut emu, 0xC700), 0xA2);
        assert_eq!(MemoryBus::read(&mut emu, 0xC701), 0x20);
        // トラップ命令が$C7D1に埋まっている
        assert_eq!(MemoryBus::read(&mut emu, 0xC7D1), 0xFB);
        let hd_trap = MemoryBus::read(&mut emu, 0xC7D2);
        assert!(hd_trap != 0);
    }

    #[test]
    fn disk2_rom_hidden_until_boot_enabled() {
        let mut emu = emu_with_test_rom();
        let mut boot = vec![0u8; 256];
        boot[0] = 0xA2;
        boot[1] = 0x20;
        emu.load_disk_rom(&boot).unwrap();
        // ディスク未マウントではブートシグネチャ無効
        assert_eq!(MemoryBus::read(&mut emu, 0xC600), 0x00);
        emu.disk2.boot_enabled = true;
        assert_eq!(MemoryBus::read(&mut emu, 0xC600), 0xA2);
    }

    #[test]
    fn writes_outside_video_do_not_dirty_io() {
        let mut emu = emu_with_test_rom();
        emu.reset(true);
        MemoryBus::write(&mut emu, 0x3000, 0x42);
        assert_eq!(MemoryBus::read(&mut emu, 0x3000), 0x42);
        // ROM領域への書き込みは無視される
        MemoryBus::write(&mut emu, 0xF000, 0x00);
        assert_eq!(MemoryBus::read(&mut emu, 0xF000), 0xAD);
    }

    #[test]
    fn track_reload_rearms_vbl_timer() {
        use crate::video::{VblPhase, VBL_DOWN_CYCLES};

        let mut dsk = std::env::temp_dir();
        dsk.push(format!("a2emu_test_vblreload_{}.dsk", std::process::id()));
        std::fs::write(&dsk, vec![0u8; 143_360]).unwrap();

        let mut emu = emu_with_test_rom();
        emu.mount_disk(0, &dsk, false).unwrap();
        emu.reset(true);
        // ブランキング期間の途中まで実行する
        emu.run_cycles(12_600);
        assert_eq!(emu.video.vbl_phase, VblPhase::Blanking);
        assert!(emu.memory.switches.get(bits::VBL));

        // モーターを回し、相1→2でヘッドをトラック1へステップさせる。
        // トラックの読み直しがVBLタイマーを立て直す
        MemoryBus::read(&mut emu, 0xC0E9);
        MemoryBus::read(&mut emu, 0xC0E3);
        MemoryBus::read(&mut emu, 0xC0E2);
        MemoryBus::read(&mut emu, 0xC0E5);
        assert_eq!(emu.disk2.drives[0].curr_track, 1);
        assert_eq!(emu.video.vbl_phase, VblPhase::Visible);
        assert!(!emu.memory.switches.get(bits::VBL));
        assert_eq!(emu.video.timer_max, VBL_DOWN_CYCLES);

        let _ = std::fs::remove_file(&dsk);
        let mut b = dsk.into_os_string();
        b.push(".bdsk");
        let _ = std::fs::remove_file(std::path::PathBuf::from(b));
    }

    #[test]
    fn undefined_soft_switch_returns_deterministic_vapor() {
        let mut emu = emu_with_test_rom();
        emu.reset(true);
        let a = MemoryBus::read(&mut emu, 0xC050);
        let b = MemoryBus::read(&mut emu, 0xC050);
        // 同じビーム位置なら同じ値
        assert_eq!(a, b);
    }
}
