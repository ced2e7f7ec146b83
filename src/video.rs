//! ビデオレンダラ
//!
//! ゲストのビデオRAMを走査して320x240のインデックスカラー
//! フレームバッファを生成する。テキスト/Lo-Res/Hi-Res/DHGRの各モードと
//! VBLタイマー、パレット（カラー4種+モノクロ2種）を持つ。
//! 走査出力側はrgb_paletteを通してフレームバッファを表示する。
//! インデックス0-15が通常色、16-31がアーティファクト用の減光色。

use crate::bank::Bank;
use crate::switches::{bits, SoftSwitches};
use crate::timer::TimerId;

/// フレームバッファの寸法
pub const VIDEO_WIDTH: usize = 320;
pub const VIDEO_HEIGHT: usize = 240;
/// 上下の黒ボーダー
pub const TOP_BORDER: usize = 24;

// VBLタイミング
// https://rich12345.tripod.com/aiivideo/vbl.html
pub const VBL_DOWN_CYCLES: i64 = 12_480;
pub const VBL_UP_CYCLES: i64 = 4_550;
pub const CYCLES_PER_FRAME: i64 = VBL_DOWN_CYCLES + VBL_UP_CYCLES;
const CYCLES_PER_LINE: i64 = 65;

/// mixedモードでテキストに切り替わるライン
const MIXED_LINE: usize = 160;
/// 点滅テキストの周期ビット
const FLASH_FRAME_MASK: u32 = 0x10;

// パレット内のカラーインデックス（CI順）
const CI_BLACK: usize = 0;
const CI_PURPLE: usize = 1;
const CI_GREEN: usize = 2;
const CI_BLUE: usize = 3;
const CI_ORANGE: usize = 4;
const CI_WHITE: usize = 5;
const CI_MAGENTA: usize = 6;
const CI_DARKBLUE: usize = 7;
const CI_DARKGREEN: usize = 8;
const CI_GRAY1: usize = 9;
const CI_GRAY2: usize = 10;
const CI_LIGHTBLUE: usize = 11;
const CI_BROWN: usize = 12;
const CI_PINK: usize = 13;
const CI_YELLOW: usize = 14;
const CI_AQUA: usize = 15;

/// CIインデックス → ハードウェアパレット（Apple II Lo-Res順）
const CI_TO_HW: [u8; 16] = [
    0,  // black
    3,  // purple
    12, // green
    6,  // blue
    9,  // orange
    15, // white
    1,  // magenta
    2,  // dark blue
    4,  // dark green
    5,  // gray1
    10, // gray2
    7,  // light blue
    8,  // brown
    11, // pink
    13, // yellow
    14, // aqua
];

/// Lo-Res 2バンク分のCLUT（CIインデックス）
const BASE_LORES: [[u8; 16]; 2] = [
    [
        CI_BLACK as u8, CI_MAGENTA as u8, CI_DARKBLUE as u8, CI_PURPLE as u8,
        CI_DARKGREEN as u8, CI_GRAY1 as u8, CI_BLUE as u8, CI_LIGHTBLUE as u8,
        CI_BROWN as u8, CI_ORANGE as u8, CI_GRAY2 as u8, CI_PINK as u8,
        CI_GREEN as u8, CI_YELLOW as u8, CI_AQUA as u8, CI_WHITE as u8,
    ],
    [
        CI_BLACK as u8, CI_DARKBLUE as u8, CI_DARKGREEN as u8, CI_BLUE as u8,
        CI_BROWN as u8, CI_GRAY2 as u8, CI_GREEN as u8, CI_AQUA as u8,
        CI_MAGENTA as u8, CI_PURPLE as u8, CI_GRAY1 as u8, CI_LIGHTBLUE as u8,
        CI_ORANGE as u8, CI_PINK as u8, CI_YELLOW as u8, CI_WHITE as u8,
    ],
];

/// DHGR 16色CLUT（CIインデックス）
const BASE_DHIRES: [u8; 16] = [
    CI_BLACK as u8, CI_MAGENTA as u8, CI_BROWN as u8, CI_ORANGE as u8,
    CI_DARKGREEN as u8, CI_GRAY1 as u8, CI_GREEN as u8, CI_YELLOW as u8,
    CI_DARKBLUE as u8, CI_PURPLE as u8, CI_GRAY2 as u8, CI_PINK as u8,
    CI_BLUE as u8, CI_LIGHTBLUE as u8, CI_AQUA as u8, CI_WHITE as u8,
];

/// Hi-ResアーティファクトのCLUT（CIインデックス）
const BASE_HIRES: [u8; 10] = [
    CI_BLACK as u8, CI_PURPLE as u8, CI_GREEN as u8, CI_GREEN as u8, CI_PURPLE as u8,
    CI_BLUE as u8, CI_ORANGE as u8, CI_ORANGE as u8, CI_BLUE as u8, CI_WHITE as u8,
];

struct Palette {
    name: &'static str,
    /// 非ゼロならモノクロパレット（この色相に輝度マップする）
    mono_color: u32,
    colors: [u32; 16],
}

/// RGB値はCI順。色は定番の実測値から
/// (comp.sys.apple2 / mrob.com のApple II RGB表)
const PALETTES: [Palette; 6] = [
    Palette {
        name: "Color NTSC",
        mono_color: 0,
        colors: [
            0x000000, 0xFF44FD, 0x14F53C, 0x14CFFD, 0xFF6A3C, 0xFFFFFF, 0xE31E60,
            0x604EBD, 0x00A360, 0x9C9C9C, 0x9C9C9C, 0xD0C3FF, 0x607203, 0xFFA0D0,
            0xD0DD8D, 0x72FFD0,
        ],
    },
    Palette {
        name: "NTSC 2",
        mono_color: 0,
        colors: [
            0x000000, 0xD643FF, 0x3CCC00, 0x3692FF, 0xD87300, 0xF1F1F1, 0x9F1B48,
            0x4832EB, 0x197544, 0x818181, 0x818181, 0xB89EFF, 0x496500, 0xFB8FBC,
            0xBCD600, 0x6CE6B8,
        ],
    },
    Palette {
        name: "Color Mega2",
        mono_color: 0,
        colors: [
            0x000000, 0xDC43E1, 0x40DE00, 0x393DFF, 0xFA7700, 0xFFFFFF, 0xDB1F42,
            0x0C11A4, 0x1C8231, 0x636363, 0xB3B3B3, 0x7AB3FF, 0x916400, 0xFBA593,
            0xFEFE00, 0x67FCA3,
        ],
    },
    Palette {
        name: "RGB",
        mono_color: 0,
        colors: [
            0x000000, 0xDD22DD, 0x11DD00, 0x2222FF, 0xFF6600, 0xFFFFFF, 0xDD0033,
            0x000099, 0x007722, 0x555555, 0xAAAAAA, 0x66AAFF, 0x885500, 0xFF9988,
            0xFFFF00, 0x44FF99,
        ],
    },
    Palette {
        name: "Green",
        mono_color: 0x14F53C,
        colors: [0; 16],
    },
    Palette {
        name: "Amber",
        mono_color: 0xFDCF14,
        colors: [0; 16],
    },
];

/// VBLのフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VblPhase {
    Visible,
    Blanking,
}

/// ビデオ状態
pub struct Video {
    /// 320x240のインデックスカラーフレームバッファ
    pub framebuffer: Vec<u8>,
    pub frame_count: u32,
    pub vbl_phase: VblPhase,
    /// 何かが書き込まれて再描画が必要
    pub frame_dirty: bool,
    /// 選択中のパレット番号
    pub color_mode: u8,
    /// DHIRES/AN3の2ビットレジスタ
    pub an3_mode: u8,
    pub monochrome: bool,
    /// 走査出力用のRGBパレット: [0..16]=通常、[16..32]=減光
    pub rgb_palette: [u32; 32],
    /// 文字ROM（4KBまたは8KB。8KBは国際文字セットの第2バンク付き）
    char_rom: Vec<u8>,
    /// 第2バンク選択
    pub rom_bank: u8,
    /// VBLタイマーのid（apple2が登録する）
    pub timer_id: TimerId,
    /// 現在のタイマー周期（vapor読み取りに使う）
    pub timer_max: i64,
}

impl Default for Video {
    fn default() -> Self {
        Self::new()
    }
}

impl Video {
    pub fn new() -> Self {
        let mut v = Video {
            framebuffer: vec![0; VIDEO_WIDTH * VIDEO_HEIGHT],
            frame_count: 0,
            vbl_phase: VblPhase::Visible,
            frame_dirty: true,
            color_mode: 0,
            an3_mode: 1,
            monochrome: false,
            rgb_palette: [0; 32],
            char_rom: Vec::new(),
            rom_bank: 0,
            timer_id: 0,
            timer_max: VBL_DOWN_CYCLES,
        };
        v.set_mode(0);
        v
    }

    /// 文字ROMをロードする（4KB、国際版は8KB）
    pub fn set_char_rom(&mut self, data: Vec<u8>) {
        log::info!("video: character rom {} bytes", data.len());
        self.char_rom = data;
        self.frame_dirty = true;
    }

    pub fn has_char_rom(&self) -> bool {
        !self.char_rom.is_empty()
    }

    //--------------------------------------------------
    // パレット
    //--------------------------------------------------

    /// パレットを切り替え、rgb_paletteを再計算する。
    /// 減光版（16..32）はアーティファクト境界のピクセルに使う。
    pub fn set_mode(&mut self, mode: u8) {
        let mode = if (mode as usize) >= PALETTES.len() { 0 } else { mode };
        self.color_mode = mode;
        let pal = &PALETTES[mode as usize];
        let base = pal.mono_color;
        self.monochrome = base != 0;

        let mut normal = [0u32; 16];
        if self.monochrome {
            // カラーパレット0の各色を輝度にしてベース色相へ射影する
            let src = &PALETTES[0];
            for ci in 0..16 {
                normal[ci] = lumed_color(src.colors[ci], base);
            }
            // 減光版はベースの明度を半分にしてから同じ射影
            let mut hsv = rgb_to_hsv(base);
            hsv.2 /= 2.0;
            let dim_base = hsv_to_rgb(hsv);
            for ci in 0..16 {
                let hw = CI_TO_HW[ci] as usize;
                self.rgb_palette[hw] = normal[ci];
                self.rgb_palette[hw + 16] = lumed_color(normal[ci], dim_base);
            }
        } else {
            for ci in 0..16 {
                normal[ci] = pal.colors[ci];
            }
            for ci in 0..16 {
                let hw = CI_TO_HW[ci] as usize;
                self.rgb_palette[hw] = normal[ci];
                // 彩度と明度を0.75倍した減光色
                let mut hsv = rgb_to_hsv(normal[ci]);
                hsv.1 *= 0.75;
                hsv.2 *= 0.75;
                self.rgb_palette[hw + 16] = hsv_to_rgb(hsv);
            }
        }
        log::info!("video: palette {} ({})", mode, pal.name);
        self.frame_dirty = true;
    }

    /// 次のパレットへ巡回
    pub fn cycle_palette(&mut self) {
        self.set_mode(self.color_mode + 1);
    }

    //--------------------------------------------------
    // VBLタイマー
    //--------------------------------------------------

    /// VBLタイマーのコールバック。戻り値は次のremaining。
    ///
    /// 可視期間の終わりでSWVBLのbit7をセットし、frame_countを進める。
    /// ブランキングの終わりでクリアする。
    pub fn vbl_tick(&mut self, sw: &mut SoftSwitches, speed: f32) -> i64 {
        match self.vbl_phase {
            VblPhase::Visible => {
                sw.set(bits::VBL, true);
                self.vbl_phase = VblPhase::Blanking;
                self.frame_count = self.frame_count.wrapping_add(1);
                self.timer_max = VBL_UP_CYCLES;
                (VBL_UP_CYCLES as f32 * speed) as i64
            }
            VblPhase::Blanking => {
                sw.set(bits::VBL, false);
                self.vbl_phase = VblPhase::Visible;
                self.timer_max = VBL_DOWN_CYCLES;
                (VBL_DOWN_CYCLES as f32 * speed) as i64
            }
        }
    }

    /// ディスクロード等の長時間処理のあとにVBLタイマーを再アーム
    /// するための初期状態を返す（apple2がtimer.setする）。
    pub fn reset_vbl(&mut self, sw: &mut SoftSwitches) -> i64 {
        self.vbl_phase = VblPhase::Visible;
        sw.set(bits::VBL, false);
        self.timer_max = VBL_DOWN_CYCLES;
        VBL_DOWN_CYCLES
    }

    /// 未定義ソフトスイッチの「蒸気」読み取り。
    /// ビーム位置（現在ライン+タイマー残量）から決定的に導出する。
    pub fn vapor_peek(&self, sw: SoftSwitches, main: &mut Bank, remaining: i64) -> u8 {
        let elapsed = (self.timer_max - remaining).max(0);
        let line = match self.vbl_phase {
            VblPhase::Visible => ((elapsed / CYCLES_PER_LINE) as usize).min(191),
            VblPhase::Blanking => 191,
        };
        let base = text_base(sw);
        let a = text_line_addr(base, line >> 3);
        let col = ((elapsed % CYCLES_PER_LINE) - 25).clamp(0, 39) as u16;
        main.peek(a + col)
    }

    /// DHIRES ($C05E/F) アクセス。AN3のオフ→オン遷移で80COLビットを
    /// 2ビットレジスタにシフトインする。
    pub fn dhires_access(&mut self, sw: &mut SoftSwitches, on: bool) {
        let an3_was = sw.get(bits::AN3);
        if on && !an3_was {
            let bit = sw.get(bits::COL80) as u8;
            self.an3_mode = ((self.an3_mode << 1) | bit) & 3;
        }
        sw.set(bits::AN3, on);
        // $C05EがON、$C05FがOFF
        sw.set(bits::DHIRES, !on);
        self.frame_dirty = true;
    }

    //--------------------------------------------------
    // レンダリング
    //--------------------------------------------------

    /// フレーム全体を描画する。motor_stateは0=停止、1/2=ドライブ番号。
    pub fn render(
        &mut self,
        sw: SoftSwitches,
        main: &mut Bank,
        aux: &mut Bank,
        motor_state: u8,
    ) {
        // 上下24ピクセルのボーダーをクリア
        self.framebuffer[..VIDEO_WIDTH * TOP_BORDER].fill(0);
        let bottom = VIDEO_WIDTH * (VIDEO_HEIGHT - TOP_BORDER);
        self.framebuffer[bottom..].fill(0);

        let text = sw.text();
        let hires = sw.hires();
        let mixed = sw.mixed();

        if text {
            self.render_text(sw, main, aux, 0..24);
        } else if hires {
            // an3_mode: 1=DHGRカラー、2=DHGRモノクロ
            let is_dhgr = sw.dhires() && (sw.col80() || (1..=2).contains(&self.an3_mode));
            if is_dhgr {
                self.render_dhires(sw, main, aux);
            } else {
                self.render_hires(sw, main);
            }
            if mixed {
                self.render_text(sw, main, aux, 20..24);
            }
        } else {
            self.render_lores(sw, main);
            if mixed {
                self.render_text(sw, main, aux, 20..24);
            }
        }

        if motor_state > 0 {
            self.draw_floppy_indicator(motor_state);
        }
        self.frame_dirty = false;
    }

    /// テキストモード（40/80桁）。rowsで描画する行範囲を指定する
    /// （mixedモードは20..24だけ上書きする）。
    fn render_text(
        &mut self,
        sw: SoftSwitches,
        main: &mut Bank,
        aux: &mut Bank,
        rows: std::ops::Range<usize>,
    ) {
        if self.char_rom.is_empty() {
            return;
        }
        let base = text_base(sw);
        let col80 = sw.col80();
        let altset = sw.altcharset();
        let flash: i32 = if self.frame_count & FLASH_FRAME_MASK != 0 {
            -0x40
        } else {
            0x40
        };

        if let Some(v) = main.vram_mut() {
            v.pin_range(base, 0x400);
        }
        if let Some(v) = aux.vram_mut() {
            v.pin_range(base, if col80 { 0x400 } else { 0 });
        }

        // 第2バンク（国際文字セット）
        let rom_off = if self.char_rom.len() > 4096 && self.rom_bank != 0 {
            4096
        } else {
            0
        };

        let mut main_row = [0u8; 40];
        let mut aux_row = [0u8; 40];
        for row in rows {
            let line_addr = text_line_addr(base, row);
            main.read(line_addr, &mut main_row);
            if col80 {
                aux.read(line_addr, &mut aux_row);
            }
            let cols = if col80 { 80 } else { 40 };
            for x in 0..cols {
                let mut c = if !col80 {
                    main_row[x]
                } else if x & 1 != 0 {
                    main_row[x >> 1]
                } else {
                    aux_row[x >> 1]
                };
                // 点滅文字（altcharset無効時の$40-$7F）
                if !altset && (0x40..=0x7F).contains(&c) {
                    c = (c as i32 + flash) as u8;
                }
                let glyph = &self.char_rom[rom_off + ((c as usize) << 3)..];
                if !col80 {
                    // 7ピクセル + 1パディングの8ピクセル幅
                    let fb_x = x * 8;
                    for cy in 0..8 {
                        let bits = glyph[cy];
                        let fb_o = (TOP_BORDER + row * 8 + cy) * VIDEO_WIDTH + fb_x;
                        let fb = &mut self.framebuffer[fb_o..fb_o + 8];
                        for px in 0..7 {
                            // ビデオROMのビットは1=背景
                            fb[px] = if bits & (1 << px) != 0 { 0 } else { 15 };
                        }
                        fb[7] = 0;
                    }
                } else {
                    // 80桁は隣接2ビットのORで4ピクセルに圧縮
                    let fb_x = x * 4;
                    for cy in 0..8 {
                        let bits = glyph[cy];
                        let fb_o = (TOP_BORDER + row * 8 + cy) * VIDEO_WIDTH + fb_x;
                        let fb = &mut self.framebuffer[fb_o..fb_o + 4];
                        for px in 0..4 {
                            let b0 = px * 2;
                            let on = ((bits >> b0) & 1) | ((bits >> (b0 + 1).min(7)) & 1);
                            fb[px] = if on != 0 { 0 } else { 15 };
                        }
                    }
                }
            }
        }
    }

    /// Lo-Res。1バイトが上下2個の4ビットカラーを持ち、
    /// 1ブロックは8x5ピクセル（40x48ブロック = 320x240）。
    fn render_lores(&mut self, sw: SoftSwitches, main: &mut Bank) {
        let base = text_base(sw);
        if let Some(v) = main.vram_mut() {
            v.pin_range(base, 0x400);
        }
        let mut row_buf = [0u8; 40];
        for lores_row in 0..48usize {
            let mem_row = lores_row / 2;
            let bottom_half = lores_row & 1 != 0;
            let line_addr = text_line_addr(base, mem_row);
            main.read(line_addr, &mut row_buf);
            let fb_y = lores_row * 5;
            let mut last = 0xFFu8;
            for col in 0..40usize {
                let byte = row_buf[col];
                let nibble = if bottom_half { byte >> 4 } else { byte } & 0x0F;
                let hw = CI_TO_HW[BASE_LORES[0][nibble as usize] as usize];
                // ブロック境界の1ピクセルだけ減光色（CRTのにじみ）
                let edge = if hw != last && hw != 0 { hw + 16 } else { hw };
                last = hw;
                for dy in 0..5 {
                    let y = fb_y + dy;
                    if y >= VIDEO_HEIGHT {
                        break;
                    }
                    let fb_o = y * VIDEO_WIDTH + col * 8;
                    let fb = &mut self.framebuffer[fb_o..fb_o + 8];
                    fb[0] = edge;
                    for px in 1..8 {
                        fb[px] = hw;
                    }
                }
            }
        }
    }

    /// Hi-Res。280ピクセルを320バッファの中央に1:1で描く。
    /// 隣接3バイトを11ビット窓に詰めてアーティファクト色を決める。
    fn render_hires(&mut self, sw: SoftSwitches, main: &mut Bank) {
        let base = hires_base(sw);
        if let Some(v) = main.vram_mut() {
            v.pin_range(base, 0x2000);
        }
        let x_off = (VIDEO_WIDTH - 280) / 2;
        let mono = self.monochrome;

        let mut line_buf = [0u8; 40];
        for line in 0..192usize {
            let line_addr = hires_line_addr(base, line);
            main.read(line_addr, &mut line_buf);
            let fb_y = TOP_BORDER + line;
            let row_o = fb_y * VIDEO_WIDTH;
            self.framebuffer[row_o..row_o + VIDEO_WIDTH].fill(0);

            let mut b0: u8 = 0;
            let mut b1: u8 = line_buf[0];
            let mut last_hw = 0u8;
            for col in 0..40usize {
                let b2: u8 = if col == 39 { 0 } else { line_buf[col + 1] };
                // 前2ピクセル + 現7ピクセル + 次2ピクセル
                let run: u16 = ((b0 as u16 & 0x60) >> 5)
                    | ((b1 as u16 & 0x7F) << 2)
                    | ((b2 as u16 & 0x03) << 9);
                let odd = ((col & 1) << 1) as usize;
                let offset = ((b1 & 0x80) >> 5) as usize;

                for i in 0..7usize {
                    let left = (run >> (1 + i)) & 1;
                    let pixel = (run >> (2 + i)) & 1;
                    let right = (run >> (3 + i)) & 1;
                    let x = x_off + col * 7 + i;
                    if mono {
                        self.framebuffer[row_o + x] = if pixel != 0 { 15 } else { 0 };
                        continue;
                    }
                    let mut idx = 0usize; // black
                    if pixel != 0 {
                        if left != 0 || right != 0 {
                            idx = 9; // white
                        } else {
                            idx = offset + odd + (i & 1) + 1;
                        }
                    } else if left != 0 && right != 0 {
                        idx = offset + odd + 1 - (i & 1) + 1;
                    }
                    let hw = CI_TO_HW[BASE_HIRES[idx] as usize];
                    // 色が切り替わるピクセルは減光色で描く
                    let out = if hw != last_hw && hw != 0 { hw + 16 } else { hw };
                    last_hw = hw;
                    self.framebuffer[row_o + x] = out;
                }
                b0 = b1;
                b1 = b2;
            }
        }
    }

    /// ダブルHi-Res。AUX/MAINの80バイトから71バイトのビットバッファを
    /// 組み立て、(x*7)/4のリサンプルで560→320に落とす。
    /// 左右2ピクセルのシフトが実機TFTで見えるアーティファクト縁を再現する。
    fn render_dhires(&mut self, sw: SoftSwitches, main: &mut Bank, aux: &mut Bank) {
        let base = hires_base(sw);
        if let Some(v) = main.vram_mut() {
            v.pin_range(base, 0x2000);
        }
        if let Some(v) = aux.vram_mut() {
            v.pin_range(base, 0x2000);
        }
        let color = self.an3_mode != 0 && !self.monochrome;

        let mut main_row = [0u8; 40];
        let mut aux_row = [0u8; 40];
        for line in 0..192usize {
            let line_addr = hires_line_addr(base, line);
            main.read(line_addr, &mut main_row);
            aux.read(line_addr, &mut aux_row);
            let row_o = (TOP_BORDER + line) * VIDEO_WIDTH;

            if !color {
                // モノクロ: AUX|MAINの14ビットをそのまま560ピクセルとみなす
                let mut last_col = usize::MAX;
                let mut ext = 0u32;
                for x in 0..VIDEO_WIDTH {
                    let src = (x * 7) / 4; // 0..559
                    let col = src / 14;
                    if col != last_col {
                        ext = (aux_row[col] as u32 & 0x7F)
                            | ((main_row[col] as u32 & 0x7F) << 7);
                        last_col = col;
                    }
                    let bit = (ext >> (src % 14)) & 1;
                    self.framebuffer[row_o + x] = if bit != 0 { 15 } else { 0 };
                }
            } else {
                // カラー: 各バイトの7ビットを反転順でビットバッファへ
                let mut bits = [0u8; 71];
                for x in 0..80usize {
                    let b = if x & 1 != 0 {
                        main_row[x / 2]
                    } else {
                        aux_row[x / 2]
                    };
                    for i in 0..7usize {
                        let out_index = 2 + x * 7 + i;
                        let out_byte = out_index / 8;
                        let out_bit = 7 - (out_index % 8);
                        bits[out_byte] |= ((b >> i) & 1) << out_bit;
                    }
                }
                for x in 0..VIDEO_WIDTH {
                    let i = (x * 7) / 4;
                    let d = 2 + i;
                    let pixel = (get_bit(&bits, i + 3) << (3 - ((d + 3) % 4)))
                        + (get_bit(&bits, i + 2) << (3 - ((d + 2) % 4)))
                        + (get_bit(&bits, i + 1) << (3 - ((d + 1) % 4)))
                        + (get_bit(&bits, i) << (3 - (d % 4)));
                    self.framebuffer[row_o + x] =
                        CI_TO_HW[BASE_DHIRES[pixel as usize & 0x0F] as usize];
                }
            }
        }
    }

    /// 下ボーダーに点滅するフロッピーアクセスインジケータを描く
    fn draw_floppy_indicator(&mut self, motor_state: u8) {
        // 8フレームごとに点滅
        if (self.frame_count / 8) % 2 == 0 {
            return;
        }
        const ICON: [u16; 10] = [
            0b0111111110,
            0b1001110001,
            0b1001110001,
            0b1001110001,
            0b1001110001,
            0b1000000001,
            0b1001111001,
            0b1001111001,
            0b1001111001,
            0b0111111110,
        ];
        // ドライブ1は緑、ドライブ2はオレンジ
        let color = if motor_state == 1 { 12u8 } else { 9u8 };
        let start_x = 300;
        let start_y = 222;
        for (y, row) in ICON.iter().enumerate() {
            for x in 0..10 {
                if row & (1 << (9 - x)) != 0 {
                    self.framebuffer[(start_y + y) * VIDEO_WIDTH + start_x + x] = color;
                }
            }
        }
    }
}

/// テキスト/Lo-Resページのベースアドレス
#[inline]
fn text_base(sw: SoftSwitches) -> u16 {
    0x0400 + 0x0400 * sw.effective_page2() as u16
}

/// Hi-Res/DHGRページのベースアドレス
#[inline]
fn hires_base(sw: SoftSwitches) -> u16 {
    0x2000 + 0x2000 * sw.effective_page2() as u16
}

/// Apple IIのインターリーブされたテキスト行アドレス
#[inline]
pub fn text_line_addr(base: u16, row: usize) -> u16 {
    base + ((row & 7) as u16) * 0x80 + ((row / 8) as u16) * 0x28
}

/// Hi-Resのライン先頭アドレス
#[inline]
pub fn hires_line_addr(base: u16, line: usize) -> u16 {
    base + (((line & 7) as u16) << 10)
        + ((((line >> 3) & 7) as u16) << 7)
        + ((line >> 6) as u16) * 40
}

/// ビットバッファからMSBファーストで1ビット取り出す
#[inline]
fn get_bit(buffer: &[u8], bit: usize) -> u8 {
    let in_byte = bit / 8;
    let in_bit = 7 - (bit % 8);
    (buffer[in_byte] >> in_bit) & 1
}

/// 相対輝度 (BT.709)
fn luma(rgb: u32) -> u8 {
    let r = (rgb >> 16) & 0xFF;
    let g = (rgb >> 8) & 0xFF;
    let b = rgb & 0xFF;
    (0.2126 * r as f64 + 0.7152 * g as f64 + 0.0722 * b as f64) as u8
}

/// rgbの輝度をbaseの色相に射影したモノクロ色を返す
fn lumed_color(rgb: u32, base: u32) -> u32 {
    let l = luma(rgb) as u32;
    if l == 0 {
        return 0;
    }
    let br = (base >> 16) & 0xFF;
    let bg = (base >> 8) & 0xFF;
    let bb = base & 0xFF;
    ((br * l / 255) << 16) | ((bg * l / 255) << 8) | (bb * l / 255)
}

/// RGB → (hue, sat, val)
fn rgb_to_hsv(rgb: u32) -> (f64, f64, f64) {
    let r = ((rgb >> 16) & 0xFF) as f64 / 255.0;
    let g = ((rgb >> 8) & 0xFF) as f64 / 255.0;
    let b = (rgb & 0xFF) as f64 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let v = max;
    if delta < 0.00001 || max <= 0.0 {
        return (0.0, 0.0, v);
    }
    let s = delta / max;
    let h = if r >= max {
        (g - b) / delta
    } else if g >= max {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };
    let mut h = h * 60.0;
    if h < 0.0 {
        h += 360.0;
    }
    (h, s, v)
}

/// (hue, sat, val) → RGB
fn hsv_to_rgb(hsv: (f64, f64, f64)) -> u32 {
    let (h, s, v) = hsv;
    let to_u32 = |r: f64, g: f64, b: f64| -> u32 {
        (((r * 255.0) as u32) << 16) | (((g * 255.0) as u32) << 8) | ((b * 255.0) as u32)
    };
    if s <= 0.0 {
        return to_u32(v, v, v);
    }
    let hh = if h >= 360.0 { 0.0 } else { h } / 60.0;
    let i = hh as i64;
    let ff = hh - i as f64;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * ff);
    let t = v * (1.0 - s * (1.0 - ff));
    match i {
        0 => to_u32(v, t, p),
        1 => to_u32(q, v, p),
        2 => to_u32(p, v, t),
        3 => to_u32(p, q, v),
        4 => to_u32(t, p, v),
        _ => to_u32(v, p, q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::Bank;

    fn test_banks() -> (Bank, Bank) {
        (Bank::raw("main", 0, 256), Bank::raw("aux", 0, 256))
    }

    /// 全コードが同じパターンになる合成文字ROM。
    /// ビデオROMのビットは1=背景なので、0xFEは左端だけが前景になる。
    fn synthetic_char_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 4096];
        for code in 0..256usize {
            for row in 0..8 {
                rom[code * 8 + row] = 0xFE;
            }
        }
        rom
    }

    #[test]
    fn vbl_phases_sum_to_frame() {
        assert_eq!(VBL_DOWN_CYCLES + VBL_UP_CYCLES, 17_030);
    }

    #[test]
    fn vbl_tick_toggles_switch_bit() {
        let mut v = Video::new();
        let mut sw = SoftSwitches::default();
        let next = v.vbl_tick(&mut sw, 1.0);
        assert!(sw.get(bits::VBL));
        assert_eq!(next, VBL_UP_CYCLES);
        assert_eq!(v.frame_count, 1);
        let next = v.vbl_tick(&mut sw, 1.0);
        assert!(!sw.get(bits::VBL));
        assert_eq!(next, VBL_DOWN_CYCLES);
    }

    #[test]
    fn text40_glyph_geometry() {
        let mut v = Video::new();
        v.set_char_rom(synthetic_char_rom());
        let (mut main, mut aux) = test_banks();
        // 行0の左上に1文字
        main.poke(0x0400, 0xA0);
        let sw = SoftSwitches::default();
        v.render(sw, &mut main, &mut aux, 0);
        // ビット0=0は前景（白）、ビット1-6=1は背景（黒）
        let row = TOP_BORDER * VIDEO_WIDTH;
        assert_eq!(v.framebuffer[row], 15);
        assert_eq!(v.framebuffer[row + 1], 0);
        assert_eq!(v.framebuffer[row + 6], 0);
        // 8ピクセル目はパディングの黒
        assert_eq!(v.framebuffer[row + 7], 0);
    }

    #[test]
    fn borders_stay_black() {
        let mut v = Video::new();
        v.set_char_rom(synthetic_char_rom());
        let (mut main, mut aux) = test_banks();
        let sw = SoftSwitches::default();
        v.render(sw, &mut main, &mut aux, 0);
        assert!(v.framebuffer[..VIDEO_WIDTH * TOP_BORDER].iter().all(|&p| p == 0));
        assert!(v.framebuffer[VIDEO_WIDTH * (VIDEO_HEIGHT - TOP_BORDER)..]
            .iter()
            .all(|&p| p == 0));
    }

    #[test]
    fn lores_block_is_8_by_5() {
        let mut v = Video::new();
        let (mut main, mut aux) = test_banks();
        // 左上ブロック: 下ニブル=白(15)、上ニブル=黒
        main.poke(0x0400, 0x0F);
        let mut sw = SoftSwitches::default();
        sw.set(bits::TEXT, false);
        v.render(sw, &mut main, &mut aux, 0);
        // 上半分ブロック（5ライン）が白
        for dy in 0..5 {
            assert_eq!(v.framebuffer[dy * VIDEO_WIDTH + 4], 15, "line {}", dy);
        }
        // 下半分ブロックは黒
        assert_eq!(v.framebuffer[5 * VIDEO_WIDTH + 4], 0);
    }

    #[test]
    fn hires_white_run_and_centering() {
        let mut v = Video::new();
        let (mut main, mut aux) = test_banks();
        // ライン0の先頭2バイト: 隣接ビットで白になるパターン
        main.poke(0x2000, 0x7F);
        main.poke(0x2001, 0x00);
        let mut sw = SoftSwitches::default();
        sw.set(bits::TEXT, false);
        sw.set(bits::HIRES, true);
        v.render(sw, &mut main, &mut aux, 0);
        let row = TOP_BORDER * VIDEO_WIDTH;
        // 280ピクセルは20ピクセルオフセットで中央寄せ
        assert_eq!(v.framebuffer[row + 19], 0);
        // 隣接ビットが立っているので白（先頭ピクセルは遷移で減光白=31）
        let px = v.framebuffer[row + 21];
        assert!(px == 15 || px == 31, "got {}", px);
    }

    #[test]
    fn dhgr_left_shift_is_two_pixels() {
        let mut v = Video::new();
        let (mut main, mut aux) = test_banks();
        let mut sw = SoftSwitches::default();
        sw.set(bits::TEXT, false);
        sw.set(bits::HIRES, true);
        sw.set(bits::DHIRES, true);
        sw.set(bits::COL80, true);
        v.an3_mode = 1;
        // AUXの最下位ビット=左端ピクセル。全ビット立てる
        for i in 0..40 {
            aux.poke(0x2000 + i, 0x7F);
            main.poke(0x2000 + i, 0x7F);
        }
        v.render(sw, &mut main, &mut aux, 0);
        let row = TOP_BORDER * VIDEO_WIDTH;
        // 全ビット1なら白(15)
        assert_eq!(v.framebuffer[row + 10], 15);
    }

    #[test]
    fn palette_wraps_and_monochrome_derives() {
        let mut v = Video::new();
        v.set_mode(4); // Green
        assert!(v.monochrome);
        // 白のエントリは緑の色相（緑成分が最大）
        let white = v.rgb_palette[15];
        let (r, g) = ((white >> 16) & 0xFF, (white >> 8) & 0xFF);
        assert!(g > r);
        assert!(g > 0xE0);
        // 範囲外は0に巻き戻し
        v.set_mode(6);
        assert_eq!(v.color_mode, 0);
        assert!(!v.monochrome);
    }

    #[test]
    fn dim_palette_is_darker() {
        let v = Video::new();
        for i in 1..16 {
            let n = v.rgb_palette[i];
            let d = v.rgb_palette[i + 16];
            let (_, _, nv) = rgb_to_hsv(n);
            let (_, _, dv) = rgb_to_hsv(d);
            assert!(dv <= nv, "entry {}", i);
        }
    }

    #[test]
    fn an3_register_shifts_in_col80() {
        let mut v = Video::new();
        let mut sw = SoftSwitches::default();
        sw.set(bits::COL80, true);
        v.an3_mode = 0;
        v.dhires_access(&mut sw, true); // off -> on: シフトイン
        assert_eq!(v.an3_mode, 1);
        v.dhires_access(&mut sw, false);
        v.dhires_access(&mut sw, true);
        assert_eq!(v.an3_mode, 3);
    }
}
