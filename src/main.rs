//! A2EMU - Apple IIe Emulator in Rust
//!
//! デスクトップフロントエンド。minifbのウィンドウにインデックス
//! フレームバッファをパレット経由で表示し、rodioでオーディオを流す。
//!
//! # 使用方法
//! ```text
//! a2emu --rom roms/iiee.rom -1 dos33.dsk
//! ```

use a2emu::apple2::{self, Apple2};
use a2emu::audio::AudioOutput;
use a2emu::config::Config;
use a2emu::loader::DiskLoader;
use a2emu::video::{VIDEO_HEIGHT, VIDEO_WIDTH};

use clap::Parser;
use minifb::{Key, KeyRepeat, Scale, Window, WindowOptions};
use std::path::{Path, PathBuf};

/// A2EMU - Apple IIe Emulator in Rust
#[derive(Parser, Debug)]
#[command(name = "a2emu")]
#[command(author = "A2EMU Project")]
#[command(version = "0.2.0")]
#[command(about = "A2EMU - Apple IIe Emulator in Rust", long_about = None)]
struct Args {
    /// ディスクイメージ（ドライブ1）
    #[arg(short = '1', long)]
    disk1: Option<PathBuf>,

    /// ディスクイメージ（ドライブ2）
    #[arg(short = '2', long)]
    disk2: Option<PathBuf>,

    /// SmartPortブロックイメージ（ユニット1）
    #[arg(long)]
    hd1: Option<PathBuf>,

    /// メインROMファイル（16KB）
    #[arg(short, long)]
    rom: Option<PathBuf>,

    /// 文字ROMファイル（4KB/8KB）
    #[arg(long)]
    char_rom: Option<PathBuf>,

    /// ヘッドレスモード（ウィンドウなしで実行して終了）
    #[arg(long)]
    headless: bool,

    /// 実行するサイクル数（ヘッドレスモード用）
    #[arg(long, default_value = "1000000")]
    cycles: u64,

    /// フレームペーシングを無効にする
    #[arg(long)]
    turbo: bool,

    /// パレット番号（0-5）
    #[arg(long)]
    palette: Option<u8>,

    /// サンプルレート (22050 / 44100)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// ディスクイメージのディレクトリ
    #[arg(long)]
    disk_dir: Option<PathBuf>,

    /// ページングRAMを小プール構成にする（PSRAM無しボード相当）
    #[arg(long)]
    no_psram: bool,
}

/// minifbのキー入力をApple II ASCIIに変換する
fn translate_key(key: Key, shift: bool, ctrl: bool) -> Option<u8> {
    let ch: u8 = match key {
        Key::A => b'A',
        Key::B => b'B',
        Key::C => b'C',
        Key::D => b'D',
        Key::E => b'E',
        Key::F => b'F',
        Key::G => b'G',
        Key::H => b'H',
        Key::I => b'I',
        Key::J => b'J',
        Key::K => b'K',
        Key::L => b'L',
        Key::M => b'M',
        Key::N => b'N',
        Key::O => b'O',
        Key::P => b'P',
        Key::Q => b'Q',
        Key::R => b'R',
        Key::S => b'S',
        Key::T => b'T',
        Key::U => b'U',
        Key::V => b'V',
        Key::W => b'W',
        Key::X => b'X',
        Key::Y => b'Y',
        Key::Z => b'Z',
        Key::Key0 => {
            if shift {
                b')'
            } else {
                b'0'
            }
        }
        Key::Key1 => {
            if shift {
                b'!'
            } else {
                b'1'
            }
        }
        Key::Key2 => {
            if shift {
                b'@'
            } else {
                b'2'
            }
        }
        Key::Key3 => {
            if shift {
                b'#'
            } else {
                b'3'
            }
        }
        Key::Key4 => {
            if shift {
                b'$'
            } else {
                b'4'
            }
        }
        Key::Key5 => {
            if shift {
                b'%'
            } else {
                b'5'
            }
        }
        Key::Key6 => {
            if shift {
                b'^'
            } else {
                b'6'
            }
        }
        Key::Key7 => {
            if shift {
                b'&'
            } else {
                b'7'
            }
        }
        Key::Key8 => {
            if shift {
                b'*'
            } else {
                b'8'
            }
        }
        Key::Key9 => {
            if shift {
                b'('
            } else {
                b'9'
            }
        }
        Key::Space => b' ',
        Key::Enter => 0x0D,
        Key::Escape => 0x1B,
        Key::Backspace | Key::Delete => 0x7F,
        Key::Tab => 0x09,
        Key::Left => 0x08,
        Key::Right => 0x15,
        Key::Up => 0x0B,
        Key::Down => 0x0A,
        Key::Minus => {
            if shift {
                b'_'
            } else {
                b'-'
            }
        }
        Key::Equal => {
            if shift {
                b'+'
            } else {
                b'='
            }
        }
        Key::Comma => {
            if shift {
                b'<'
            } else {
                b','
            }
        }
        Key::Period => {
            if shift {
                b'>'
            } else {
                b'.'
            }
        }
        Key::Slash => {
            if shift {
                b'?'
            } else {
                b'/'
            }
        }
        Key::Semicolon => {
            if shift {
                b':'
            } else {
                b';'
            }
        }
        Key::Apostrophe => {
            if shift {
                b'"'
            } else {
                b'\''
            }
        }
        Key::LeftBracket => b'[',
        Key::RightBracket => b']',
        Key::Backslash => b'\\',
        _ => return None,
    };
    if ctrl && ch.is_ascii_uppercase() {
        return Some(ch & 0x1F);
    }
    Some(ch)
}

/// テキストページをASCIIでダンプする（ヘッドレス用）
fn dump_text_screen(emu: &mut Apple2) {
    for row in 0..24usize {
        let addr = a2emu::video::text_line_addr(0x0400, row);
        let mut line = String::with_capacity(40);
        for col in 0..40u16 {
            let ch = emu.memory.main.peek(addr + col) & 0x7F;
            let ch = if ch < 0x20 { ch + 0x40 } else { ch };
            line.push(ch as char);
        }
        println!("|{}|", line);
    }
}

fn load_rom_file(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(data) => Some(data),
        Err(e) => {
            log::warn!("cannot read {}: {}", path.display(), e);
            None
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::load();
    if let Some(p) = args.palette {
        config.palette_index = p;
    }
    if let Some(r) = args.sample_rate {
        config.sample_rate_hz = r;
    }
    if let Some(d) = &args.disk_dir {
        config.disk_dir = d.display().to_string();
    }
    if args.no_psram {
        config.psram_enabled = false;
    }

    let mut emu = match Apple2::new(&config) {
        Ok(emu) => emu,
        Err(e) => {
            eprintln!("init failed: {}", e);
            std::process::exit(1);
        }
    };

    // ROMのロード。実ROMが無ければ内蔵のテストROMで起動する
    let rom_path = args
        .rom
        .clone()
        .unwrap_or_else(|| Path::new(&config.rom_dir).join("iiee.rom"));
    match load_rom_file(&rom_path) {
        Some(data) => {
            if let Err(e) = emu.load_rom(&data) {
                eprintln!("rom load failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            log::warn!("no main rom, using built-in test rom");
            let _ = emu.load_rom(&apple2::create_test_rom());
        }
    }
    let char_path = args
        .char_rom
        .clone()
        .unwrap_or_else(|| Path::new(&config.rom_dir).join("iiee_video.rom"));
    if let Some(data) = load_rom_file(&char_path) {
        emu.load_char_rom(&data);
    }

    // ディスクディレクトリを走査（一覧はログに出す）
    let mut disk_loader = DiskLoader::new(&config.disk_dir);
    disk_loader.scan();
    for (i, e) in disk_loader.entries.iter().enumerate() {
        log::info!("  [{}] {} ({} bytes)", i, e.filename, e.size);
    }

    // コマンドラインのイメージをマウント
    if let Some(path) = &args.disk1 {
        match emu.mount_disk(0, path, false) {
            Ok(()) => config.last_disk1 = Some(path.display().to_string()),
            Err(e) => eprintln!("drive 1 mount failed: {}", e),
        }
    }
    if let Some(path) = &args.disk2 {
        match emu.mount_disk(1, path, false) {
            Ok(()) => config.last_disk2 = Some(path.display().to_string()),
            Err(e) => eprintln!("drive 2 mount failed: {}", e),
        }
    }
    if let Some(path) = &args.hd1 {
        if let Err(e) = emu.mount_block_device(0, path) {
            eprintln!("hd mount failed: {}", e);
        }
    }
    let _ = config.save();

    emu.reset(true);

    if args.headless {
        emu.run_cycles(args.cycles);
        println!(
            "ran {} cycles, PC=${:04X}, {} frames",
            emu.total_cycles, emu.cpu.regs.pc, emu.video.frame_count
        );
        dump_text_screen(&mut emu);
        return;
    }

    let mut window = match Window::new(
        "A2EMU - Apple IIe",
        VIDEO_WIDTH,
        VIDEO_HEIGHT,
        WindowOptions {
            scale: Scale::X2,
            ..WindowOptions::default()
        },
    ) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("window: {}", e);
            std::process::exit(1);
        }
    };
    let mut turbo = args.turbo;
    window.set_target_fps(if turbo { 0 } else { 60 });

    let mut audio_out = match AudioOutput::new(config.sample_rate_hz) {
        Ok(a) => Some(a),
        Err(e) => {
            log::warn!("audio disabled: {}", e);
            None
        }
    };

    let mut rgb_buffer = vec![0u32; VIDEO_WIDTH * VIDEO_HEIGHT];
    let mut audio_buffer = vec![0i16; 2048];
    // ポーズ中はCPU/オーディオ/ビデオを止める。ゲスト側のタイマーは
    // サイクルが進まないので実時間に影響されない。
    let mut paused = false;

    while window.is_open() && !window.is_key_down(Key::F12) && emu.running {
        // キー入力
        let shift = window.is_key_down(Key::LeftShift) || window.is_key_down(Key::RightShift);
        let ctrl = window.is_key_down(Key::LeftCtrl) || window.is_key_down(Key::RightCtrl);
        for key in window.get_keys_pressed(KeyRepeat::Yes) {
            match key {
                Key::F5 => emu.reset(false),
                Key::F6 => emu.reset(true),
                Key::F8 => paused = !paused,
                Key::F9 => {
                    emu.video.cycle_palette();
                }
                Key::F10 => {
                    turbo = !turbo;
                    window.set_target_fps(if turbo { 0 } else { 60 });
                    log::info!("turbo {}", if turbo { "on" } else { "off" });
                }
                _ => {
                    if !paused {
                        if let Some(ch) = translate_key(key, shift, ctrl) {
                            emu.keypress(ch);
                        }
                    }
                }
            }
        }

        if paused {
            if let Err(e) = window.update_with_buffer(&rgb_buffer, VIDEO_WIDTH, VIDEO_HEIGHT) {
                log::warn!("window update: {}", e);
                break;
            }
            continue;
        }

        // 1フレーム実行して描画
        emu.run_frame();

        // オーディオを汲み出す
        if let Some(out) = audio_out.as_mut() {
            let frames = emu.audio.ready().min(audio_buffer.len() / 2);
            if frames > 0 {
                emu.audio.drain(&mut audio_buffer[..frames * 2]);
                out.push(&audio_buffer[..frames * 2]);
            }
        }

        // パレットを通してRGBへ
        for (dst, &idx) in rgb_buffer.iter_mut().zip(emu.video.framebuffer.iter()) {
            *dst = emu.video.rgb_palette[(idx & 0x1F) as usize];
        }
        if let Err(e) = window.update_with_buffer(&rgb_buffer, VIDEO_WIDTH, VIDEO_HEIGHT) {
            log::warn!("window update: {}", e);
            break;
        }
    }
}
