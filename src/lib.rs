//! A2EMU - Apple IIe Emulator in Rust
//!
//! 小型ターゲットを想定したサイクル駆動のApple IIeエミュレーションコア:
//! - 65C02 CPUとバンクメモリ、ソフトスイッチ
//! - スワップファイル付きページング仮想RAM
//! - ビットレベルのDisk II（LSS）とDSK/NIB/WOZ/BDSK変換
//! - SmartPort / ProDOSブロックデバイス（CPUトラップ経由）
//! - 320x240インデックスカラーのレンダラとVBLタイマー
//! - クリックイベントからのスピーカー波形再構成

pub mod apple2;
pub mod audio;
pub mod bank;
pub mod bdsk;
pub mod blockdev;
pub mod config;
pub mod cpu;
pub mod disk2;
pub mod dsk;
pub mod floppy;
pub mod image;
pub mod loader;
pub mod memory;
pub mod nib;
pub mod rom;
pub mod smartport;
pub mod switches;
pub mod timer;
pub mod video;
pub mod vram;
pub mod woz;
