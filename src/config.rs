//! 設定ファイル管理
//!
//! 起動オプションをJSONで永続化する。ボード固有のGPIO割り当ては
//! ホスト側ドライバの仕事なので、ここではバリアント名だけを持つ。

use serde::{Deserialize, Serialize};
use std::path::Path;

/// 設定ファイルのデフォルトパス
const CONFIG_FILE: &str = "a2emu_config.json";

/// ボードバリアント（ホストペリフェラルのピン配置選択）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardVariant {
    M1,
    M2,
}

/// エミュレータ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// ボードバリアント
    #[serde(default = "default_board")]
    pub board_variant: BoardVariant,
    /// ホストクロック（MHz、ゲストのペースには影響しない）
    #[serde(default = "default_cpu_mhz")]
    pub cpu_speed_mhz: u32,
    /// 外部RAMキャッシュ（ページングRAMとBDSKドライブ1キャッシュ）
    #[serde(default = "default_true")]
    pub psram_enabled: bool,
    /// オーディオ再構成レート (22050 / 44100)
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    /// パレット番号（範囲外は0に巻き戻し）
    #[serde(default)]
    pub palette_index: u8,
    /// 文字ROMの第2バンク（国際文字セット）
    #[serde(default)]
    pub video_rom_bank: u8,
    /// ディスクイメージのディレクトリ
    #[serde(default = "default_disk_dir")]
    pub disk_dir: String,
    /// ROMファイルのディレクトリ
    #[serde(default = "default_rom_dir")]
    pub rom_dir: String,
    /// 最後に使ったディスク
    pub last_disk1: Option<String>,
    pub last_disk2: Option<String>,
}

fn default_board() -> BoardVariant {
    BoardVariant::M1
}
fn default_cpu_mhz() -> u32 {
    252
}
fn default_true() -> bool {
    true
}
fn default_sample_rate() -> u32 {
    22_050
}
fn default_disk_dir() -> String {
    "apple".to_string()
}
fn default_rom_dir() -> String {
    "roms".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            board_variant: default_board(),
            cpu_speed_mhz: default_cpu_mhz(),
            psram_enabled: true,
            sample_rate_hz: default_sample_rate(),
            palette_index: 0,
            video_rom_bank: 0,
            disk_dir: default_disk_dir(),
            rom_dir: default_rom_dir(),
            last_disk1: None,
            last_disk2: None,
        }
    }
}

impl Config {
    /// 既定パスから設定を読み込む（無ければデフォルト）
    pub fn load() -> Self {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("config: parse failed ({}), using defaults", e);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    pub fn save(&self) -> Result<(), String> {
        self.save_to(CONFIG_FILE)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("config serialize: {}", e))?;
        std::fs::write(path, json).map_err(|e| format!("config write: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let mut p = std::env::temp_dir();
        p.push(format!("a2emu_test_cfg_{}.json", std::process::id()));
        let mut c = Config::default();
        c.sample_rate_hz = 44_100;
        c.psram_enabled = false;
        c.save_to(&p).unwrap();
        let back = Config::load_from(&p);
        assert_eq!(back.sample_rate_hz, 44_100);
        assert!(!back.psram_enabled);
        assert_eq!(back.board_variant, BoardVariant::M1);
        let _ = std::fs::remove_file(p);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let c = Config::load_from("/nonexistent/a2emu.json");
        assert!(c.psram_enabled);
        assert_eq!(c.sample_rate_hz, 22_050);
    }
}
