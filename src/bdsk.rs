//! BDSKコンテナ
//!
//! 内部正準形式のディスクファイル。8バイトヘッダのあとに35トラック分の
//! { bit_count: u32 LE, data: [u8; 6656] } レコードが並ぶ。
//! トラック単位のインプレース書き換えができるので、ダーティトラックの
//! フラッシュは該当レコードだけを書く。

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::floppy::{MAX_TRACK_BITS, MAX_TRACK_BYTES, TRACK_COUNT};

pub const BDSK_MAGIC: &[u8; 4] = b"BDSK";
pub const BDSK_VERSION: u16 = 1;
/// ヘッダサイズ
pub const BDSK_HEADER_SIZE: u64 = 8;
/// 1トラックレコードのサイズ（bit_count + データ）
pub const BDSK_TRACK_RECORD: u64 = 4 + MAX_TRACK_BYTES as u64;
/// ファイル全体のサイズ: 8 + 35 * (4 + 6656) = 232988
pub const BDSK_FILE_SIZE: u64 = BDSK_HEADER_SIZE + TRACK_COUNT as u64 * BDSK_TRACK_RECORD;

/// 開かれたBDSKファイル
pub struct BdskFile {
    f: File,
}

impl BdskFile {
    /// 新しいBDSKファイルを作成する（ゼロのトラックで埋める）
    pub fn create(path: &Path) -> Result<BdskFile, String> {
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        let mut header = [0u8; BDSK_HEADER_SIZE as usize];
        header[0..4].copy_from_slice(BDSK_MAGIC);
        header[4..6].copy_from_slice(&BDSK_VERSION.to_le_bytes());
        header[6..8].copy_from_slice(&(TRACK_COUNT as u16).to_le_bytes());
        f.write_all(&header)
            .map_err(|e| format!("bdsk header write: {}", e))?;
        let zero_record = vec![0u8; BDSK_TRACK_RECORD as usize];
        for _ in 0..TRACK_COUNT {
            f.write_all(&zero_record)
                .map_err(|e| format!("bdsk extend: {}", e))?;
        }
        Ok(BdskFile { f })
    }

    /// 既存のBDSKファイルを開き、ヘッダを検証する
    pub fn open(path: &Path, read_only: bool) -> Result<BdskFile, String> {
        let mut f = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        let mut header = [0u8; BDSK_HEADER_SIZE as usize];
        f.read_exact(&mut header)
            .map_err(|e| format!("bdsk header read: {}", e))?;
        if &header[0..4] != BDSK_MAGIC {
            return Err(format!("{}: not a BDSK file", path.display()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        let tracks = u16::from_le_bytes([header[6], header[7]]);
        if version != BDSK_VERSION || tracks != TRACK_COUNT as u16 {
            return Err(format!(
                "{}: unsupported BDSK (version {} tracks {})",
                path.display(),
                version,
                tracks
            ));
        }
        Ok(BdskFile { f })
    }

    #[inline]
    fn track_offset(track: usize) -> u64 {
        BDSK_HEADER_SIZE + track as u64 * BDSK_TRACK_RECORD
    }

    /// 1トラック読み込み。戻り値は有効ビット数。
    pub fn read_track(
        &mut self,
        track: usize,
        data: &mut [u8; MAX_TRACK_BYTES],
    ) -> Result<u32, String> {
        if track >= TRACK_COUNT {
            return Err(format!("bdsk: track {} out of range", track));
        }
        self.f
            .seek(SeekFrom::Start(Self::track_offset(track)))
            .map_err(|e| format!("bdsk seek: {}", e))?;
        let mut bc = [0u8; 4];
        self.f
            .read_exact(&mut bc)
            .map_err(|e| format!("bdsk track {} read: {}", track, e))?;
        self.f
            .read_exact(data)
            .map_err(|e| format!("bdsk track {} read: {}", track, e))?;
        let bit_count = u32::from_le_bytes(bc).min(MAX_TRACK_BITS);
        Ok(bit_count)
    }

    /// 1トラックをインプレースで書き込む（ダーティフラッシュ）
    pub fn write_track(
        &mut self,
        track: usize,
        bit_count: u32,
        data: &[u8; MAX_TRACK_BYTES],
    ) -> Result<(), String> {
        if track >= TRACK_COUNT {
            return Err(format!("bdsk: track {} out of range", track));
        }
        self.f
            .seek(SeekFrom::Start(Self::track_offset(track)))
            .map_err(|e| format!("bdsk seek: {}", e))?;
        self.f
            .write_all(&bit_count.to_le_bytes())
            .map_err(|e| format!("bdsk track {} write: {}", track, e))?;
        self.f
            .write_all(data)
            .map_err(|e| format!("bdsk track {} write: {}", track, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("a2emu_test_{}_{}.bdsk", name, std::process::id()));
        p
    }

    #[test]
    fn create_produces_exact_file_size() {
        let path = temp_path("size");
        BdskFile::create(&path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 232_988);
        assert_eq!(meta.len(), BDSK_FILE_SIZE);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn track_round_trip_in_place() {
        let path = temp_path("roundtrip");
        let mut b = BdskFile::create(&path).unwrap();
        let mut data = Box::new([0u8; MAX_TRACK_BYTES]);
        data[0] = 0xD5;
        data[6655] = 0xAA;
        b.write_track(17, 50_000, &data).unwrap();
        drop(b);

        let mut b = BdskFile::open(&path, false).unwrap();
        let mut back = Box::new([0u8; MAX_TRACK_BYTES]);
        let bc = b.read_track(17, &mut back).unwrap();
        assert_eq!(bc, 50_000);
        assert_eq!(back[0], 0xD5);
        assert_eq!(back[6655], 0xAA);
        // 他のトラックは空のまま
        let bc = b.read_track(16, &mut back).unwrap();
        assert_eq!(bc, 0);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn open_rejects_bad_magic() {
        let path = temp_path("magic");
        std::fs::write(&path, b"WOZ2wrong").unwrap();
        assert!(BdskFile::open(&path, true).is_err());
        let _ = std::fs::remove_file(path);
    }
}
