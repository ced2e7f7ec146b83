//! ファイルバックの512バイトブロックデバイス
//!
//! SmartPortカードの背後にあるProDOSブロックストレージ。
//! サイズ任意のイメージ（.po / .hdv）をブロック単位で読み書きする。

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const BLOCK_SIZE: usize = 512;

/// 開かれたブロックデバイス
pub struct BlockDevice {
    pub path: PathBuf,
    pub size: u64,
    pub read_only: bool,
    f: File,
}

impl BlockDevice {
    /// イメージファイルを開く。書き込み不可なら読み取り専用で開き直す。
    pub fn open(path: &Path) -> Result<BlockDevice, String> {
        let (f, read_only) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => (f, false),
            Err(_) => {
                let f = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
                (f, true)
            }
        };
        let size = f
            .metadata()
            .map_err(|e| format!("{}: {}", path.display(), e))?
            .len();
        log::info!(
            "blockdev: {} ({} blocks, {})",
            path.display(),
            (size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64,
            if read_only { "ro" } else { "rw" }
        );
        Ok(BlockDevice {
            path: path.to_path_buf(),
            size,
            read_only,
            f,
        })
    }

    /// デバイスの総ブロック数
    pub fn block_count(&self) -> u32 {
        ((self.size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64) as u32
    }

    pub fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), String> {
        if block >= self.block_count() {
            return Err(format!("block {} out of range", block));
        }
        self.f
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))
            .and_then(|_| self.f.read_exact(buf))
            .map_err(|e| format!("block {} read: {}", block, e))
    }

    pub fn write_block(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), String> {
        if self.read_only {
            return Err(format!("{}: write protected", self.path.display()));
        }
        if block >= self.block_count() {
            return Err(format!("block {} out of range", block));
        }
        self.f
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))
            .and_then(|_| self.f.write_all(buf))
            .map_err(|e| format!("block {} write: {}", block, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("a2emu_test_bd_{}_{}.po", name, std::process::id()));
        p
    }

    #[test]
    fn block_round_trip() {
        let path = temp("rw");
        std::fs::write(&path, vec![0u8; BLOCK_SIZE * 4]).unwrap();
        let mut dev = BlockDevice::open(&path).unwrap();
        assert_eq!(dev.block_count(), 4);
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = 0x42;
        block[511] = 0x24;
        dev.write_block(2, &block).unwrap();
        let mut back = [0u8; BLOCK_SIZE];
        dev.read_block(2, &mut back).unwrap();
        assert_eq!(back[0], 0x42);
        assert_eq!(back[511], 0x24);
        assert!(dev.read_block(4, &mut back).is_err());
        let _ = std::fs::remove_file(path);
    }
}
