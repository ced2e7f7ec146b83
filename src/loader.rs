//! ディスクイメージローダー
//!
//! リムーバブルストレージのディレクトリ（既定 /apple）を走査して
//! イメージ一覧を作り、選択されたイメージをDisk IIカードにマウントする。
//! DSK/NIB/WOZは初回マウント時にBDSKサイドファイルへ変換され、
//! 以後はBDSKを直接ロードする（高速パス）。

use std::path::{Path, PathBuf};

use crate::bdsk::BdskFile;
use crate::disk2::Disk2Card;
use crate::dsk;
use crate::image::{DiskFile, ImageFormat};
use crate::nib;
use crate::woz;

/// ディレクトリエントリの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Image(ImageFormat),
    Dir,
}

/// 走査結果の1エントリ
#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub filename: String,
    pub size: u64,
    pub kind: EntryKind,
}

/// ディスクローダー本体
pub struct DiskLoader {
    /// 現在走査しているディレクトリ
    pub dir: PathBuf,
    pub entries: Vec<DiskEntry>,
}

impl DiskLoader {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        DiskLoader {
            dir: dir.into(),
            entries: Vec::new(),
        }
    }

    /// ディレクトリを走査してエントリ一覧を作る。
    /// ディレクトリが先、その後イメージをアルファベット順で並べる。
    pub fn scan(&mut self) -> usize {
        self.entries.clear();
        let rd = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) => {
                log::warn!("loader: cannot scan {}: {}", self.dir.display(), e);
                return 0;
            }
        };
        for entry in rd.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.is_dir() {
                self.entries.push(DiskEntry {
                    filename: name,
                    size: 0,
                    kind: EntryKind::Dir,
                });
                continue;
            }
            // 対応拡張子以外は無視する
            let Some(format) = ImageFormat::from_path(&path) else {
                continue;
            };
            // 変換で作られたサイドファイルそのものは一覧に出さない
            if format == ImageFormat::Bdsk
                && path
                    .file_stem()
                    .and_then(|s| Path::new(s).extension())
                    .is_some()
            {
                continue;
            }
            self.entries.push(DiskEntry {
                filename: name,
                size: meta.len(),
                kind: EntryKind::Image(format),
            });
        }
        self.entries.sort_by(|a, b| {
            let da = a.kind == EntryKind::Dir;
            let db = b.kind == EntryKind::Dir;
            db.cmp(&da)
                .then_with(|| a.filename.to_lowercase().cmp(&b.filename.to_lowercase()))
        });
        log::info!(
            "loader: {} entries in {}",
            self.entries.len(),
            self.dir.display()
        );
        self.entries.len()
    }

    /// サブディレクトリに入る
    pub fn enter(&mut self, name: &str) {
        self.dir.push(name);
        self.scan();
    }

    /// 親ディレクトリに戻る
    pub fn leave(&mut self) {
        self.dir.pop();
        self.scan();
    }

    /// 一覧のインデックスでマウントする
    pub fn mount_index(
        &self,
        card: &mut Disk2Card,
        drive: usize,
        index: usize,
        preserve: bool,
    ) -> Result<(), String> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| format!("loader: bad index {}", index))?;
        if entry.kind == EntryKind::Dir {
            return Err(format!("loader: {} is a directory", entry.filename));
        }
        let path = self.dir.join(&entry.filename);
        mount(card, drive, &path, preserve)
    }
}

/// イメージをドライブにマウントする。
///
/// BDSKサイドファイルが無ければフォーマットに応じて変換し、あれば
/// 直接ロードする。preserveはプレイ中のディスク交換用で、ヘッドと
/// モーターの状態を保つ。
pub fn mount(
    card: &mut Disk2Card,
    drive: usize,
    path: &Path,
    preserve: bool,
) -> Result<(), String> {
    if drive > 1 {
        return Err(format!("loader: invalid drive {}", drive));
    }
    // 元イメージを開いて検証する
    let file = DiskFile::open(path)?;
    let bdsk_path = file.bdsk_path();

    let mut track_descs = None;
    let mut track_id_map = None;
    let bdsk = if file.format == ImageFormat::Bdsk {
        BdskFile::open(&bdsk_path, file.read_only)?
    } else if bdsk_path.exists() {
        // 高速パス: 変換済みのサイドファイルをそのまま使う
        log::info!("loader: using existing {}", bdsk_path.display());
        BdskFile::open(&bdsk_path, file.read_only)?
    } else {
        let mut b = BdskFile::create(&bdsk_path)?;
        match file.format {
            ImageFormat::Dsk | ImageFormat::Do | ImageFormat::Po => {
                track_descs = Some(dsk::convert_to_bdsk(&file, &mut b)?);
            }
            ImageFormat::Nib => nib::convert_to_bdsk(&file, &mut b)?,
            ImageFormat::Woz => {
                track_id_map = Some(woz::convert_to_bdsk(&file, &mut b)?);
            }
            ImageFormat::Bdsk => unreachable!(),
        }
        b
    };

    card.mount(drive, file, bdsk, track_descs, track_id_map, preserve);
    Ok(())
}

/// ドライブを空にする（ダーティトラックはフラッシュされる）
pub fn eject(card: &mut Disk2Card, drive: usize) {
    if drive > 1 {
        return;
    }
    card.eject(drive);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::DSK_IMAGE_SIZE;

    fn temp_dir(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("a2emu_test_loader_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&p);
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn scan_filters_and_sorts_directories_first() {
        let dir = temp_dir("scan");
        std::fs::create_dir(dir.join("zgames")).unwrap();
        std::fs::write(dir.join("beta.dsk"), vec![0u8; 16]).unwrap();
        std::fs::write(dir.join("Alpha.woz"), vec![0u8; 16]).unwrap();
        std::fs::write(dir.join("readme.txt"), b"ignore me").unwrap();
        std::fs::write(dir.join("game.dsk.bdsk"), vec![0u8; 16]).unwrap();

        let mut loader = DiskLoader::new(&dir);
        let n = loader.scan();
        assert_eq!(n, 3);
        assert_eq!(loader.entries[0].kind, EntryKind::Dir);
        assert_eq!(loader.entries[0].filename, "zgames");
        assert_eq!(loader.entries[1].filename, "Alpha.woz");
        assert_eq!(loader.entries[2].filename, "beta.dsk");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn mount_creates_side_file_then_reuses_it() {
        let dir = temp_dir("mount");
        let dsk = dir.join("test.dsk");
        std::fs::write(&dsk, vec![0u8; DSK_IMAGE_SIZE as usize]).unwrap();

        let mut card = Disk2Card::new();
        mount(&mut card, 0, &dsk, false).unwrap();
        let side = dir.join("test.dsk.bdsk");
        assert!(side.exists());
        assert_eq!(std::fs::metadata(&side).unwrap().len(), 232_988);
        assert!(card.boot_enabled);

        // 2回目は変換なしでBDSKを使う（中身を変えて検知する）
        eject(&mut card, 0);
        assert!(!card.boot_enabled);
        let before = std::fs::metadata(&side).unwrap().modified().unwrap();
        mount(&mut card, 0, &dsk, false).unwrap();
        let after = std::fs::metadata(&side).unwrap().modified().unwrap();
        assert_eq!(before, after);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn mount_eject_mount_restores_initial_state() {
        let dir = temp_dir("remount");
        let dsk = dir.join("boot.dsk");
        std::fs::write(&dsk, vec![0u8; DSK_IMAGE_SIZE as usize]).unwrap();

        let mut card = Disk2Card::new();
        mount(&mut card, 0, &dsk, false).unwrap();
        let first = (
            card.drives[0].qtrack,
            card.drives[0].bit_position,
            card.drives[0].curr_track,
            card.drives[0].curr_track_data[..].to_vec(),
        );
        // 状態を荒らしてからイジェクト→再マウント
        card.drives[0].qtrack = 40;
        card.drives[0].bit_position = 999;
        eject(&mut card, 0);
        mount(&mut card, 0, &dsk, false).unwrap();
        let second = (
            card.drives[0].qtrack,
            card.drives[0].bit_position,
            card.drives[0].curr_track,
            card.drives[0].curr_track_data[..].to_vec(),
        );
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
        assert_eq!(first.2, second.2);
        assert_eq!(first.3, second.3);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn invalid_image_leaves_drive_empty() {
        let dir = temp_dir("bad");
        let bad = dir.join("short.dsk");
        std::fs::write(&bad, vec![0u8; 100]).unwrap();
        let mut card = Disk2Card::new();
        assert!(mount(&mut card, 0, &bad, false).is_err());
        assert!(card.mounted[0].is_none());
        assert!(!card.boot_enabled);
        let _ = std::fs::remove_dir_all(dir);
    }
}
