//! ディスクイメージファイルの記述子
//!
//! 拡張子とサイズによるフォーマット判定。実データの変換は
//! dsk/nib/woz/bdskの各モジュールが行う。

use std::path::{Path, PathBuf};

/// DSKイメージの大きさ: 35トラック x 16セクタ x 256バイト
pub const DSK_IMAGE_SIZE: u64 = 143_360;
/// NIBイメージの大きさ: 35トラック x 6656バイト
pub const NIB_IMAGE_SIZE: u64 = 232_960;

/// ディスクイメージのフォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// DOS 3.3セクタ順
    Dsk,
    /// .do（DSKと同じ）
    Do,
    /// ProDOSセクタ順
    Po,
    /// 生ニブルストリーム
    Nib,
    /// WOZ1/WOZ2ビットストリーム
    Woz,
    /// 内部正準形式
    Bdsk,
}

impl ImageFormat {
    /// 拡張子（大文字小文字を無視）からフォーマットを判定する
    pub fn from_path(path: &Path) -> Option<ImageFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "dsk" => Some(ImageFormat::Dsk),
            "do" => Some(ImageFormat::Do),
            "po" => Some(ImageFormat::Po),
            "nib" => Some(ImageFormat::Nib),
            "woz" => Some(ImageFormat::Woz),
            "bdsk" => Some(ImageFormat::Bdsk),
            _ => None,
        }
    }

    /// セクタイメージ（DSK系）か
    pub fn is_sector_image(&self) -> bool {
        matches!(self, ImageFormat::Dsk | ImageFormat::Do | ImageFormat::Po)
    }
}

/// マウントされたイメージファイルの記述子
#[derive(Debug, Clone)]
pub struct DiskFile {
    pub pathname: PathBuf,
    pub format: ImageFormat,
    pub size: u64,
    pub read_only: bool,
}

impl DiskFile {
    /// ファイルを検証して記述子を作る。フォーマット不明・サイズ不正はエラー。
    pub fn open(path: &Path) -> Result<DiskFile, String> {
        let format = ImageFormat::from_path(path)
            .ok_or_else(|| format!("{}: unknown image extension", path.display()))?;
        let meta = std::fs::metadata(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        let size = meta.len();
        match format {
            ImageFormat::Dsk | ImageFormat::Do | ImageFormat::Po => {
                if size != DSK_IMAGE_SIZE {
                    return Err(format!(
                        "{}: bad DSK size {} (expected {})",
                        path.display(),
                        size,
                        DSK_IMAGE_SIZE
                    ));
                }
            }
            ImageFormat::Nib => {
                if size != NIB_IMAGE_SIZE {
                    return Err(format!(
                        "{}: bad NIB size {} (expected {})",
                        path.display(),
                        size,
                        NIB_IMAGE_SIZE
                    ));
                }
            }
            ImageFormat::Woz | ImageFormat::Bdsk => {}
        }
        let read_only = meta.permissions().readonly()
            // NIB/WOZの書き戻しは未対応なので読み取り専用として扱う
            || matches!(format, ImageFormat::Nib | ImageFormat::Woz);
        Ok(DiskFile {
            pathname: path.to_path_buf(),
            format,
            size,
            read_only,
        })
    }

    /// 対応するBDSKサイドファイルのパス
    pub fn bdsk_path(&self) -> PathBuf {
        if self.format == ImageFormat::Bdsk {
            return self.pathname.clone();
        }
        let mut p = self.pathname.clone().into_os_string();
        p.push(".bdsk");
        PathBuf::from(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_detection_is_case_insensitive() {
        assert_eq!(
            ImageFormat::from_path(Path::new("a.PO")),
            Some(ImageFormat::Po)
        );
        assert_eq!(
            ImageFormat::from_path(Path::new("b.Dsk")),
            Some(ImageFormat::Dsk)
        );
        assert_eq!(ImageFormat::from_path(Path::new("c.txt")), None);
        assert_eq!(ImageFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn bdsk_side_file_path() {
        let f = DiskFile {
            pathname: PathBuf::from("/apple/game.dsk"),
            format: ImageFormat::Dsk,
            size: DSK_IMAGE_SIZE,
            read_only: false,
        };
        assert_eq!(f.bdsk_path(), PathBuf::from("/apple/game.dsk.bdsk"));
    }
}
