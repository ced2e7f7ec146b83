//! WOZ (Applesauce) イメージの読み込み
//!
//! WOZ1/WOZ2のチャンクを走査してTMAP（クォータートラック割り当て）と
//! TRKS（トラックビットストリーム）を取り出す。書き戻しは未対応。

use std::path::Path;

use crate::bdsk::BdskFile;
use crate::floppy::{MAX_TRACK_BYTES, NOISE_TRACK, QTRACK_COUNT, TRACK_COUNT};
use crate::image::DiskFile;

/// チャンクヘッダの前にある固定ヘッダのサイズ
const WOZ_HEADER_SIZE: usize = 12;
/// WOZ1のTRKSエントリサイズ
const WOZ1_TRACK_SIZE: usize = 6656;

fn le16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// パース済みのWOZイメージ
pub struct WozImage {
    /// クォータートラック → 物理トラック（未割り当てはNOISE_TRACK）
    pub track_id: [u8; QTRACK_COUNT],
    /// 物理トラックごとの (bit_count, ビットストリーム)
    pub tracks: Vec<Option<(u32, Vec<u8>)>>,
    /// 1=WOZ1, 2=WOZ2
    pub version: u8,
}

/// WOZファイルを読み込んでパースする
pub fn load(path: &Path) -> Result<WozImage, String> {
    let data = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    if data.len() < WOZ_HEADER_SIZE {
        return Err(format!("{}: truncated WOZ", path.display()));
    }
    let is_woz2 = &data[0..4] == b"WOZ2";
    let is_woz1 = &data[0..3] == b"WOZ" && !is_woz2;
    if !is_woz1 && !is_woz2 {
        return Err(format!("{}: not a WOZ file", path.display()));
    }

    // チャンク走査（順序は保証されない）
    let mut tmap_payload: Option<&[u8]> = None;
    let mut trks_payload_off = 0usize;
    let mut trks_payload_size = 0usize;
    let mut off = WOZ_HEADER_SIZE;
    while off + 8 <= data.len() {
        let id = &data[off..off + 4];
        let size = le32(&data[off + 4..]) as usize;
        let payload = off + 8;
        if payload + size > data.len() {
            break;
        }
        if id == b"TMAP" {
            tmap_payload = Some(&data[payload..payload + size]);
        } else if id == b"TRKS" {
            trks_payload_off = payload;
            trks_payload_size = size;
        }
        off = payload + size;
    }
    let tmap = tmap_payload
        .ok_or_else(|| format!("{}: missing TMAP chunk", path.display()))?;
    if trks_payload_size == 0 {
        return Err(format!("{}: missing TRKS chunk", path.display()));
    }
    if tmap.len() < QTRACK_COUNT {
        return Err(format!("{}: TMAP too small ({})", path.display(), tmap.len()));
    }

    let mut track_id = [NOISE_TRACK; QTRACK_COUNT];
    let mut used_tracks = 0u64;
    for (qt, id) in track_id.iter_mut().enumerate() {
        let tid = tmap[qt];
        *id = if tid == 0xFF { NOISE_TRACK } else { tid };
        if tid != 0xFF && tid < 64 {
            used_tracks |= 1 << tid;
        }
    }

    let mut tracks: Vec<Option<(u32, Vec<u8>)>> = (0..TRACK_COUNT).map(|_| None).collect();
    if is_woz2 {
        // 160エントリの { start_block, block_count, bit_count }
        if trks_payload_size < 160 * 8 {
            return Err(format!("{}: TRKS too small", path.display()));
        }
        for (tid, slot) in tracks.iter_mut().enumerate() {
            if used_tracks & (1 << tid) == 0 {
                continue;
            }
            let e = &data[trks_payload_off + tid * 8..];
            let start_byte = (le16(e) as usize) << 9; // 512バイトブロック
            let bit_count = le32(&e[4..]);
            let byte_count = ((bit_count as usize) + 7) >> 3;
            if byte_count > MAX_TRACK_BYTES {
                return Err(format!(
                    "{}: WOZ2 track {} too large ({} bytes)",
                    path.display(),
                    tid,
                    byte_count
                ));
            }
            if start_byte + byte_count > data.len() {
                return Err(format!("{}: WOZ2 track {} out of file", path.display(), tid));
            }
            *slot = Some((bit_count, data[start_byte..start_byte + byte_count].to_vec()));
        }
    } else {
        // WOZ1: 35個の固定6656バイトエントリ。末尾にバイト数/ビット数
        for (tid, slot) in tracks.iter_mut().enumerate() {
            let entry_off = trks_payload_off + tid * WOZ1_TRACK_SIZE;
            if entry_off + WOZ1_TRACK_SIZE > data.len() {
                break;
            }
            if used_tracks & (1 << tid) == 0 {
                continue;
            }
            let entry = &data[entry_off..entry_off + WOZ1_TRACK_SIZE];
            let byte_count = le16(&entry[6646..]) as usize;
            let bit_count = le16(&entry[6648..]) as u32;
            if byte_count > MAX_TRACK_BYTES {
                return Err(format!(
                    "{}: WOZ1 track {} too large ({} bytes)",
                    path.display(),
                    tid,
                    byte_count
                ));
            }
            *slot = Some((bit_count, entry[..byte_count].to_vec()));
        }
    }
    Ok(WozImage {
        track_id,
        tracks,
        version: if is_woz2 { 2 } else { 1 },
    })
}

/// WOZイメージをBDSKに変換する。戻り値はTMAP由来のトラック割り当て。
pub fn convert_to_bdsk(
    file: &DiskFile,
    bdsk: &mut BdskFile,
) -> Result<[u8; QTRACK_COUNT], String> {
    let woz = load(&file.pathname)?;
    let mut track_data = [0u8; MAX_TRACK_BYTES];
    for (tid, entry) in woz.tracks.iter().enumerate() {
        let Some((bit_count, bytes)) = entry else {
            continue;
        };
        track_data.fill(0);
        track_data[..bytes.len()].copy_from_slice(bytes);
        bdsk.write_track(tid, *bit_count, &track_data)?;
    }
    log::info!(
        "woz: converted {} (WOZ{}) to BDSK",
        file.pathname.display(),
        woz.version
    );
    Ok(woz.track_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(id);
        v.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        v.extend_from_slice(payload);
        v
    }

    fn standard_tmap() -> [u8; 160] {
        let mut tmap = [0xFFu8; 160];
        for t in 0..35usize {
            for off in -1i32..=1 {
                let q = t as i32 * 4 + off;
                if (0..160).contains(&q) {
                    tmap[q as usize] = t as u8;
                }
            }
        }
        tmap
    }

    fn temp(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("a2emu_test_{}_{}.woz", name, std::process::id()));
        p
    }

    #[test]
    fn woz1_fixed_entries_parse() {
        let mut img = Vec::new();
        img.extend_from_slice(b"WOZ1\xFF\n\r\n");
        img.extend_from_slice(&[0u8; 4]); // CRC
        img.extend_from_slice(&chunk(b"INFO", &[0u8; 60]));
        img.extend_from_slice(&chunk(b"TMAP", &standard_tmap()));
        let mut trks = vec![0u8; 35 * WOZ1_TRACK_SIZE];
        // トラック7に識別パターン
        let e = 7 * WOZ1_TRACK_SIZE;
        trks[e] = 0xD5;
        trks[e + 1] = 0xAA;
        trks[e + 6646..e + 6648].copy_from_slice(&100u16.to_le_bytes());
        trks[e + 6648..e + 6650].copy_from_slice(&800u16.to_le_bytes());
        img.extend_from_slice(&chunk(b"TRKS", &trks));

        let path = temp("woz1");
        std::fs::write(&path, &img).unwrap();
        let woz = load(&path).unwrap();
        assert_eq!(woz.version, 1);
        assert_eq!(woz.track_id[28], 7);
        let (bc, bytes) = woz.tracks[7].as_ref().unwrap();
        assert_eq!(*bc, 800);
        assert_eq!(bytes.len(), 100);
        assert_eq!(bytes[0], 0xD5);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn woz2_block_aligned_tracks_parse() {
        let mut img = Vec::new();
        img.extend_from_slice(b"WOZ2\xFF\n\r\n");
        img.extend_from_slice(&[0u8; 4]);
        img.extend_from_slice(&chunk(b"TMAP", &standard_tmap()));
        // TRKSチャンク: 160エントリ + パディング + ブロック整列ビットデータ
        let mut trks = vec![0u8; 160 * 8];
        // トラック0のデータをブロック3（オフセット1536）に置く
        let data_block = 3u16;
        trks[0..2].copy_from_slice(&data_block.to_le_bytes());
        trks[2..4].copy_from_slice(&1u16.to_le_bytes());
        trks[4..8].copy_from_slice(&64u32.to_le_bytes());
        img.extend_from_slice(&chunk(b"TRKS", &trks));
        // ブロック3まで埋める
        while img.len() < (data_block as usize) << 9 {
            img.push(0);
        }
        img.extend_from_slice(&[0xA5u8; 8]); // 64ビット
        let path = temp("woz2");
        std::fs::write(&path, &img).unwrap();
        let woz = load(&path).unwrap();
        assert_eq!(woz.version, 2);
        let (bc, bytes) = woz.tracks[0].as_ref().unwrap();
        assert_eq!(*bc, 64);
        assert_eq!(bytes, &vec![0xA5u8; 8]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_tmap_is_an_error() {
        let mut img = Vec::new();
        img.extend_from_slice(b"WOZ2\xFF\n\r\n");
        img.extend_from_slice(&[0u8; 4]);
        img.extend_from_slice(&chunk(b"TRKS", &[0u8; 160 * 8]));
        let path = temp("notmap");
        std::fs::write(&path, &img).unwrap();
        assert!(load(&path).is_err());
        let _ = std::fs::remove_file(path);
    }
}
