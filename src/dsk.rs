//! DSK (6-and-2セクタイメージ) とビットストリームの相互変換
//!
//! 256バイトセクタを標準の6-and-2スキームでニブル化してトラックの
//! ビットストリームに並べる。アドレスフィールドは D5 AA 96、データ
//! フィールドは D5 AA AD。フィールド間は10ビットの同期ニブルで埋める。
//! セクタマップには各セクタのビット位置と元ファイルのオフセットを
//! 記録し、ダーティトラックのセクタ単位書き戻しに使う。

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::OnceLock;

use crate::bdsk::BdskFile;
use crate::floppy::{write_track_bits, Track, TrackMap, MAX_TRACK_BYTES, TRACK_COUNT};
use crate::image::{DiskFile, ImageFormat};

pub const SECTOR_SIZE: usize = 256;
pub const SECTORS_PER_TRACK: usize = 16;
/// DOS 3.3標準のボリューム番号
pub const DEFAULT_VOLUME: u8 = 254;

/// 物理セクタ → DOS 3.3論理セクタ
pub const DOS_SECMAP: [u8; 16] = [
    0x0, 0x7, 0xE, 0x6, 0xD, 0x5, 0xC, 0x4, 0xB, 0x3, 0xA, 0x2, 0x9, 0x1, 0x8, 0xF,
];
/// 物理セクタ → ProDOS論理セクタ
pub const PRODOS_SECMAP: [u8; 16] = [
    0x0, 0x8, 0x1, 0x9, 0x2, 0xA, 0x3, 0xB, 0x4, 0xC, 0x5, 0xD, 0x6, 0xE, 0x7, 0xF,
];

/// 6ビット値 → ディスクニブル
const WRITE_TABLE: [u8; 64] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6,
    0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3,
    0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC,
    0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3,
    0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE,
    0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC,
    0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6,
    0xF7, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];

/// ディスクニブル → 6ビット値（逆引き、不正ニブルは0xFF）
fn read_table() -> &'static [u8; 256] {
    static TABLE: OnceLock<[u8; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [0xFFu8; 256];
        for (i, &nib) in WRITE_TABLE.iter().enumerate() {
            t[nib as usize] = i as u8;
        }
        t
    })
}

/// 4-and-4エンコード: 奇数ビット列と偶数ビット列に分ける
#[inline]
pub fn encode_44(v: u8) -> (u8, u8) {
    ((v >> 1) | 0xAA, v | 0xAA)
}

/// 4-and-4デコード
#[inline]
pub fn decode_44(odd: u8, even: u8) -> u8 {
    ((odd << 1) | 1) & even
}

/// 256バイトを343ニブル（342データ + チェックサム）にエンコードする
pub fn encode_sector(data: &[u8]) -> [u8; 343] {
    debug_assert_eq!(data.len(), SECTOR_SIZE);
    let mut out = [0u8; 343];

    // 補助バッファ: 各バイトの下位2ビットを（P5 PROMのLSR/ROLデコードに
    // 合わせて）入れ替えて3バイト分詰める
    let mut aux = [0u8; 86];
    for i in 0..86 {
        let swap2 = |v: u8| ((v & 0x01) << 1) | ((v & 0x02) >> 1);
        let mut v = swap2(data[i]);
        if i + 86 < SECTOR_SIZE {
            v |= swap2(data[i + 86]) << 2;
        }
        if i + 172 < SECTOR_SIZE {
            v |= swap2(data[i + 172]) << 4;
        }
        aux[i] = v;
    }

    // 補助86バイト（逆順）、続いて上位6ビット256バイト。
    // 前の値とのXORをニブル化するチェックサムチェーン。
    let mut idx = 0;
    let mut prev = 0u8;
    for i in (0..86).rev() {
        out[idx] = WRITE_TABLE[((aux[i] ^ prev) & 0x3F) as usize];
        prev = aux[i];
        idx += 1;
    }
    for &b in data.iter() {
        let v = b >> 2;
        out[idx] = WRITE_TABLE[((v ^ prev) & 0x3F) as usize];
        prev = v;
        idx += 1;
    }
    out[idx] = WRITE_TABLE[(prev & 0x3F) as usize];
    out
}

/// 343ニブルを256バイトにデコードする。チェックサム不一致はエラー。
pub fn decode_sector(nibbles: &[u8]) -> Result<[u8; SECTOR_SIZE], String> {
    if nibbles.len() < 343 {
        return Err("sector: short nibble buffer".to_string());
    }
    let table = read_table();
    let mut aux = [0u8; 86];
    let mut data = [0u8; SECTOR_SIZE];

    let mut prev = 0u8;
    for i in 0..86 {
        let v = table[nibbles[i] as usize];
        if v == 0xFF {
            return Err(format!("sector: invalid nibble {:02X}", nibbles[i]));
        }
        // 書き込み順が86..0の逆順なのでここで戻す
        aux[85 - i] = v ^ prev;
        prev = aux[85 - i];
    }
    for (i, item) in data.iter_mut().enumerate() {
        let v = table[nibbles[86 + i] as usize];
        if v == 0xFF {
            return Err(format!("sector: invalid nibble {:02X}", nibbles[86 + i]));
        }
        *item = v ^ prev;
        prev = *item;
    }
    // 最終ニブルはチェーンの最後の値
    let check = table[nibbles[342] as usize];
    if check != prev {
        return Err("sector: checksum mismatch".to_string());
    }

    // 補助ビットを合成（入れ替えを戻す）
    for i in 0..SECTOR_SIZE {
        let two = (aux[i % 86] >> ((i / 86) * 2)) & 0x03;
        let unswapped = ((two & 0x01) << 1) | ((two & 0x02) >> 1);
        data[i] = (data[i] << 2) | unswapped;
    }
    Ok(data)
}

/// 1セクタをトラックビットストリームの末尾に描く。
/// セクタマップにデータフィールドのビット位置を記録する。
pub fn render_sector(
    volume: u8,
    track_id: u8,
    phys_sector: u8,
    data: &[u8],
    dst: &mut Track,
    track_data: &mut [u8],
) {
    // 先頭セクタは40、以降は20の同期ニブル
    let syncs = if dst.bit_count == 0 { 40 } else { 20 };
    for _ in 0..syncs {
        write_track_bits(dst, track_data, 0xFF << 2, 10);
    }

    // アドレスフィールド
    for b in [0xD5u8, 0xAA, 0x96] {
        write_track_bits(dst, track_data, b as u32, 8);
    }
    let checksum = volume ^ track_id ^ phys_sector;
    for v in [volume, track_id, phys_sector, checksum] {
        let (odd, even) = encode_44(v);
        write_track_bits(dst, track_data, odd as u32, 8);
        write_track_bits(dst, track_data, even as u32, 8);
    }
    for b in [0xDEu8, 0xAA, 0xEB] {
        write_track_bits(dst, track_data, b as u32, 8);
    }

    // データフィールドまで4つの同期ニブル
    for _ in 0..4 {
        write_track_bits(dst, track_data, 0xFF << 2, 10);
    }
    for b in [0xD5u8, 0xAA, 0xAD] {
        write_track_bits(dst, track_data, b as u32, 8);
    }
    // ここからがエンコード済みデータ。マップに位置を覚える
    dst.map.sector[phys_sector as usize].bit_position = dst.bit_count;
    dst.has_map = true;
    for b in encode_sector(data) {
        write_track_bits(dst, track_data, b as u32, 8);
    }
    for b in [0xDEu8, 0xAA, 0xEB] {
        write_track_bits(dst, track_data, b as u32, 8);
    }
    dst.virgin = false;
}

/// ビットストリームから任意ビット位置の8ビットニブルを読む
fn read_nibble_at(track_data: &[u8], bit_count: u32, pos: u32) -> u8 {
    let mut v = 0u8;
    for i in 0..8 {
        let p = (pos + i) % bit_count.max(1);
        let bit = (track_data[(p >> 3) as usize] >> (7 - (p & 7))) & 1;
        v = (v << 1) | bit;
    }
    v
}

/// セクタマップを使ってビットストリームから1セクタを復元する
pub fn recover_sector(
    track: &Track,
    track_data: &[u8],
    phys_sector: u8,
) -> Result<[u8; SECTOR_SIZE], String> {
    if !track.has_map {
        return Err("recover: track has no sector map".to_string());
    }
    let mut nibbles = [0u8; 343];
    let base = track.map.sector[phys_sector as usize].bit_position;
    for (i, n) in nibbles.iter_mut().enumerate() {
        *n = read_nibble_at(track_data, track.bit_count, base + (i as u32) * 8);
    }
    decode_sector(&nibbles)
}

/// DSK/DO/POイメージ全体をBDSKに変換する。
/// 戻り値は各トラックの記述子（セクタマップ付き）。
pub fn convert_to_bdsk(file: &DiskFile, bdsk: &mut BdskFile) -> Result<Vec<Track>, String> {
    let secmap: &[u8; 16] = if file.format == ImageFormat::Po {
        &PRODOS_SECMAP
    } else {
        &DOS_SECMAP
    };
    let mut src = File::open(&file.pathname)
        .map_err(|e| format!("{}: {}", file.pathname.display(), e))?;

    let mut tracks = Vec::with_capacity(TRACK_COUNT);
    let mut track_data = vec![0u8; MAX_TRACK_BYTES];
    let mut sector_buf = [0u8; SECTOR_SIZE];
    for track_id in 0..TRACK_COUNT {
        let mut dst = Track {
            bit_count: 0,
            virgin: false,
            dirty: false,
            has_map: true,
            map: TrackMap::default(),
        };
        track_data.fill(0);
        for phys in 0..SECTORS_PER_TRACK {
            let logical = secmap[phys] as usize;
            let off = ((SECTORS_PER_TRACK * track_id + logical) * SECTOR_SIZE) as u64;
            src.seek(SeekFrom::Start(off))
                .and_then(|_| src.read_exact(&mut sector_buf))
                .map_err(|e| format!("dsk track {} sector {}: {}", track_id, logical, e))?;
            render_sector(
                DEFAULT_VOLUME,
                track_id as u8,
                phys as u8,
                &sector_buf,
                &mut dst,
                &mut track_data,
            );
            dst.map.sector[phys].dsk_position = off as u32;
        }
        let mut fixed = [0u8; MAX_TRACK_BYTES];
        fixed.copy_from_slice(&track_data);
        bdsk.write_track(track_id, dst.bit_count, &fixed)?;
        tracks.push(dst);
    }
    log::info!(
        "dsk: converted {} to BDSK ({} tracks)",
        file.pathname.display(),
        TRACK_COUNT
    );
    Ok(tracks)
}

/// ダーティトラックの全セクタを元のDSKファイルへ書き戻す
pub fn write_back_track(
    file: &DiskFile,
    track: &Track,
    track_data: &[u8],
    track_id: u8,
) -> Result<(), String> {
    if file.read_only {
        return Err(format!("{}: write protected", file.pathname.display()));
    }
    let mut dst = std::fs::OpenOptions::new()
        .write(true)
        .open(&file.pathname)
        .map_err(|e| format!("{}: {}", file.pathname.display(), e))?;
    for phys in 0..SECTORS_PER_TRACK {
        let data = recover_sector(track, track_data, phys as u8)
            .map_err(|e| format!("track {} sector {}: {}", track_id, phys, e))?;
        let off = track.map.sector[phys].dsk_position as u64;
        dst.seek(SeekFrom::Start(off))
            .and_then(|_| dst.write_all(&data))
            .map_err(|e| format!("track {} sector {}: {}", track_id, phys, e))?;
    }
    log::debug!("dsk: wrote back track {}", track_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floppy::MAX_TRACK_BITS;

    fn patterned_sector(seed: u8) -> [u8; SECTOR_SIZE] {
        let mut s = [0u8; SECTOR_SIZE];
        for (i, b) in s.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(31).wrapping_add(seed);
        }
        s
    }

    #[test]
    fn four_and_four_round_trip() {
        for v in [0u8, 1, 0x55, 0xAA, 0xFE, 0xFF] {
            let (odd, even) = encode_44(v);
            assert_eq!(decode_44(odd, even), v);
            // 両バイトともMSBが立つ（有効ニブル）
            assert!(odd & 0x80 != 0 && even & 0x80 != 0);
        }
    }

    #[test]
    fn six_and_two_round_trip() {
        let data = patterned_sector(7);
        let nibbles = encode_sector(&data);
        // 全ニブルがディスク上有効（>= 0x96）
        assert!(nibbles.iter().all(|&n| n >= 0x96));
        let back = decode_sector(&nibbles).unwrap();
        assert_eq!(&back[..], &data[..]);
    }

    #[test]
    fn decode_detects_corruption() {
        let data = patterned_sector(3);
        let mut nibbles = encode_sector(&data);
        nibbles[100] = WRITE_TABLE[(read_table()[nibbles[100] as usize] ^ 0x3F) as usize & 0x3F];
        assert!(decode_sector(&nibbles).is_err());
    }

    #[test]
    fn rendered_track_recovers_all_sectors() {
        let mut track = Track {
            bit_count: 0,
            virgin: false,
            dirty: false,
            has_map: true,
            map: TrackMap::default(),
        };
        let mut track_data = vec![0u8; MAX_TRACK_BYTES];
        let mut originals = Vec::new();
        for sector in 0..16u8 {
            let data = patterned_sector(sector);
            render_sector(DEFAULT_VOLUME, 5, sector, &data, &mut track, &mut track_data);
            originals.push(data);
        }
        assert!(track.bit_count <= MAX_TRACK_BITS);
        for sector in 0..16u8 {
            let back = recover_sector(&track, &track_data, sector).unwrap();
            assert_eq!(&back[..], &originals[sector as usize][..], "sector {}", sector);
        }
    }

    #[test]
    fn track_fits_in_nib_size() {
        // 16セクタ + 同期がちょうど6656バイト以内に収まること
        let mut track = Track {
            bit_count: 0,
            virgin: false,
            dirty: false,
            has_map: true,
            map: TrackMap::default(),
        };
        let mut track_data = vec![0u8; MAX_TRACK_BYTES];
        let data = patterned_sector(0);
        for sector in 0..16u8 {
            render_sector(DEFAULT_VOLUME, 0, sector, &data, &mut track, &mut track_data);
        }
        // 40 + 15*20 同期 + 16 * (アドレス14 + 4同期 + データ349)
        assert!(track.bit_count < MAX_TRACK_BITS);
        assert!(track.bit_count > 6_000 * 8);
    }

    use super::super::bdsk::BdskFile;
    use super::super::image::{DiskFile, DSK_IMAGE_SIZE};

    #[test]
    fn dsk_to_bdsk_and_back() {
        let mut dsk_path = std::env::temp_dir();
        dsk_path.push(format!("a2emu_test_conv_{}.dsk", std::process::id()));
        // 各セクタ先頭にトラック/セクタ番号を押した合成DSK
        let mut img = vec![0u8; DSK_IMAGE_SIZE as usize];
        for t in 0..35usize {
            for s in 0..16usize {
                let off = (t * 16 + s) * SECTOR_SIZE;
                img[off] = t as u8;
                img[off + 1] = s as u8;
                img[off + 2] = 0xA5;
            }
        }
        std::fs::write(&dsk_path, &img).unwrap();

        let file = DiskFile::open(&dsk_path).unwrap();
        let bdsk_path = file.bdsk_path();
        let mut bdsk = BdskFile::create(&bdsk_path).unwrap();
        let tracks = convert_to_bdsk(&file, &mut bdsk).unwrap();
        assert_eq!(tracks.len(), 35);
        assert_eq!(std::fs::metadata(&bdsk_path).unwrap().len(), 232_988);

        // トラック12をBDSKから読み戻して全セクタをデコード
        let mut data = Box::new([0u8; MAX_TRACK_BYTES]);
        let bc = bdsk.read_track(12, &mut data).unwrap();
        let mut track = tracks[12];
        track.bit_count = bc;
        for phys in 0..16u8 {
            let sec = recover_sector(&track, &data[..], phys).unwrap();
            let logical = DOS_SECMAP[phys as usize];
            assert_eq!(sec[0], 12);
            assert_eq!(sec[1], logical);
            assert_eq!(sec[2], 0xA5);
        }
        let _ = std::fs::remove_file(&dsk_path);
        let _ = std::fs::remove_file(&bdsk_path);
    }
}
