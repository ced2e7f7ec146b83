//! NIB (生ニブルイメージ) からビットストリームへの変換
//!
//! NIBは同期ビットを持たないので、そのままではビットストリームに
//! ならない。セクタヘッダを探して正しい10ビット同期ニブルを入れ直し、
//! フィールド本体はそのままコピーして再構成する。
//! NIBへの書き戻しは未対応（マウント時に読み取り専用になる）。

use std::fs::File;
use std::io::Read;

use crate::bdsk::BdskFile;
use crate::dsk::decode_44;
use crate::floppy::{write_track_bits, Track, TrackMap, MAX_TRACK_BYTES, TRACK_COUNT};
use crate::image::DiskFile;

/// NIBの1トラック
pub const NIB_TRACK_SIZE: usize = 6656;

/// 生ニブルトラック1本をビットストリームに再構成する
pub fn render_track(src: &[u8], dst: &mut Track, track_data: &mut [u8]) {
    dst.bit_count = 0;
    dst.virgin = false;
    let mut window = 0u32;
    let mut srci = 0usize;
    let mut seccount = 0usize;
    let mut state = 0; // 0: アドレスフィールド探し、1: データフィールド探し
    let mut tid = 0u8;
    let mut sid = 0u8;
    let mut hmap = 0u16;
    let mut dmap = 0u16;

    while srci < src.len() {
        window = (window << 8) | src[srci] as u32;
        srci += 1;
        match state {
            0 if window == 0xFFD5AA96 => {
                if srci - 4 + 15 > src.len() {
                    break;
                }
                for _ in 0..(if seccount == 0 { 40 } else { 20 }) {
                    write_track_bits(dst, track_data, 0xFF << 2, 10);
                }
                // hは同期の最後の0xFFを指す（8ビットニブル）
                let h = &src[srci - 4..];
                tid = decode_44(h[6], h[7]);
                sid = decode_44(h[8], h[9]);
                hmap |= 1 << (sid & 0x0F);
                // 同期列は8の倍数ビットなのでバイト境界コピーでよい
                let at = (dst.bit_count >> 3) as usize;
                track_data[at..at + 15].copy_from_slice(&h[..15]);
                dst.bit_count += 15 * 8;
                srci += 11;
                state = 1;
            }
            1 if window == 0xFFD5AAAD => {
                if srci - 4 + 350 > src.len() {
                    break;
                }
                for _ in 0..4 {
                    write_track_bits(dst, track_data, 0xFF << 2, 10);
                }
                dmap |= 1 << (sid & 0x0F);
                let h = &src[srci - 4..];
                let at = (dst.bit_count >> 3) as usize;
                track_data[at..at + 350].copy_from_slice(&h[..350]);
                dst.bit_count += 350 * 8;
                srci += 4 + 342;
                seccount += 1;
                state = 0;
            }
            _ => {}
        }
    }
    if hmap != 0xFFFF || dmap != 0xFFFF {
        log::warn!(
            "nib: track {} incomplete? (header {:04x} data {:04x})",
            tid,
            !hmap,
            !dmap
        );
    }
}

/// NIBイメージ全体をBDSKに変換する
pub fn convert_to_bdsk(file: &DiskFile, bdsk: &mut BdskFile) -> Result<(), String> {
    let mut src = File::open(&file.pathname)
        .map_err(|e| format!("{}: {}", file.pathname.display(), e))?;
    let mut track_buf = vec![0u8; NIB_TRACK_SIZE];
    let mut track_data = [0u8; MAX_TRACK_BYTES];
    for track_id in 0..TRACK_COUNT {
        src.read_exact(&mut track_buf)
            .map_err(|e| format!("nib track {}: {}", track_id, e))?;
        let mut dst = Track {
            bit_count: 0,
            virgin: false,
            dirty: false,
            has_map: false,
            map: TrackMap::default(),
        };
        track_data.fill(0);
        render_track(&track_buf, &mut dst, &mut track_data);
        if dst.bit_count < 100 {
            return Err(format!(
                "{}: invalid NIB track {} has no bits",
                file.pathname.display(),
                track_id
            ));
        }
        bdsk.write_track(track_id, dst.bit_count, &track_data)?;
    }
    log::info!("nib: converted {} to BDSK", file.pathname.display());
    Ok(())
}
