//! オーディオミキサー (1bitスピーカー再構成)
//!
//! $C030アクセスのサイクル値からスピーカー波形を復元する。クリック1回で
//! ±256の寄与が反転し、サイクル→サンプル位置の変換は16.16固定小数点の
//! 定数 (SAMPLE_RATE << 16) / 1020484 で行う。出力はステレオ
//! インターリーブのi16で、セカンダリソース（シンセカード等）をミックス
//! できる。

/// ゲストCPUのクロック (Hz)
pub const CPU_CLOCK_HZ: u64 = 1_020_484;

/// リングバッファの長さ（2のべき乗）
const RING_SIZE: usize = 8192;

/// 無音からの再開時に確保するレイテンシ（サンプル数）。
/// クリック間隔がこれを超えたら書き込みカーソルを再アンカーする。
pub const SAMPLE_BUFFER_OFFSET: usize = 1024;

/// セカンダリソースのミックス音量 (0-255)
const SECONDARY_VOLUME: i32 = 255;

/// スピーカーミキサー本体
pub struct AudioMixer {
    /// サンプルレート (Hz)
    pub sample_rate: u32,
    /// サイクルあたりサンプル数（16.16固定小数点）
    sp: u64,
    /// 寄与のリング（8.8固定小数点、-256..+256）
    ring: Box<[i16; RING_SIZE]>,
    /// 書き込みインデックス（自由増加、マスクして使用）
    write: u64,
    /// 読み出しインデックス
    read: u64,
    /// 現在のサンプル位置（クリック列の消費位置）
    current_sample: u64,
    /// スピーカー符号（+256 / -256）
    speaker: i16,
    /// アンダーラン時に保持する直近の寄与
    last_contribution: i16,
    /// 音量 (0-255)
    pub volume: u8,
    /// セカンダリステレオソース
    secondary_enabled: bool,
    secondary_left: i16,
    secondary_right: i16,
}

impl AudioMixer {
    pub fn new(sample_rate: u32) -> Self {
        AudioMixer {
            sample_rate,
            sp: ((sample_rate as u64) << 16) / CPU_CLOCK_HZ,
            ring: Box::new([0; RING_SIZE]),
            write: 0,
            read: 0,
            current_sample: 0,
            speaker: -256,
            last_contribution: 0,
            volume: 192,
            secondary_enabled: false,
            secondary_left: 0,
            secondary_right: 0,
        }
    }

    /// 準備済み出力サンプル数
    pub fn ready(&self) -> usize {
        (self.write - self.read) as usize
    }

    /// スピーカークリック（$C030アクセス時、CPU累積サイクルで呼ぶ）
    pub fn click(&mut self, cycle: u64) {
        let sample = (cycle * self.sp) >> 16;
        let delta = sample as i64 - self.current_sample as i64;

        if delta <= 0 {
            // 同一サンプル内の連続クリックは符号反転のみ
            self.speaker = -self.speaker;
            return;
        }
        if delta >= SAMPLE_BUFFER_OFFSET as i64 {
            // 無音からの再開。レイテンシ分の先行ギャップを空けて再アンカー
            self.write = self.read + SAMPLE_BUFFER_OFFSET as u64;
            for i in self.read..self.write {
                self.ring[(i as usize) & (RING_SIZE - 1)] = 0;
            }
            self.current_sample = sample;
            self.speaker = -self.speaker;
            return;
        }
        // クリック間の区間を現在のスピーカー値で埋める
        for _ in 0..delta {
            self.ring[(self.write as usize) & (RING_SIZE - 1)] = self.speaker;
            self.write += 1;
            if self.write - self.read > RING_SIZE as u64 {
                // 最古の未読サンプルを上書き
                self.read += 1;
            }
        }
        self.current_sample = sample;
        self.speaker = -self.speaker;
    }

    /// 長い停止（ディスクロード、リセット）後の再同期。
    /// 溜まったトグルの再生を防ぐため、位置を現在サイクルに合わせて
    /// リングを空にする。
    pub fn sync(&mut self, cycle: u64) {
        self.current_sample = (cycle * self.sp) >> 16;
        self.ring.fill(0);
        self.write = 0;
        self.read = 0;
        self.last_contribution = 0;
    }

    /// セカンダリステレオソースの現在値を設定
    pub fn set_secondary(&mut self, left: i16, right: i16) {
        self.secondary_left = left;
        self.secondary_right = right;
    }

    pub fn enable_secondary(&mut self, enable: bool) {
        self.secondary_enabled = enable;
    }

    /// 出力バッファを満たす。outはステレオインターリーブ
    /// （フレーム数 = out.len() / 2）。
    pub fn drain(&mut self, out: &mut [i16]) {
        for frame in out.chunks_exact_mut(2) {
            let contribution = if self.write != self.read {
                let idx = (self.read as usize) & (RING_SIZE - 1);
                let c = self.ring[idx];
                self.ring[idx] = 0;
                self.read += 1;
                self.last_contribution = c;
                c
            } else {
                // アンダーラン: 直近の値を保持する
                self.last_contribution
            };

            let base = (contribution as i32 * self.volume as i32) >> 1;
            let mut left = base;
            let mut right = base;
            if self.secondary_enabled {
                left += (self.secondary_left as i32 * SECONDARY_VOLUME) / 256;
                right += (self.secondary_right as i32 * SECONDARY_VOLUME) / 256;
            }
            frame[0] = left.clamp(-32768, 32767) as i16;
            frame[1] = right.clamp(-32768, 32767) as i16;
        }
    }
}

// ============================================================
// オーディオ出力（rodioが有効な場合のみ）
// ============================================================

#[cfg(feature = "audio")]
mod output {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rodio::{OutputStream, Sink, Source};

    /// 出力リングの長さ（ステレオサンプル単位、2のべき乗）
    const OUT_RING_SIZE: usize = 16384;

    /// メインループとオーディオスレッドを繋ぐSPSCリング。
    /// 書き手も読み手も1つなのでロックは要らない。
    struct OutRing {
        data: Box<[i16; OUT_RING_SIZE]>,
        write_pos: AtomicUsize,
        read_pos: AtomicUsize,
    }

    impl OutRing {
        fn new() -> Self {
            OutRing {
                data: Box::new([0; OUT_RING_SIZE]),
                write_pos: AtomicUsize::new(0),
                read_pos: AtomicUsize::new(0),
            }
        }

        fn write(&self, samples: &[i16]) {
            let mut write_pos = self.write_pos.load(Ordering::Relaxed);
            let read_pos = self.read_pos.load(Ordering::Acquire);
            for &sample in samples {
                let next = (write_pos + 1) % OUT_RING_SIZE;
                if next == read_pos {
                    break;
                }
                // SPSC: この添字に書くのは自分だけ
                unsafe {
                    let ptr = self.data.as_ptr() as *mut i16;
                    *ptr.add(write_pos) = sample;
                }
                write_pos = next;
            }
            self.write_pos.store(write_pos, Ordering::Release);
        }

        fn read(&self) -> Option<i16> {
            let write_pos = self.write_pos.load(Ordering::Acquire);
            let read_pos = self.read_pos.load(Ordering::Relaxed);
            if read_pos == write_pos {
                return None;
            }
            let sample = unsafe { *self.data.as_ptr().add(read_pos) };
            self.read_pos
                .store((read_pos + 1) % OUT_RING_SIZE, Ordering::Release);
            Some(sample)
        }

        fn available(&self) -> usize {
            let write_pos = self.write_pos.load(Ordering::Relaxed);
            let read_pos = self.read_pos.load(Ordering::Relaxed);
            (write_pos + OUT_RING_SIZE - read_pos) % OUT_RING_SIZE
        }
    }

    /// rodio経由のオーディオ出力
    pub struct AudioOutput {
        _stream: OutputStream,
        _sink: Sink,
        ring: Arc<OutRing>,
    }

    impl AudioOutput {
        pub fn new(sample_rate: u32) -> Result<Self, String> {
            let (stream, handle) = OutputStream::try_default()
                .map_err(|e| format!("audio output: {}", e))?;
            let sink = Sink::try_new(&handle).map_err(|e| format!("audio sink: {}", e))?;
            let ring = Arc::new(OutRing::new());
            sink.append(RingSource {
                ring: Arc::clone(&ring),
                sample_rate,
                last: 0,
            });
            Ok(AudioOutput {
                _stream: stream,
                _sink: sink,
                ring,
            })
        }

        /// ステレオインターリーブのサンプルを流し込む
        pub fn push(&mut self, samples: &[i16]) {
            if self.ring.available() + samples.len() < OUT_RING_SIZE - 2 {
                self.ring.write(samples);
            }
        }
    }

    struct RingSource {
        ring: Arc<OutRing>,
        sample_rate: u32,
        last: i16,
    }

    impl Iterator for RingSource {
        type Item = i16;
        fn next(&mut self) -> Option<i16> {
            match self.ring.read() {
                Some(s) => {
                    self.last = s;
                    Some(s)
                }
                // アンダーラン時は直近の値を減衰させて保持
                None => {
                    self.last -= self.last / 16;
                    Some(self.last)
                }
            }
        }
    }

    impl Source for RingSource {
        fn current_frame_len(&self) -> Option<usize> {
            None
        }
        fn channels(&self) -> u16 {
            2
        }
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
        fn total_duration(&self) -> Option<std::time::Duration> {
            None
        }
    }
}

#[cfg(feature = "audio")]
pub use output::AudioOutput;

// スタブ実装（rodioが無効な場合）

#[cfg(not(feature = "audio"))]
pub struct AudioOutput {
    _dummy: (),
}

#[cfg(not(feature = "audio"))]
impl AudioOutput {
    pub fn new(_sample_rate: u32) -> Result<Self, String> {
        Ok(AudioOutput { _dummy: () })
    }
    pub fn push(&mut self, _samples: &[i16]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sp_constant_matches_rate() {
        let m = AudioMixer::new(22050);
        // (22050 << 16) / 1020484
        assert_eq!(m.sp, (22050u64 << 16) / CPU_CLOCK_HZ);
        // 約0.0216 サンプル/サイクル
        assert!(m.sp > 1400 && m.sp < 1430);
    }

    #[test]
    fn interval_fills_pre_click_value() {
        let mut m = AudioMixer::new(22050);
        m.click(0); // 符号のみ反転（-256 -> +256）
        m.click(10_000);
        // 10000サイクル ≈ 216サンプル分が+256で埋まる
        let expect = ((10_000u64 * m.sp) >> 16) as usize;
        assert_eq!(m.ready(), expect);
        let mut out = vec![0i16; 8];
        m.drain(&mut out);
        assert!(out[0] > 0);
        assert_eq!(out[0], out[1]); // モノラル複製
    }

    #[test]
    fn alternating_clicks_alternate_sign() {
        let mut m = AudioMixer::new(22050);
        m.click(0);
        m.click(10_000); // +区間
        m.click(20_000); // -区間
        let seg = ((10_000u64 * m.sp) >> 16) as usize;
        let mut out = vec![0i16; seg * 2 * 2];
        m.drain(&mut out);
        assert!(out[0] > 0);
        assert!(out[(seg * 2) as usize] < 0);
    }

    #[test]
    fn offset_delta_reanchors() {
        let mut m = AudioMixer::new(22050);
        m.click(0);
        // ちょうどOFFSETサンプル分のギャップで再アンカー経路に入る
        let cycles = (SAMPLE_BUFFER_OFFSET as u64 * 65536) / m.sp + 1;
        m.click(cycles);
        assert_eq!(m.ready(), SAMPLE_BUFFER_OFFSET);
        // ギャップはゼロで埋まっている
        let mut out = vec![0i16; 4];
        m.drain(&mut out);
        assert_eq!(out, vec![0, 0, 0, 0]);
    }

    #[test]
    fn underrun_holds_last_value() {
        let mut m = AudioMixer::new(22050);
        m.click(0);
        m.click(10_000);
        let ready = m.ready();
        let mut out = vec![0i16; (ready + 4) * 2];
        m.drain(&mut out);
        // リングが尽きても最後の値を保持する
        assert_eq!(out[ready * 2], out[(ready - 1) * 2]);
    }

    #[test]
    fn sync_discards_pending_toggles() {
        let mut m = AudioMixer::new(22050);
        for i in 0..100 {
            m.click(i * 5_000);
        }
        m.sync(1_000_000);
        assert_eq!(m.ready(), 0);
        let mut out = vec![0i16; 8];
        m.drain(&mut out);
        assert_eq!(out, vec![0; 8]);
    }

    #[test]
    fn secondary_source_mixes_in() {
        let mut m = AudioMixer::new(22050);
        m.enable_secondary(true);
        m.set_secondary(1000, -1000);
        let mut out = vec![0i16; 2];
        m.drain(&mut out);
        assert!(out[0] > 0);
        assert!(out[1] < 0);
    }
}
