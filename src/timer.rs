//! 協調タイマーホイール
//!
//! CPUサイクルを通貨とするタイマー群。各命令の実行後に消費サイクル分だけ
//! remainingが減り、0以下になるとコールバックが発火する。コールバックの
//! 戻り値が次のremainingになる。remaining == 0 のタイマーは停止状態。
//! 同一サイクルで複数のタイマーが満了した場合は登録順に発火する。

pub type TimerId = usize;

/// タイマーの種別（発火時のディスパッチ先）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// VBLフェーズ切り替え（ビデオ）
    Vbl,
    /// ドライブモーターのスピンダウン
    MotorOff,
}

struct Timer {
    kind: TimerKind,
    remaining: i64,
    name: &'static str,
}

/// タイマーホイール本体
#[derive(Default)]
pub struct TimerWheel {
    timers: Vec<Timer>,
}

impl TimerWheel {
    pub fn new() -> Self {
        TimerWheel { timers: Vec::new() }
    }

    /// タイマーを登録する。initial == 0 なら停止状態で登録。
    pub fn register(&mut self, kind: TimerKind, initial: i64, name: &'static str) -> TimerId {
        let id = self.timers.len();
        self.timers.push(Timer {
            kind,
            remaining: initial.max(0),
            name,
        });
        log::debug!("timer: registered {} (id={})", name, id);
        id
    }

    /// remainingを設定する（正の値で再始動）
    pub fn set(&mut self, id: TimerId, remaining: i64) {
        if let Some(t) = self.timers.get_mut(id) {
            t.remaining = remaining.max(0);
        }
    }

    /// 現在のremainingを取得
    pub fn get(&self, id: TimerId) -> i64 {
        self.timers.get(id).map_or(0, |t| t.remaining)
    }

    pub fn kind(&self, id: TimerId) -> Option<TimerKind> {
        self.timers.get(id).map(|t| t.kind)
    }

    pub fn name(&self, id: TimerId) -> &'static str {
        self.timers.get(id).map_or("?", |t| t.name)
    }

    /// 全アクティブタイマーをcycles分進め、満了したタイマーのidを
    /// 登録順でdueに積む。発火処理は呼び出し側が行い、rearmで再装填する。
    pub fn advance(&mut self, cycles: u64, due: &mut Vec<TimerId>) {
        for (id, t) in self.timers.iter_mut().enumerate() {
            if t.remaining == 0 {
                continue;
            }
            t.remaining -= cycles as i64;
            if t.remaining <= 0 {
                due.push(id);
            }
        }
    }

    /// コールバックの戻り値を新しいremainingとして装填する。
    /// 0以下は停止。
    pub fn rearm(&mut self, id: TimerId, next: i64) {
        if let Some(t) = self.timers.get_mut(id) {
            t.remaining = next.max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_registration_order() {
        let mut w = TimerWheel::new();
        let a = w.register(TimerKind::Vbl, 10, "a");
        let b = w.register(TimerKind::MotorOff, 10, "b");
        let mut due = Vec::new();
        w.advance(10, &mut due);
        assert_eq!(due, vec![a, b]);
    }

    #[test]
    fn zero_remaining_disables() {
        let mut w = TimerWheel::new();
        let id = w.register(TimerKind::MotorOff, 5, "motor");
        let mut due = Vec::new();
        w.advance(5, &mut due);
        assert_eq!(due, vec![id]);
        w.rearm(id, 0);
        due.clear();
        w.advance(100, &mut due);
        assert!(due.is_empty());
        // setで再始動できる
        w.set(id, 3);
        w.advance(3, &mut due);
        assert_eq!(due, vec![id]);
    }

    #[test]
    fn rearm_value_becomes_new_remaining() {
        let mut w = TimerWheel::new();
        let id = w.register(TimerKind::Vbl, 100, "vbl");
        let mut due = Vec::new();
        w.advance(250, &mut due);
        assert_eq!(due, vec![id]);
        w.rearm(id, 40);
        assert_eq!(w.get(id), 40);
    }
}
