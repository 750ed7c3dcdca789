//! ポーリング間隔の決定
//!
//! 状態を持たない純粋関数。優先順位は 配信中 → 終了直後 → ピーク時間帯 → 既定。

use chrono::{DateTime, TimeZone, Timelike};
use std::time::Duration;

/// 配信中の間隔
pub const LIVE_INTERVAL: Duration = Duration::from_secs(60);
/// 終了直後の再開待ち間隔
pub const RESTART_INTERVAL: Duration = Duration::from_secs(180);
/// ピーク時間帯の間隔
pub const PEAK_INTERVAL: Duration = Duration::from_secs(180);
/// 既定の間隔
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(600);

/// 終了からこの秒数未満なら再開待ちとみなす
const RESTART_WINDOW_SECS: i64 = 540;
/// ピーク時間帯 [16, 18)
const PEAK_HOURS: std::ops::Range<u32> = 16..18;

/// 次のポーリングまでの待ち時間
pub fn next_poll_delay<Tz: TimeZone>(
    is_live: bool,
    last_offline_at: Option<&DateTime<Tz>>,
    now: &DateTime<Tz>,
) -> Duration {
    if is_live {
        return LIVE_INTERVAL;
    }

    if let Some(offline_at) = last_offline_at {
        let elapsed = now.clone().signed_duration_since(offline_at.clone());
        if elapsed.num_seconds() < RESTART_WINDOW_SECS {
            return RESTART_INTERVAL;
        }
    }

    if PEAK_HOURS.contains(&now.hour()) {
        return PEAK_INTERVAL;
    }

    DEFAULT_INTERVAL
}
