//! 消息时间的展示格式
//!
//! 客户端按 `Oct. 16, 2026` / `1:30 p.m.` 这种格式渲染日期与时间，
//! 推送事件和历史接口共用这里的实现。

use chrono::Timelike;

use crate::value_objects::Timestamp;

/// 日期，例如 `Jan. 05, 2024`
pub fn format_date(ts: &Timestamp) -> String {
    ts.format("%b. %d, %Y").to_string()
}

/// 12 小时制时间；整点省略分钟，零点与正午分别显示 `midnight` / `noon`
pub fn format_time(ts: &Timestamp) -> String {
    let (hour, minute) = (ts.hour(), ts.minute());
    match (hour, minute) {
        (0, 0) => return "midnight".to_owned(),
        (12, 0) => return "noon".to_owned(),
        _ => {}
    }

    let suffix = if hour < 12 { "a.m." } else { "p.m." };
    let hour12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    if minute == 0 {
        format!("{hour12} {suffix}")
    } else {
        format!("{hour12}:{minute:02} {suffix}")
    }
}

/// 日期与时间合并，例如 `Jan. 05, 2024. 1:30 p.m.`
pub fn format_created(ts: &Timestamp) -> String {
    format!("{}. {}", format_date(ts), format_time(ts))
}
