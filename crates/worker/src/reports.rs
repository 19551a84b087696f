use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;

use ruleflow_core::ActivityRecord;

/// 一个统计周期的活动汇总
#[derive(Debug, Clone, PartialEq)]
pub struct ActivitySummary {
    pub activity_count: usize,
    pub total_amount: f64,
    /// 按资源聚合的 (次数, 金额)，按资源名排序
    pub by_resource: BTreeMap<String, (usize, f64)>,
}

impl ActivitySummary {
    pub fn from_activities(activities: &[ActivityRecord]) -> Self {
        let mut by_resource: BTreeMap<String, (usize, f64)> = BTreeMap::new();
        let mut total_amount = 0.0;
        for activity in activities {
            total_amount += activity.amount;
            let entry = by_resource
                .entry(activity.resource_key.clone())
                .or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += activity.amount;
        }
        Self {
            activity_count: activities.len(),
            total_amount,
            by_resource,
        }
    }
}

/// 上一个自然月在给定时区下的UTC时间窗 `[from, until)`
pub fn previous_month_range(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = now.with_timezone(&tz);
    let (this_year, this_month) = (local.year(), local.month());
    let (prev_year, prev_month) = if this_month == 1 {
        (this_year - 1, 12)
    } else {
        (this_year, this_month - 1)
    };

    let from = tz
        .with_ymd_and_hms(prev_year, prev_month, 1, 0, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let until = tz
        .with_ymd_and_hms(this_year, this_month, 1, 0, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    (from, until)
}

/// 周期标签，如 `2026-07`
pub fn period_label(from: DateTime<Utc>, tz: Tz) -> String {
    let local = from.with_timezone(&tz);
    format!("{:04}-{:02}", local.year(), local.month())
}

/// 渲染月报HTML正文
pub fn render_report_html(subject_name: &str, period: &str, summary: &ActivitySummary) -> String {
    let mut rows = String::new();
    for (resource, (count, amount)) in &summary.by_resource {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{:.2}</td></tr>",
            escape_html(resource),
            count,
            amount
        ));
    }

    format!(
        "<html><body>\
         <h2>{period} 月度活动报告</h2>\
         <p>{name}，您好！以下是您上月的活动汇总。</p>\
         <p>活动次数: <b>{count}</b>，合计金额: <b>{total:.2}</b></p>\
         <table border=\"1\" cellpadding=\"4\">\
         <tr><th>资源</th><th>次数</th><th>金额</th></tr>{rows}</table>\
         </body></html>",
        period = period,
        name = escape_html(subject_name),
        count = summary.activity_count,
        total = summary.total_amount,
        rows = rows,
    )
}

/// 渲染活动明细CSV，表头固定
pub fn render_activities_csv(activities: &[ActivityRecord]) -> String {
    let mut out = String::from("occurred_at,resource,amount\n");
    for activity in activities {
        out.push_str(&format!(
            "{},{},{:.2}\n",
            activity.occurred_at.to_rfc3339(),
            escape_csv(&activity.resource_key),
            activity.amount
        ));
    }
    out
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
