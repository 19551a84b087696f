use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 主体快照：规则条件与动作作用的对象（用户/会员）
///
/// 主体身份由外部系统持有，引擎只读取谓词评估和调度所需的属性。
/// 快照携带用于谓词评估的活动记录，使谓词保持纯函数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    /// 聊天通知的webhook地址，存在即视为开通了chat渠道
    pub webhook_url: Option<String>,
    pub receive_reminders: bool,
    /// 主体自选的提醒时刻，`"HH:MM"` 格式
    pub preferred_time: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_reminder_sent_at: Option<DateTime<Utc>>,
    /// 谓词评估窗口内的活动记录
    pub activities: Vec<ActivityRecord>,
}

impl Subject {
    /// 主体开通的通知渠道
    pub fn available_channels(&self) -> Vec<&'static str> {
        let mut channels = Vec::new();
        if self.webhook_url.is_some() {
            channels.push("chat");
        }
        if self.email.is_some() {
            channels.push("email");
        }
        channels
    }
}

/// 一条计费活动记录（预订/消费等）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub occurred_at: DateTime<Utc>,
    pub amount: f64,
    /// 活动关联的资源标识，用于分组统计
    pub resource_key: String,
}
