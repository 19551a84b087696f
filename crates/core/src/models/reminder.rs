use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 提醒作业：幂等投递单元
///
/// 由时间型提醒规划器或规则执行器创建。同一 `(subject_id, scheduled_at)`
/// 最多存在一条 `Pending` 记录，重复创建在该键上是幂等的。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderJob {
    pub id: i64,
    pub subject_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReminderJob {
    pub fn is_pending(&self) -> bool {
        self.status == ReminderStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReminderStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "SKIPPED")]
    Skipped,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "PENDING",
            ReminderStatus::Sent => "SENT",
            ReminderStatus::Skipped => "SKIPPED",
            ReminderStatus::Failed => "FAILED",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ReminderStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ReminderStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "PENDING" => Ok(ReminderStatus::Pending),
            "SENT" => Ok(ReminderStatus::Sent),
            "SKIPPED" => Ok(ReminderStatus::Skipped),
            "FAILED" => Ok(ReminderStatus::Failed),
            _ => Err(format!("Invalid reminder status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ReminderStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}
