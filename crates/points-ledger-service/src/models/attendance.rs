//! 出席记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{AttendanceStatus, MovementSource};

/// 出席记录
///
/// 每个 (pass_id, session_id) 只能创建一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: i64,
    pub pass_id: i64,
    pub session_id: String,
    /// 奖励积分
    pub points: i64,
    pub status: AttendanceStatus,
    #[sqlx(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl AttendanceRecord {
    pub fn source_ref(&self) -> String {
        MovementSource::Attendance.source_ref(self.id)
    }

    pub fn cursor(&self) -> PendingCursor {
        PendingCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// 待处理记录的分页游标，按 (created_at, id) 排序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCursor {
    pub created_at: DateTime<Utc>,
    pub id: i64,
}
