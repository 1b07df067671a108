use chrono::{DateTime, Local, Utc};

pub struct CurrentTime {
    pub current_time: String,
}

impl CurrentTime {
    pub fn new() -> Self {
        let now: DateTime<Local> = Local::now();
        Self {
            current_time: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// 현재 Unix 시간 (밀리초)
    pub fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// 현재 Unix 시간 (초)
    pub fn now_secs() -> i64 {
        Utc::now().timestamp()
    }

    /// 시간 조각 번호: floor(now / slice)
    pub fn slice_index(now_millis: i64, slice_secs: u64) -> i64 {
        let slice_millis = (slice_secs.max(1) * 1000) as i64;
        now_millis.div_euclid(slice_millis)
    }
}

impl Default for CurrentTime {
    fn default() -> Self {
        Self::new()
    }
}
