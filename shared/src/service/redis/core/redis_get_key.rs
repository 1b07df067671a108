use std::fmt::Display;
use std::format;

// redis 키타입 정의

//chat_queue => chat_queue:{scope}
//chat_window => chat_window:{scope}:{slice}
//user_gateway => user_gateway:{user_id}

pub enum KeyType {
    ChatQueue,
    ChatWindow,
    UserGateway,
}

impl KeyType {
    pub fn get_key<T: Display>(&self, id: &T) -> String {
        match self {
            KeyType::ChatQueue => format!("chat_queue:{}", id),
            KeyType::ChatWindow => format!("chat_window:{}", id),
            KeyType::UserGateway => format!("user_gateway:{}", id),
        }
    }

    /// 시간 조각 단위 키 (chat_window 전용)
    pub fn get_slice_key<T: Display>(&self, id: &T, slice: i64) -> String {
        format!("{}:{}", self.get_key(id), slice)
    }
}
