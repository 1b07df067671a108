pub mod redis_get_key;
pub mod retry_operation;
