pub mod alarms;
pub mod schedule_kv;
pub mod sleep_records;
