//! Background reclaiming of topic data.

pub mod clean_at_delete;
pub mod nouse_topic;
pub mod storage;

pub use self::clean_at_delete::{CleanAtDeleteManager, CleanTask};
pub use self::nouse_topic::NoUseTopicModule;
pub use self::storage::{DataStore, LocalDataStore, RemoveStatus};
