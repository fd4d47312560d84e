pub mod daily_stats;
pub mod user_providers;
pub mod users;
pub mod virtual_keys;

pub use daily_stats::Entity as DailyStats;
pub use user_providers::Entity as UserProviders;
pub use users::Entity as Users;
pub use virtual_keys::Entity as VirtualKeys;
