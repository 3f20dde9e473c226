pub mod account;
pub mod health;
pub mod position;
pub mod trade;

pub use account::AccountState;
pub use health::HealthSnapshot;
pub use position::Position;
pub use trade::TradeRecord;
