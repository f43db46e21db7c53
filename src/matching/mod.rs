pub mod matcher;
pub mod orderbook;
pub mod price_level;

pub use matcher::{try_match, Aggressor, MatchDescriptor, MatchOutcome};
pub use orderbook::{OrderBook, OrderEntry, OrderKey, ProductBook};
pub use price_level::PriceLevel;
