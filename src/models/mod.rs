pub mod fill;
pub mod market_state;
pub mod offer;
pub mod order;
pub mod recipe;
pub mod team;

pub use fill::Fill;
pub use market_state::MarketState;
pub use offer::{Offer, OfferStatus};
pub use order::{Mode, Order, OrderStatus, Side};
pub use recipe::{Recipe, RecipeType};
pub use team::{Team, SERVER_TEAM};
