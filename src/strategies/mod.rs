//! Trading strategies - Strategy framework

pub mod market_making;
pub mod mean_reversion;
pub mod momentum;
pub mod stat_arb;
pub mod traits;

pub use market_making::{MarketMaker, MarketMakingParams};
pub use mean_reversion::{ExitReason, MeanReversionParams, MeanReversionStrategy};
pub use momentum::{MomentumParams, MomentumStrategy};
pub use stat_arb::{PairSignal, StatArbParams, StatisticalArbitrage};
pub use traits::{Strategy, StrategyRunner};
