//! Fetch strategy selection

mod policy;
mod router;

pub use policy::{ParseStrategyError, Strategy, UnmatchedPolicy};
pub use router::{Route, RouteMatch, StrategyRouter};
