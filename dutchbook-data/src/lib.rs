//! Market data layer for the dutchbook arbitrage engine.
//!
//! Two venue feeds produce very different raw material:
//!
//! - **Kalshi** delivers bids only, as cent-priced deltas over an
//!   authenticated WebSocket. Both ask ladders are *synthetic*, reconstructed
//!   from the opposing bid ladder via the 1.00-reflection identity.
//! - **Polymarket** delivers full native books per outcome token, with
//!   string-decimal prices.
//!
//! The [`normalizer`] folds both into one [`books::MarketBook`] per
//! `(venue, market)` and publishes an immutable snapshot after every
//! consistent update. Downstream consumers therefore see a totally ordered
//! sequence of snapshots per market and never a half-applied update.
//!
//! Sequence gaps and crossed books are handled locally: the affected book is
//! parked, a resync request is emitted, and updates are discarded until the
//! next snapshot arrives.

pub mod books;
pub mod kalshi;
pub mod normalizer;
pub mod polymarket;
pub mod recorder;

pub use books::{BookError, Ladder, Level, MarketBook};
pub use normalizer::{BookUpdate, Normalizer, ResyncRequest, TokenRegistry};
