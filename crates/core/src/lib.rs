#![forbid(unsafe_code)]

pub mod error;
pub mod lookup;
pub mod model;
pub mod time;

pub use error::Error;
pub use lookup::ChallengeLookup;
pub use time::Clock;
