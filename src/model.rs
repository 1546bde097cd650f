pub use self::{amount::*, anomaly::*, checkpoint::*, gains::*, income::*, stats::*, transaction::*};

mod amount;
mod anomaly;
pub(crate) mod checkpoint;
mod gains;
mod income;
mod stats;
pub(crate) mod transaction;
