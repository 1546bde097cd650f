//! Every error type the library can return, collected in one place.

pub use crate::basis::{CheckListError, OversoldPolicyError};
pub use crate::imports::robinhood::ActivityError;
pub use crate::model::{CheckpointError, ConvertAmountError};
