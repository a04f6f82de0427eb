pub mod error;
pub mod operation;
pub mod record;
pub mod traits;

pub use self::error::*;
pub use self::operation::*;
pub use self::record::*;
pub use self::traits::*;
