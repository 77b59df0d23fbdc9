pub use crate::error::*;
pub use crate::event::*;

pub use crate::delay::DelayFlags;
pub use crate::encoder::*;
pub use crate::output::*;
pub use crate::packet::*;
pub use crate::pause::*;
pub use crate::service::*;
pub use crate::sink::*;
pub use crate::source::*;
pub use crate::types::*;
