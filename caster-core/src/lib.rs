mod captions;
mod delay;
mod interleave;
mod reconnect;
mod thread_utils;

pub mod error;
pub mod event;

mod encoder;
pub use encoder::*;

mod output;
pub use output::*;

mod packet;
pub use packet::*;

mod pause;
pub use pause::*;

mod service;
pub use service::*;

mod sink;
pub use sink::*;

mod source;
pub use source::*;

mod types;
pub use types::*;

pub use delay::DelayFlags;

mod prelude;
