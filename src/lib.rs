pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fsm;
pub mod listener;
pub mod message;
pub mod record;
pub mod session;

pub use error::{GatewayError, Result};
pub use fsm::{Fsm, Input, Output, Phase, Timer, Timers};
pub use message::Message;
