pub mod builder;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod interface;
pub mod lease;
pub mod message;
pub mod net;
pub mod options;
pub mod platform;
pub mod state;

pub use config::{ClientConfig, Fqdn, RunMode};
pub use engine::Engine;
pub use error::{Error, Result};
pub use interface::Interface;
pub use lease::Lease;
pub use message::{DhcpMessage, MessageType};
pub use options::{OptionValue, Route};
pub use platform::{Host, TimerEvent};
pub use state::{DhcpState, IfState};
