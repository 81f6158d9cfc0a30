//! Client side: the player proxy and its call and event machinery.
//!
//! # Example
//!
//! ```ignore
//! use playerwire::client::{ClientConfig, PlayerClient};
//!
//! let client = PlayerClient::connect(ClientConfig::new(path)).await?;
//! let handle = client.create().await?;
//! client
//!     .prepare_async(|_event| println!("prepared"))
//!     .await?;
//! client.start().await?;
//! ```

mod config;
mod correlator;
mod event_queue;
mod events;
mod player;

pub use config::{ClientConfig, DEFAULT_CALL_TIMEOUT};
pub use correlator::{Correlator, PendingCall};
pub use event_queue::{EventCallback, EventQueue};
pub use events::{DecodedFrame, Event};
pub use player::PlayerClient;
