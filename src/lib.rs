pub mod client;
pub mod config;
pub mod contacts;
pub mod error;
pub mod events;
pub mod login;
pub mod message;
pub mod profile;
pub mod qrcode;
pub mod session;
pub mod sync;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{Config, ServerGroup};
pub use contacts::{Contact, ContactKind, ContactList, NamePattern};
pub use error::{ClientError, Result};
pub use events::EventKind;
pub use login::LoginState;
pub use message::{Message, MessageKind};
pub use sync::StopReason;
pub use transport::{Response, Transport};
