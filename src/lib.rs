//! # fdc3-router - Desktop Agent Message Router
//!
//! The interop core of an FDC3-style desktop agent:
//! - **Channels**: user, system, app and private channels with context history
//! - **Intents**: candidate search, disambiguation, launch-and-wait, results
//! - **Router**: one serialized transaction per inbound message, two dialects
//!
//! Transport, app launching, the app directory and the resolver UI are
//! supplied by the host through the traits in [`platform`] and [`appd`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fdc3_router::appd::StaticDirectory;
//! use fdc3_router::platform::ChannelDelivery;
//! use fdc3_router::protocol::{Dialect, HelloPayload, InboundMessage, Request};
//! use fdc3_router::{InstanceId, MessageRouter, RouterConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> fdc3_router::Result<()> {
//!     let delivery = Arc::new(ChannelDelivery::new());
//!     let router = MessageRouter::builder(RouterConfig::default())
//!         .with_delivery(delivery.clone())
//!         .with_directory(Arc::new(StaticDirectory::from_file("apps.json")?))
//!         .build()?;
//!
//!     let id = InstanceId::generate();
//!     let mut inbox = delivery.connect(&id);
//!     let hello = Request::Hello(HelloPayload { app_id: "blotter".into(), title: None });
//!     router.handle_inbound_message(&id, InboundMessage::generate(Dialect::V2, hello)).await;
//!
//!     while let Some(message) = inbox.recv().await {
//!         println!("{}", message.to_wire());
//!     }
//!     Ok(())
//! }
//! ```

pub mod appd;
pub mod channel;
pub mod context;
pub mod core;
pub mod instance;
pub mod intent;
pub mod monitoring;
pub mod pending;
pub mod platform;
pub mod protocol;
pub mod router;

pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{AppIdentifier, InstanceId, ListenerId, RequestId};
pub use context::Context;
pub use router::{MessageRouter, RouterBuilder, RouterConfig};
