//! # wa-gateway
//!
//! Multi-tenant gateway core bridging WhatsApp Web sessions to HTTP webhook
//! endpoints: incoming messages are filtered (group mention policy),
//! forwarded to a configured webhook with retry and media handling, and the
//! webhook's textual reply is sent back into the chat under a typing
//! indicator. QR pairing and status transitions fan out to dashboard
//! subscribers.
//!
//! The WhatsApp protocol stack itself stays external: production wires a
//! real client library behind [`wa::WaClientFactory`], while
//! [`wa::mock`] ships a scriptable stand-in.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wa_gateway::{
//!     broadcast::Broadcaster, config::GatewayConfig, recovery,
//!     registry::SessionRegistry, repo::SqliteRepository,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::from_env();
//!     let repo = Arc::new(SqliteRepository::connect(&config.database_url).await?);
//!     let broadcaster = Broadcaster::new(config.subscriber_queue_capacity);
//!     let factory = todo!("wire the protocol library here");
//!     let registry = SessionRegistry::new(
//!         config, repo.clone(), repo, factory, broadcaster,
//!     );
//!     recovery::reconnect_stored_sessions(&registry).await;
//!     // REST/WS layer drives registry.connect / broadcast::pump_subscriber...
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod recovery;
pub mod registry;
pub mod repo;
pub mod runtime;
pub mod types;
pub mod wa;
pub mod webhook;

pub use broadcast::{BroadcastKind, Broadcaster, OriginPolicy};
pub use config::{GatewayConfig, WebhookConfig};
pub use error::{ClientError, DispatchError, Error, Result, StoreError};
pub use registry::{ConnectOutcome, SessionRegistry};
pub use repo::{MemoryRepository, SessionRepository, SqliteRepository};
pub use types::{Jid, MessageType, SessionStatus};
pub use wa::{WaClient, WaClientFactory, WaEvent};
pub use webhook::{WebhookDispatcher, WebhookPayload};
