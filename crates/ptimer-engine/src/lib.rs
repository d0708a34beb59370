//! Ptimer Engine
//!
//! The async facade collaborators use to parse and compile timers. An
//! [`Engine`] owns one worker, completes a readiness handshake with it and
//! then correlates replies to concurrent requests. Parse and compile work
//! against the caller's [`AssetResolver`]. A [`Session`] owns one resolver
//! and layers the asset revocation policy on top for interactive editing.
//!
//! ```no_run
//! # async fn example() -> Result<(), ptimer_engine::EngineError> {
//! use ptimer_engine::{AssetResolver, Engine, EngineConfig};
//!
//! let engine = Engine::spawn(EngineConfig::default()).await?;
//! let resolver = AssetResolver::new();
//! let document = engine.parse_file("breakfast.ptimer", &resolver).await?;
//! let compiled = engine.compile(&document, &resolver).await?;
//! println!("{} ({} bytes)", compiled.file_name, compiled.data.len());
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod session;

pub use engine::{Compiled, Engine, EngineConfig, EngineState};
pub use error::{EngineError, ProtocolError};
pub use ptimer_asset::AssetResolver;
pub use session::Session;
