//! camrec - camera and microphone capture straight to a movie file.
//!
//! This is the library crate behind the `camrec` binary. It provides the
//! capture device session, the encode sink, the pipeline controller that
//! ties them together, and a reader that summarizes finished files.

pub mod capture;
pub mod encode;
pub mod recorder;
pub mod summary;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use recorder::{PipelineConfig, PipelineController, PipelineEvent, PipelineState};

/// Initialize tracing/logging. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camrec=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::info!("Starting camrec v{}", env!("CARGO_PKG_VERSION"));
}
