//! Region decoding pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  DecodeWorker                    │
//! │   (tile-decoder thread, FIFO, epoch cancelled)   │
//! └───────┬──────────────────┬──────────────┬────────┘
//!         │                  │              │
//!         ▼                  ▼              ▼
//! ┌───────────────┐  ┌──────────────┐  ┌────────────┐
//! │ RegionHandle  │  │ BitmapPool   │  │ classify   │
//! │ (one at once) │  │ (reuse block)│  │ (recovery) │
//! └───────┬───────┘  └──────────────┘  └────────────┘
//!         │
//!         ▼
//! ┌───────────────┐
//! │  DataSource   │
//! └───────────────┘
//! ```
//!
//! # Components
//!
//! - [`RegionDecoder`] / [`RegionHandle`]: the decode primitive seam
//! - [`ImageRegionDecoder`]: bundled primitive built on the `image` crate
//! - [`classify`]: maps raw [`DecodeError`](crate::error::DecodeError)s to
//!   recovery classes
//! - [`DecodeWorker`]: serializes every handle operation on one thread

pub mod classify;
mod image_decoder;
mod region;
mod worker;

pub use classify::FailureClass;
pub use image_decoder::ImageRegionDecoder;
pub use region::{decoded_size, RegionDecoder, RegionHandle};
pub use worker::{
    DecodeMessage, DecodeRequest, DecodeScheduler, DecodeWorker, Epochs, WorkerContext,
    DECODE_THREAD_NAME,
};
