//! Span loss demos
//!
//! Command-line tools around the `moment-loss` crate, useful for checking
//! loss values and diagnostics of batches dumped from a training run.
//!
//! ## Usage
//!
//! ```bash
//! # Evaluate a recorded batch with S_Diff and S_Q_P enabled
//! cargo run --bin span_loss -- eval --batch demos/data/sample_batch.json --term 1 --term 3
//!
//! # Evaluate with a saved loss configuration
//! cargo run --bin span_loss -- eval --batch batch.json --config loss.json
//!
//! # Write the default loss configuration
//! cargo run --bin span_loss -- config --output loss.json
//! ```

pub mod backend;
pub mod batch;

pub use backend::{create_device, get_backend_name, SelectedBackend, SelectedDevice};
pub use batch::{BatchFile, BatchTensors, LossReport};
