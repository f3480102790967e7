//! Types and traits for recording metrics of update cycles.
//!
//! Components do not write metrics to a global logger. Instead, a [`Recorder`] is
//! injected at construction time and receives one [`Record`] per event of interest,
//! for example one per successful policy update.
//!
//! ```rust
//! use trellis_core::record::{BufferedRecorder, Record, RecordValue, Recorder};
//!
//! let mut recorder = BufferedRecorder::new();
//! let mut record = Record::from_scalar("version", 1.0);
//! record.insert("updated_policies", RecordValue::String("p1".to_string()));
//! recorder.write(record);
//! assert_eq!(recorder.len(), 1);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
