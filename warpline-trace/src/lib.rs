//! Trace reconstruction from the Wire's event stream, plus persistence and
//! OTLP export.

mod collector;
mod model;
mod otlp;
mod store;

pub use collector::TraceCollector;
pub use model::{preview, Span, SpanKind, SpanStatus, Trace, PREVIEW_LENGTH};
pub use otlp::{OtlpConfig, OtlpExporter, OtlpProtocol};
pub use store::{InMemoryTraceStore, TraceQuery, TraceStore};
