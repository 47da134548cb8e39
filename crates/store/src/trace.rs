//! Operation tracing.
//!
//! When a tracer is set on the multi-store, every KV operation that flows
//! through a [`KvView`](crate::substore::KvView) or a merged branch write
//! emits one JSON line to the trace writer: the operation kind, hex-encoded
//! key and value, and the current trace context (merged by
//! `set_tracing_context`, typically block metadata).

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;

/// Contextual metadata attached to every traced operation.
pub type TraceContext = BTreeMap<String, String>;

pub(crate) const TRACE_OP_READ: &str = "read";
pub(crate) const TRACE_OP_WRITE: &str = "write";
pub(crate) const TRACE_OP_DELETE: &str = "delete";

#[derive(Serialize)]
struct TraceOperation<'a> {
    operation: &'static str,
    key: String,
    value: String,
    metadata: &'a TraceContext,
}

/// Serializes traced operations onto a writer.
pub(crate) struct Tracer {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl Tracer {
    pub(crate) fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Write one operation record.
    ///
    /// # Panics
    ///
    /// Panics if the trace writer fails; tracing is opt-in and a broken
    /// writer means the operator is losing the audit stream they asked for.
    pub(crate) fn trace(
        &self,
        operation: &'static str,
        key: &[u8],
        value: Option<&[u8]>,
        context: &TraceContext,
    ) {
        let record = TraceOperation {
            operation,
            key: hex::encode(key),
            value: value.map(hex::encode).unwrap_or_default(),
            metadata: context,
        };

        let mut writer = self.writer.lock().unwrap();
        serde_json::to_writer(&mut *writer, &record)
            .expect("failed to write trace operation");
        writer
            .write_all(b"\n")
            .expect("failed to write trace operation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// A Write impl backed by shared memory so tests can inspect the output.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_trace_records_are_json_lines() {
        let buf = SharedBuf::default();
        let tracer = Tracer::new(Box::new(buf.clone()));

        let mut context = TraceContext::new();
        context.insert("blockHeight".into(), "12".into());

        tracer.trace(TRACE_OP_WRITE, b"key", Some(b"value"), &context);
        tracer.trace(TRACE_OP_DELETE, b"key", None, &context);

        let bytes = buf.0.lock().unwrap().clone();
        let lines: Vec<&str> = std::str::from_utf8(&bytes)
            .unwrap()
            .lines()
            .collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["operation"], "write");
        assert_eq!(first["key"], hex::encode(b"key"));
        assert_eq!(first["value"], hex::encode(b"value"));
        assert_eq!(first["metadata"]["blockHeight"], "12");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["operation"], "delete");
        assert_eq!(second["value"], "");
    }
}
