//! # Call Statistics
//!
//! A [`StatsContext`] is handed by `&mut` to every layer that issues a call on behalf of the
//! caller. Each outbound call starts a fresh record with [`StatsContext::begin`]; the layers
//! downstream fill in the metadata and byte counts as the call progresses.
//!
//! Extraction is explicit: [`StatsContext::snapshot`] returns `None` when no call was ever
//! started, so "nothing recorded" is never confused with "zero-valued stats".
use std::time::{Duration, Instant};
use tonic::metadata::MetadataMap;

/// Statistics captured for a single call.
#[derive(Debug, Clone)]
pub struct CallStats {
    full_method: String,
    request_headers: MetadataMap,
    response_headers: MetadataMap,
    response_trailers: MetadataMap,
    request_size: usize,
    response_size: usize,
    duration: Duration,
}

impl CallStats {
    /// The full method path, e.g. `/grpc.reflection.v1.ServerReflection/ServerReflectionInfo`.
    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    pub fn request_headers(&self) -> &MetadataMap {
        &self.request_headers
    }

    pub fn response_headers(&self) -> &MetadataMap {
        &self.response_headers
    }

    pub fn response_trailers(&self) -> &MetadataMap {
        &self.response_trailers
    }

    /// Encoded request payload size in bytes.
    pub fn request_size(&self) -> usize {
        self.request_size
    }

    /// Encoded response payload size in bytes.
    pub fn response_size(&self) -> usize {
        self.response_size
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[derive(Debug)]
struct ActiveCall {
    stats: CallStats,
    started: Instant,
    finished: bool,
}

/// Single-writer accumulator for the latest call issued within a scope.
#[derive(Debug, Default)]
pub struct StatsContext {
    current: Option<ActiveCall>,
}

impl StatsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording a new call, discarding whatever the previous call left behind.
    pub fn begin(&mut self, full_method: impl Into<String>) {
        self.current = Some(ActiveCall {
            stats: CallStats {
                full_method: full_method.into(),
                request_headers: MetadataMap::new(),
                response_headers: MetadataMap::new(),
                response_trailers: MetadataMap::new(),
                request_size: 0,
                response_size: 0,
                duration: Duration::ZERO,
            },
            started: Instant::now(),
            finished: false,
        });
    }

    pub fn record_request_headers(&mut self, headers: &MetadataMap) {
        if let Some(call) = self.current.as_mut() {
            call.stats.request_headers = headers.clone();
        }
    }

    pub fn record_response_headers(&mut self, headers: &MetadataMap) {
        if let Some(call) = self.current.as_mut() {
            call.stats.response_headers = headers.clone();
        }
    }

    pub fn record_trailers(&mut self, trailers: &MetadataMap) {
        if let Some(call) = self.current.as_mut() {
            call.stats.response_trailers = trailers.clone();
        }
    }

    pub fn add_request_bytes(&mut self, bytes: usize) {
        if let Some(call) = self.current.as_mut() {
            call.stats.request_size += bytes;
        }
    }

    pub fn add_response_bytes(&mut self, bytes: usize) {
        if let Some(call) = self.current.as_mut() {
            call.stats.response_size += bytes;
        }
    }

    /// Stamps the duration of the current call. Later calls to `finish` are ignored.
    pub fn finish(&mut self) {
        if let Some(call) = self.current.as_mut()
            && !call.finished
        {
            call.stats.duration = call.started.elapsed();
            call.finished = true;
        }
    }

    /// Returns the statistics of the latest call, or `None` if no call was started.
    ///
    /// A call that was abandoned before completion (e.g. on deadline) reports the time
    /// elapsed up to the snapshot.
    pub fn snapshot(&self) -> Option<CallStats> {
        self.current.as_ref().map(|call| {
            let mut stats = call.stats.clone();
            if !call.finished {
                stats.duration = call.started.elapsed();
            }
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::StatsContext;
    use tonic::metadata::{MetadataMap, MetadataValue};

    #[test]
    fn absent_until_a_call_begins() {
        let mut stats = StatsContext::new();

        stats.add_request_bytes(10);
        stats.finish();

        assert!(stats.snapshot().is_none());
    }

    #[test]
    fn records_a_completed_call() {
        let mut stats = StatsContext::new();
        let mut headers = MetadataMap::new();
        headers.insert("x-team", MetadataValue::from_static("core"));

        stats.begin("/pkg.Service/Method");
        stats.record_request_headers(&headers);
        stats.add_request_bytes(4);
        stats.add_request_bytes(6);
        stats.add_response_bytes(32);
        stats.finish();

        let snapshot = stats.snapshot().expect("call was started");
        assert_eq!(snapshot.full_method(), "/pkg.Service/Method");
        assert_eq!(snapshot.request_size(), 10);
        assert_eq!(snapshot.response_size(), 32);
        assert_eq!(
            snapshot.request_headers().get("x-team").unwrap(),
            "core"
        );
        assert!(snapshot.response_trailers().is_empty());
    }

    #[test]
    fn a_new_call_replaces_the_previous_one() {
        let mut stats = StatsContext::new();

        stats.begin("/first.Service/A");
        stats.add_response_bytes(100);
        stats.finish();
        stats.begin("/second.Service/B");
        stats.finish();

        let snapshot = stats.snapshot().unwrap();
        assert_eq!(snapshot.full_method(), "/second.Service/B");
        assert_eq!(snapshot.response_size(), 0);
    }
}
