//! Byte copy through `dd`

use crate::error::{Error, Result};
use autodd_platform::{ByteCopier, DdRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to copy and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySpec {
    /// Source path (whole device)
    pub source: String,

    /// Destination path (partition of the prepared device)
    pub destination: String,

    /// Block size in bytes
    pub block_size: u64,

    /// Number of blocks; `None` copies until the end of the source
    pub block_count: Option<u64>,
}

impl CopySpec {
    /// Describe a copy of `block_count` blocks
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        block_size: u64,
        block_count: Option<u64>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            block_size,
            block_count,
        }
    }

    /// Bytes the copy will move, if bounded
    #[must_use]
    pub fn expected_bytes(&self) -> Option<u64> {
        self.block_count
            .and_then(|count| count.checked_mul(self.block_size))
    }

    /// The `dd` invocation for this copy
    ///
    /// Every copy syncs before `dd` exits, so elapsed time covers durable writes.
    #[must_use]
    pub fn to_request(&self) -> DdRequest {
        DdRequest {
            input: self.source.clone(),
            output: self.destination.clone(),
            block_size: self.block_size,
            count: self.block_count,
            fsync: true,
        }
    }
}

/// Result of a completed copy
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CopyReport {
    /// Wall-clock time including the final sync
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,

    /// Bytes moved
    pub transferred_bytes: u64,
}

impl CopyReport {
    /// Throughput in bytes per second
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.transferred_bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Serialize durations as fractional seconds
pub(crate) mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

/// Runs a [`CopySpec`] and checks the result
#[derive(Clone, Copy)]
pub struct CopyEngine<'a> {
    copier: &'a dyn ByteCopier,
}

impl<'a> CopyEngine<'a> {
    /// Create a copy engine over a byte copier
    pub fn new(copier: &'a dyn ByteCopier) -> Self {
        Self { copier }
    }

    /// Run the copy to completion
    ///
    /// # Errors
    ///
    /// Returns [`Error::CopyFailed`] if the copy description is invalid, `dd` fails, the
    /// transfer is short, or no time was measured.
    pub fn copy(&self, spec: &CopySpec) -> Result<CopyReport> {
        let failed = |reason: String| Error::CopyFailed {
            source_path: spec.source.clone(),
            destination: spec.destination.clone(),
            reason,
        };

        if spec.block_size == 0 {
            return Err(failed("block size must be greater than zero".to_string()));
        }
        if spec.block_count == Some(0) {
            return Err(failed("block count must be greater than zero".to_string()));
        }
        let expected = match spec.block_count {
            Some(_) => Some(
                spec.expected_bytes()
                    .ok_or_else(|| failed("transfer size overflows".to_string()))?,
            ),
            None => None,
        };

        let request = spec.to_request();
        tracing::info!("{}", request.command_line());

        let report = self
            .copier
            .copy(&request)
            .map_err(|e| failed(e.to_string()))?;

        if let Some(expected) = expected {
            if report.transferred_bytes != expected {
                return Err(failed(format!(
                    "short transfer: {} of {} bytes",
                    report.transferred_bytes, expected
                )));
            }
        }
        if report.elapsed.is_zero() {
            return Err(failed("no elapsed time measured".to_string()));
        }

        tracing::debug!(
            "Copied {} bytes in {:.3}s",
            report.transferred_bytes,
            report.elapsed.as_secs_f64()
        );

        Ok(CopyReport {
            elapsed: report.elapsed,
            transferred_bytes: report.transferred_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodd_platform::{DdReport, PlatformError};
    use std::cell::RefCell;

    struct Scripted {
        reply: RefCell<Option<autodd_platform::Result<DdReport>>>,
        seen: RefCell<Vec<DdRequest>>,
    }

    impl Scripted {
        fn new(reply: autodd_platform::Result<DdReport>) -> Self {
            Self {
                reply: RefCell::new(Some(reply)),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl ByteCopier for Scripted {
        fn copy(&self, request: &DdRequest) -> autodd_platform::Result<DdReport> {
            self.seen.borrow_mut().push(request.clone());
            self.reply.borrow_mut().take().unwrap()
        }
    }

    fn ok(bytes: u64, millis: u64) -> autodd_platform::Result<DdReport> {
        Ok(DdReport {
            transferred_bytes: bytes,
            elapsed: Duration::from_millis(millis),
        })
    }

    fn spec(bs: u64, count: Option<u64>) -> CopySpec {
        CopySpec::new("/dev/nvme0n1", "/dev/sdb1", bs, count)
    }

    #[test]
    fn test_copy_success() {
        let copier = Scripted::new(ok(4096 * 256, 500));
        let report = CopyEngine::new(&copier)
            .copy(&spec(4096, Some(256)))
            .unwrap();

        assert_eq!(report.transferred_bytes, 1_048_576);
        assert!((report.throughput() - 2_097_152.0).abs() < 1e-6);

        let seen = copier.seen.borrow();
        assert_eq!(seen[0].count, Some(256));
        assert!(seen[0].fsync);
    }

    #[test]
    fn test_request_always_syncs() {
        for count in [None, Some(1), Some(16384)] {
            let request = spec(65536, count).to_request();
            assert!(request.fsync);
            assert!(request.args().iter().any(|a| a.starts_with("conv=fsync")));
        }
    }

    #[test]
    fn test_short_transfer_fails() {
        let copier = Scripted::new(ok(4096 * 255, 500));
        let err = CopyEngine::new(&copier)
            .copy(&spec(4096, Some(256)))
            .unwrap_err();
        assert!(err.to_string().contains("short transfer"));
    }

    #[test]
    fn test_zero_elapsed_fails() {
        let copier = Scripted::new(ok(4096, 0));
        let err = CopyEngine::new(&copier)
            .copy(&spec(4096, Some(1)))
            .unwrap_err();
        assert!(err.to_string().contains("no elapsed time"));
    }

    #[test]
    fn test_invalid_spec_never_runs_dd() {
        let copier = Scripted::new(ok(0, 1));
        let engine = CopyEngine::new(&copier);
        assert!(engine.copy(&spec(0, Some(1))).is_err());
        assert!(engine.copy(&spec(4096, Some(0))).is_err());
        assert!(copier.seen.borrow().is_empty());
    }

    #[test]
    fn test_dd_failure_is_copy_failed() {
        let copier = Scripted::new(Err(PlatformError::CommandFailed(
            "dd exited with Some(1): No space left on device".to_string(),
        )));
        let err = CopyEngine::new(&copier)
            .copy(&spec(4096, Some(1)))
            .unwrap_err();
        assert!(matches!(err, Error::CopyFailed { .. }));
        assert!(err.to_string().contains("No space left"));
        assert!(err.to_string().contains("/dev/sdb1"));
    }

    #[test]
    fn test_unbounded_copy_accepts_any_size() {
        let copier = Scripted::new(ok(123_456, 10));
        let report = CopyEngine::new(&copier).copy(&spec(32768, None)).unwrap();
        assert_eq!(report.transferred_bytes, 123_456);
    }

    #[test]
    fn test_expected_bytes() {
        assert_eq!(spec(4096, Some(4)).expected_bytes(), Some(16384));
        assert_eq!(spec(4096, None).expected_bytes(), None);
        assert_eq!(spec(u64::MAX, Some(2)).expected_bytes(), None);
    }

    #[test]
    fn test_report_json_uses_seconds() {
        let report = CopyReport {
            elapsed: Duration::from_millis(1500),
            transferred_bytes: 10,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"elapsed\":1.5"));
    }
}
