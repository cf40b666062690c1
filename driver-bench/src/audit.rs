//! Memory auditing around a benchmark case.
//!
//! Backends that can account for their own allocations expose a
//! [`MemoryAuditor`]. The runner opens an [`AuditSession`] before the
//! connection is opened and reports it after the connection is closed; any
//! allocation still outstanding at that point is a leak and fails the case.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{BenchError, DriverError, Result};

/// Sessions dropped without a report since the last [`AuditSession::begin`].
static UNREPORTED: AtomicUsize = AtomicUsize::new(0);

/// Allocation counts of one audited case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub allocations: u64,
    pub frees: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.allocations == self.frees && self.bytes_allocated == self.bytes_freed
    }

    /// Allocations never released.
    pub fn outstanding(&self) -> u64 {
        self.allocations.saturating_sub(self.frees)
    }

    pub fn leaked_bytes(&self) -> u64 {
        self.bytes_allocated.saturating_sub(self.bytes_freed)
    }

    /// Human readable description of the imbalance, `None` when clean.
    pub fn anomaly(&self) -> Option<String> {
        if self.is_clean() {
            None
        } else if self.frees > self.allocations || self.bytes_freed > self.bytes_allocated {
            Some(format!(
                "{} free(s) of {} bytes against {} allocation(s) of {} bytes: \
                 memory from outside the case was released inside it",
                self.frees, self.bytes_freed, self.allocations, self.bytes_allocated
            ))
        } else {
            Some(format!(
                "{} allocation(s) totalling {} bytes never released",
                self.outstanding(),
                self.leaked_bytes()
            ))
        }
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} allocations, {} frees, {} bytes, {} leaked",
            self.allocations,
            self.frees,
            self.bytes_allocated,
            self.leaked_bytes()
        )
    }
}

/// Allocation accounting for one backend.
///
/// `start` begins recording and `report` ends it. Implementations may share
/// process-wide state, so at most one session runs at a time.
pub trait MemoryAuditor {
    fn start(&self) -> Result<(), DriverError>;
    fn report(&self) -> Result<AuditReport, DriverError>;
}

/// A running audit, bound to one case.
///
/// Must be closed with [`AuditSession::report`]. Dropping it without a report
/// ends the underlying session and poisons the next [`AuditSession::begin`].
pub struct AuditSession<'a> {
    auditor: &'a dyn MemoryAuditor,
    case: String,
    reported: bool,
}

impl<'a> AuditSession<'a> {
    pub fn begin(auditor: &'a dyn MemoryAuditor, case: &str) -> Result<Self> {
        let skipped = UNREPORTED.swap(0, Ordering::AcqRel);
        if skipped > 0 {
            return Err(BenchError::AuditMisuse(format!(
                "{skipped} earlier audit session(s) were dropped without a report"
            )));
        }
        auditor.start().map_err(|source| BenchError::Setup {
            case: case.to_string(),
            stage: "starting the memory audit",
            source,
        })?;
        log::debug!("{case}: memory audit started");
        Ok(Self {
            auditor,
            case: case.to_string(),
            reported: false,
        })
    }

    pub fn case(&self) -> &str {
        &self.case
    }

    /// End the session. Leaks turn into [`BenchError::AuditAnomaly`].
    pub fn report(mut self) -> Result<AuditReport> {
        self.reported = true;
        let report = self
            .auditor
            .report()
            .map_err(|source| BenchError::Teardown {
                case: self.case.clone(),
                stage: "reporting the memory audit",
                source,
            })?;
        log::debug!("{}: memory audit: {report}", self.case);
        match report.anomaly() {
            Some(detail) => Err(BenchError::AuditAnomaly {
                case: self.case.clone(),
                detail,
            }),
            None => Ok(report),
        }
    }
}

impl Drop for AuditSession<'_> {
    fn drop(&mut self) {
        if self.reported {
            return;
        }
        log::error!("{}: audit session dropped without a report", self.case);
        UNREPORTED.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = self.auditor.report() {
            log::error!("{}: closing abandoned audit session: {err}", self.case);
        }
    }
}

impl fmt::Debug for AuditSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditSession")
            .field("case", &self.case)
            .field("reported", &self.reported)
            .finish()
    }
}
