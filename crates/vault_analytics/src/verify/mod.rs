//! Reproducible export digests.

mod digest;

pub use digest::{
    normalize_for_hash, report_digest, verify_export, ExportEnvelope, VerificationResult,
    VerifyError, EXPORT_VERSION,
};
