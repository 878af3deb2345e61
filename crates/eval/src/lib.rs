pub mod check;
pub mod normalize;
pub mod scoring;

pub use check::{DatasetAudit, LengthStats, RecordCheck, audit_file, audit_records, check_record};
pub use normalize::{expand_to_aliases, normalize_answer};
pub use scoring::{F1Score, exact_match, f1_score};
