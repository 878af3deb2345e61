pub mod error;
pub mod example;
pub mod hotpot;
pub mod reader;

pub use error::IngestError;
pub use example::{AnswerCandidate, Annotations, DocToken, RawExample};
pub use hotpot::{HotpotExample, adapt_hotpot_example, normalize_whitespace};
pub use reader::{DatasetKind, ExampleReader, list_inputs};
