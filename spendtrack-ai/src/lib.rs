//! spendtrack-ai: generative resolution of coarse records into
//! transaction JSON

pub mod backend;
pub mod cleanup;
pub mod hints;
pub mod prompt;
pub mod resolver;

pub use backend::ModelBackend;
pub use cleanup::clean_model_response;
pub use hints::hint_category;
pub use prompt::build_prompt;
pub use resolver::{CallRecord, CategoryResolver, ResolveError};
