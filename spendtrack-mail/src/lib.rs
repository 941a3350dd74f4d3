//! spendtrack-mail: candidate selection and field extraction

pub mod backend;
pub mod extract;
pub mod filter;
pub mod html;

pub use backend::{Candidate, MailboxBackend, MessagePage};
pub use extract::{composite_timestamp, ExtractError, FieldExtractor};
pub use filter::MessageFilter;
pub use html::visible_text;
