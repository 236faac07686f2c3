pub mod dispatcher;
pub mod extractor;
pub mod gemini;
pub mod response_parser;
pub mod webhook;

pub use dispatcher::{parse_destinations, Dispatcher};
pub use extractor::{ExtractionInput, Extractor};
pub use gemini::{GeminiClient, LanguageModel};
pub use response_parser::{parse_records, MalformedResponse};
pub use webhook::{AppsScriptWebhook, SheetWebhook, SheetWrite};
