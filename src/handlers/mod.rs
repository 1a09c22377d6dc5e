pub mod analysis;

pub use analysis::{guess_media_type, AnalysisHandler, HandlerError};
