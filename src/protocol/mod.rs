pub mod envelope;

pub use envelope::Envelope;

/// Maximum length, in bytes, of a single framed line (including the
/// trailing `\n`). A line at or beyond this is rejected and the session
/// is closed without a response, per the framing error category.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;
