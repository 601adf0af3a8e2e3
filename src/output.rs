/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// output stays separate from the tracing log on stderr.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Dolt server: running")
    fn status(&self, message: &str);

    /// Success message (e.g., "Dolt server stopped")
    fn success(&self, message: &str);

    /// Warning message
    fn warning(&self, message: &str);
}

/// Standard CLI output, writing to stdout/stderr.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", message);
    }
}
