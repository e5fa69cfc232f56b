pub mod log;

/// Prints an error with its full source chain to stderr.
pub fn print_error(err: &dyn std::error::Error) {
    eprintln!("error: {}", err);
    let mut iter = err.source();
    while let Some(cause) = iter {
        eprintln!("caused by: {}", cause);
        iter = cause.source();
    }
}
