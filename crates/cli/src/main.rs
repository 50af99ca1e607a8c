fn main() {
    if let Err(error) = sylva_cli::run() {
        // The subscriber is installed by run() once arguments are parsed.
        tracing::error!(error = format!("{error:#}"), "command failed");
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
