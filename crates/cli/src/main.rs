use std::process::ExitCode;

fn main() -> ExitCode {
    grantflow_cli::run()
}
