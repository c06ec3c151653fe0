mod cli;
mod commands;
mod decant;
mod env_loader;
mod error;
mod oracle;

use error::DecantErrorCode;

fn main() {
    env_loader::load_dotenv();

    if let Err(err) = cli::run() {
        let code = DecantErrorCode::from_anyhow(&err);
        eprintln!("error: {err:#}");
        if code != DecantErrorCode::E001Failure {
            eprintln!("code: {}", code.as_str());
        }
        std::process::exit(code.exit_status());
    }
}
