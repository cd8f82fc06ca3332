use std::process;

use rawmeta::error::AppError;

fn main() {
    if let Err(e) = rawmeta::run() {
        eprintln!("Error: {e:#}");
        let exit_code = match e.downcast_ref::<AppError>() {
            Some(AppError::Config(_)) => 2,
            Some(AppError::Io(_)) => 3,
            Some(AppError::Database(_)) => 5,
            _ => 1,
        };
        process::exit(exit_code);
    }
}
