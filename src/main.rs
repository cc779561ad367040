//! llamachat - terminal chat over a local GGUF model
//!
//! Usage: `llamachat <model.gguf> [system prompt]`

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};

use llamachat::config::load_startup_config;
use llamachat::logging::init_logging;
use llamachat::platform::NativePlatform;
use llamachat::{LlamaEngine, Session, SessionError};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const N_PREDICT: u32 = 128;

fn run(model: PathBuf, system_prompt: &str) -> Result<(), SessionError> {
    let config = load_startup_config(&NativePlatform);
    let mut session = Session::new(LlamaEngine::new(), config);

    session.init_backend(None)?;
    session.load_model(&model)?;
    session.prepare_session()?;
    session.process_system_prompt(system_prompt)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                session.reset_conversation();
                session.process_system_prompt(system_prompt)?;
                continue;
            }
            prompt => session.process_user_prompt(prompt, N_PREDICT)?,
        }

        for chunk in session.stream() {
            print!("{}", chunk?);
            let _ = stdout.flush();
        }
        println!();
    }

    session.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    info!("Starting llamachat v{}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let Some(model) = args.next().map(PathBuf::from) else {
        eprintln!("Usage: llamachat <model.gguf> [system prompt]");
        return ExitCode::FAILURE;
    };
    let system_prompt = args.next().unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    match run(model, &system_prompt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.status().code() as u8)
        }
    }
}
