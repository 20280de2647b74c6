//! hyprvoice CLI: run the daemon or control a running one.

use clap::{Parser, Subcommand};

use hyprvoice::{config, control, daemon};

#[derive(Parser)]
#[command(name = "hyprvoice", version, about = "Push-to-talk voice dictation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dictation daemon in the foreground.
    Daemon,
    /// Toggle the session (start, commit or abort depending on state).
    Toggle,
    /// Print the daemon's current status.
    Status,
    /// Abort the current session.
    Cancel,
    /// Ask the daemon to shut down.
    Quit,
    /// Print the daemon's protocol version.
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    let exit_code = runtime.block_on(async {
        match cli.command {
            Command::Daemon => run_daemon().await,
            Command::Toggle => send(b't').await,
            Command::Status => send(b's').await,
            Command::Cancel => send(b'c').await,
            Command::Quit => send(b'q').await,
            Command::Version => send(b'v').await,
        }
    });

    std::process::exit(exit_code);
}

async fn run_daemon() -> i32 {
    let config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hyprvoice: {}", e);
            return 1;
        }
    };

    match daemon::run(config).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("hyprvoice: {}", e);
            1
        }
    }
}

async fn send(command: u8) -> i32 {
    match control::send_command(command).await {
        Ok(response) => {
            println!("{}", response);
            if response.starts_with("ERR") {
                1
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("hyprvoice: {}", e);
            1
        }
    }
}
