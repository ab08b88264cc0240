//! relay-chat: terminal client for a prompt-relay server.
//!
//! Streams tokens to stdout as they arrive; `--no-stream` waits for the
//! whole answer instead. With a prompt on the command line it asks once and
//! exits, otherwise it reads prompts from stdin in a loop.

use std::io::{self, BufRead, Write};

use clap::Parser;

use prompt_relay::client::{ClientError, RelayClient};

#[derive(Parser, Debug)]
#[command(name = "relay-chat", about = "Chat against a prompt-relay server")]
struct Cli {
    /// Relay server base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Wait for the full answer instead of streaming tokens.
    #[arg(long)]
    no_stream: bool,

    /// Prompt text; reads prompts from stdin when omitted.
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = RelayClient::new(cli.server.as_str());

    if !cli.prompt.is_empty() {
        let prompt = cli.prompt.join(" ");
        if let Err(e) = run_once(&client, &prompt, cli.no_stream).await {
            eprintln!("{e}");
            std::process::exit(1);
        }
        return Ok(());
    }

    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let prompt = line.trim();
        if !prompt.is_empty() {
            if let Err(e) = run_once(&client, prompt, cli.no_stream).await {
                eprintln!("{e}");
            }
        }
        print!("> ");
        io::stdout().flush()?;
    }
    println!();

    Ok(())
}

async fn run_once(client: &RelayClient, prompt: &str, no_stream: bool) -> Result<(), ClientError> {
    if no_stream {
        let answer = client.ask(prompt).await?;
        println!("{answer}");
    } else {
        client
            .ask_streaming(prompt, |token| {
                print!("{token}");
                let _ = io::stdout().flush();
            })
            .await?;
        println!();
    }
    Ok(())
}
