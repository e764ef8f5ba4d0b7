use std::io::Write;

use futures_util::StreamExt;
use llm_stream_client::config::{load_config, ClientConfig};
use llm_stream_client::observability::init_tracing;
use llm_stream_client::{parse_tool_call_token, StreamingClient};

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        eprintln!("usage: llm-stream <config.yaml> <prompt...>");
        std::process::exit(2);
    };
    let prompt = args.collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("usage: llm-stream <config.yaml> <prompt...>");
        std::process::exit(2);
    }

    let config = load_config(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    init_tracing(&config.log_level, config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let ok = runtime.block_on(run(config, prompt));
    if !ok {
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig, prompt: String) -> bool {
    let client = match StreamingClient::new(&config) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to build client: {err}");
            return false;
        }
    };

    let mut stdout = std::io::stdout().lock();
    let mut stream = client.stream(prompt);
    let mut ok = true;
    let mut mid_line = false;
    while let Some(item) = stream.next().await {
        match item {
            Ok(item) if parse_tool_call_token(&item).is_some() => {
                if mid_line {
                    let _ = writeln!(stdout);
                    mid_line = false;
                }
                let _ = writeln!(stdout, "{item}");
            }
            Ok(text) => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
                mid_line = !text.ends_with('\n');
            }
            Err(err) => {
                if mid_line {
                    let _ = writeln!(stdout);
                }
                eprintln!("Stream failed: {err}");
                ok = false;
                break;
            }
        }
    }
    drop(stream);

    if mid_line && ok {
        let _ = writeln!(stdout);
    }
    for token in client.drain_buffered_tool_tokens() {
        let _ = writeln!(stdout, "{token}");
    }
    ok
}
