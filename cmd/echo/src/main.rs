//! Line echo over an in-memory pipe
//!
//! The server is a `MessageProtocol` with a `LineDecoder`; its dispatcher
//! task answers each line in upper case. The client is a `StreamProtocol`
//! driven from the main task with blocking writes and reads.
//!
//! ```text
//! COT_LOG=debug cargo run -p cothread-echo -- hello world
//! ```

use cothread::{
    pipe, Condition, Hub, HubConfig, LineDecoder, MessageProtocol, StreamProtocol,
};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    cothread::init_logging();

    let mut lines: Vec<String> = std::env::args().skip(1).collect();
    if lines.is_empty() {
        lines = vec!["hello".into(), "cooperative".into(), "world".into()];
    }

    match run(&lines) {
        Ok(replies) => {
            for reply in replies {
                println!("{reply}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "echo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(lines: &[String]) -> Result<Vec<String>, Condition> {
    let hub = Hub::new(HubConfig::from_env())?;

    let server = MessageProtocol::builder("Echo")
        .decoder(LineDecoder::new())
        .handler(|line: String, _transport, protocol: MessageProtocol<String>| async move {
            info!(%line, "server got line");
            protocol.write(format!("{}\n", line.to_uppercase()).as_bytes()).await
        })
        .build()?;
    let client = StreamProtocol::new();
    let _ = pipe(client.clone(), server.clone());

    let expected: usize = lines.iter().map(|l| l.len() + 1).sum();
    let requests: Vec<String> = lines.iter().map(|l| format!("{l}\n")).collect();

    let replies = hub.block_on(async move {
        client.writelines(&requests).await?;
        let mut received = Vec::new();
        while received.len() < expected {
            let chunk = client.read(4096, None).await?;
            if chunk.is_empty() {
                break;
            }
            received.extend(chunk);
        }
        client.close().await?;
        Ok::<_, Condition>(received)
    })?;
    hub.run();

    Ok(String::from_utf8_lossy(&replies)
        .lines()
        .map(str::to_owned)
        .collect())
}
