//! `echo` command: a pipe round trip.

use tracing::debug;

use super::{connect, parse_value, print_value};
use crate::config::CliConfig;
use crate::error::CliResult;

/// Writes every chunk into a remote pipe and prints as many chunks back.
pub async fn run(config: &CliConfig, pipe_name: &str, chunks: &[String]) -> CliResult<()> {
    let session = connect(config).await?;
    let (mut reader, writer) = session.peer.pipe(pipe_name, Vec::new())?.split();
    debug!(id = reader.id(), pipe = pipe_name, "Pipe opened");

    for chunk in chunks {
        writer.write(parse_value(chunk))?;
    }
    for _ in chunks {
        match reader.recv().await? {
            Some(chunk) => print_value(&chunk)?,
            None => break,
        }
    }

    writer.close();
    session.finish().await;
    Ok(())
}
