//! `call` and `var` commands.

use tracing::debug;
use webrpc_peer::CheckKind;

use super::{connect, parse_value, print_value};
use crate::config::CliConfig;
use crate::error::CliResult;

/// Calls a remote function and prints its result.
pub async fn call(config: &CliConfig, name: &str, args: &[String], notify: bool) -> CliResult<()> {
    let session = connect(config).await?;
    let args = args.iter().map(|raw| parse_value(raw)).collect();

    if notify {
        session.peer.notify(name, args)?;
        debug!(name, "Notification queued");
    } else {
        let result = session.peer.call(name, args).await?;
        print_value(&result)?;
    }

    session.finish().await;
    Ok(())
}

/// Reads or writes a remote value.
pub async fn var(
    config: &CliConfig,
    path: &str,
    set: Option<&str>,
    check: Option<CheckKind>,
) -> CliResult<()> {
    let session = connect(config).await?;
    let result = session
        .peer
        .query_var(path, set.map(parse_value), check)
        .await?;
    if set.is_none() {
        print_value(&result)?;
    }
    session.finish().await;
    Ok(())
}
