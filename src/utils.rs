use anyhow::Result;
use tracing::warn;

use rsniff::CancelToken;

/// Whether a sniffed domain is worth routing on.
pub fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty() && !domain.contains(' ') && domain.contains('.')
}

/// Cancel `token` on SIGHUP, SIGINT or SIGTERM.
pub async fn cancel_on_signal(token: CancelToken) -> Result<()> {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;
    let mut sighang = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sighang.recv() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }

    warn!("Received signal, cancelling");
    token.cancel();
    Ok(())
}
