mod replay;
mod settings;
mod utils;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rsniff::{CancelToken, SniffContext, Sniffer};

use replay::Verdict;
use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if settings.debug {
                "rsniff=debug".into()
            } else {
                "rsniff=info".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(pool) = &settings.fake_dns {
        info!("fake dns pool: {}", pool.range());
    }

    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = utils::cancel_on_signal(signal_token).await {
            warn!("signal handler failed: {:#}", err);
        }
    });

    for input in &settings.inputs {
        let payload = tokio::fs::read(input)
            .await
            .with_context(|| format!("failed to read capture `{}`", input))?;

        let mut ctx = SniffContext::new(settings.network).with_cancel(cancel.clone());
        if let Some(target) = settings.target {
            ctx = ctx.with_target(target);
        }

        let mut sniffer = Sniffer::with_registry(settings.registry.clone());
        let verdict = replay::replay(&mut sniffer, &payload, settings.chunk_size, &ctx);
        println!("{}: {}", input, verdict);

        if verdict == Verdict::Cancelled {
            break;
        }
    }

    Ok(())
}
