use chrono::Local;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::PollError;
use crate::tesla::TeslaClient;
use crate::warehouse;

pub struct Poller {
    config: Config,
    tesla: TeslaClient,
}

impl Poller {
    pub fn new(config: Config) -> Self {
        Self {
            tesla: TeslaClient::new(reqwest::Client::new()),
            config,
        }
    }

    /// Fetch-then-persist on a fixed cadence until cancelled. Every cycle
    /// prints exactly one OK or ERROR line on stdout; failures abandon the
    /// cycle and never end the loop.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            // The next cycle starts no earlier than one interval after this
            // one started; an overrun cycle restarts immediately.
            let deadline = Instant::now() + self.config.poll_interval();
            match self.run_cycle().await {
                Ok(ts) => println!(
                    "[{}] OK {}",
                    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"),
                    ts.as_deref().unwrap_or("none")
                ),
                Err(err) => println!("[poller] ERROR: {err}"),
            }
            if !sleep_until_or_cancelled(&cancel, deadline).await {
                break;
            }
        }
    }

    async fn run_cycle(&self) -> Result<Option<String>, PollError> {
        let record = self.tesla.fetch_live_status(&self.config).await?;
        warehouse::persist(&self.config, &record).await?;
        Ok(record.ts)
    }
}

/// Waits out the remainder of the cycle. Returns false when cancelled, true
/// once the deadline has passed.
async fn sleep_until_or_cancelled(cancel: &CancellationToken, deadline: Instant) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = time::sleep_until(deadline) => true,
    }
}
