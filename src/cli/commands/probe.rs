//! `cmsforge probe`: the readiness poller on its own

use anyhow::Result;
use std::time::Duration;

use cmsforge_clients::{HttpClient, HttpProbe};
use cmsforge_engine::{PollError, PollObservation, PollPolicy, Readiness, await_ready_observed};
use cmsforge_provision_api::{ProviderError, ReadinessProbe};
use cmsforge_utils::CmsForgeError;
use cmsforge_utils::error::ConfigError;

pub async fn execute(url: &str, attempts: u32, interval_secs: u64) -> Result<()> {
    if attempts == 0 {
        return Err(CmsForgeError::from(ConfigError::InvalidValue {
            key: "attempts".to_string(),
            value: "0 (must be at least 1)".to_string(),
        })
        .into());
    }

    let http = HttpClient::new()
        .map_err(|e| CmsForgeError::Runtime(format!("cannot build HTTP client: {e}")))?;
    let probe = &HttpProbe::new(http);
    let policy = PollPolicy::new(attempts, Duration::from_secs(interval_secs), Duration::ZERO);

    let result = await_ready_observed(
        &policy,
        || async move {
            let ready = probe.check(url).await?;
            Ok::<_, ProviderError>(if ready {
                Readiness::Ready(())
            } else {
                Readiness::Pending(Some("not ready".to_string()))
            })
        },
        |observation| eprintln!("{}", describe(observation)),
    )
    .await;

    match result {
        Ok(()) => {
            println!("✓ {url} is ready");
            Ok(())
        }
        Err(e @ PollError::Timeout { .. }) => {
            Err(CmsForgeError::WaitTimeout(format!("{url}: {e}")).into())
        }
    }
}

fn describe(observation: &PollObservation) -> String {
    let state = if observation.ready {
        "ready"
    } else {
        observation.status.as_deref().unwrap_or("not ready")
    };
    format!(
        "  attempt {}/{}: {state}",
        observation.attempt, observation.max_attempts
    )
}
