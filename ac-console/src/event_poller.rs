use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    config::{normalize_base_url, sanitize_interval},
    logging::category_event,
    notification::{NotificationChannel, SharedNotificationChannel},
    rpc::{EnvelopeSkip, EventEnvelope, EventPollRequest, EventPollResponse, PollRegistration},
};

#[derive(Clone, Debug)]
pub struct EventPollerConfig {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub published: usize,
    pub ignored: usize,
    pub unroutable: usize,
}

pub fn spawn_event_poller(
    client: reqwest::Client,
    channel: SharedNotificationChannel,
    config: EventPollerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_event_poller(client, channel, config).await;
    })
}

/// Long-running loop feeding backend events into `channel`. Never returns.
pub async fn run_event_poller(
    client: reqwest::Client,
    channel: SharedNotificationChannel,
    config: EventPollerConfig,
) {
    let base_url = normalize_base_url(&config.base_url);
    let register_url = format!("{base_url}/registerpoll");
    let poll_url = format!("{base_url}/poll");

    let mut sleep_for = Duration::from_millis(sanitize_interval(config.poll_interval_ms));
    let request_timeout = Duration::from_millis(sanitize_interval(config.request_timeout_ms));
    let mut poll_key: Option<String> = None;

    info!("{} event poller enabled endpoint={poll_url}", category_event());

    loop {
        let key = match poll_key.clone() {
            Some(key) => key,
            None => match register(&client, &register_url, request_timeout).await {
                Ok(key) => {
                    debug!("{} registered poll key", category_event());
                    poll_key = Some(key.clone());
                    key
                }
                Err(message) => {
                    channel.record_poll_error();
                    warn!("{} poll registration failed: {message}", category_event());
                    tokio::time::sleep(sleep_for).await;
                    continue;
                }
            },
        };

        let response = client
            .post(&poll_url)
            .timeout(request_timeout)
            .json(&EventPollRequest { poll_key: key })
            .send()
            .await;

        match response {
            Ok(response) if !response.status().is_success() => {
                channel.record_poll_error();
                warn!(
                    "{} event poll failed with status {}",
                    category_event(),
                    response.status()
                );
                poll_key = None;
            }
            Ok(response) => match response.json::<EventPollResponse>().await {
                Ok(payload) if payload.error => {
                    channel.record_poll_error();
                    warn!(
                        "{} event poll rejected: {}",
                        category_event(),
                        payload.message.as_deref().unwrap_or("unknown error")
                    );
                    poll_key = None;
                }
                Ok(payload) => {
                    channel.record_poll_success();
                    if let Some(interval) = payload.poll_interval_ms {
                        sleep_for = Duration::from_millis(sanitize_interval(interval));
                    }
                    dispatch_events(&channel, payload.events);
                }
                Err(err) => {
                    channel.record_poll_error();
                    warn!("{} failed to decode event poll payload: {err}", category_event());
                }
            },
            Err(err) => {
                channel.record_poll_error();
                warn!("{} event poll transport error: {err}", category_event());
            }
        }

        tokio::time::sleep(sleep_for).await;
    }
}

async fn register(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String, String> {
    let response = client
        .post(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| err.to_string())?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    let registration = response
        .json::<PollRegistration>()
        .await
        .map_err(|err| err.to_string())?;
    if registration.poll_key.trim().is_empty() {
        return Err("empty poll key".to_string());
    }
    Ok(registration.poll_key)
}

/// Publishes the debug events of one poll batch, in order.
pub fn dispatch_events(channel: &NotificationChannel, events: Vec<Value>) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    for raw in events {
        let event = raw
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        match EventEnvelope::decode(raw) {
            Ok(notification) => {
                channel.publish(notification);
                summary.published += 1;
            }
            Err(EnvelopeSkip::NotDebugEvent) => summary.ignored += 1,
            Err(EnvelopeSkip::MissingCorrelation) => {
                channel.record_unroutable();
                summary.unroutable += 1;
                warn!(
                    "{} dropping {event} without correlation id",
                    category_event()
                );
            }
            Err(EnvelopeSkip::Malformed) => {
                channel.record_unroutable();
                summary.unroutable += 1;
                warn!("{} dropping malformed {event}", category_event());
            }
        }
    }
    summary
}
