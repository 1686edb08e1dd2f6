use anyhow::anyhow;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::Serialize;
use std::time::Duration;

use crate::cli::ClientError;

/// One producer submission, shaped like the body `POST /updateData` expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducerSample {
    pub timestamp: i64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub latitude: f64,
    pub longitude: f64,
}

impl ProducerSample {
    /// Sample taken at `at`, with calendar fields in that time zone.
    pub fn at<Tz: TimeZone>(at: &DateTime<Tz>, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp: at.timestamp_millis(),
            year: at.year(),
            month: at.month(),
            day: at.day(),
            hour: at.hour(),
            minute: at.minute(),
            second: at.second(),
            latitude,
            longitude,
        }
    }

    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self::at(&Local::now(), latitude, longitude)
    }
}

#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Base URL of the ingest listener, e.g. `http://127.0.0.1:8081`
    pub url: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Repeat period; `None` posts once
    pub every: Option<Duration>,
    /// Stop after this many posts when repeating
    pub count: Option<u64>,
}

/// Post local-clock samples to a relay's ingest endpoint.
pub async fn push(options: &PushOptions) -> Result<u64, ClientError> {
    let client = reqwest::Client::new();
    let endpoint = format!("{}/updateData", options.url.trim_end_matches('/'));

    let Some(every) = options.every else {
        post_sample(&client, &endpoint, options).await?;
        return Ok(1);
    };

    let mut ticker = tokio::time::interval(every);
    let mut sent = 0u64;
    loop {
        if options.count.is_some_and(|max| sent >= max) {
            return Ok(sent);
        }
        ticker.tick().await;
        post_sample(&client, &endpoint, options).await?;
        sent += 1;
    }
}

async fn post_sample(
    client: &reqwest::Client,
    endpoint: &str,
    options: &PushOptions,
) -> Result<(), ClientError> {
    let sample = ProducerSample::now(options.latitude, options.longitude);
    let resp = client
        .post(endpoint)
        .json(&sample)
        .send()
        .await
        .map_err(ClientError::from_reqwest)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!("relay rejected sample ({status}): {body}").into());
    }
    println!(
        "sent {} {},{}",
        sample.timestamp, sample.latitude, sample.longitude
    );
    Ok(())
}
