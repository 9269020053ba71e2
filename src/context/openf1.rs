//! OpenF1 race-data adapter (api.openf1.org, no key needed).
//!
//! Resolves the latest session and its driver roster once, then on every
//! fetch pulls position and lap records and folds them into a leaderboard.

use crate::context::source::RaceDataSource;
use crate::defaults;
use crate::error::{CommentaryError, Result};
use crate::pipeline::types::{ContextSnapshot, DriverPosition};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionRecord {
    pub session_key: Option<u64>,
    #[serde(default)]
    pub session_name: String,
    #[serde(default)]
    pub circuit_short_name: String,
    #[serde(default)]
    pub total_laps: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverRecord {
    pub driver_number: u32,
    pub full_name: Option<String>,
    pub name_acronym: Option<String>,
    pub team_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionRecord {
    pub driver_number: u32,
    pub position: u32,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LapRecord {
    pub driver_number: u32,
    #[serde(default)]
    pub lap_number: u32,
    pub lap_duration: Option<f64>,
}

/// Accumulated view of one session.
#[derive(Debug, Default)]
pub struct SessionBoard {
    pub session: SessionRecord,
    pub drivers: HashMap<u32, DriverRecord>,
    latest_positions: HashMap<u32, PositionRecord>,
    latest_laps: HashMap<u32, LapRecord>,
}

impl SessionBoard {
    pub fn new(session: SessionRecord, drivers: Vec<DriverRecord>) -> Self {
        Self {
            session,
            drivers: drivers.into_iter().map(|d| (d.driver_number, d)).collect(),
            ..Default::default()
        }
    }

    /// Keeps only the newest position record per driver.
    pub fn merge_positions(&mut self, records: Vec<PositionRecord>) {
        for record in records {
            let newer = self
                .latest_positions
                .get(&record.driver_number)
                .is_none_or(|existing| record.date >= existing.date);
            if newer {
                self.latest_positions.insert(record.driver_number, record);
            }
        }
    }

    /// Keeps only the highest lap number per driver.
    pub fn merge_laps(&mut self, records: Vec<LapRecord>) {
        for record in records {
            let newer = self
                .latest_laps
                .get(&record.driver_number)
                .is_none_or(|existing| record.lap_number >= existing.lap_number);
            if newer {
                self.latest_laps.insert(record.driver_number, record);
            }
        }
    }

    /// Leaderboard sorted by position; current lap taken from the leader.
    pub fn snapshot(&self) -> ContextSnapshot {
        let mut ordered: Vec<&PositionRecord> = self.latest_positions.values().collect();
        ordered.sort_by_key(|r| (r.position, r.driver_number));

        let positions = ordered
            .iter()
            .map(|record| {
                let number = record.driver_number;
                let driver = self.drivers.get(&number);
                let last_lap_time = self
                    .latest_laps
                    .get(&number)
                    .and_then(|lap| lap.lap_duration)
                    .map(format_lap_time)
                    .unwrap_or_else(|| defaults::UNKNOWN_LAP_TIME.to_string());

                DriverPosition {
                    position: record.position,
                    driver_number: Some(number),
                    name: driver
                        .and_then(|d| d.full_name.clone())
                        .unwrap_or_else(|| format!("Car {}", number)),
                    code: driver
                        .and_then(|d| d.name_acronym.clone())
                        .unwrap_or_else(|| "???".to_string()),
                    team: driver
                        .and_then(|d| d.team_name.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    // OpenF1 does not expose gaps on these endpoints.
                    gap: defaults::UNKNOWN_LAP_TIME.to_string(),
                    last_lap_time,
                }
            })
            .collect::<Vec<_>>();

        let current_lap = ordered
            .first()
            .and_then(|leader| self.latest_laps.get(&leader.driver_number))
            .map(|lap| lap.lap_number)
            .unwrap_or(0);

        ContextSnapshot {
            captured_at: Utc::now(),
            session_name: self.session.session_name.clone(),
            circuit: self.session.circuit_short_name.clone(),
            current_lap,
            total_laps: self.session.total_laps.unwrap_or(0),
            positions,
        }
    }
}

/// Formats a lap duration in seconds as `M:SS.mmm`.
pub fn format_lap_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return defaults::UNKNOWN_LAP_TIME.to_string();
    }
    let total_ms = (seconds * 1000.0).round() as u64;
    let minutes = total_ms / 60_000;
    let rest_ms = total_ms % 60_000;
    format!("{}:{:02}.{:03}", minutes, rest_ms / 1000, rest_ms % 1000)
}

/// HTTP client for the OpenF1 API.
pub struct OpenF1Client {
    http: reqwest::Client,
    base_url: String,
    board: Mutex<Option<SessionBoard>>,
}

impl OpenF1Client {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| http_error(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            board: Mutex::new(None),
        })
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, session_key: &str) -> Result<T> {
        let url = format!("{}/{}?session_key={}", self.base_url, endpoint, session_key);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(format!("GET {endpoint} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(unavailable(format!(
                "GET {endpoint} returned status {}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| unavailable(format!("Failed to parse {endpoint} response: {e}")))
    }

    async fn resolve_session(&self) -> Result<SessionBoard> {
        let sessions: Vec<SessionRecord> = self
            .get("sessions", "latest")
            .await?;
        let session = sessions
            .into_iter()
            .last()
            .filter(|s| s.session_key.is_some())
            .ok_or_else(|| unavailable("no live session".to_string()))?;
        let key = session.session_key.unwrap_or_default();

        let drivers: Vec<DriverRecord> = self
            .get("drivers", &key.to_string())
            .await?;

        tracing::info!(
            session = %session.session_name,
            circuit = %session.circuit_short_name,
            key,
            drivers = drivers.len(),
            "OpenF1 session resolved"
        );
        Ok(SessionBoard::new(session, drivers))
    }
}

#[async_trait]
impl RaceDataSource for OpenF1Client {
    async fn fetch(&self) -> Result<ContextSnapshot> {
        let mut board = self.board.lock().await;
        if board.is_none() {
            *board = Some(self.resolve_session().await?);
        }
        let Some(board) = board.as_mut() else {
            return Err(unavailable("no live session".to_string()));
        };

        let key = board.session.session_key.unwrap_or_default().to_string();
        let positions: Vec<PositionRecord> =
            self.get("position", &key).await?;
        let laps: Vec<LapRecord> = self.get("laps", &key).await?;

        board.merge_positions(positions);
        board.merge_laps(laps);
        Ok(board.snapshot())
    }

    fn name(&self) -> &str {
        "openf1"
    }
}

fn unavailable(message: String) -> CommentaryError {
    CommentaryError::ContextUnavailable { message }
}

fn http_error(message: String) -> CommentaryError {
    CommentaryError::Http {
        service: "openf1".to_string(),
        message,
    }
}
