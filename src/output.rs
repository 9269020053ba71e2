//! Terminal rendering for `commentcast follow`, `health`, `context` and the test commands.

use crate::ipc::protocol::{RewriteReport, WireEvent};
use crate::pipeline::orchestrator::Health;
use crate::pipeline::types::{ContextSnapshot, EventCategory, SessionState};
use std::path::{Path, PathBuf};

const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const MAGENTA: &str = "\x1b[35m";
const RESET: &str = "\x1b[0m";

fn category_color(category: Option<EventCategory>) -> &'static str {
    match category {
        Some(EventCategory::Hype) => MAGENTA,
        Some(EventCategory::Tension) => YELLOW,
        Some(EventCategory::Info) => "",
        Some(EventCategory::Filler) | None => DIM,
    }
}

fn state_color(state: SessionState) -> &'static str {
    match state {
        SessionState::Running => GREEN,
        SessionState::Failed => RED,
        SessionState::Starting | SessionState::Stopping => YELLOW,
        SessionState::Idle | SessionState::Stopped => DIM,
    }
}

/// One terminal line for a follow event. Audio events render as a short note.
pub fn format_event(event: &WireEvent) -> String {
    match event {
        WireEvent::Text {
            sequence,
            english,
            telugu,
            category,
        } => {
            let color = category_color(*category);
            let tag = category.map(|c| c.tag()).unwrap_or_default();
            format!(
                "{DIM}#{sequence:<4}{RESET} {color}{tag:<9}{RESET} {BOLD}{telugu}{RESET}\n      {DIM}{english}{RESET}"
            )
        }
        WireEvent::Audio {
            sequence,
            mime_type,
            data,
        } => {
            // base64 length is 4/3 of the payload
            let approx_bytes = data.len() / 4 * 3;
            format!("{DIM}#{sequence:<4} audio {mime_type}, ~{approx_bytes} bytes{RESET}")
        }
        WireEvent::BeatSkipped { sequence } => {
            format!("{YELLOW}#{sequence:<4} skipped (held too long){RESET}")
        }
        WireEvent::Context { snapshot } => {
            format!("{DIM}context: {}{RESET}", snapshot.context_line())
        }
        WireEvent::Status { state, message } => {
            let color = state_color(*state);
            match message {
                Some(message) => format!("{color}session {state}{RESET}: {message}"),
                None => format!("{color}session {state}{RESET}"),
            }
        }
    }
}

/// Writes decoded audio for `event` as `<dir>/<sequence>.<ext>`. Returns the path written.
pub fn save_audio(dir: &Path, event: &WireEvent) -> std::io::Result<Option<PathBuf>> {
    let WireEvent::Audio {
        sequence, mime_type, ..
    } = event
    else {
        return Ok(None);
    };
    let Some(audio) = event.audio() else {
        return Ok(None);
    };

    let extension = match mime_type.as_str() {
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        _ => "wav",
    };
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{:06}.{}", sequence, extension));
    std::fs::write(&path, audio)?;
    Ok(Some(path))
}

pub fn format_health(health: &Health) -> String {
    let color = state_color(health.state);
    let mut lines = vec![format!("State:      {color}{}{RESET}", health.state)];
    if let Some(session) = &health.session {
        lines.push(format!("Session:    {} ({})", session.label, session.id));
        lines.push(format!("Source:     {}", session.source));
        lines.push(format!(
            "Started:    {}",
            session.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(failure) = &health.last_failure {
        lines.push(format!("Failure:    {RED}{failure}{RESET}"));
    }
    lines.push(format!(
        "Chunks:     {} admitted, {} released, {} empty, {} skipped, {} late",
        health.chunks_admitted,
        health.artifacts_released,
        health.empty_chunks,
        health.beats_skipped,
        health.late_discarded
    ));
    lines.push(format!(
        "Listeners:  {} connected, {} dropped, {} artifacts published",
        health.listeners, health.listeners_dropped, health.artifacts_published
    ));
    let context = if health.context_available {
        format!(
            "available, {} refreshes, {} failed since last success",
            health.context_refreshes, health.context_staleness
        )
    } else {
        "not yet fetched".to_string()
    };
    lines.push(format!("Context:    {context}"));
    lines.push(format!("Cache hits: {}", health.phrase_cache_hits));
    lines.push(format!("Dataset:    {} records", health.dataset_records));
    lines.push(format!(
        "Engines:    {} / {} / {}",
        health.engines.transcriber, health.engines.rewriter, health.engines.synthesizer
    ));
    lines.join("\n")
}

pub fn format_context(snapshot: &ContextSnapshot) -> String {
    let mut lines = Vec::new();
    if !snapshot.session_name.is_empty() || !snapshot.circuit.is_empty() {
        lines.push(format!("{BOLD}{} {}{RESET}", snapshot.circuit, snapshot.session_name));
    }
    lines.push(format!(
        "Lap {}/{}  {DIM}(captured {}){RESET}",
        snapshot.current_lap,
        snapshot.total_laps,
        snapshot.captured_at.format("%H:%M:%S")
    ));
    lines.extend(snapshot.positions.iter().map(|driver| {
        format!(
            "  P{:<2} {:<22} {:<18} {DIM}gap {:<9} last {}{RESET}",
            driver.position, driver.name, driver.team, driver.gap, driver.last_lap_time
        )
    }));
    lines.join("\n")
}

pub fn format_report(report: &RewriteReport) -> String {
    let color = category_color(Some(report.category));
    let mut lines = vec![
        format!("{color}{}{RESET} {}", report.category.tag(), report.english),
        format!("{BOLD}{}{RESET}", report.telugu),
    ];
    if report.fallback {
        lines.push(format!("{YELLOW}rewrite failed, English passed through{RESET}"));
    }
    let context = if report.context_used { "with race context" } else { "no race context" };
    lines.push(format!(
        "{DIM}{} bytes {}, {}{RESET}",
        report.audio_bytes, report.mime_type, context
    ));
    if let Some(delivered) = report.delivered {
        lines.push(format!("{DIM}delivered to {delivered} listener(s){RESET}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::DriverPosition;

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut in_escape = false;
        for c in s.chars() {
            match (in_escape, c) {
                (false, '\x1b') => in_escape = true,
                (true, 'm') => in_escape = false,
                (true, _) => {}
                (false, c) => out.push(c),
            }
        }
        out
    }

    #[test]
    fn test_format_text_event() {
        let line = strip_ansi(&format_event(&WireEvent::Text {
            sequence: 12,
            english: "Hamilton into the lead".to_string(),
            telugu: "హామిల్టన్ ముందుకు!".to_string(),
            category: Some(EventCategory::Hype),
        }));
        assert!(line.starts_with("#12"));
        assert!(line.contains("[HYPE]"));
        assert!(line.contains("హామిల్టన్ ముందుకు!"));
        assert!(line.contains("Hamilton into the lead"));
    }

    #[test]
    fn test_format_status_event() {
        let line = strip_ansi(&format_event(&WireEvent::Status {
            state: SessionState::Failed,
            message: Some("ffmpeg exited".to_string()),
        }));
        assert_eq!(line, "session failed: ffmpeg exited");
    }

    #[test]
    fn test_save_audio_writes_numbered_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let event = WireEvent::Audio {
            sequence: 7,
            mime_type: "audio/wav".to_string(),
            data: "UklGRg==".to_string(),
        };
        let path = save_audio(dir.path(), &event).unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "000007.wav");
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");

        let text = WireEvent::BeatSkipped { sequence: 8 };
        assert_eq!(save_audio(dir.path(), &text).unwrap(), None);
    }

    #[test]
    fn test_format_context_lists_positions() {
        let snapshot = ContextSnapshot::new(
            5,
            57,
            vec![
                DriverPosition::new(1, "Max Verstappen", "Red Bull Racing"),
                DriverPosition::new(2, "Lando Norris", "McLaren"),
            ],
        );
        let text = strip_ansi(&format_context(&snapshot));
        assert!(text.contains("Lap 5/57"));
        assert!(text.contains("P1  Max Verstappen"));
        assert!(text.contains("Lando Norris"));
    }

    #[test]
    fn test_format_report_fallback_note() {
        let report = RewriteReport {
            english: "Box box".to_string(),
            telugu: "Box box".to_string(),
            category: EventCategory::Info,
            fallback: true,
            context_used: false,
            audio_bytes: 0,
            mime_type: "audio/wav".to_string(),
            delivered: Some(2),
        };
        let text = strip_ansi(&format_report(&report));
        assert!(text.contains("English passed through"));
        assert!(text.contains("delivered to 2 listener(s)"));
    }
}
