//! Classifying inbound GRBL frames into a typed [`GrblResponse`].
//!
//! Grounded on `src/firmware/grbl/response_parser.rs`
//! (`GrblResponseParser::parse`) and
//! `crates/gcodekit4-communication/src/firmware/grbl/status_parser.rs`
//! (`StatusParser`), merged into one parser that returns every field
//! either source module extracted.

/// The planner and serial RX buffer occupancy reported as `Bf:<planner>,<rx>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferState {
    pub planner: u8,
    pub rx: u8,
}

/// Feed and spindle override percentages, `Ov:<feed>,<rapid>,<spindle>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overrides {
    pub feed_pct: u8,
    pub rapid_pct: u8,
    pub spindle_pct: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Raw `State` field, e.g. `"Run"` or `"Hold:0"`.
    pub state: String,
    pub machine_pos: Option<(f64, f64, f64)>,
    pub work_pos: Option<(f64, f64, f64)>,
    pub work_coord_offset: Option<(f64, f64, f64)>,
    pub feed_rate: Option<f64>,
    pub spindle_speed: Option<f64>,
    pub buffer: Option<BufferState>,
    pub overrides: Option<Overrides>,
}

/// The contents of a `[...]` feedback frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    /// `[GC:...]`: the active modal state, space-separated G/M words.
    Gc(String),
    /// `[MSG:...]`.
    Msg(String),
    /// `[echo:...]`.
    Echo(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GrblResponse {
    Ok,
    Error(u8),
    Alarm(u8),
    Status(StatusReport),
    Feedback(Feedback),
    Welcome(String),
    /// Non-fatal: logged, not matched to a pending command.
    Unknown(String),
}

/// Parse one complete, already-trimmed line. Never fails: anything it does
/// not recognize becomes `GrblResponse::Unknown`.
pub fn parse_response(line: &str) -> GrblResponse {
    let line = line.trim();
    if line.is_empty() {
        return GrblResponse::Unknown(String::new());
    }
    if line == "ok" {
        return GrblResponse::Ok;
    }
    if let Some(rest) = line.strip_prefix("error:") {
        if let Ok(code) = rest.trim().parse::<u8>() {
            return GrblResponse::Error(code);
        }
        return GrblResponse::Unknown(line.to_string());
    }
    if let Some(rest) = strip_prefix_ci(line, "alarm:") {
        if let Ok(code) = rest.trim().parse::<u8>() {
            return GrblResponse::Alarm(code);
        }
        return GrblResponse::Unknown(line.to_string());
    }
    if line.starts_with('<') && line.ends_with('>') {
        return GrblResponse::Status(parse_status_report(&line[1..line.len() - 1]));
    }
    if line.starts_with('[') && line.ends_with(']') {
        return GrblResponse::Feedback(parse_feedback(&line[1..line.len() - 1]));
    }
    if line.starts_with("Grbl ") {
        return GrblResponse::Welcome(line.to_string());
    }
    GrblResponse::Unknown(line.to_string())
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn parse_triple(value: &str) -> Option<(f64, f64, f64)> {
    let mut parts = value.split(',');
    let x = parts.next()?.parse::<f64>().ok()?;
    let y = parts.next()?.parse::<f64>().ok()?;
    let z = parts.next()?.parse::<f64>().ok()?;
    Some((x, y, z))
}

fn parse_status_report(inner: &str) -> StatusReport {
    let mut fields = inner.split('|');
    let state = fields.next().unwrap_or("").to_string();

    let mut report = StatusReport {
        state,
        machine_pos: None,
        work_pos: None,
        work_coord_offset: None,
        feed_rate: None,
        spindle_speed: None,
        buffer: None,
        overrides: None,
    };

    for field in fields {
        let mut kv = field.splitn(2, ':');
        let key = kv.next().unwrap_or("");
        let value = match kv.next() {
            Some(v) => v,
            None => continue,
        };
        match key {
            "MPos" => report.machine_pos = parse_triple(value),
            "WPos" => report.work_pos = parse_triple(value),
            "WCO" => report.work_coord_offset = parse_triple(value),
            "F" => report.feed_rate = value.parse::<f64>().ok(),
            "FS" => {
                let mut parts = value.split(',');
                report.feed_rate = parts.next().and_then(|v| v.parse::<f64>().ok());
                report.spindle_speed = parts.next().and_then(|v| v.parse::<f64>().ok());
            }
            "Bf" => {
                let mut parts = value.split(',');
                if let (Some(planner), Some(rx)) = (parts.next(), parts.next()) {
                    if let (Ok(planner), Ok(rx)) = (planner.parse::<u8>(), rx.parse::<u8>()) {
                        report.buffer = Some(BufferState { planner, rx });
                    }
                }
            }
            "Ov" => {
                let mut parts = value.split(',');
                if let (Some(f), Some(r), Some(s)) = (parts.next(), parts.next(), parts.next()) {
                    if let (Ok(feed_pct), Ok(rapid_pct), Ok(spindle_pct)) =
                        (f.parse::<u8>(), r.parse::<u8>(), s.parse::<u8>())
                    {
                        report.overrides = Some(Overrides { feed_pct, rapid_pct, spindle_pct });
                    }
                }
            }
            // Unrecognized fields (Ln:, A:, etc.) are ignored, not fatal.
            _ => {}
        }
    }

    report
}

fn parse_feedback(inner: &str) -> Feedback {
    if let Some(rest) = inner.strip_prefix("GC:") {
        return Feedback::Gc(rest.trim().to_string());
    }
    if let Some(rest) = inner.strip_prefix("MSG:") {
        return Feedback::Msg(rest.trim().to_string());
    }
    if let Some(rest) = inner.strip_prefix("echo:") {
        return Feedback::Echo(rest.trim().to_string());
    }
    Feedback::Other(inner.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok() {
        assert_eq!(parse_response("ok"), GrblResponse::Ok);
    }

    #[test]
    fn parses_error() {
        assert_eq!(parse_response("error:20"), GrblResponse::Error(20));
    }

    #[test]
    fn parses_alarm_case_insensitive() {
        assert_eq!(parse_response("ALARM:1"), GrblResponse::Alarm(1));
        assert_eq!(parse_response("alarm:1"), GrblResponse::Alarm(1));
    }

    #[test]
    fn parses_full_status_report() {
        let resp = parse_response("<Run|MPos:1.000,2.000,3.000|FS:500,1000|Bf:15,128|Ov:100,100,100|WCO:0.000,0.000,0.000>");
        match resp {
            GrblResponse::Status(report) => {
                assert_eq!(report.state, "Run");
                assert_eq!(report.machine_pos, Some((1.0, 2.0, 3.0)));
                assert_eq!(report.feed_rate, Some(500.0));
                assert_eq!(report.spindle_speed, Some(1000.0));
                assert_eq!(report.buffer, Some(BufferState { planner: 15, rx: 128 }));
                assert_eq!(
                    report.overrides,
                    Some(Overrides { feed_pct: 100, rapid_pct: 100, spindle_pct: 100 })
                );
                assert_eq!(report.work_coord_offset, Some((0.0, 0.0, 0.0)));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn status_with_hold_substate_and_unrecognized_field() {
        let resp = parse_response("<Hold:0|WPos:0.000,0.000,0.000|Ln:42>");
        match resp {
            GrblResponse::Status(report) => {
                assert_eq!(report.state, "Hold:0");
                assert_eq!(report.work_pos, Some((0.0, 0.0, 0.0)));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parses_gc_feedback() {
        let resp = parse_response("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]");
        assert_eq!(
            resp,
            GrblResponse::Feedback(Feedback::Gc("G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0".to_string()))
        );
    }

    #[test]
    fn parses_msg_feedback() {
        let resp = parse_response("[MSG:Check Limits]");
        assert_eq!(resp, GrblResponse::Feedback(Feedback::Msg("Check Limits".to_string())));
    }

    #[test]
    fn parses_welcome_banner() {
        let resp = parse_response("Grbl 1.1h ['$' for help]");
        assert_eq!(resp, GrblResponse::Welcome("Grbl 1.1h ['$' for help]".to_string()));
    }

    #[test]
    fn unrecognized_line_is_unknown_not_fatal() {
        let resp = parse_response("garbage input here");
        assert_eq!(resp, GrblResponse::Unknown("garbage input here".to_string()));
    }

    #[test]
    fn empty_line_is_unknown() {
        assert_eq!(parse_response(""), GrblResponse::Unknown(String::new()));
    }
}
