/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Wire encoding of downlink frames.
//!
//! A frame is one ASCII line:
//!
//! ```text
//! "time":100.0,"bme_temperature":21.53,"bme_ok":1,"camera_mode":"day"\n
//! ```
//!
//! * strings are double-quoted verbatim
//! * integers are bare decimals, booleans are `1` / `0`
//! * floats are printed with a fixed precision and then trimmed of trailing
//!   zeros down to one fractional digit

use super::error::FramerError;
use crate::telemetry::Value;

/// Field name of the leading timestamp pair.
pub const TIME_FIELD: &str = "time";

/// Precision used for the frame timestamp.
pub const TIME_PRECISION: usize = 1;

/// Floor `t` to a multiple of `q`.
pub fn quantize(t: f64, q: f64) -> f64 {
    (t / q).floor() * q
}

/// Format `value` with `precision` decimals and trim trailing zeros, keeping
/// at least one digit after the point.
///
/// ```
/// use greenhouse::framer::format_float;
/// assert_eq!(format_float(1.23, 4), "1.23");
/// assert_eq!(format_float(1.0, 3), "1.0");
/// ```
pub fn format_float(value: f64, precision: usize) -> String {
    let mut s = format!("{value:.precision$}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').len();
        s.truncate(trimmed);
        if s.ends_with('.') {
            s.push('0');
        }
    } else {
        s.push_str(".0");
    }
    s
}

/// Encode the value part of a pair.
pub fn encode_value(value: &Value, float_precision: usize) -> String {
    match value {
        Value::Text(s) => format!("\"{s}\""),
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::Float(f) => format_float(*f, float_precision),
    }
}

/// Encode one `"name":value` pair.
pub fn encode_field(name: &str, value: &Value, float_precision: usize) -> String {
    format!("\"{name}\":{}", encode_value(value, float_precision))
}

/// Encode the leading `"time":<t>` pair.
pub fn encode_time(t: f64) -> String {
    encode_field(TIME_FIELD, &Value::Float(t), TIME_PRECISION)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// A decoded frame, as produced by [`parse_frame`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub time: f64,
    pub fields: Vec<(String, Value)>,
}

/// Decode one frame line.  The trailing newline is optional.
///
/// Bench tooling uses this to check captured downlink traffic.  Values are
/// typed by shape: quoted → text, containing `.` → float, otherwise integer.
/// Booleans cannot be told apart from integers on the wire and decode as
/// integers.
pub fn parse_frame(line: &str) -> Result<ParsedFrame, FramerError> {
    let body = line.strip_suffix('\n').unwrap_or(line);
    let mut pairs = split_pairs(body)?.into_iter();

    let (name, time) = pairs
        .next()
        .ok_or_else(|| FramerError::MalformedFrame("empty frame".into()))?;
    let time = match (name.as_str(), time) {
        (TIME_FIELD, Value::Float(t)) => t,
        (TIME_FIELD, Value::Int(t)) => t as f64,
        _ => {
            return Err(FramerError::MalformedFrame(format!(
                "first pair must be \"{TIME_FIELD}\", found \"{name}\""
            )))
        }
    };

    Ok(ParsedFrame {
        time,
        fields: pairs.collect(),
    })
}

fn split_pairs(body: &str) -> Result<Vec<(String, Value)>, FramerError> {
    let malformed = |what: &str| FramerError::MalformedFrame(format!("{what} in {body:?}"));
    let mut out = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        let after_quote = rest.strip_prefix('"').ok_or_else(|| malformed("expected '\"'"))?;
        let end = after_quote.find('"').ok_or_else(|| malformed("unterminated name"))?;
        let name = &after_quote[..end];
        let after_name = after_quote[end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| malformed("expected ':'"))?;

        let (raw, next) = if let Some(text) = after_name.strip_prefix('"') {
            let close = text.find('"').ok_or_else(|| malformed("unterminated string"))?;
            (&after_name[..close + 2], &text[close + 1..])
        } else {
            match after_name.find(',') {
                Some(i) => (&after_name[..i], &after_name[i..]),
                None => (after_name, ""),
            }
        };

        let value = if let Some(text) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            Value::Text(text.to_owned())
        } else if raw.contains('.') {
            Value::Float(raw.parse().map_err(|_| malformed("bad float"))?)
        } else {
            Value::Int(raw.parse().map_err(|_| malformed("bad integer"))?)
        };
        out.push((name.to_owned(), value));

        rest = match next.strip_prefix(',') {
            Some(r) if !r.is_empty() => r,
            Some(_) => return Err(malformed("trailing ','")),
            None if next.is_empty() => "",
            None => return Err(malformed("expected ','")),
        };
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_floors_to_interval() {
        assert_eq!(quantize(100.4, 1.0), 100.0);
        assert_eq!(quantize(109.9, 10.0), 100.0);
        assert_eq!(quantize(100.75, 0.5), 100.5);
        assert_eq!(quantize(-0.5, 1.0), -1.0);
    }

    #[test]
    fn float_trimming() {
        assert_eq!(format_float(1.2300, 4), "1.23");
        assert_eq!(format_float(1.0, 3), "1.0");
        assert_eq!(format_float(0.0005, 3), "0.001");
        assert_eq!(format_float(-0.0, 3), "-0.0");
        assert_eq!(format_float(20.0, 0), "20.0");
        assert_eq!(format_float(100.04, 1), "100.0");
    }

    #[test]
    fn value_encoding() {
        assert_eq!(encode_value(&Value::Int(2), 3), "2");
        assert_eq!(encode_value(&Value::Int(-17), 3), "-17");
        assert_eq!(encode_value(&Value::Bool(true), 3), "1");
        assert_eq!(encode_value(&Value::Bool(false), 3), "0");
        assert_eq!(encode_value(&Value::Text("day".into()), 3), "\"day\"");
        assert_eq!(encode_field("a_x", &Value::Float(1.0), 3), "\"a_x\":1.0");
        assert_eq!(encode_time(100.0), "\"time\":100.0");
    }

    // ── parse ─────────────────────────────────────────────────────────────────

    #[test]
    fn parse_example_frame() {
        let frame = parse_frame("\"time\":100.0,\"a_x\":1.0,\"a_n\":3,\"a_s\":\"x,y\"\n").unwrap();
        assert_eq!(frame.time, 100.0);
        assert_eq!(
            frame.fields,
            vec![
                ("a_x".to_string(), Value::Float(1.0)),
                ("a_n".to_string(), Value::Int(3)),
                ("a_s".to_string(), Value::Text("x,y".into())),
            ]
        );
    }

    #[test]
    fn parse_rejects_missing_time() {
        assert!(matches!(
            parse_frame("\"a_x\":1.0\n"),
            Err(FramerError::MalformedFrame(_))
        ));
        assert!(parse_frame("").is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_frame("\"time\":1.0,").is_err());
        assert!(parse_frame("\"time\":1.0,\"a\"1").is_err());
        assert!(parse_frame("time:1.0").is_err());
        assert!(parse_frame("\"time\":1.0,\"a\":\"open").is_err());
    }
}
