//! Line codec for the relay protocol.
//!
//! Payloads are ASCII text, one command per line. There is no framing beyond
//! the newline: the relay treats "peer closed or went idle" as end of batch.
//!
//! # Example
//! ```rust
//! use srb_core::utils::protocol::{decode, encode, ActuatorCommand, ProtocolMode};
//! let text = encode(&[ActuatorCommand::new(1, 90)], ProtocolMode::Multi);
//! assert_eq!(text, "1 90\n");
//! let batch = decode(text.as_bytes(), ProtocolMode::Multi);
//! assert_eq!(batch.commands, vec![ActuatorCommand::new(1, 90)]);
//! ```

use core::{fmt::Write as _, num::IntErrorKind};

use super::{ActuatorCommand, ProtocolMode};
use crate::utils::errors::DecodeError;

/// Result of decoding one payload: valid commands and rejected lines, each in
/// arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    pub commands: Vec<ActuatorCommand>,
    pub errors: Vec<DecodeError>,
}

impl DecodedBatch {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Decode every non-blank line of `text`, one result per line.
///
/// A bad line never affects its neighbours.
pub fn decode_lines(
    text: &str,
    mode: ProtocolMode,
) -> Vec<Result<ActuatorCommand, DecodeError>> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let line = line.trim();
            (!line.is_empty()).then(|| parse_line(idx + 1, line, mode))
        })
        .collect()
}

/// Decode a raw payload. Invalid UTF-8 sequences are dropped, so a stray byte
/// neither rejects the batch nor spoils the line it sits in.
pub fn decode(
    bytes: &[u8],
    mode: ProtocolMode,
) -> DecodedBatch {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    let mut batch = DecodedBatch::default();
    for result in decode_lines(&text, mode) {
        match result {
            Ok(cmd) => batch.commands.push(cmd),
            Err(err) => batch.errors.push(err),
        }
    }
    batch
}

/// Format one command, newline terminated.
pub fn encode_line(
    cmd: &ActuatorCommand,
    mode: ProtocolMode,
) -> String {
    let mut out = String::with_capacity(8);
    push_line(&mut out, cmd, mode);
    out
}

/// Format a batch, one line per command.
pub fn encode(
    batch: &[ActuatorCommand],
    mode: ProtocolMode,
) -> String {
    let mut out = String::with_capacity(batch.len() * 8);
    for cmd in batch {
        push_line(&mut out, cmd, mode);
    }
    out
}

fn push_line(
    out: &mut String,
    cmd: &ActuatorCommand,
    mode: ProtocolMode,
) {
    // Writing into a String cannot fail.
    let _ = match mode {
        ProtocolMode::Legacy { default_id } if cmd.id == default_id => {
            writeln!(out, "{}", cmd.angle)
        }
        _ => writeln!(out, "{} {}", cmd.id, cmd.angle),
    };
}

fn parse_line(
    line: usize,
    raw: &str,
    mode: ProtocolMode,
) -> Result<ActuatorCommand, DecodeError> {
    let invalid = || DecodeError::InvalidNumber {
        line,
        raw: raw.into(),
    };

    let mut tokens = raw.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next(), mode) {
        (Some(id), Some(angle), None, _) => {
            let id = id.parse::<u8>().map_err(|_| invalid())?;
            let angle = parse_angle(angle).ok_or_else(invalid)?;
            Ok(ActuatorCommand::new(id, angle))
        }
        (Some(angle), None, None, ProtocolMode::Legacy { default_id }) => {
            let angle = parse_angle(angle).ok_or_else(invalid)?;
            Ok(ActuatorCommand {
                id: default_id,
                angle,
            })
        }
        _ => Err(DecodeError::TokenCount {
            line,
            tokens: raw.split_whitespace().count(),
            raw: raw.into(),
        }),
    }
}

/// Integers too large for `i32` saturate; they are clamped later anyway.
fn parse_angle(token: &str) -> Option<i32> {
    match token.parse::<i32>() {
        Ok(value) => Some(value),
        Err(err) => match err.kind() {
            IntErrorKind::PosOverflow => Some(i32::MAX),
            IntErrorKind::NegOverflow => Some(i32::MIN),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::protocol::ActuatorId;

    const LEGACY: ProtocolMode = ProtocolMode::Legacy {
        default_id: ActuatorId(1),
    };

    #[test]
    fn decodes_multi_actuator_batch_in_order() {
        let batch = decode(b"1 90\n2 200\n3 -5\n", ProtocolMode::Multi);
        assert!(batch.errors.is_empty());
        assert_eq!(
            batch.commands,
            vec![
                ActuatorCommand::new(1, 90),
                ActuatorCommand::new(2, 200),
                ActuatorCommand::new(3, -5),
            ]
        );
    }

    #[test]
    fn malformed_line_does_not_discard_the_rest() {
        let batch = decode(b"abc\n2 45\n", ProtocolMode::Multi);
        assert_eq!(batch.commands, vec![ActuatorCommand::new(2, 45)]);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].line(), 1);
        assert_eq!(batch.errors[0].raw(), "abc");
    }

    #[test]
    fn blank_lines_and_crlf_are_ignored() {
        let batch = decode(b"\r\n  \n1 10\r\n\n 2   20 \n", ProtocolMode::Multi);
        assert!(batch.errors.is_empty());
        assert_eq!(
            batch.commands,
            vec![ActuatorCommand::new(1, 10), ActuatorCommand::new(2, 20)]
        );
    }

    #[test]
    fn error_line_numbers_count_blank_lines() {
        let batch = decode(b"1 10\n\n1 2 3\n", ProtocolMode::Multi);
        assert_eq!(
            batch.errors,
            vec![DecodeError::TokenCount {
                line: 3,
                tokens: 3,
                raw: "1 2 3".into()
            }]
        );
    }

    #[test]
    fn single_token_needs_legacy_mode() {
        let multi = decode(b"90\n", ProtocolMode::Multi);
        assert!(multi.commands.is_empty());
        assert!(matches!(multi.errors[0], DecodeError::TokenCount { tokens: 1, .. }));

        let legacy = decode(b"90\n", LEGACY);
        assert_eq!(legacy.commands, vec![ActuatorCommand::new(1, 90)]);
    }

    #[test]
    fn legacy_mode_still_accepts_addressed_lines() {
        let batch = decode(b"128\n3 40\n", LEGACY);
        assert_eq!(
            batch.commands,
            vec![ActuatorCommand::new(1, 128), ActuatorCommand::new(3, 40)]
        );
    }

    #[test]
    fn bad_ids_are_line_errors() {
        let batch = decode(b"-1 90\n256 90\nx 90\n4 y\n", ProtocolMode::Multi);
        assert!(batch.commands.is_empty());
        assert_eq!(batch.errors.len(), 4);
        assert!(batch
            .errors
            .iter()
            .all(|e| matches!(e, DecodeError::InvalidNumber { .. })));
    }

    #[test]
    fn oversized_angles_saturate() {
        let batch = decode(
            b"1 99999999999999999999\n2 -99999999999999999999\n",
            ProtocolMode::Multi,
        );
        assert_eq!(
            batch.commands,
            vec![
                ActuatorCommand::new(1, i32::MAX),
                ActuatorCommand::new(2, i32::MIN)
            ]
        );
    }

    #[test]
    fn invalid_utf8_bytes_are_dropped() {
        let batch = decode(b"1 9\xff\n1 \xff90\n\xc3\n2 45\n", ProtocolMode::Multi);
        assert!(batch.errors.is_empty());
        assert_eq!(
            batch.commands,
            vec![
                ActuatorCommand::new(1, 9),
                ActuatorCommand::new(1, 90),
                ActuatorCommand::new(2, 45)
            ]
        );
    }

    #[test]
    fn encodes_both_grammars() {
        let batch = [ActuatorCommand::new(1, 90), ActuatorCommand::new(3, 0)];
        assert_eq!(encode(&batch, ProtocolMode::Multi), "1 90\n3 0\n");
        assert_eq!(encode(&batch, LEGACY), "90\n3 0\n");
        assert_eq!(encode_line(&ActuatorCommand::new(1, -255), LEGACY), "-255\n");
    }

    #[test]
    fn empty_payload_is_an_empty_batch() {
        let batch = decode(b"", ProtocolMode::Multi);
        assert!(batch.is_empty());
        assert!(batch.errors.is_empty());
    }
}
