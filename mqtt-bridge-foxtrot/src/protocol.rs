//! Foxtrot controller line protocol.
//!
//! Text lines terminated by CRLF, encoded in Windows-1250:
//!
//! ```text
//! -> GET:<name>
//! <- GET:<name>,<value>
//! <- DIFF:<name>,<value>
//! <- ERROR:<message>
//! <- WARNING:<message>
//! ```

use encoding_rs::WINDOWS_1250;
use thiserror::Error;

use crate::registry::VariableRegistry;

/// Line terminator of the protocol.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Reasons a received line is discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("missing ':' separator")]
    MissingSeparator,
    #[error("empty parameters")]
    EmptyParams,
    #[error("missing variable name in '{0}'")]
    MissingName(String),
    #[error("missing value in '{0}'")]
    MissingValue(String),
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
}

/// Method of a measurement response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementKind {
    /// Answer to a `GET` request.
    Get,
    /// Change notification pushed by the controller.
    Diff,
}

impl MeasurementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::Get => "GET",
            MeasurementKind::Diff => "DIFF",
        }
    }
}

/// A decoded controller line.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// A value for a configured variable.
    Measurement {
        kind: MeasurementKind,
        name: String,
        value: f64,
    },
    /// `ERROR:<message>`
    Error(String),
    /// `WARNING:<message>`
    Warning(String),
    /// Any other method.
    Unrecognized { method: String, params: String },
}

/// Decode one chunk received from the controller into its non-blank lines.
///
/// A line split across two chunks is not reassembled; the controller
/// flushes complete lines.
pub fn decode_lines(bytes: &[u8]) -> Vec<String> {
    let (text, had_errors) = WINDOWS_1250.decode_without_bom_handling(bytes);
    if had_errors {
        tracing::debug!(bytes = bytes.len(), "Controller data is not valid Windows-1250");
    }
    text.split(LINE_TERMINATOR)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Encode a command line, terminator included.
pub fn encode_command(command: &str) -> Vec<u8> {
    let line = format!("{command}{LINE_TERMINATOR}");
    let (bytes, _encoding, had_errors) = WINDOWS_1250.encode(&line);
    if had_errors {
        tracing::debug!(command = %command, "Command has characters outside Windows-1250");
    }
    bytes.into_owned()
}

/// Read request for a variable.
pub fn get_request(name: &str) -> String {
    format!("GET:{name}")
}

/// Parse a line without consulting the variable registry.
pub fn parse_line(line: &str) -> Result<Response, ProtocolError> {
    let (method, params) = line.split_once(':').ok_or(ProtocolError::MissingSeparator)?;
    if params.is_empty() {
        return Err(ProtocolError::EmptyParams);
    }

    match method {
        "GET" | "DIFF" => {
            let kind = if method == "GET" {
                MeasurementKind::Get
            } else {
                MeasurementKind::Diff
            };
            let (name, value) = params
                .split_once(',')
                .ok_or_else(|| ProtocolError::MissingValue(params.to_string()))?;
            if name.is_empty() {
                return Err(ProtocolError::MissingName(params.to_string()));
            }
            // Only the field up to a further comma is the value.
            let raw = value.split(',').next().unwrap_or_default().trim();
            if raw.is_empty() {
                return Err(ProtocolError::MissingValue(params.to_string()));
            }
            let value = raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ProtocolError::InvalidValue {
                    name: name.to_string(),
                    value: raw.to_string(),
                })?;

            Ok(Response::Measurement {
                kind,
                name: name.to_string(),
                value,
            })
        }
        "ERROR" => Ok(Response::Error(params.to_string())),
        "WARNING" => Ok(Response::Warning(params.to_string())),
        _ => Ok(Response::Unrecognized {
            method: method.to_string(),
            params: params.to_string(),
        }),
    }
}

/// Parses controller lines and rejects measurements for unknown variables.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    registry: VariableRegistry,
}

impl ResponseParser {
    pub fn new(registry: VariableRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn parse(&self, line: &str) -> Result<Response, ProtocolError> {
        let response = parse_line(line)?;
        if let Response::Measurement { name, .. } = &response
            && !self.registry.contains(name)
        {
            return Err(ProtocolError::UnknownVariable(name.clone()));
        }
        Ok(response)
    }
}
