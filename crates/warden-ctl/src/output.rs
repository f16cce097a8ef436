// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Response rendering.

use warden_protocol::{DEFAULT_DELIMITER, FlagError, Response};

/// Render flattened fields as `key : value` lines.
pub fn format_fields<'a>(fields: impl IntoIterator<Item = &'a (String, String)>) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(" : ");
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Render a response, skipping the named top-level fields.
pub fn format_response(response: &Response, skip: &[&str]) -> Result<String, FlagError> {
    let fields = response.to_flags(DEFAULT_DELIMITER)?;
    Ok(format_fields(fields.iter().filter(|(key, _)| {
        let top = key.split(['.', '[']).next().unwrap_or(key);
        !skip.contains(&top)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_protocol::messages::*;

    #[test]
    fn test_nested_and_repeated_fields() {
        let response = Response::Info(InfoResponse {
            state: Some("active".to_string()),
            events: vec!["oom".to_string()],
            ..Default::default()
        });
        let text = format_response(&response, &[]).unwrap();
        assert_eq!(text, "state : active\nevents[0] : oom\n");
    }

    #[test]
    fn test_empty_response_prints_nothing() {
        let text = format_response(&Response::Ping(PingResponse {}), &[]).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_skip_fields() {
        let response = Response::Link(LinkResponse {
            exit_status: Some(3),
            stdout: Some(b"out\n".to_vec()),
            stderr: Some(b"err\n".to_vec()),
            info: Some(InfoResponse {
                state: Some("active".to_string()),
                ..Default::default()
            }),
            failure: None,
        });
        let text = format_response(&response, &["stdout", "stderr"]).unwrap();
        assert_eq!(text, "exit_status : 3\ninfo.state : active\n");
    }
}
