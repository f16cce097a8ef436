// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command-line words to requests.
//!
//! Commands whose protocol name has two parts (`net_in`, `limit_memory`,
//! `copy_out`, ...) are typed as two words: `net in`, `limit memory`,
//! `copy out`. The snake_case form is accepted as well.

use warden_protocol::{DEFAULT_DELIMITER, FlagError, Parsed, Request, Type};

/// Command prefixes that take a second word.
const GROUPS: &[&str] = &["net", "copy", "limit", "attach", "detach"];

/// What a line asks the shell to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Blank line.
    Nothing,
    /// Print text; nothing is sent.
    Help(String),
    Send(Request),
    Quit,
}

/// Turn the words of one line into an [`Action`].
pub fn parse(words: &[String]) -> Result<Action, FlagError> {
    let Some(first) = words.first() else {
        return Ok(Action::Nothing);
    };

    match first.as_str() {
        "exit" | "quit" => return Ok(Action::Quit),
        "help" => {
            return match resolve(&words[1..]) {
                None => Ok(Action::Help(overview())),
                Some((command, _)) => command_help(&command),
            };
        }
        _ => {}
    }

    let Some((command, flags)) = resolve(words) else {
        return Ok(Action::Nothing);
    };
    if GROUPS.contains(&command.as_str()) {
        return Ok(Action::Help(group_help(&command)));
    }
    match Request::from_flags(&command, flags, DEFAULT_DELIMITER)? {
        Parsed::Message(request) => Ok(Action::Send(request)),
        Parsed::Help(help) => Ok(Action::Help(format!("{}: {}", display_name(&command), help))),
    }
}

/// Join a group word with its subcommand. Returns the protocol command name
/// and the remaining flag words.
fn resolve(words: &[String]) -> Option<(String, &[String])> {
    let first = words.first()?;
    if GROUPS.contains(&first.as_str())
        && let Some(second) = words.get(1)
        && !second.starts_with("--")
        && second != "help"
    {
        return Some((format!("{first}_{second}"), &words[2..]));
    }
    Some((first.clone(), &words[1..]))
}

fn command_help(command: &str) -> Result<Action, FlagError> {
    if GROUPS.contains(&command) {
        return Ok(Action::Help(group_help(command)));
    }
    match Request::from_flags(command, &["--help".to_string()], DEFAULT_DELIMITER)? {
        Parsed::Help(help) => Ok(Action::Help(format!("{}: {}", display_name(command), help))),
        // Every message answers `--help`
        Parsed::Message(_) => Err(FlagError::UnknownCommand(command.to_string())),
    }
}

/// `net_in` is typed `net in`.
fn display_name(command: &str) -> String {
    match command.split_once('_') {
        Some((group, rest)) if GROUPS.contains(&group) => format!("{group} {rest}"),
        _ => command.to_string(),
    }
}

fn describe(ty: Type) -> &'static str {
    ty.request_schema().map(|s| s.description).unwrap_or_default()
}

fn overview() -> String {
    let names: Vec<_> = Type::COMMANDS
        .iter()
        .map(|ty| (display_name(ty.command()), describe(*ty)))
        .collect();
    let width = names.iter().map(|(n, _)| n.len()).max().unwrap_or_default();

    let mut out = String::from("Commands:\n");
    for (name, description) in names {
        out.push_str(&format!("  {name:width$}  {description}\n"));
    }
    out.push_str(&format!("  {:width$}  Leave the shell.\n", "exit"));
    out.push_str("\nRun `<command> --help` for the flags of a command.\n");
    out
}

fn group_help(group: &str) -> String {
    let prefix = format!("{group}_");
    let mut out = format!("{group}: one of\n");
    for ty in Type::COMMANDS {
        if let Some(sub) = ty.command().strip_prefix(&prefix) {
            out.push_str(&format!("  {group} {sub}  {}\n", describe(*ty)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::tokenize;
    use warden_protocol::messages::*;

    fn parse_line(line: &str) -> Result<Action, FlagError> {
        parse(&tokenize(line).unwrap())
    }

    fn request(line: &str) -> Request {
        match parse_line(line).unwrap() {
            Action::Send(request) => request,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    fn help(line: &str) -> String {
        match parse_line(line).unwrap() {
            Action::Help(text) => text,
            other => panic!("expected help, got {other:?}"),
        }
    }

    // ========== Request Tests ==========

    #[test]
    fn test_single_word_command() {
        assert_eq!(request("ping"), Request::Ping(PingRequest {}));
        assert_eq!(
            request("echo --message 'hello world'"),
            Request::Echo(EchoRequest {
                message: "hello world".to_string()
            })
        );
    }

    #[test]
    fn test_two_word_command() {
        let Request::NetIn(net_in) = request("net in --handle abc --host_port 8080") else {
            panic!("expected net_in");
        };
        assert_eq!(net_in.handle, "abc");
        assert_eq!(net_in.host_port, Some(8080));

        let Request::LimitMemory(limit) = request("limit memory --handle abc --limit_in_bytes 1024") else {
            panic!("expected limit_memory");
        };
        assert_eq!(limit.limit_in_bytes, Some(1024));
    }

    #[test]
    fn test_snake_case_command() {
        assert!(matches!(request("copy_out --handle a --src_path /x --dst_path /y"), Request::CopyOut(_)));
    }

    #[test]
    fn test_nested_flags() {
        let Request::Run(run) = request("run --handle h --script 'ulimit -n' --rlimits.nofile 64") else {
            panic!("expected run");
        };
        assert_eq!(run.script, "ulimit -n");
        assert_eq!(run.rlimits.unwrap().nofile, Some(64));
    }

    #[test]
    fn test_blank_and_quit() {
        assert_eq!(parse(&[]).unwrap(), Action::Nothing);
        assert_eq!(parse_line("exit").unwrap(), Action::Quit);
        assert_eq!(parse_line("quit").unwrap(), Action::Quit);
    }

    // ========== Error Tests ==========

    #[test]
    fn test_unknown_command() {
        assert!(matches!(parse_line("frobnicate"), Err(FlagError::UnknownCommand(c)) if c == "frobnicate"));
        assert!(matches!(parse_line("net sideways --handle a"), Err(FlagError::UnknownCommand(c)) if c == "net_sideways"));
    }

    #[test]
    fn test_missing_required_flag() {
        assert!(parse_line("spawn --script 'true'").is_err());
    }

    // ========== Help Tests ==========

    #[test]
    fn test_overview_lists_every_command() {
        let text = help("help");
        for ty in Type::COMMANDS {
            assert!(text.contains(&display_name(ty.command())), "missing {:?}", ty);
        }
        assert!(text.contains("net in"));
        assert!(text.contains("Leave the shell."));
    }

    #[test]
    fn test_command_help() {
        let text = help("run --help");
        assert!(text.starts_with("run: Spawn a job and wait for it to finish."));
        assert!(text.contains("--script <script> (string)"));
        assert_eq!(help("help run"), text);
    }

    #[test]
    fn test_two_word_command_help() {
        let text = help("net in --help");
        assert!(text.starts_with("net in: "));
        assert!(text.contains("--handle"));
        assert_eq!(help("help net in"), text);
    }

    #[test]
    fn test_group_help() {
        for line in ["net", "net --help", "help net"] {
            let text = help(line);
            assert!(text.contains("net in"), "{line}");
            assert!(text.contains("net out"), "{line}");
            assert!(!text.contains("copy"), "{line}");
        }
    }
}
