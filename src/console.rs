use crate::command::{CommandReply, OperatorCommand};

/// One parsed operator console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(OperatorCommand),
    Quit,
    Empty,
    Unknown,
}

/// Parse a console line. Grammar (case-sensitive, trimmed):
/// `status | go | nogo | abort | throttle <N> | quit | exit`.
/// An out-of-range throttle value is accepted here; the command service
/// clamps it.
pub fn parse_line(line: &str) -> ConsoleInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleInput::Empty;
    }
    match trimmed {
        "status" => return ConsoleInput::Command(OperatorCommand::Status),
        "go" => return ConsoleInput::Command(OperatorCommand::Go),
        "nogo" => return ConsoleInput::Command(OperatorCommand::NoGo),
        "abort" => return ConsoleInput::Command(OperatorCommand::Abort),
        "quit" | "exit" => return ConsoleInput::Quit,
        _ => {}
    }
    if let Some(rest) = trimmed.strip_prefix("throttle") {
        if let Ok(value) = rest.trim().parse::<i64>() {
            let clamped = value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
            return ConsoleInput::Command(OperatorCommand::Throttle(clamped));
        }
    }
    ConsoleInput::Unknown
}

/// Reply line shown for each command.
pub fn format_reply(reply: CommandReply) -> String {
    format!(
        "ok={} go={} throttle={}",
        u8::from(reply.ok),
        u8::from(reply.mission_go),
        reply.throttle
    )
}
