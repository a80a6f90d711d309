//! Interactive commands read from stdin.

use std::io::BufRead;

use crossbeam_channel::Sender;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserCommand {
    /// Play the next caption.
    Next,
    /// Play the last caption again.
    Replay,
    /// Jump to a caption index.
    Goto(usize),
    TogglePause,
    List,
    Help,
    Quit,
}

pub const HELP: &str = "commands: [Enter]/n next, r replay, g <index> go to caption, p pause/resume, l list, h help, q quit";

pub fn parse_command(line: &str) -> Result<UserCommand, String> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(UserCommand::Next);
    };
    let cmd = match word.to_ascii_lowercase().as_str() {
        "n" | "next" => UserCommand::Next,
        "r" | "replay" => UserCommand::Replay,
        "g" | "goto" => {
            let index = parts
                .next()
                .ok_or_else(|| "g needs a caption index".to_string())?;
            let index = index
                .parse::<usize>()
                .map_err(|_| format!("invalid caption index: {index}"))?;
            UserCommand::Goto(index)
        }
        "p" | "pause" => UserCommand::TogglePause,
        "l" | "list" => UserCommand::List,
        "h" | "help" | "?" => UserCommand::Help,
        "q" | "quit" | "exit" => UserCommand::Quit,
        other => return Err(format!("unknown command: {other}")),
    };
    if let Some(extra) = parts.next() {
        return Err(format!("unexpected argument: {extra}"));
    }
    Ok(cmd)
}

/// Forward parsed lines from `input` until it ends or the receiver goes away.
///
/// End of input is sent as `Quit`.
pub fn forward_commands(input: impl BufRead, tx: &Sender<UserCommand>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("stdin read failed: {e}");
                break;
            }
        };
        match parse_command(&line) {
            Ok(cmd) => {
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            Err(msg) => eprintln!("{msg}\n{HELP}"),
        }
    }
    let _ = tx.send(UserCommand::Quit);
}
