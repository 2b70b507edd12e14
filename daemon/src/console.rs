/// Line-oriented console standing in for the host UI and the platform's
/// lifecycle notifications.
///
/// Each stdin line is one command.  Volume commands press the simulated side
/// buttons directly, since they model hardware outside the daemon.
/// Everything else is forwarded to the event loop as a [`DaemonEvent`].
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{DaemonEvent, ForegroundEvent};
use crate::sim::VolumeButtons;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Foreground(ForegroundEvent),
    VolumeUp,
    VolumeDown,
    Capture,
    Start,
    Stop,
    Grant,
    Deny,
    Status,
    Quit,
}

pub const HELP: &str = "commands: active | resign | background | up (+) | down (-) | capture | \
start | stop | grant | deny | status | quit";

/// Converts one console line to a command.
///
/// Matching is case-insensitive and ignores surrounding whitespace.
/// Returns `None` for blank or unrecognised input.
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    use ConsoleCommand::*;
    match line.trim().to_lowercase().as_str() {
        "active" | "foreground" => Some(Foreground(ForegroundEvent::DidBecomeActive)),
        "resign" | "inactive" => Some(Foreground(ForegroundEvent::WillResignActive)),
        "background" => Some(Foreground(ForegroundEvent::DidEnterBackground)),
        "up" | "+" => Some(VolumeUp),
        "down" | "-" => Some(VolumeDown),
        "capture" | "shutter" => Some(Capture),
        "start" => Some(Start),
        "stop" => Some(Stop),
        "grant" => Some(Grant),
        "deny" => Some(Deny),
        "status" => Some(Status),
        "quit" | "exit" => Some(Quit),
        _ => None,
    }
}

/// The event a command forwards to the loop, if any.
fn to_event(cmd: ConsoleCommand) -> Option<DaemonEvent> {
    match cmd {
        ConsoleCommand::Foreground(e) => Some(DaemonEvent::Lifecycle(e)),
        ConsoleCommand::Capture => Some(DaemonEvent::CaptureRequested),
        ConsoleCommand::Start => Some(DaemonEvent::StartRequested),
        ConsoleCommand::Stop => Some(DaemonEvent::StopRequested),
        ConsoleCommand::Grant => Some(DaemonEvent::AccessDecision(true)),
        ConsoleCommand::Deny => Some(DaemonEvent::AccessDecision(false)),
        ConsoleCommand::Status => Some(DaemonEvent::StatusRequested),
        ConsoleCommand::Quit => Some(DaemonEvent::Shutdown),
        ConsoleCommand::VolumeUp | ConsoleCommand::VolumeDown => None,
    }
}

/// Reads stdin until EOF.  EOF ends console input but not the daemon.
pub async fn run(buttons: VolumeButtons, tx: mpsc::Sender<DaemonEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("console input closed");
                return;
            }
            Err(e) => {
                warn!("console read failed: {e}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(cmd) = parse_command(&line) else {
            println!("unknown command {:?}; {HELP}", line.trim());
            continue;
        };
        match cmd {
            ConsoleCommand::VolumeUp => println!("volume {:.4}", buttons.press_up()),
            ConsoleCommand::VolumeDown => println!("volume {:.4}", buttons.press_down()),
            other => {
                let quit = other == ConsoleCommand::Quit;
                if let Some(event) = to_event(other) {
                    if tx.send(event).await.is_err() || quit {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_command: lifecycle ──────────────────────────────────────────────

    #[test]
    fn parse_lifecycle_words() {
        assert_eq!(
            parse_command("active"),
            Some(ConsoleCommand::Foreground(ForegroundEvent::DidBecomeActive))
        );
        assert_eq!(parse_command("foreground"), parse_command("active"));
        assert_eq!(
            parse_command("resign"),
            Some(ConsoleCommand::Foreground(ForegroundEvent::WillResignActive))
        );
        assert_eq!(parse_command("inactive"), parse_command("resign"));
        assert_eq!(
            parse_command("background"),
            Some(ConsoleCommand::Foreground(ForegroundEvent::DidEnterBackground))
        );
    }

    // ── parse_command: buttons and shutter ────────────────────────────────────

    #[test]
    fn parse_volume_aliases() {
        assert_eq!(parse_command("up"), Some(ConsoleCommand::VolumeUp));
        assert_eq!(parse_command("+"), Some(ConsoleCommand::VolumeUp));
        assert_eq!(parse_command("down"), Some(ConsoleCommand::VolumeDown));
        assert_eq!(parse_command("-"), Some(ConsoleCommand::VolumeDown));
    }

    #[test]
    fn parse_session_commands() {
        assert_eq!(parse_command("capture"), Some(ConsoleCommand::Capture));
        assert_eq!(parse_command("shutter"), Some(ConsoleCommand::Capture));
        assert_eq!(parse_command("start"), Some(ConsoleCommand::Start));
        assert_eq!(parse_command("stop"), Some(ConsoleCommand::Stop));
        assert_eq!(parse_command("grant"), Some(ConsoleCommand::Grant));
        assert_eq!(parse_command("deny"), Some(ConsoleCommand::Deny));
        assert_eq!(parse_command("status"), Some(ConsoleCommand::Status));
        assert_eq!(parse_command("quit"), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("exit"), Some(ConsoleCommand::Quit));
    }

    #[test]
    fn parse_is_case_insensitive_and_trims() {
        assert_eq!(parse_command("  CAPTURE \n"), Some(ConsoleCommand::Capture));
        assert_eq!(parse_command("Background"), parse_command("background"));
    }

    // ── parse_command: unrecognised ───────────────────────────────────────────

    #[test]
    fn parse_rejects_unknown_and_blank() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("photo"), None);
        assert_eq!(parse_command("capture now"), None);
        assert_eq!(parse_command("++"), None);
    }

    // ── to_event ──────────────────────────────────────────────────────────────

    #[test]
    fn volume_commands_do_not_reach_the_loop() {
        assert!(to_event(ConsoleCommand::VolumeUp).is_none());
        assert!(to_event(ConsoleCommand::VolumeDown).is_none());
    }

    #[test]
    fn commands_map_to_events() {
        assert!(matches!(
            to_event(ConsoleCommand::Foreground(ForegroundEvent::DidEnterBackground)),
            Some(DaemonEvent::Lifecycle(ForegroundEvent::DidEnterBackground))
        ));
        assert!(matches!(to_event(ConsoleCommand::Capture), Some(DaemonEvent::CaptureRequested)));
        assert!(matches!(to_event(ConsoleCommand::Grant), Some(DaemonEvent::AccessDecision(true))));
        assert!(matches!(to_event(ConsoleCommand::Deny), Some(DaemonEvent::AccessDecision(false))));
        assert!(matches!(to_event(ConsoleCommand::Quit), Some(DaemonEvent::Shutdown)));
    }
}
