use super::command_registry::{find_spec, ArgShape};

/// One line of interactive session input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Noop,
    SetImage { path: String },
    UseDefaultImage,
    Analyze,
    Generate,
    Go,
    SetInstructions { text: String },
    ClearInstructions,
    SetRemoveBackground { enabled: bool },
    SetMode { mode: String },
    SetPolicy { policy: String },
    SetView { view: String },
    ToggleView,
    Save { dir: Option<String> },
    Status,
    Help,
    Quit,
    Invalid { command: String, reason: String },
    Unknown { command: String, arg: String },
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts.into_iter().filter(|value| !value.is_empty()).collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" | "enable" | "enabled" => Some(true),
        "off" | "false" | "no" | "0" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}

fn invalid(command: &str, reason: &str) -> SessionCommand {
    SessionCommand::Invalid {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

/// Slash commands map through the registry; any other text becomes the
/// user instructions for the next generation.
pub fn parse_command(text: &str) -> SessionCommand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return SessionCommand::Noop;
    }

    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return SessionCommand::SetInstructions {
            text: trimmed.to_string(),
        };
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return SessionCommand::SetInstructions {
            text: trimmed.to_string(),
        };
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    let Some(spec) = find_spec(&command) else {
        return SessionCommand::Unknown {
            command,
            arg: arg.to_string(),
        };
    };

    match spec.shape {
        ArgShape::Path if arg.is_empty() => invalid(&command, "requires a path"),
        ArgShape::Text | ArgShape::Word if arg.is_empty() => {
            invalid(&command, "requires an argument")
        }
        _ => match command.as_str() {
            "image" => SessionCommand::SetImage {
                path: parse_single_path_arg(arg),
            },
            "default" => SessionCommand::UseDefaultImage,
            "analyze" => SessionCommand::Analyze,
            "generate" => SessionCommand::Generate,
            "go" => SessionCommand::Go,
            "prompt" => SessionCommand::SetInstructions {
                text: arg.to_string(),
            },
            "clear_prompt" => SessionCommand::ClearInstructions,
            "removebg" => match parse_switch(arg) {
                Some(enabled) => SessionCommand::SetRemoveBackground { enabled },
                None => invalid(&command, "expects on or off"),
            },
            "mode" => SessionCommand::SetMode {
                mode: arg.to_string(),
            },
            "policy" => SessionCommand::SetPolicy {
                policy: arg.to_string(),
            },
            "view" => SessionCommand::SetView {
                view: arg.to_string(),
            },
            "toggle" => SessionCommand::ToggleView,
            "save" => SessionCommand::Save {
                dir: Some(parse_single_path_arg(arg)).filter(|value| !value.is_empty()),
            },
            "status" => SessionCommand::Status,
            "help" => SessionCommand::Help,
            "quit" => SessionCommand::Quit,
            _ => SessionCommand::Unknown {
                command,
                arg: arg.to_string(),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, SessionCommand};

    #[test]
    fn parse_image_with_quoted_path() {
        assert_eq!(
            parse_command("/image \"/tmp/my pets/rex.jpg\""),
            SessionCommand::SetImage {
                path: "/tmp/my pets/rex.jpg".to_string()
            }
        );
        assert_eq!(
            parse_command("  /IMAGE rex.png  "),
            SessionCommand::SetImage {
                path: "rex.png".to_string()
            }
        );
    }

    #[test]
    fn parse_image_requires_path() {
        assert_eq!(
            parse_command("/image"),
            SessionCommand::Invalid {
                command: "image".to_string(),
                reason: "requires a path".to_string()
            }
        );
    }

    #[test]
    fn plain_text_sets_instructions() {
        assert_eq!(
            parse_command("give him a wizard hat"),
            SessionCommand::SetInstructions {
                text: "give him a wizard hat".to_string()
            }
        );
        assert_eq!(
            parse_command("/prompt  make it glossy "),
            SessionCommand::SetInstructions {
                text: "make it glossy".to_string()
            }
        );
        assert_eq!(parse_command("   "), SessionCommand::Noop);
    }

    #[test]
    fn parse_switches_and_words() {
        assert_eq!(
            parse_command("/removebg off"),
            SessionCommand::SetRemoveBackground { enabled: false }
        );
        assert!(matches!(
            parse_command("/removebg maybe"),
            SessionCommand::Invalid { .. }
        ));
        assert_eq!(
            parse_command("/mode separate"),
            SessionCommand::SetMode {
                mode: "separate".to_string()
            }
        );
        assert_eq!(
            parse_command("/view original"),
            SessionCommand::SetView {
                view: "original".to_string()
            }
        );
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_command("/analyze"), SessionCommand::Analyze);
        assert_eq!(parse_command("/generate"), SessionCommand::Generate);
        assert_eq!(parse_command("/go"), SessionCommand::Go);
        assert_eq!(parse_command("/toggle"), SessionCommand::ToggleView);
        assert_eq!(parse_command("/save"), SessionCommand::Save { dir: None });
        assert_eq!(
            parse_command("/save out/run 2"),
            SessionCommand::Save {
                dir: Some("out/run 2".to_string())
            }
        );
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_command("/magic foo bar"),
            SessionCommand::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string()
            }
        );
    }
}
