#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArgShape {
    None,
    Path,
    OptionalPath,
    Text,
    Word,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub shape: ArgShape,
}

const fn spec(command: &'static str, shape: ArgShape) -> CommandSpec {
    CommandSpec { command, shape }
}

pub(crate) const SESSION_COMMANDS: &[CommandSpec] = &[
    spec("image", ArgShape::Path),
    spec("default", ArgShape::None),
    spec("analyze", ArgShape::None),
    spec("generate", ArgShape::None),
    spec("go", ArgShape::None),
    spec("prompt", ArgShape::Text),
    spec("clear_prompt", ArgShape::None),
    spec("removebg", ArgShape::Word),
    spec("mode", ArgShape::Word),
    spec("policy", ArgShape::Word),
    spec("view", ArgShape::Word),
    spec("toggle", ArgShape::None),
    spec("save", ArgShape::OptionalPath),
    spec("status", ArgShape::None),
    spec("help", ArgShape::None),
    spec("quit", ArgShape::None),
];

pub(crate) fn find_spec(command: &str) -> Option<&'static CommandSpec> {
    SESSION_COMMANDS.iter().find(|spec| spec.command == command)
}

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/image PATH",
    "/default",
    "/analyze",
    "/generate",
    "/go",
    "/prompt TEXT",
    "/clear_prompt",
    "/removebg on|off",
    "/mode none|separate|fused",
    "/policy warn|escalate",
    "/view original|cutout",
    "/toggle",
    "/save [DIR]",
    "/status",
    "/help",
    "/quit",
];
