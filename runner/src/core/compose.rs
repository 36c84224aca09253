//! Command composition and tool argument templates.

use std::borrow::Cow;
use std::path::Path;

/// Placeholder replaced by the call-trace sink path in the tracer template.
pub const SINK_PLACEHOLDER: &str = "{sink}";
/// Placeholder replaced by the child's process id in sampler templates.
pub const PID_PLACEHOLDER: &str = "{pid}";
/// Placeholder replaced by the capture file path in the capture template.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// System-call tracer invocation that should wrap the user command.
#[derive(Debug, Clone, Copy)]
pub struct TraceWrap<'a> {
    /// Tracer argv template containing [`SINK_PLACEHOLDER`].
    pub tracer: &'a [String],
    /// File the tracer writes its log to.
    pub sink: &'a Path,
}

/// Produce the shell command line for one iteration.
///
/// Without a tracer the command is returned unchanged. With one, the expanded
/// tracer argv is shell-quoted and prepended, so the tracer runs the first
/// simple command of the user's line.
pub fn compose(command: &str, wrap: Option<TraceWrap<'_>>) -> String {
    let Some(wrap) = wrap else {
        return command.to_string();
    };
    let sink = wrap.sink.to_string_lossy();
    let mut line = expand(wrap.tracer, SINK_PLACEHOLDER, &sink)
        .iter()
        .map(|arg| shell_quote(arg).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    line.push(' ');
    line.push_str(command);
    line
}

/// Replace every occurrence of `placeholder` in each template argument.
pub fn expand(template: &[String], placeholder: &str, value: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(placeholder, value))
        .collect()
}

/// True if any argument of `template` mentions `placeholder`.
pub fn mentions(template: &[String], placeholder: &str) -> bool {
    template.iter().any(|arg| arg.contains(placeholder))
}

/// Quote `arg` for POSIX `sh` unless it only contains safe characters.
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    let safe = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,+@%".contains(&b));
    if safe {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}
