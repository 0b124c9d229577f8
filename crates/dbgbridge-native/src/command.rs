//! Outbound engine commands
//!
//! A command line looks like `name -i <txn> -f value ... -- <base64 data>`.
//! Transaction ids are allocated by the multiplexer, so a [`NativeCommand`]
//! carries everything except the id and only becomes wire text once it is
//! wrapped in an [`OutboundFrame`].

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// A command without its transaction id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCommand {
    name: String,
    args: Vec<(char, String)>,
    data: Option<String>,
}

impl NativeCommand {
    /// Bare command
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            data: None,
        }
    }

    /// Add a `-flag value` argument
    #[must_use]
    pub fn arg(mut self, flag: char, value: impl ToString) -> Self {
        self.args.push((flag, value.to_string()));
        self
    }

    /// Attach trailing data, sent base64-encoded after `--`
    #[must_use]
    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments in insertion order
    pub fn args(&self) -> &[(char, String)] {
        &self.args
    }

    /// Value of the first argument with the given flag
    pub fn get_arg(&self, flag: char) -> Option<&str> {
        self.args
            .iter()
            .find(|(f, _)| *f == flag)
            .map(|(_, v)| v.as_str())
    }

    /// Trailing data before encoding
    pub fn payload(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Whether the engine only answers this command when it stops again
    pub fn is_continuation(&self) -> bool {
        matches!(
            self.name.as_str(),
            "run" | "step_into" | "step_over" | "step_out"
        )
    }

    /// `run`
    pub fn run() -> Self {
        Self::new("run")
    }

    /// `step_into`
    pub fn step_into() -> Self {
        Self::new("step_into")
    }

    /// `step_over`
    pub fn step_over() -> Self {
        Self::new("step_over")
    }

    /// `step_out`
    pub fn step_out() -> Self {
        Self::new("step_out")
    }

    /// `break`, interrupts a running engine
    pub fn pause() -> Self {
        Self::new("break")
    }

    /// `stop`
    pub fn stop() -> Self {
        Self::new("stop")
    }

    /// `detach`
    pub fn detach() -> Self {
        Self::new("detach")
    }

    /// `stack_get`
    pub fn stack_get() -> Self {
        Self::new("stack_get")
    }

    /// `context_names -d depth`
    pub fn context_names(depth: u32) -> Self {
        Self::new("context_names").arg('d', depth)
    }

    /// `context_get -d depth -c context`
    pub fn context_get(depth: u32, context: u32) -> Self {
        Self::new("context_get").arg('d', depth).arg('c', context)
    }

    /// `property_get -d depth -c context -n fullname`
    pub fn property_get(depth: u32, context: u32, fullname: impl ToString) -> Self {
        Self::new("property_get")
            .arg('d', depth)
            .arg('c', context)
            .arg('n', fullname)
    }

    /// `eval -- expression`
    pub fn eval(expression: impl Into<String>) -> Self {
        Self::new("eval").data(expression)
    }

    /// `breakpoint_set -t line -f file -n line` with an optional condition
    pub fn breakpoint_set_line(file: impl ToString, line: u32, condition: Option<&str>) -> Self {
        let command = Self::new("breakpoint_set")
            .arg('t', "line")
            .arg('f', file)
            .arg('n', line);
        match condition {
            Some(condition) if !condition.is_empty() => command.data(condition),
            _ => command,
        }
    }

    /// `breakpoint_set -t exception -x *`
    pub fn breakpoint_set_exception() -> Self {
        Self::new("breakpoint_set").arg('t', "exception").arg('x', "*")
    }

    /// `breakpoint_remove -d id`
    pub fn breakpoint_remove(native_id: impl ToString) -> Self {
        Self::new("breakpoint_remove").arg('d', native_id)
    }

    /// `source -f file`
    pub fn source(file: impl ToString) -> Self {
        Self::new("source").arg('f', file)
    }

    /// `feature_set -n name -v value`
    pub fn feature_set(name: impl ToString, value: impl ToString) -> Self {
        Self::new("feature_set").arg('n', name).arg('v', value)
    }
}

impl fmt::Display for NativeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (flag, value) in &self.args {
            write!(f, " -{flag} {}", quote(value))?;
        }
        if self.data.is_some() {
            f.write_str(" -- ...")?;
        }
        Ok(())
    }
}

/// A command bound to its transaction id, ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Transaction id, echoed by the engine in its response
    pub transaction_id: u64,
    /// The command itself
    pub command: NativeCommand,
}

impl OutboundFrame {
    /// Bind a command to a transaction id
    pub fn new(transaction_id: u64, command: NativeCommand) -> Self {
        Self {
            transaction_id,
            command,
        }
    }

    /// Command line without the trailing NUL
    pub fn to_wire(&self) -> String {
        let mut line = format!("{} -i {}", self.command.name, self.transaction_id);
        for (flag, value) in &self.command.args {
            line.push_str(&format!(" -{flag} {}", quote(value)));
        }
        if let Some(data) = &self.command.data {
            line.push_str(" -- ");
            line.push_str(&STANDARD.encode(data.as_bytes()));
        }
        line
    }
}

fn quote(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '"', '\\', '\0']) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\0' => {}
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
