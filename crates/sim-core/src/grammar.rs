//! Command grammar for model replies. A reply is a batch of lines; each
//! line is one command invocation. Parsing never aborts the batch: bad
//! lines become per-line failures and the rest still parse.

/// Characters stripped from around the head token before matching. Models
/// habitually wrap command names in backticks or trail punctuation.
const HEAD_TRIM: &str = "`!.,?;:\"'，。！？；：";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    /// `Some` makes the parameter optional with this default.
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub desc: String,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            desc: desc.into(),
        }
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// One usage line: `` `name <required> [optional]` ; description ``.
    pub fn usage(&self) -> String {
        let mut signature = format!("`{}", self.name);
        for param in &self.params {
            if param.default.is_some() {
                signature.push_str(&format!(" [{}]", param.name));
            } else {
                signature.push_str(&format!(" <{}>", param.name));
            }
        }
        signature.push('`');
        format!("{signature} ; {}", self.desc)
    }
}

/// A parsed command line: matched spec name plus one argument per parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureKind {
    UnknownCommand,
    MissingArgument,
}

impl ParseFailureKind {
    pub fn describe(self) -> &'static str {
        match self {
            Self::UnknownCommand => "unknown command",
            Self::MissingArgument => "missing argument",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub line: String,
    pub kind: ParseFailureKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseOutcome {
    pub invocations: Vec<Invocation>,
    pub failures: Vec<ParseFailure>,
}

/// Parse a multi-line reply against the command set. Arguments bind
/// positionally on whitespace; the final parameter is greedy and takes the
/// rest of the line, so free text never needs quoting.
pub fn parse_commands(specs: &[CommandSpec], text: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let head = match tokens.next() {
            Some(token) => token.trim_matches(|c: char| c.is_whitespace() || HEAD_TRIM.contains(c)),
            None => continue,
        };
        if head.is_empty() {
            continue;
        }
        let Some(spec) = specs.iter().find(|s| s.name == head) else {
            outcome.failures.push(ParseFailure {
                line: line.to_string(),
                kind: ParseFailureKind::UnknownCommand,
            });
            continue;
        };
        let rest: Vec<&str> = tokens.collect();
        let mut args = Vec::with_capacity(spec.params.len());
        let mut failed = false;
        for (i, param) in spec.params.iter().enumerate() {
            let greedy = i + 1 == spec.params.len();
            let value = if greedy {
                match rest.get(i..) {
                    Some(tail) if !tail.is_empty() => Some(tail.join(" ")),
                    _ => None,
                }
            } else {
                rest.get(i).map(|t| t.to_string())
            };
            match (value, &param.default) {
                (Some(v), _) => args.push(v),
                (None, Some(default)) => args.push(default.clone()),
                (None, None) => {
                    outcome.failures.push(ParseFailure {
                        line: line.to_string(),
                        kind: ParseFailureKind::MissingArgument,
                    });
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            outcome.invocations.push(Invocation {
                name: spec.name.clone(),
                args,
            });
        }
    }
    outcome
}

/// The default agent protocol. Every command a person can issue on their
/// turn; the resolver classifies them as self-only or world-affecting.
pub fn default_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("speak", "say something to a person in the same place")
            .required("target")
            .required("message"),
        CommandSpec::new("think", "think to myself, visible to no one").required("thought"),
        CommandSpec::new("interact", "use or act on an object near me")
            .required("target")
            .required("action"),
        CommandSpec::new("move", "go to another place, by name or full path")
            .required("destination"),
        CommandSpec::new("look", "examine an object or person near me").required("target"),
        CommandSpec::new("memorize", "write something into my long-term memory")
            .required("content"),
        CommandSpec::new("note", "jot something into my short-term memory").required("content"),
        CommandSpec::new("set-relation", "set how I relate to a person")
            .required("target")
            .required("relation")
            .required("description"),
        CommandSpec::new("add-relation-note", "add to what I know about a person")
            .required("target")
            .required("note"),
        CommandSpec::new("relations", "list the people I have relations with"),
        CommandSpec::new("recall", "search my memories").optional("filter", ""),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_renders_required_and_optional_params() {
        let spec = CommandSpec::new("recall", "search my memories").optional("filter", "");
        assert_eq!(spec.usage(), "`recall [filter]` ; search my memories");

        let spec = CommandSpec::new("speak", "say something")
            .required("target")
            .required("message");
        assert_eq!(spec.usage(), "`speak <target> <message>` ; say something");
    }

    #[test]
    fn final_parameter_is_greedy() {
        let outcome = parse_commands(&default_commands(), "speak Bob good morning to you");
        assert_eq!(outcome.failures.len(), 0);
        assert_eq!(
            outcome.invocations[0].args,
            vec!["Bob".to_string(), "good morning to you".to_string()]
        );
    }

    #[test]
    fn optional_parameter_fills_its_default() {
        let outcome = parse_commands(&default_commands(), "recall");
        assert_eq!(outcome.invocations[0].args, vec![String::new()]);
    }

    #[test]
    fn bad_lines_fail_without_aborting_the_batch() {
        let reply = "dance wildly\nspeak Bob\nmove kitchen\n";
        let outcome = parse_commands(&default_commands(), reply);
        assert_eq!(outcome.invocations.len(), 1);
        assert_eq!(outcome.invocations[0].name, "move");
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].kind, ParseFailureKind::UnknownCommand);
        assert_eq!(outcome.failures[1].kind, ParseFailureKind::MissingArgument);
    }

    #[test]
    fn head_token_punctuation_is_stripped() {
        let outcome = parse_commands(&default_commands(), "`move` kitchen");
        assert_eq!(outcome.invocations.len(), 1);
        assert_eq!(outcome.invocations[0].name, "move");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let outcome = parse_commands(&default_commands(), "\n   \nthink quiet day\n");
        assert_eq!(outcome.invocations.len(), 1);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn non_ascii_command_names_parse() {
        let specs = vec![
            CommandSpec::new("对话", "speak to someone")
                .required("target")
                .required("message"),
            CommandSpec::new("移动", "move somewhere").required("destination"),
        ];
        let outcome = parse_commands(&specs, "对话 小明 你好\n移动\n查看 床\n");
        assert_eq!(outcome.invocations.len(), 1);
        assert_eq!(
            outcome.invocations[0].args,
            vec!["小明".to_string(), "你好".to_string()]
        );
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].kind, ParseFailureKind::MissingArgument);
        assert_eq!(outcome.failures[1].kind, ParseFailureKind::UnknownCommand);
    }

    #[test]
    fn zero_param_command_ignores_trailing_tokens() {
        let outcome = parse_commands(&default_commands(), "relations with everyone");
        assert_eq!(outcome.invocations.len(), 1);
        assert!(outcome.invocations[0].args.is_empty());
        assert!(outcome.failures.is_empty());
    }
}
