//! Declarative flag schemas and the generic argv parser behind every
//! registered command.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArgError {
    #[error("unknown option {0}")]
    UnknownOption(String),

    #[error("option {0} requires a value")]
    MissingValue(String),
}

/// One declared option: `--name` with an optional single-char alias.
#[derive(Debug, Clone, Copy)]
pub struct OptSpec {
    pub name: &'static str,
    pub alias: Option<char>,
    pub takes_value: bool,
    pub description: &'static str,
}

impl OptSpec {
    pub const fn flag(name: &'static str, alias: char, description: &'static str) -> Self {
        Self {
            name,
            alias: Some(alias),
            takes_value: false,
            description,
        }
    }

    pub const fn value(name: &'static str, alias: char, description: &'static str) -> Self {
        Self {
            name,
            alias: Some(alias),
            takes_value: true,
            description,
        }
    }
}

/// Parsed argv: flag occurrences by canonical name, plus positionals.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    flags: HashMap<&'static str, Vec<String>>,
    positionals: Vec<String>,
    pub help: bool,
}

impl ParsedArgs {
    pub fn has(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.flags
            .get(name)
            .and_then(|v| v.last())
            .map(String::as_str)
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.flags.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn positionals(&self) -> &[String] {
        &self.positionals
    }
}

/// Parses `args` (argv without the command name) against `specs`.
/// `--help`/`-h` short-circuits into `help`; `--` ends option parsing;
/// combined short flags (`-la`) work for value-less options.
pub fn parse(args: &[String], specs: &[OptSpec]) -> Result<ParsedArgs, ArgError> {
    let mut parsed = ParsedArgs::default();
    let mut iter = args.iter().peekable();
    let mut options_done = false;

    while let Some(arg) = iter.next() {
        if options_done || arg == "-" || !arg.starts_with('-') || arg.len() == 1 {
            parsed.positionals.push(arg.clone());
            continue;
        }
        if arg == "--" {
            options_done = true;
            continue;
        }
        if arg == "--help" || arg == "-h" {
            parsed.help = true;
            continue;
        }

        if let Some(long) = arg.strip_prefix("--") {
            let (name, inline_value) = match long.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (long, None),
            };
            let Some(spec) = specs.iter().find(|s| s.name == name) else {
                return Err(ArgError::UnknownOption(arg.clone()));
            };
            record(&mut parsed, spec, inline_value, &mut iter)?;
        } else {
            let shorts: Vec<char> = arg[1..].chars().collect();
            for (idx, c) in shorts.iter().enumerate() {
                let Some(spec) = specs.iter().find(|s| s.alias == Some(*c)) else {
                    return Err(ArgError::UnknownOption(format!("-{c}")));
                };
                if spec.takes_value {
                    // A value option consumes the rest of the cluster
                    // (`-n5`) or the next argument.
                    let rest: String = shorts[idx + 1..].iter().collect();
                    let inline = if rest.is_empty() { None } else { Some(rest) };
                    record(&mut parsed, spec, inline, &mut iter)?;
                    break;
                }
                record(&mut parsed, spec, None, &mut iter)?;
            }
        }
    }
    Ok(parsed)
}

fn record<'a, I>(
    parsed: &mut ParsedArgs,
    spec: &OptSpec,
    inline_value: Option<String>,
    iter: &mut std::iter::Peekable<I>,
) -> Result<(), ArgError>
where
    I: Iterator<Item = &'a String>,
{
    let entry = parsed.flags.entry(spec.name).or_default();
    if !spec.takes_value {
        entry.push(String::new());
        return Ok(());
    }
    let value = match inline_value {
        Some(value) => value,
        None => iter
            .next()
            .cloned()
            .ok_or_else(|| ArgError::MissingValue(format!("--{}", spec.name)))?,
    };
    entry.push(value);
    Ok(())
}

/// Renders `--help` output from the declared schema.
pub fn usage(name: &str, description: &str, usage_line: &str, specs: &[OptSpec]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Usage: {name} {usage_line}\n"));
    out.push_str(&format!("  {description}\n"));
    if !specs.is_empty() {
        out.push('\n');
        out.push_str("Options:\n");
        for spec in specs {
            let alias = spec
                .alias
                .map(|c| format!("-{c}, "))
                .unwrap_or_else(|| "    ".to_string());
            out.push_str(&format!(
                "  {alias}--{:<12} {}\n",
                spec.name, spec.description
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    const SPECS: &[OptSpec] = &[
        OptSpec::flag("long", 'l', "long listing"),
        OptSpec::flag("all", 'a', "include hidden"),
        OptSpec::value("lines", 'n', "line count"),
    ];

    #[test]
    fn long_and_short_forms() {
        let parsed = parse(&strings(&["--long", "a", "-n", "5", "b"]), SPECS).expect("parse");
        assert!(parsed.has("long"));
        assert_eq!(parsed.value("lines"), Some("5"));
        assert_eq!(parsed.positionals(), &["a", "b"]);
    }

    #[test]
    fn combined_shorts_and_inline_values() {
        let parsed = parse(&strings(&["-la"]), SPECS).expect("parse");
        assert!(parsed.has("long") && parsed.has("all"));

        let parsed = parse(&strings(&["-n5"]), SPECS).expect("parse");
        assert_eq!(parsed.value("lines"), Some("5"));

        let parsed = parse(&strings(&["--lines=7"]), SPECS).expect("parse");
        assert_eq!(parsed.value("lines"), Some("7"));
    }

    #[test]
    fn double_dash_ends_options() {
        let parsed = parse(&strings(&["--", "--long"]), SPECS).expect("parse");
        assert!(!parsed.has("long"));
        assert_eq!(parsed.positionals(), &["--long"]);
    }

    #[test]
    fn unknown_and_missing() {
        assert_eq!(
            parse(&strings(&["--wat"]), SPECS),
            Err(ArgError::UnknownOption("--wat".to_string()))
        );
        assert_eq!(
            parse(&strings(&["-n"]), SPECS),
            Err(ArgError::MissingValue("--lines".to_string()))
        );
    }

    #[test]
    fn help_short_circuits() {
        let parsed = parse(&strings(&["-h"]), SPECS).expect("parse");
        assert!(parsed.help);
    }

    #[test]
    fn lone_dash_is_positional() {
        let parsed = parse(&strings(&["-"]), SPECS).expect("parse");
        assert_eq!(parsed.positionals(), &["-"]);
    }
}
