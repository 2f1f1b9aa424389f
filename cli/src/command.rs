//! Parsing of driver script lines.
//!
//! ```text
//! invoke <rank> | ascend | descend | reset | where | stats
//! eval <substrate> [key=value ...]
//! lens <lens> <substrate> [key=value ...] [@attr=value ...]
//! lenses <substrate> [key=value ...] [@attr=value ...]
//! collapse <ring>
//! ```
//!
//! Values are parsed as JSON when they can be and kept as strings otherwise,
//! so `x=5` is a number and `label=north` is a string.

use anyhow::{Context, Result, anyhow, bail};
use ringcore_engine::LensContext;
use ringcore_types::{Params, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Invoke(u8),
    Ascend,
    Descend,
    Reset,
    Where,
    Eval {
        substrate: String,
        params: Params,
    },
    Lens {
        lens: String,
        substrate: String,
        params: Params,
        context: LensContext,
    },
    Lenses {
        substrate: String,
        params: Params,
        context: LensContext,
    },
    Collapse(i64),
    Stats,
}

impl Command {
    /// `Ok(None)` for blank lines and `#` comments.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();

        let command = match verb {
            "invoke" => {
                let rank = single(verb, &rest)?;
                Command::Invoke(rank.parse().with_context(|| format!("invalid rank '{rank}'"))?)
            }
            "ascend" => no_args(verb, &rest, Command::Ascend)?,
            "descend" => no_args(verb, &rest, Command::Descend)?,
            "reset" => no_args(verb, &rest, Command::Reset)?,
            "where" => no_args(verb, &rest, Command::Where)?,
            "stats" => no_args(verb, &rest, Command::Stats)?,
            "collapse" => {
                let ring = single(verb, &rest)?;
                Command::Collapse(ring.parse().with_context(|| format!("invalid ring '{ring}'"))?)
            }
            "eval" => {
                let (substrate, args) = rest
                    .split_first()
                    .ok_or_else(|| anyhow!("usage: eval <substrate> [key=value ...]"))?;
                let (params, context) = assignments(args)?;
                if !context.attributes.is_empty() {
                    bail!("eval does not take lens attributes");
                }
                Command::Eval {
                    substrate: (*substrate).to_string(),
                    params,
                }
            }
            "lens" => {
                let [lens, substrate, args @ ..] = rest.as_slice() else {
                    bail!("usage: lens <lens> <substrate> [key=value ...] [@attr=value ...]");
                };
                let (params, context) = assignments(args)?;
                Command::Lens {
                    lens: (*lens).to_string(),
                    substrate: (*substrate).to_string(),
                    params,
                    context,
                }
            }
            "lenses" => {
                let (substrate, args) = rest.split_first().ok_or_else(|| {
                    anyhow!("usage: lenses <substrate> [key=value ...] [@attr=value ...]")
                })?;
                let (params, context) = assignments(args)?;
                Command::Lenses {
                    substrate: (*substrate).to_string(),
                    params,
                    context,
                }
            }
            other => bail!("unknown command '{other}'"),
        };
        Ok(Some(command))
    }
}

fn single<'a>(verb: &str, rest: &[&'a str]) -> Result<&'a str> {
    match rest {
        [only] => Ok(*only),
        _ => bail!("{verb} takes exactly one argument"),
    }
}

fn no_args(verb: &str, rest: &[&str], command: Command) -> Result<Command> {
    if rest.is_empty() {
        Ok(command)
    } else {
        bail!("{verb} takes no arguments")
    }
}

fn assignments(args: &[&str]) -> Result<(Params, LensContext)> {
    let mut params = Params::new();
    let mut context = LensContext::new();
    for arg in args {
        let (key, raw) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got '{arg}'"))?;
        if let Some(attribute) = key.strip_prefix('@') {
            context = context.with(attribute, parse_value(raw));
        } else if key.is_empty() {
            bail!("empty key in '{arg}'");
        } else {
            params.insert(key, parse_value(raw));
        }
    }
    Ok((params, context))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
