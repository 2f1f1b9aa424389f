//! Executes parsed commands against a `Core` and renders JSON replies.

use anyhow::{Result, anyhow};
use ringcore_engine::Core;
use ringcore_types::{Identity, Value};
use serde_json::{Map, json};

use crate::command::Command;

pub struct Session {
    core: Core,
}

impl Session {
    pub fn new(core: Core) -> Self {
        Self { core }
    }

    /// One reply per non-blank line. Failures become `{"error": ...}`.
    pub async fn run_line(&self, line: &str) -> Option<Value> {
        match Command::parse(line) {
            Ok(None) => None,
            Ok(Some(command)) => Some(match self.execute(command).await {
                Ok(reply) => reply,
                Err(err) => error_reply(&err),
            }),
            Err(err) => Some(error_reply(&err)),
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Value> {
        let core = &self.core;
        let reply = match command {
            Command::Invoke(rank) => json!({ "coordinate": core.invoke(rank)? }),
            Command::Ascend => json!({ "coordinate": core.ascend()? }),
            Command::Descend => json!({ "coordinate": core.descend()? }),
            Command::Reset => json!({ "coordinate": core.reset() }),
            Command::Where => json!({ "coordinate": core.current() }),
            Command::Collapse(ring) => json!({ "ring": ring, "removed": core.collapse(ring) }),
            Command::Stats => serde_json::to_value(core.cache_stats())?,
            Command::Eval { substrate, params } => {
                let identity = self.resolve(&substrate)?;
                let evaluation = core.evaluate(identity, &params).await?;
                json!({
                    "substrate": substrate,
                    "identity": identity,
                    "coordinate": core.current(),
                    "outcome": evaluation.outcome,
                    "result": evaluation.value,
                })
            }
            Command::Lens {
                lens,
                substrate,
                params,
                context,
            } => {
                let identity = self.resolve(&substrate)?;
                let derived = core.apply_lens(&lens, identity, &params, context).await?;
                json!({ "lens": lens, "substrate": substrate, "result": derived })
            }
            Command::Lenses {
                substrate,
                params,
                context,
            } => {
                let identity = self.resolve(&substrate)?;
                let results = core.apply_all_lenses(identity, &params, context).await?;
                let mut rendered = Map::new();
                for (name, result) in results {
                    let entry = match result {
                        Ok(value) => json!({ "ok": value }),
                        Err(err) => json!({ "error": err.to_string(), "code": err.code() }),
                    };
                    rendered.insert(name, entry);
                }
                json!({ "substrate": substrate, "lenses": rendered })
            }
        };
        Ok(reply)
    }

    fn resolve(&self, name: &str) -> Result<Identity> {
        self.core
            .store()
            .lookup_by_name(name)
            .map(|substrate| substrate.identity())
            .ok_or_else(|| anyhow!("unknown substrate '{name}'"))
    }
}

fn error_reply(err: &anyhow::Error) -> Value {
    json!({ "error": format!("{err:#}") })
}
