//! Echo demo worker
//!
//! Writes every request parameter back as `key=value` lines. Exists so the
//! bundled server has at least one runnable, registrable worker — the
//! interesting business logic of a "real" worker is out of scope (§1).

use crate::context::{ResponseContext, Sink};
use crate::error::ServerError;

use super::Worker;

pub struct EchoWorker;

impl Worker for EchoWorker {
    fn process(&self, ctx: &mut ResponseContext<Sink>) -> Result<(), ServerError> {
        ctx.set_mime_type("text/plain")?;
        let mut names: Vec<String> = ctx.get_parameter_names().iter().map(|s| s.to_string()).collect();
        names.sort();
        for name in names {
            let value = ctx.get_parameter(&name).unwrap_or("").to_string();
            ctx.write_str(&format!("{}={}\n", name, value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingSink;
    use dashmap::DashMap;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn echoes_sorted_parameters() {
        let mut params = HashMap::new();
        params.insert("b".to_string(), Some("2".to_string()));
        params.insert("a".to_string(), Some("1".to_string()));
        let sink = RecordingSink::new();
        let mut ctx = ResponseContext::new(Box::new(sink.clone()) as Sink, params, Arc::new(DashMap::new()));
        EchoWorker.process(&mut ctx).unwrap();
        let out = sink.text();
        assert!(out.contains("a=1\n"));
        assert!(out.contains("b=2\n"));
        assert!(out.find("a=1").unwrap() < out.find("b=2").unwrap());
    }
}
