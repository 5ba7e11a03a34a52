//! Action name → handler table. Every CLI command goes through here.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use serde_json::{json, Value};

use crate::app::Toolkit;
use crate::config::{validate_option, OptionStore, Settings};
use crate::db::{ContentSource, PostRepo};
use crate::models::ANALYSIS_TYPE_SEO;
use crate::store::ListFilter;

pub type Handler = fn(&mut Toolkit, &Value) -> Result<Value>;

pub struct Router {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for Router {
    fn default() -> Self {
        let mut router = Router::empty();
        router.register("post.add", post_add);
        router.register("post.list", post_list);
        router.register("post.delete", post_delete);
        router.register("seo.analyze", seo_analyze);
        router.register("seo.batch", seo_batch);
        router.register("seo.get", seo_get);
        router.register("seo.list", seo_list);
        router.register("seo.delete", seo_delete);
        router.register("seo.clear", seo_clear);
        router.register("seo.prune", seo_prune);
        router.register("seo.stats", seo_stats);
        router.register("settings.get", settings_get);
        router.register("settings.set", settings_set);
        router.register("settings.show", settings_show);
        router
    }
}

impl Router {
    pub fn empty() -> Self {
        Router {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, action: &'static str, handler: Handler) {
        self.handlers.insert(action, handler);
    }

    pub fn dispatch(&self, kit: &mut Toolkit, action: &str, params: &Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(action)
            .ok_or_else(|| anyhow!("unknown action '{}'", action))?;
        handler(kit, params)
    }

    pub fn actions(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

// ── Params ──

/// Integers or integer strings.
fn as_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn req_i64(params: &Value, key: &str) -> Result<i64> {
    as_id(&params[key]).ok_or_else(|| anyhow!("missing or invalid integer parameter '{}'", key))
}

/// Rejects the whole list if any entry is not an id.
fn id_list(items: &[Value]) -> Result<Vec<i64>> {
    let (ids, invalid): (Vec<_>, Vec<_>) = items.iter().partition(|v| as_id(v).is_some());
    if !invalid.is_empty() {
        bail!(
            "invalid post ids: {}",
            invalid.iter().map(|v| v.to_string()).join(", ")
        );
    }
    Ok(ids.into_iter().filter_map(as_id).collect())
}

fn req_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params[key]
        .as_str()
        .ok_or_else(|| anyhow!("missing string parameter '{}'", key))
}

fn opt_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params[key].as_str().filter(|s| !s.is_empty())
}

fn opt_usize(params: &Value, key: &str) -> Option<usize> {
    params[key].as_u64().map(|n| n as usize)
}

fn analysis_type(params: &Value) -> &str {
    opt_str(params, "analysis_type").unwrap_or(ANALYSIS_TYPE_SEO)
}

// ── Posts ──

fn post_add(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let title = req_str(params, "title")?;
    let content = req_str(params, "content")?;
    if title.trim().is_empty() {
        bail!("title must not be empty");
    }
    let id = PostRepo::new(&kit.conn).insert(title, content, opt_str(params, "excerpt"))?;
    Ok(json!({ "id": id }))
}

fn post_list(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let limit = opt_usize(params, "limit").unwrap_or(50);
    let rows = PostRepo::new(&kit.conn).list(limit)?;
    Ok(Value::Array(
        rows.into_iter()
            .map(|(id, title)| json!({ "id": id, "title": title }))
            .collect(),
    ))
}

/// Leaves the post's analyses in place; `seo.prune` removes them.
fn post_delete(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let id = req_i64(params, "id")?;
    let deleted = PostRepo::new(&kit.conn).delete(id)?;
    Ok(json!({ "deleted": deleted }))
}

// ── Analyses ──

fn seo_analyze(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let post_id = req_i64(params, "post_id")?;
    let source = PostRepo::new(&kit.conn);
    let outcome = kit.analyzer.run(
        &kit.conn,
        &mut kit.store,
        &source,
        kit.client.as_ref(),
        post_id,
    )?;
    Ok(serde_json::to_value(outcome)?)
}

fn seo_batch(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let limit = opt_usize(params, "limit");
    let source = PostRepo::new(&kit.conn);
    let ids: Vec<i64> = match &params["post_ids"] {
        Value::Array(arr) => id_list(arr)?,
        _ if params["all"].as_bool().unwrap_or(false) => source.post_ids(limit)?,
        _ => kit.store.pending(&kit.conn, ANALYSIS_TYPE_SEO, limit)?,
    };
    if ids.is_empty() {
        return Ok(json!({ "processed": 0, "remaining": [], "stopped_early": false }));
    }

    let pb = ProgressBar::new(ids.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    let ceiling = kit.batch_ceiling();
    let report = kit.analyzer.batch(
        &kit.conn,
        &mut kit.store,
        &source,
        kit.client.as_ref(),
        &ids,
        ceiling,
        |post_id, status| {
            pb.set_message(format!(
                "post {} {}",
                post_id,
                status.map(|s| s.as_str()).unwrap_or("missing")
            ));
            pb.inc(1);
        },
    )?;
    pb.finish_and_clear();
    Ok(serde_json::to_value(report)?)
}

fn seo_get(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let post_id = req_i64(params, "post_id")?;
    let found = kit.store.get(&kit.conn, post_id, analysis_type(params))?;
    Ok(serde_json::to_value(found)?)
}

fn seo_list(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let filter = ListFilter {
        min_score: params["min_score"].as_f64(),
        max_score: params["max_score"].as_f64(),
        limit: opt_usize(params, "limit").unwrap_or(50),
    };
    let rows = kit.store.list(&kit.conn, analysis_type(params), &filter)?;
    Ok(serde_json::to_value(rows)?)
}

fn seo_delete(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let post_id = req_i64(params, "post_id")?;
    let deleted = kit.store.delete(&kit.conn, post_id, analysis_type(params))?;
    Ok(json!({ "deleted": deleted }))
}

fn seo_clear(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let scope = match opt_str(params, "analysis_type") {
        Some("all") => None,
        Some(t) => Some(t),
        None => Some(ANALYSIS_TYPE_SEO),
    };
    let removed = kit.store.clear(&kit.conn, scope)?;
    Ok(json!({ "removed": removed }))
}

fn seo_prune(kit: &mut Toolkit, _params: &Value) -> Result<Value> {
    let removed = kit.store.prune_orphans(&kit.conn)?;
    Ok(json!({ "removed": removed }))
}

fn seo_stats(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let stats = kit.store.stats(&kit.conn, analysis_type(params))?;
    Ok(serde_json::to_value(stats)?)
}

// ── Settings ──

fn settings_get(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let key = req_str(params, "key")?;
    let default = Settings::default_value(key).ok_or_else(|| anyhow!("unknown setting '{}'", key))?;
    let value = kit.options().get(key, &default)?;
    let shown = if key == "api_key" && !value.is_empty() {
        kit.settings.redacted().api_key
    } else {
        value
    };
    Ok(json!({ "key": key, "value": shown }))
}

fn settings_set(kit: &mut Toolkit, params: &Value) -> Result<Value> {
    let key = req_str(params, "key")?;
    let value = match &params["value"] {
        Value::String(s) => s.clone(),
        Value::Null => bail!("missing parameter 'value'"),
        other => other.to_string(),
    };
    validate_option(key, &value)?;
    kit.options().set(key, &value)?;
    kit.reload_settings()?;
    Ok(json!({ "key": key, "saved": true }))
}

fn settings_show(kit: &mut Toolkit, _params: &Value) -> Result<Value> {
    Ok(serde_json::to_value(kit.settings.redacted())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, Completer};
    use crate::db;

    struct Offline;

    impl Completer for Offline {
        fn complete(&self, _prompt: &str) -> std::result::Result<String, ClientError> {
            Err(ClientError::Transport("offline".into()))
        }
        fn provider(&self) -> &str {
            "offline"
        }
        fn model(&self) -> &str {
            "none"
        }
    }

    fn kit() -> Toolkit {
        Toolkit::with_client(db::open_in_memory().unwrap(), Box::new(Offline)).unwrap()
    }

    #[test]
    fn unknown_action_is_an_error() {
        let router = Router::default();
        let err = router.dispatch(&mut kit(), "seo.explode", &json!({})).unwrap_err();
        assert!(err.to_string().contains("seo.explode"));
    }

    #[test]
    fn registers_every_action() {
        let actions = Router::default().actions();
        assert!(actions.contains(&"seo.analyze"));
        assert!(actions.contains(&"settings.set"));
        assert_eq!(actions.len(), 14);
    }

    #[test]
    fn settings_round_trip_through_options() {
        let router = Router::default();
        let mut kit = kit();
        router
            .dispatch(&mut kit, "settings.set", &json!({"key": "timeout", "value": 45}))
            .unwrap();
        assert_eq!(kit.settings.timeout, 45);
        let got = router
            .dispatch(&mut kit, "settings.get", &json!({"key": "timeout"}))
            .unwrap();
        assert_eq!(got["value"], json!("45"));
        assert!(router
            .dispatch(&mut kit, "settings.set", &json!({"key": "timeout", "value": "later"}))
            .is_err());
    }

    #[test]
    fn failed_analysis_is_not_persisted() {
        let router = Router::default();
        let mut kit = kit();
        let added = router
            .dispatch(&mut kit, "post.add", &json!({"title": "Offline post", "content": "<p>hi</p>"}))
            .unwrap();
        let id = added["id"].as_i64().unwrap();
        let out = router
            .dispatch(&mut kit, "seo.analyze", &json!({"post_id": id}))
            .unwrap();
        assert_eq!(out["saved"], json!(false));
        assert_eq!(out["result"]["status"], json!("failed"));
        let got = router.dispatch(&mut kit, "seo.get", &json!({"post_id": id})).unwrap();
        assert!(got.is_null());
    }

    #[test]
    fn batch_ids_accept_numeric_strings_and_reject_junk() {
        assert_eq!(id_list(&[json!(3), json!(" 7 ")]).unwrap(), vec![3, 7]);

        let router = Router::default();
        let err = router
            .dispatch(&mut kit(), "seo.batch", &json!({"post_ids": [1, "two", null]}))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"two\""), "{}", msg);
        assert!(msg.contains("null"), "{}", msg);
    }

    #[test]
    fn analyzing_a_missing_post_fails() {
        let router = Router::default();
        assert!(router
            .dispatch(&mut kit(), "seo.analyze", &json!({"post_id": 404}))
            .is_err());
    }
}
